use nalgebra::Matrix4;

/// Per-view matrices the subpass uniform is refreshed from each frame. The
/// camera collaborator produces one of these; the renderer never does camera
/// math itself.
#[derive(Debug, Clone)]
pub struct CameraState {
    pub pv: Matrix4<f32>,
    pub inverse_pv: Matrix4<f32>,
    pub position: [f32; 3],
}

impl Default for CameraState {
    fn default() -> Self {
        CameraState {
            pv: Matrix4::identity(),
            inverse_pv: Matrix4::identity(),
            position: [0.0, 0.0, 0.0],
        }
    }
}

/// Column-major conversion for std140 mat4 uniforms.
pub fn matrix_to_array(matrix: &Matrix4<f32>) -> [[f32; 4]; 4] {
    let mut out = [[0.0f32; 4]; 4];
    for column in 0..4 {
        for row in 0..4 {
            out[column][row] = matrix[(row, column)];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_conversion_is_column_major() {
        let translation = Matrix4::new_translation(&nalgebra::Vector3::new(1.0, 2.0, 3.0));
        let array = matrix_to_array(&translation);
        // The translation column is the last one in column-major layout.
        assert_eq!(array[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(array[0], [1.0, 0.0, 0.0, 0.0]);
    }
}
