use nalgebra::{Matrix4, Point3, Vector3};

use rendering::CameraState;

/// A fixed look-at camera. The renderer only consumes the matrices this
/// produces; all camera math stays here.
pub struct Camera {
    pub position: Point3<f32>,
    pub target: Point3<f32>,
    fov_y: f32,
    near: f32,
    far: f32,
    aspect: f32,
}

impl Camera {
    pub fn new(aspect: f32) -> Camera {
        Camera {
            position: Point3::new(0.0, 1.0, 3.0),
            target: Point3::origin(),
            fov_y: std::f32::consts::FRAC_PI_3,
            near: 0.1,
            far: 100.0,
            aspect,
        }
    }

    pub fn resize(&mut self, extent: [u32; 2]) {
        if extent[1] > 0 {
            self.aspect = extent[0] as f32 / extent[1] as f32;
        }
    }

    pub fn state(&self) -> CameraState {
        let view = Matrix4::look_at_rh(&self.position, &self.target, &Vector3::y());

        let projection =
            Matrix4::new_perspective(self.aspect, self.fov_y, self.near, self.far);
        // Vulkan clip space has Y pointing down.
        let flip_y = Matrix4::new_nonuniform_scaling(&Vector3::new(1.0, -1.0, 1.0));

        let pv = flip_y * projection * view;

        CameraState {
            pv,
            inverse_pv: pv.try_inverse().unwrap_or_else(Matrix4::identity),
            position: [self.position.x, self.position.y, self.position.z],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_pv_round_trips() {
        let camera = Camera::new(16.0 / 9.0);
        let state = camera.state();

        let identity = state.pv * state.inverse_pv;
        for row in 0..4 {
            for column in 0..4 {
                let expected = if row == column { 1.0 } else { 0.0 };
                assert!((identity[(row, column)] - expected).abs() < 1e-4);
            }
        }
    }
}
