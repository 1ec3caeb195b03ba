use bytemuck::{Pod, Zeroable};
use vulkano::buffer::BufferContents;

use asset::{PunctualLight, PUNCTUAL_LIGHT_MAX_COUNT};

/// Per-view uniform shared by every draw element of a subpass. std140.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, BufferContents)]
pub struct SubpassUniform {
    pub pv: [[f32; 4]; 4],
    pub inverse_pv: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    pub punctual_lights: [PunctualLight; PUNCTUAL_LIGHT_MAX_COUNT],
}

impl Default for SubpassUniform {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

/// Per-draw-element uniform: object transform, bindless indices and material
/// factors. std140.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, BufferContents)]
pub struct DrawElementUniform {
    pub model: [[f32; 4]; 4],
    pub inverse_model: [[f32; 4]; 4],
    pub sampler_indices_0: [u32; 4],
    pub sampler_indices_1: [u32; 4],
    pub image_indices_0: [u32; 4],
    pub image_indices_1: [u32; 4],
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
    pub normal_scale: f32,
    pub occlusion_strength: f32,
    pub emissive_factor: [f32; 4],
    pub alpha_mode: u32,
    pub alpha_cutoff: f32,
    pub _padding: [f32; 2],
}

impl Default for DrawElementUniform {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_blocks_are_vec4_aligned() {
        // Both blocks must keep their std140 sizes stable; the GLSL side
        // mirrors these layouts field for field.
        assert_eq!(std::mem::size_of::<SubpassUniform>(), 128 + 16 + 80 * PUNCTUAL_LIGHT_MAX_COUNT);
        assert_eq!(std::mem::size_of::<DrawElementUniform>(), 256);
        assert_eq!(std::mem::size_of::<DrawElementUniform>() % 16, 0);
    }
}
