use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use serde::Deserialize;
use vulkano::buffer::BufferContents;

use crate::error::AssetError;

/// Upper bound on punctual lights a subpass uniform can carry.
pub const PUNCTUAL_LIGHT_MAX_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunctualLightType {
    Directional = 0,
    Point = 1,
    Spot = 2,
}

/// GPU layout of one punctual light, shared with the subpass uniform block.
/// Layout follows std140: three vec4s followed by one vec4-aligned scalar row.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, BufferContents)]
pub struct PunctualLight {
    pub position: [f32; 4],
    pub direction: [f32; 4],
    pub color: [f32; 4],
    pub light_type: u32,
    pub intensity: f32,
    pub range: f32,
    pub inner_cone_cos: f32,
    pub outer_cone_cos: f32,
    pub _padding: [f32; 3],
}

#[derive(Debug, Deserialize)]
struct PunctualLightDesc {
    #[serde(rename = "type")]
    ty: PunctualLightType,
    #[serde(default)]
    position: [f32; 3],
    #[serde(default = "default_direction")]
    direction: [f32; 3],
    #[serde(default = "default_color")]
    color: [f32; 3],
    #[serde(default = "default_intensity")]
    intensity: f32,
    #[serde(default = "default_range")]
    range: f32,
    #[serde(default)]
    inner_cone_angle: f32,
    #[serde(default = "default_outer_cone_angle")]
    outer_cone_angle: f32,
}

fn default_direction() -> [f32; 3] {
    [0.0, -1.0, 0.0]
}

fn default_color() -> [f32; 3] {
    [1.0, 1.0, 1.0]
}

fn default_intensity() -> f32 {
    1.0
}

fn default_range() -> f32 {
    0.0
}

fn default_outer_cone_angle() -> f32 {
    std::f32::consts::FRAC_PI_4
}

impl From<&PunctualLightDesc> for PunctualLight {
    fn from(desc: &PunctualLightDesc) -> PunctualLight {
        PunctualLight {
            position: [desc.position[0], desc.position[1], desc.position[2], 1.0],
            direction: [desc.direction[0], desc.direction[1], desc.direction[2], 0.0],
            color: [desc.color[0], desc.color[1], desc.color[2], 1.0],
            light_type: desc.ty as u32,
            intensity: desc.intensity,
            range: desc.range,
            inner_cone_cos: desc.inner_cone_angle.cos(),
            outer_cone_cos: desc.outer_cone_angle.cos(),
            _padding: [0.0; 3],
        }
    }
}

/// A light asset file: a set of punctual lights referenced by index from
/// frame graph subpasses.
#[derive(Debug, Default)]
pub struct LightAsset {
    punctual_lights: Vec<PunctualLight>,
}

impl LightAsset {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<LightAsset, AssetError> {
        #[derive(Deserialize)]
        struct File {
            punctual_lights: Vec<PunctualLightDesc>,
        }

        let path: PathBuf = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path).map_err(|source| AssetError::Io {
            path: path.clone(),
            source,
        })?;
        let file: File =
            serde_json::from_str(&text).map_err(|source| AssetError::Json { path, source })?;

        Ok(LightAsset {
            punctual_lights: file.punctual_lights.iter().map(PunctualLight::from).collect(),
        })
    }

    pub fn punctual_lights(&self) -> &[PunctualLight] {
        &self.punctual_lights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_light_layout_is_std140_sized() {
        // Three vec4s plus one scalar row padded to a vec4 boundary.
        assert_eq!(std::mem::size_of::<PunctualLight>(), 80);
    }

    #[test]
    fn desc_converts_angles_to_cosines() {
        let desc = PunctualLightDesc {
            ty: PunctualLightType::Spot,
            position: [1.0, 2.0, 3.0],
            direction: [0.0, 0.0, -1.0],
            color: [1.0, 0.5, 0.25],
            intensity: 2.0,
            range: 10.0,
            inner_cone_angle: 0.0,
            outer_cone_angle: std::f32::consts::FRAC_PI_2,
        };

        let light = PunctualLight::from(&desc);
        assert_eq!(light.light_type, 2);
        assert!((light.inner_cone_cos - 1.0).abs() < 1e-6);
        assert!(light.outer_cone_cos.abs() < 1e-6);
        assert_eq!(light.position, [1.0, 2.0, 3.0, 1.0]);
    }

    #[test]
    fn parses_light_file_json() {
        let json = r#"{
            "punctual_lights": [
                { "type": "point", "position": [0, 2, 0], "intensity": 5.0, "range": 20.0 },
                { "type": "directional", "direction": [0, -1, 0] }
            ]
        }"#;

        #[derive(Deserialize)]
        struct File {
            punctual_lights: Vec<PunctualLightDesc>,
        }

        let file: File = serde_json::from_str(json).unwrap();
        assert_eq!(file.punctual_lights.len(), 2);
        assert_eq!(file.punctual_lights[0].intensity, 5.0);
    }
}
