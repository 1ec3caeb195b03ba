use asset::scene_graph::{AlphaMode, Material, MATERIAL_TEXTURE_NAMES};
use asset::PUNCTUAL_LIGHT_MAX_COUNT;

use crate::error::RenderError;

/// Inputs that make a draw element a scene draw: its material and the vertex
/// attribute semantics the primitive carries.
pub struct SceneProcessInputs<'a> {
    pub material: &'a Material,
    pub vertex_attribute_names: Vec<&'a str>,
}

/// Builds the preprocessor "process" list for one draw element. Every entry
/// keeps the glslang-style `D` prefix; the same strings feed the SPIR-V
/// content hash.
pub fn assemble_processes(
    scene: Option<SceneProcessInputs<'_>>,
    punctual_light_count: Option<usize>,
) -> Result<Vec<String>, RenderError> {
    let mut processes = vec![
        "DPI 3.14159265359".to_string(),
        format!("DOPAQUE_ALPHA {}", AlphaMode::Opaque as u32),
        format!("DMASK_ALPHA {}", AlphaMode::Mask as u32),
        format!("DBLEND_ALPHA {}", AlphaMode::Blend as u32),
        format!("DPUNCTUAL_LIGHT_MAX_COUNT {PUNCTUAL_LIGHT_MAX_COUNT}"),
    ];

    if let Some(scene) = &scene {
        for wanted_texture in MATERIAL_TEXTURE_NAMES {
            if scene.material.textures.contains_key(wanted_texture) {
                processes.push(format!("DHAS_{}", wanted_texture.to_uppercase()));
            }
        }

        let mut has_position = false;
        let mut has_normal = false;
        for name in &scene.vertex_attribute_names {
            match *name {
                "POSITION" => has_position = true,
                "NORMAL" => has_normal = true,
                other => processes.push(format!("DHAS_{}_BUFFER", other.to_uppercase())),
            }
        }
        if !has_position {
            return Err(RenderError::MissingRequiredVertexAttribute("POSITION"));
        }
        if !has_normal {
            return Err(RenderError::MissingRequiredVertexAttribute("NORMAL"));
        }

        if scene.material.alpha_mode == AlphaMode::Mask {
            processes.push("DHAS_MASK_ALPHA".to_string());
        }
    }

    if let Some(light_count) = punctual_light_count {
        processes.push("DDIRECTIONAL_LIGHT 0".to_string());
        processes.push("DPOINT_LIGHT 1".to_string());
        processes.push("DSPOT_LIGHT 2".to_string());
        processes.push(format!("DPUNCTUAL_LIGHT_COUNT {light_count}"));
    }

    Ok(processes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material_with(textures: &[&'static str], alpha_mode: AlphaMode) -> Material {
        let mut material = Material::default();
        for (slot, name) in textures.iter().enumerate() {
            material.textures.insert(name, slot);
        }
        material.alpha_mode = alpha_mode;
        material
    }

    #[test]
    fn always_defines_common_macros() {
        let processes = assemble_processes(None, None).unwrap();
        assert!(processes.contains(&"DPI 3.14159265359".to_string()));
        assert!(processes.contains(&"DOPAQUE_ALPHA 0".to_string()));
        assert!(processes.contains(&"DBLEND_ALPHA 2".to_string()));
        assert!(processes.contains(&"DPUNCTUAL_LIGHT_MAX_COUNT 8".to_string()));
    }

    #[test]
    fn scene_draws_define_texture_and_attribute_macros() {
        let material = material_with(&["base_color_texture", "normal_texture"], AlphaMode::Opaque);
        let processes = assemble_processes(
            Some(SceneProcessInputs {
                material: &material,
                vertex_attribute_names: vec!["NORMAL", "POSITION", "TEXCOORD_0"],
            }),
            None,
        )
        .unwrap();

        assert!(processes.contains(&"DHAS_BASE_COLOR_TEXTURE".to_string()));
        assert!(processes.contains(&"DHAS_NORMAL_TEXTURE".to_string()));
        assert!(processes.contains(&"DHAS_TEXCOORD_0_BUFFER".to_string()));
        assert!(!processes.iter().any(|p| p == "DHAS_POSITION_BUFFER"));
        assert!(!processes.iter().any(|p| p == "DHAS_NORMAL_BUFFER"));
    }

    #[test]
    fn mask_materials_define_the_mask_macro() {
        let material = material_with(&[], AlphaMode::Mask);
        let processes = assemble_processes(
            Some(SceneProcessInputs {
                material: &material,
                vertex_attribute_names: vec!["POSITION", "NORMAL"],
            }),
            None,
        )
        .unwrap();

        assert!(processes.contains(&"DHAS_MASK_ALPHA".to_string()));
    }

    #[test]
    fn missing_position_or_normal_fails_the_build() {
        let material = material_with(&[], AlphaMode::Opaque);
        let result = assemble_processes(
            Some(SceneProcessInputs {
                material: &material,
                vertex_attribute_names: vec!["POSITION"],
            }),
            None,
        );

        assert!(matches!(
            result,
            Err(RenderError::MissingRequiredVertexAttribute("NORMAL"))
        ));
    }

    #[test]
    fn lights_define_type_tags_and_count() {
        let processes = assemble_processes(None, Some(3)).unwrap();
        assert!(processes.contains(&"DPOINT_LIGHT 1".to_string()));
        assert!(processes.contains(&"DPUNCTUAL_LIGHT_COUNT 3".to_string()));
    }
}
