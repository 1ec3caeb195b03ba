use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use vulkano::format::Format;

use crate::error::FrameGraphError;

/// The attachment slot that aliases the swapchain image.
pub const SWAPCHAIN_ATTACHMENT_NAME: &str = "swapchain";
/// The subpass name that delegates to the UI overlay.
pub const UI_SUBPASS_NAME: &str = "ui";
/// The scene tag selecting blend-mode primitives.
pub const TRANSPARENCY_SCENE_TAG: &str = "transparency";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassType {
    Graphics,
    Compute,
}

impl Default for PassType {
    fn default() -> Self {
        PassType::Graphics
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentUsage {
    Input,
    Color,
    DepthStencil,
}

/// A logical framebuffer slot declared on a pass.
#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(deserialize_with = "deserialize_format")]
    pub format: Format,
    #[serde(default)]
    pub output: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubpassDesc {
    pub name: String,
    #[serde(default)]
    pub scene: String,
    #[serde(default)]
    pub lights: Vec<u32>,
    /// Shader stage key ("vertex", "fragment", "compute") to shader asset index.
    #[serde(default)]
    pub shaders: HashMap<String, u32>,
    /// Attachment usage to indices into the pass's attachment list.
    #[serde(default)]
    pub attachments: HashMap<AttachmentUsage, Vec<u32>>,
    /// Dispatch dimensions for compute subpasses.
    #[serde(default)]
    pub group_count: Option<[u32; 3]>,
}

impl SubpassDesc {
    pub fn has_scene(&self) -> bool {
        !self.scene.is_empty()
    }

    pub fn is_transparency(&self) -> bool {
        self.scene == TRANSPARENCY_SCENE_TAG
    }

    pub fn is_ui(&self) -> bool {
        self.name == UI_SUBPASS_NAME
    }

    pub fn attachment_indices(&self, usage: AttachmentUsage) -> &[u32] {
        self.attachments.get(&usage).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PassDesc {
    pub name: String,
    #[serde(rename = "type", default)]
    pub ty: PassType,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub subpasses: Vec<SubpassDesc>,
}

impl PassDesc {
    pub fn has_ui(&self) -> bool {
        self.subpasses.iter().any(SubpassDesc::is_ui)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnabledScene {
    pub index: u32,
    #[serde(default = "identity_matrix")]
    pub model: [[f32; 4]; 4],
}

fn identity_matrix() -> [[f32; 4]; 4] {
    [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

/// A data-driven description of one frame: an ordered pass list plus the
/// scenes it draws.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameGraph {
    pub passes: Vec<PassDesc>,
    #[serde(default)]
    pub enabled_scenes: Vec<EnabledScene>,
}

impl FrameGraph {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<FrameGraph, FrameGraphError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path).map_err(|source| FrameGraphError::Io {
            path: path.clone(),
            source,
        })?;

        let frame_graph: FrameGraph =
            serde_json::from_str(&text).map_err(|source| FrameGraphError::Json { path, source })?;

        frame_graph.validate()?;

        Ok(frame_graph)
    }

    /// Structural checks that must hold before any pass is built.
    pub fn validate(&self) -> Result<(), FrameGraphError> {
        for (pass_index, pass) in self.passes.iter().enumerate() {
            for (subpass_index, subpass) in pass.subpasses.iter().enumerate() {
                let depth_stencil = subpass.attachment_indices(AttachmentUsage::DepthStencil);
                if depth_stencil.len() > 1 {
                    return Err(FrameGraphError::TooManyDepthStencil {
                        pass: pass.name.clone(),
                        subpass: subpass.name.clone(),
                        count: depth_stencil.len(),
                    });
                }

                for indices in subpass.attachments.values() {
                    for &index in indices {
                        if index as usize >= pass.attachments.len() && !subpass.is_ui() {
                            return Err(FrameGraphError::AttachmentOutOfRange {
                                pass: pass.name.clone(),
                                subpass: subpass.name.clone(),
                                index,
                            });
                        }
                    }
                }

                if pass.ty == PassType::Graphics && !subpass.is_ui() {
                    for stage in ["vertex", "fragment"] {
                        if !subpass.shaders.contains_key(stage) {
                            return Err(FrameGraphError::MissingShaderStage {
                                pass: pass.name.clone(),
                                subpass: subpass.name.clone(),
                                stage,
                            });
                        }
                    }
                }

                // The UI overlay records into the tail of the frame; anywhere
                // else its render pass reuse would be ambiguous.
                if subpass.is_ui()
                    && (pass_index != self.passes.len() - 1
                        || subpass_index != pass.subpasses.len() - 1)
                {
                    return Err(FrameGraphError::UiPassNotLast);
                }
            }
        }

        Ok(())
    }
}

fn deserialize_format<'de, D>(deserializer: D) -> Result<Format, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    parse_format(&name).ok_or_else(|| D::Error::custom(format!("unknown format {name:?}")))
}

/// Attachment formats the frame graph JSON may name.
pub fn parse_format(name: &str) -> Option<Format> {
    match name {
        "B8G8R8A8_UNORM" => Some(Format::B8G8R8A8_UNORM),
        "B8G8R8A8_SRGB" => Some(Format::B8G8R8A8_SRGB),
        "R8G8B8A8_UNORM" => Some(Format::R8G8B8A8_UNORM),
        "R8G8B8A8_SRGB" => Some(Format::R8G8B8A8_SRGB),
        "R16G16B16A16_SFLOAT" => Some(Format::R16G16B16A16_SFLOAT),
        "R32G32B32A32_SFLOAT" => Some(Format::R32G32B32A32_SFLOAT),
        "A2B10G10R10_UNORM_PACK32" => Some(Format::A2B10G10R10_UNORM_PACK32),
        "R8_UNORM" => Some(Format::R8_UNORM),
        "D32_SFLOAT" => Some(Format::D32_SFLOAT),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(json: &str) -> Result<FrameGraph, FrameGraphError> {
        let frame_graph: FrameGraph = serde_json::from_str(json).unwrap();
        frame_graph.validate().map(|_| frame_graph)
    }

    #[test]
    fn parses_a_two_pass_graph() {
        let frame_graph = graph(
            r#"{
            "enabled_scenes": [{ "index": 0 }],
            "passes": [
                {
                    "name": "geometry",
                    "attachments": [
                        { "name": "color", "format": "R16G16B16A16_SFLOAT", "output": true },
                        { "name": "depth", "format": "D32_SFLOAT" }
                    ],
                    "subpasses": [
                        {
                            "name": "opaque",
                            "scene": "all",
                            "shaders": { "vertex": 0, "fragment": 1 },
                            "attachments": { "color": [0], "depth_stencil": [1] }
                        }
                    ]
                },
                {
                    "name": "swapchain",
                    "attachments": [
                        { "name": "swapchain", "format": "B8G8R8A8_UNORM" }
                    ],
                    "subpasses": [
                        {
                            "name": "postprocess",
                            "shaders": { "vertex": 2, "fragment": 3 },
                            "attachments": { "color": [0] }
                        }
                    ]
                }
            ]
        }"#,
        )
        .unwrap();

        assert_eq!(frame_graph.passes.len(), 2);
        assert_eq!(frame_graph.enabled_scenes[0].index, 0);
        assert_eq!(frame_graph.passes[0].attachments[0].format, Format::R16G16B16A16_SFLOAT);
        assert!(frame_graph.passes[0].attachments[0].output);
        assert!(!frame_graph.passes[1].attachments[0].output);
        assert!(frame_graph.passes[0].subpasses[0].has_scene());
        assert!(!frame_graph.passes[1].subpasses[0].has_scene());
    }

    #[test]
    fn rejects_two_depth_stencil_attachments() {
        let result = graph(
            r#"{
            "passes": [{
                "name": "p",
                "attachments": [
                    { "name": "d0", "format": "D32_SFLOAT" },
                    { "name": "d1", "format": "D32_SFLOAT" }
                ],
                "subpasses": [{
                    "name": "s",
                    "shaders": { "vertex": 0, "fragment": 1 },
                    "attachments": { "depth_stencil": [0, 1] }
                }]
            }]
        }"#,
        );

        assert!(matches!(result, Err(FrameGraphError::TooManyDepthStencil { .. })));
    }

    #[test]
    fn rejects_graphics_subpass_without_fragment_shader() {
        let result = graph(
            r#"{
            "passes": [{
                "name": "p",
                "attachments": [{ "name": "c", "format": "B8G8R8A8_UNORM" }],
                "subpasses": [{
                    "name": "s",
                    "shaders": { "vertex": 0 },
                    "attachments": { "color": [0] }
                }]
            }]
        }"#,
        );

        assert!(matches!(result, Err(FrameGraphError::MissingShaderStage { .. })));
    }

    #[test]
    fn rejects_ui_subpass_that_is_not_last() {
        let result = graph(
            r#"{
            "passes": [
                {
                    "name": "ui",
                    "attachments": [{ "name": "swapchain", "format": "B8G8R8A8_UNORM" }],
                    "subpasses": [{ "name": "ui" }]
                },
                {
                    "name": "p",
                    "attachments": [{ "name": "c", "format": "B8G8R8A8_UNORM" }],
                    "subpasses": [{
                        "name": "s",
                        "shaders": { "vertex": 0, "fragment": 1 },
                        "attachments": { "color": [0] }
                    }]
                }
            ]
        }"#,
        );

        assert!(matches!(result, Err(FrameGraphError::UiPassNotLast)));
    }

    #[test]
    fn rejects_attachment_index_out_of_range() {
        let result = graph(
            r#"{
            "passes": [{
                "name": "p",
                "attachments": [{ "name": "c", "format": "B8G8R8A8_UNORM" }],
                "subpasses": [{
                    "name": "s",
                    "shaders": { "vertex": 0, "fragment": 1 },
                    "attachments": { "color": [3] }
                }]
            }]
        }"#,
        );

        assert!(matches!(result, Err(FrameGraphError::AttachmentOutOfRange { index: 3, .. })));
    }

    #[test]
    fn unknown_format_fails_to_parse() {
        let result: Result<Attachment, _> =
            serde_json::from_str(r#"{ "name": "c", "format": "R5G5B5A1" }"#);
        assert!(result.is_err());
    }
}
