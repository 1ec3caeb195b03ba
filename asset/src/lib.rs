mod asset;
pub mod config;
mod error;
pub mod frame_graph;
pub mod light;
pub mod loader;
pub mod scene_graph;
pub mod shader;

pub use asset::Assets;
pub use config::Config;
pub use error::{AssetError, FrameGraphError, ShaderError};
pub use frame_graph::{Attachment, AttachmentUsage, EnabledScene, FrameGraph, PassDesc, PassType, SubpassDesc};
pub use light::{LightAsset, PunctualLight, PunctualLightType, PUNCTUAL_LIGHT_MAX_COUNT};
pub use shader::{Shader, ShaderStageKind};
