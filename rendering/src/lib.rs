mod cache;
mod camera;
mod compute;
mod draw_element;
mod error;
mod framework;
mod pass;
mod primitives;
mod record;
mod spirv;
mod subpass;
mod uniform;
mod visibility;

pub use camera::CameraState;
pub use cache::{validate_pipeline_cache_header, ResourceCaches};
pub use compute::ComputeJob;
pub use draw_element::{DrawElement, DrawElementVertexInfo, DrawIndex};
pub use error::RenderError;
pub use framework::{Framework, TimelineSlot};
pub use pass::{Pass, PassBuildContext};
pub use primitives::{collect_scene_primitives, ScenePrimitive};
pub use spirv::{
    merge_shader_resources, partition_sets, SetPartition, ShaderResource, ShaderResourceKind,
    SpecializationConstant, Spirv,
};
pub use subpass::{
    assemble_processes, SceneProcessInputs, SubpassBuildContext, SubpassState,
    BINDLESS_IMAGE_MAX_COUNT, BINDLESS_SAMPLER_MAX_COUNT,
};
pub use uniform::{DrawElementUniform, SubpassUniform};
pub use visibility::SceneVisibility;

/// Draw-element count past which a subpass records through parallel
/// secondary command buffers.
pub const SECONDARY_RECORD_THRESHOLD: usize = 10;
