use thiserror::Error;
use vulkano::format::Format;
use vulkano::{Validated, ValidationError, VulkanError};

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] gpu::GpuError),
    #[error(transparent)]
    Asset(#[from] asset::AssetError),
    #[error(transparent)]
    Ui(#[from] ui::UiError),
    #[error("shader compilation failed: {0}")]
    SpirvCompile(#[from] asset::ShaderError),
    #[error("SPIR-V reflection failed: {0}")]
    Reflection(String),
    #[error("descriptor sets are not contiguous: used sets {used:?}")]
    ShaderResourceSetGap { used: Vec<u32> },
    #[error("primitive is missing its {0} vertex attribute")]
    MissingRequiredVertexAttribute(&'static str),
    #[error("bindless {kind} index {index} exceeds the limit {limit}")]
    BindlessIndexOverflow {
        kind: &'static str,
        index: u32,
        limit: u32,
    },
    #[error("shader resource {name} has unsupported type {kind:?} for its set")]
    UnsupportedShaderResource { name: String, kind: &'static str },
    #[error("attachment {name} is declared as {declared:?} but the swapchain format is {actual:?}")]
    SwapchainFormatMismatch {
        name: String,
        declared: Format,
        actual: Format,
    },
    #[error("no shared image view named {0} has been published")]
    MissingSharedImageView(String),
    #[error("subpass {subpass} has no {stage} shader")]
    MissingShaderStage { subpass: String, stage: &'static str },
    #[error("render pass {0} has no subpass {1}")]
    InvalidSubpassIndex(String, u32),
    #[error("presentation failed: {0}")]
    Present(VulkanError),
    #[error(transparent)]
    Vulkan(#[from] Validated<VulkanError>),
    #[error(transparent)]
    VulkanRaw(#[from] VulkanError),
    #[error("invalid command: {0}")]
    Validation(#[from] Box<ValidationError>),
    #[error("command buffer execution failed: {0}")]
    Execution(#[from] vulkano::command_buffer::CommandBufferExecError),
    #[error("host access failed: {0}")]
    HostAccess(#[from] vulkano::sync::HostAccessError),
    #[error("failed to read cache file: {0}")]
    CacheIo(#[from] std::io::Error),
    #[error("failed to build the worker pool: {0}")]
    ThreadPool(String),
}
