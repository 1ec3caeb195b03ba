use thiserror::Error;
use vulkano::buffer::AllocateBufferError;
use vulkano::command_buffer::CommandBufferExecError;
use vulkano::image::AllocateImageError;
use vulkano::library::LoadingError;
use vulkano::sync::HostAccessError;
use vulkano::{Validated, ValidationError, VulkanError};

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("failed to initialize device: {0}")]
    DeviceInit(String),
    #[error("failed to load Vulkan library: {0}")]
    Library(#[from] LoadingError),
    #[error("descriptor set allocation failed: {0}")]
    DescriptorAllocation(#[source] Validated<VulkanError>),
    #[error("buffer allocation failed: {0}")]
    AllocateBuffer(#[from] Validated<AllocateBufferError>),
    #[error("image allocation failed: {0}")]
    AllocateImage(#[from] Validated<AllocateImageError>),
    #[error(transparent)]
    Vulkan(#[from] Validated<VulkanError>),
    #[error(transparent)]
    VulkanRaw(#[from] VulkanError),
    #[error("invalid command: {0}")]
    Validation(#[from] Box<ValidationError>),
    #[error("command buffer execution failed: {0}")]
    Execution(#[from] CommandBufferExecError),
    #[error("host access failed: {0}")]
    HostAccess(#[from] HostAccessError),
    #[error("window error: {0}")]
    Window(#[from] windowing::window::WindowError),
}
