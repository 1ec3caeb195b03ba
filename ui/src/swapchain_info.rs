use vulkano::format::Format;
use vulkano::swapchain::{ColorSpace, PresentMode};

/// Swapchain parameters the renderer reads each frame and on resize.
#[derive(Debug, Clone)]
pub struct SwapchainInfo {
    pub image_count: u32,
    pub color_format: Format,
    pub color_space: ColorSpace,
    pub extent: [u32; 2],
    pub present_mode: PresentMode,
    pub depth_stencil_format: Format,
}
