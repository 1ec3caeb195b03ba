use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use vulkano::command_buffer::{AutoCommandBufferBuilder, PrimaryAutoCommandBuffer};
use vulkano::format::Format;
use vulkano::image::view::ImageView;
use vulkano::image::{Image, ImageLayout, ImageUsage, SampleCount};
use vulkano::render_pass::{
    AttachmentDescription, AttachmentLoadOp, AttachmentReference, AttachmentStoreOp, RenderPass,
    RenderPassCreateInfo, SubpassDescription,
};
use vulkano::swapchain::{
    ColorSpace, PresentMode, Surface, SurfaceInfo, Swapchain, SwapchainCreateInfo,
};
use vulkano::{Validated, VulkanError};

use gpu::{Gpu, GpuError};

use crate::swapchain_info::SwapchainInfo;

#[derive(Debug, Error)]
pub enum UiError {
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Vulkan(#[from] Validated<VulkanError>),
    #[error("could not query the surface: {0}")]
    Surface(String),
}

pub type OverlayCallback =
    Box<dyn FnMut(&mut AutoCommandBufferBuilder<PrimaryAutoCommandBuffer>) + Send>;

/// Owns the swapchain and the render pass the trailing `ui` subpass records
/// into. The actual overlay is an opaque callback recording into the current
/// command buffer.
pub struct Gui {
    swapchain: Arc<Swapchain>,
    images: Vec<Arc<Image>>,
    image_views: Vec<Arc<ImageView>>,
    info: SwapchainInfo,
    ui_render_pass: Arc<RenderPass>,
    overlay: Option<OverlayCallback>,
}

impl Gui {
    pub fn new(gpu: &Gpu, extent: [u32; 2]) -> Result<Gui, UiError> {
        let (swapchain, images) = create_swapchain(gpu, gpu.surface(), extent)?;

        let image_views = images
            .iter()
            .map(|image| ImageView::new_default(image.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let info = SwapchainInfo {
            image_count: images.len() as u32,
            color_format: swapchain.image_format(),
            color_space: swapchain.image_color_space(),
            extent: swapchain.image_extent(),
            present_mode: swapchain.present_mode(),
            depth_stencil_format: Format::D32_SFLOAT,
        };

        info!(
            "swapchain: {} images, {:?}, {}x{}",
            info.image_count, info.color_format, info.extent[0], info.extent[1],
        );

        let ui_render_pass = create_ui_render_pass(gpu, swapchain.image_format())?;

        Ok(Gui {
            swapchain,
            images,
            image_views,
            info,
            ui_render_pass,
            overlay: None,
        })
    }

    pub fn swapchain(&self) -> Arc<Swapchain> {
        self.swapchain.clone()
    }

    pub fn swapchain_info(&self) -> &SwapchainInfo {
        &self.info
    }

    pub fn swapchain_images(&self) -> &[Arc<Image>] {
        &self.images
    }

    pub fn swapchain_image_views(&self) -> &[Arc<ImageView>] {
        &self.image_views
    }

    pub fn ui_render_pass(&self) -> Arc<RenderPass> {
        self.ui_render_pass.clone()
    }

    pub fn set_overlay(&mut self, overlay: OverlayCallback) {
        self.overlay = Some(overlay);
    }

    /// Records the overlay into the current command buffer. A missing
    /// overlay is a no-op, keeping headless frame graphs valid.
    pub fn render(&mut self, builder: &mut AutoCommandBufferBuilder<PrimaryAutoCommandBuffer>) {
        if let Some(overlay) = self.overlay.as_mut() {
            overlay(builder);
        }
    }

    /// Recreates the swapchain for a new framebuffer extent.
    pub fn recreate(&mut self, extent: [u32; 2]) -> Result<(), UiError> {
        let (swapchain, images) = self.swapchain.recreate(SwapchainCreateInfo {
            image_extent: extent,
            ..self.swapchain.create_info()
        })?;

        self.image_views = images
            .iter()
            .map(|image| ImageView::new_default(image.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        self.info.image_count = images.len() as u32;
        self.info.extent = swapchain.image_extent();
        self.swapchain = swapchain;
        self.images = images;

        Ok(())
    }
}

fn create_swapchain(
    gpu: &Gpu,
    surface: Arc<Surface>,
    extent: [u32; 2],
) -> Result<(Arc<Swapchain>, Vec<Arc<Image>>), UiError> {
    let physical_device = gpu.physical_device();

    let surface_capabilities = physical_device
        .surface_capabilities(&surface, SurfaceInfo::default())
        .map_err(|err| UiError::Surface(err.to_string()))?;

    let (image_format, image_color_space) = physical_device
        .surface_formats(&surface, SurfaceInfo::default())
        .map_err(|err| UiError::Surface(err.to_string()))?
        .into_iter()
        .min_by_key(|(format, color_space)| match (format, color_space) {
            (Format::B8G8R8A8_UNORM, ColorSpace::SrgbNonLinear) => 0,
            (Format::R8G8B8A8_UNORM, ColorSpace::SrgbNonLinear) => 1,
            (Format::B8G8R8A8_SRGB, ColorSpace::SrgbNonLinear) => 2,
            (Format::R8G8B8A8_SRGB, ColorSpace::SrgbNonLinear) => 3,
            _ => 4,
        })
        .ok_or_else(|| UiError::Surface("no surface formats".to_string()))?;

    let composite_alpha = surface_capabilities
        .supported_composite_alpha
        .into_iter()
        .next()
        .ok_or_else(|| UiError::Surface("no composite alpha".to_string()))?;

    let (swapchain, images) = Swapchain::new(
        gpu.device(),
        surface,
        SwapchainCreateInfo {
            min_image_count: surface_capabilities.min_image_count.max(3),
            image_format,
            image_color_space,
            image_extent: extent,
            image_usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::INPUT_ATTACHMENT,
            composite_alpha,
            present_mode: PresentMode::Fifo,
            ..Default::default()
        },
    )?;

    Ok((swapchain, images))
}

/// The UI overlay draws over an already rendered swapchain image and leaves
/// it presentable.
fn create_ui_render_pass(gpu: &Gpu, format: Format) -> Result<Arc<RenderPass>, UiError> {
    let render_pass = gpu.create_render_pass(
        RenderPassCreateInfo {
            attachments: vec![AttachmentDescription {
                format,
                samples: SampleCount::Sample1,
                load_op: AttachmentLoadOp::Load,
                store_op: AttachmentStoreOp::Store,
                initial_layout: ImageLayout::PresentSrc,
                final_layout: ImageLayout::PresentSrc,
                ..Default::default()
            }],
            subpasses: vec![SubpassDescription {
                color_attachments: vec![Some(AttachmentReference {
                    attachment: 0,
                    layout: ImageLayout::ColorAttachmentOptimal,
                    ..Default::default()
                })],
                ..Default::default()
            }],
            ..Default::default()
        },
        "ui",
    )?;

    Ok(render_pass)
}
