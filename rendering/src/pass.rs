use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;
use vulkano::format::{ClearValue, Format};
use vulkano::image::view::ImageView;
use vulkano::image::{Image, ImageCreateInfo, ImageLayout, ImageType, ImageUsage, SampleCount};
use vulkano::render_pass::{
    AttachmentDescription, AttachmentLoadOp, AttachmentReference, AttachmentStoreOp, Framebuffer,
    FramebufferCreateInfo, RenderPass, RenderPassCreateInfo, SubpassDependency, SubpassDescription,
};
use vulkano::command_buffer::RenderPassBeginInfo;
use vulkano::sync::{AccessFlags, DependencyFlags, PipelineStages};

use asset::frame_graph::{AttachmentUsage, PassDesc, PassType, SWAPCHAIN_ATTACHMENT_NAME};
use asset::Assets;
use gpu::Gpu;
use ui::SwapchainInfo;

use crate::compute::ComputeJob;
use crate::cache::ResourceCaches;
use crate::error::RenderError;
use crate::primitives::ScenePrimitive;
use crate::subpass::{SubpassBuildContext, SubpassState};

/// Everything a pass build needs from the frame graph executor.
pub struct PassBuildContext<'a> {
    pub gpu: &'a Gpu,
    pub assets: &'a Assets,
    pub ui_render_pass: Arc<RenderPass>,
    pub frame_count: u32,
    pub swapchain_info: &'a SwapchainInfo,
    pub swapchain_image_views: &'a [Arc<ImageView>],
    pub scene_primitives: &'a [ScenePrimitive],
    pub cache_dir: &'a Path,
}

/// Runtime state of one frame graph pass: its render pass, the per-frame
/// framebuffers with their owned attachment images, and the composed
/// subpasses (or compute jobs).
pub struct Pass {
    desc: PassDesc,
    has_ui: bool,
    reuses_ui_render_pass: bool,
    render_pass: Option<Arc<RenderPass>>,
    images: Vec<Vec<Arc<Image>>>,
    attachment_views: Vec<Vec<Arc<ImageView>>>,
    framebuffers: Vec<Arc<Framebuffer>>,
    render_area: [u32; 2],
    clear_values: Vec<Option<ClearValue>>,
    color_attachment_counts: Vec<u32>,
    subpasses: Vec<SubpassState>,
    compute_jobs: Vec<ComputeJob>,
}

impl Pass {
    pub fn new(
        desc: &PassDesc,
        ctx: &PassBuildContext<'_>,
        shared_image_views: &mut [HashMap<String, Arc<ImageView>>],
    ) -> Result<Pass, RenderError> {
        let mut pass = Pass {
            desc: desc.clone(),
            has_ui: desc.has_ui(),
            reuses_ui_render_pass: desc.subpasses.len() == 1 && desc.subpasses[0].is_ui(),
            render_pass: None,
            images: Vec::new(),
            attachment_views: Vec::new(),
            framebuffers: Vec::new(),
            render_area: ctx.swapchain_info.extent,
            clear_values: Vec::new(),
            color_attachment_counts: Vec::new(),
            subpasses: Vec::new(),
            compute_jobs: Vec::new(),
        };

        if desc.ty == PassType::Compute {
            let mut caches = ResourceCaches::new(ctx.cache_dir.to_path_buf());
            for subpass_desc in &desc.subpasses {
                pass.compute_jobs.push(ComputeJob::new(
                    ctx.gpu,
                    ctx.assets,
                    ctx.frame_count,
                    subpass_desc,
                    shared_image_views,
                    &mut caches,
                )?);
            }
            return Ok(pass);
        }

        pass.create_render_pass(ctx)?;
        pass.create_framebuffers(ctx, shared_image_views)?;
        pass.create_clear_values();
        pass.create_subpasses(ctx, shared_image_views)?;

        debug!(
            "pass {}: {} subpasses, {} attachments",
            pass.desc.name,
            pass.subpasses.len(),
            pass.desc.attachments.len(),
        );

        Ok(pass)
    }

    /// Recreates the size-dependent state: attachment images, views and
    /// framebuffers, then lets each subpass decide whether it must rebuild.
    pub fn resize(
        &mut self,
        ctx: &PassBuildContext<'_>,
        shared_image_views: &mut [HashMap<String, Arc<ImageView>>],
    ) -> Result<(), RenderError> {
        if self.desc.ty == PassType::Compute {
            return Ok(());
        }

        self.render_area = ctx.swapchain_info.extent;
        self.create_framebuffers(ctx, shared_image_views)?;

        let desc = self.desc.clone();
        for (index, subpass) in self.subpasses.iter_mut().enumerate() {
            let subpass_ctx = SubpassBuildContext {
                gpu: ctx.gpu,
                assets: ctx.assets,
                frame_count: ctx.frame_count,
                render_pass: self
                    .render_pass
                    .clone()
                    .expect("graphics passes always hold a render pass"),
                attachment_image_views: &self.attachment_views,
                color_attachment_count: self.color_attachment_counts[index],
                subpass_index: index as u32,
                scene_primitives: ctx.scene_primitives,
                shared_image_views,
                cache_dir: ctx.cache_dir,
            };
            subpass.resize(&desc.subpasses[index], &subpass_ctx)?;
        }

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn ty(&self) -> PassType {
        self.desc.ty
    }

    pub fn has_ui(&self) -> bool {
        self.has_ui
    }

    pub fn subpasses(&self) -> &[SubpassState] {
        &self.subpasses
    }

    pub fn subpasses_mut(&mut self) -> &mut [SubpassState] {
        &mut self.subpasses
    }

    pub fn compute_jobs(&self) -> &[ComputeJob] {
        &self.compute_jobs
    }

    pub fn render_pass(&self) -> Arc<RenderPass> {
        self.render_pass
            .clone()
            .expect("graphics passes always hold a render pass")
    }

    pub fn framebuffer(&self, frame_index: u32) -> Arc<Framebuffer> {
        self.framebuffers[frame_index as usize].clone()
    }

    pub fn render_pass_begin_info(&self, frame_index: u32) -> RenderPassBeginInfo {
        RenderPassBeginInfo {
            clear_values: self.clear_values.clone(),
            ..RenderPassBeginInfo::framebuffer(self.framebuffers[frame_index as usize].clone())
        }
    }

    fn create_render_pass(&mut self, ctx: &PassBuildContext<'_>) -> Result<(), RenderError> {
        // The trailing ui pass reuses the overlay's pre-built render pass.
        if self.reuses_ui_render_pass {
            self.render_pass = Some(ctx.ui_render_pass.clone());
            self.color_attachment_counts = vec![1];
            return Ok(());
        }

        let mut attachments = Vec::with_capacity(self.desc.attachments.len());
        for attachment in &self.desc.attachments {
            let is_swapchain = attachment.name == SWAPCHAIN_ATTACHMENT_NAME;
            if is_swapchain && attachment.format != ctx.swapchain_info.color_format {
                return Err(RenderError::SwapchainFormatMismatch {
                    name: attachment.name.clone(),
                    declared: attachment.format,
                    actual: ctx.swapchain_info.color_format,
                });
            }

            // The swapchain image must survive the pass for presentation.
            let store_op = if attachment.output || is_swapchain {
                AttachmentStoreOp::Store
            } else {
                AttachmentStoreOp::DontCare
            };
            let final_layout = if is_swapchain {
                ImageLayout::PresentSrc
            } else {
                ImageLayout::ShaderReadOnlyOptimal
            };

            attachments.push(AttachmentDescription {
                format: attachment.format,
                samples: SampleCount::Sample1,
                load_op: AttachmentLoadOp::Clear,
                store_op,
                initial_layout: ImageLayout::Undefined,
                final_layout,
                ..Default::default()
            });
        }

        let subpass_count = self.desc.subpasses.len();
        self.color_attachment_counts = vec![0; subpass_count];

        let mut subpasses = Vec::with_capacity(subpass_count);
        let mut dependencies = Vec::new();

        for (index, subpass_desc) in self.desc.subpasses.iter().enumerate() {
            let reference = |attachment: u32, layout: ImageLayout| AttachmentReference {
                attachment,
                layout,
                ..Default::default()
            };

            let input_attachments = subpass_desc
                .attachment_indices(AttachmentUsage::Input)
                .iter()
                .map(|&at| Some(reference(at, ImageLayout::ShaderReadOnlyOptimal)))
                .collect::<Vec<_>>();

            let color_attachments = subpass_desc
                .attachment_indices(AttachmentUsage::Color)
                .iter()
                .map(|&at| Some(reference(at, ImageLayout::ColorAttachmentOptimal)))
                .collect::<Vec<_>>();
            self.color_attachment_counts[index] = color_attachments.len() as u32;

            let depth_stencil_attachment = subpass_desc
                .attachment_indices(AttachmentUsage::DepthStencil)
                .first()
                .map(|&at| reference(at, ImageLayout::DepthStencilAttachmentOptimal));

            subpasses.push(SubpassDescription {
                input_attachments,
                color_attachments,
                depth_stencil_attachment,
                ..Default::default()
            });

            if index >= 1 {
                dependencies.push(SubpassDependency {
                    src_subpass: Some(index as u32 - 1),
                    dst_subpass: Some(index as u32),
                    src_stages: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                    dst_stages: PipelineStages::FRAGMENT_SHADER
                        | PipelineStages::COLOR_ATTACHMENT_OUTPUT,
                    src_access: AccessFlags::COLOR_ATTACHMENT_WRITE,
                    dst_access: AccessFlags::INPUT_ATTACHMENT_READ
                        | AccessFlags::COLOR_ATTACHMENT_WRITE,
                    dependency_flags: DependencyFlags::BY_REGION,
                    ..Default::default()
                });
            }
        }

        let render_pass = ctx.gpu.create_render_pass(
            RenderPassCreateInfo {
                attachments,
                subpasses,
                dependencies,
                ..Default::default()
            },
            &self.desc.name,
        )?;

        self.render_pass = Some(render_pass);
        Ok(())
    }

    fn create_framebuffers(
        &mut self,
        ctx: &PassBuildContext<'_>,
        shared_image_views: &mut [HashMap<String, Arc<ImageView>>],
    ) -> Result<(), RenderError> {
        let render_pass = self.render_pass();
        let extent = ctx.swapchain_info.extent;

        self.images.clear();
        self.attachment_views.clear();
        self.framebuffers.clear();

        for frame_index in 0..ctx.frame_count {
            let mut frame_images = Vec::new();
            let mut frame_views = Vec::new();

            for attachment in &self.desc.attachments {
                let is_swapchain = attachment.name == SWAPCHAIN_ATTACHMENT_NAME;

                let view = if is_swapchain {
                    // Swapchain images are borrowed from the presentation
                    // engine, never owned here.
                    ctx.swapchain_image_views[frame_index as usize].clone()
                } else {
                    let usage = derive_attachment_usage(attachment.format, attachment.output);
                    let image = ctx.gpu.create_image(
                        ImageCreateInfo {
                            image_type: ImageType::Dim2d,
                            format: attachment.format,
                            extent: [extent[0], extent[1], 1],
                            usage,
                            ..Default::default()
                        },
                        &attachment.name,
                    )?;
                    frame_images.push(image.clone());
                    ctx.gpu.create_image_view(image, &attachment.name)?
                };

                if attachment.output {
                    // Publishing overwrites any previous pass's entry of the
                    // same name.
                    shared_image_views[frame_index as usize]
                        .insert(attachment.name.clone(), view.clone());
                }

                frame_views.push(view);
            }

            let framebuffer = ctx.gpu.create_framebuffer(
                render_pass.clone(),
                FramebufferCreateInfo {
                    attachments: frame_views.clone(),
                    ..Default::default()
                },
                &self.desc.name,
                frame_index,
            )?;

            self.images.push(frame_images);
            self.attachment_views.push(frame_views);
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    fn create_clear_values(&mut self) {
        self.clear_values = if self.reuses_ui_render_pass {
            // The ui render pass loads the previous contents.
            vec![None]
        } else {
            self.desc
                .attachments
                .iter()
                .map(|attachment| Some(clear_value_for(attachment.format)))
                .collect()
        };
    }

    fn create_subpasses(
        &mut self,
        ctx: &PassBuildContext<'_>,
        shared_image_views: &[HashMap<String, Arc<ImageView>>],
    ) -> Result<(), RenderError> {
        for (index, subpass_desc) in self.desc.subpasses.iter().enumerate() {
            let subpass_ctx = SubpassBuildContext {
                gpu: ctx.gpu,
                assets: ctx.assets,
                frame_count: ctx.frame_count,
                render_pass: self.render_pass(),
                attachment_image_views: &self.attachment_views,
                color_attachment_count: self.color_attachment_counts[index],
                subpass_index: index as u32,
                scene_primitives: ctx.scene_primitives,
                shared_image_views,
                cache_dir: ctx.cache_dir,
            };

            self.subpasses
                .push(SubpassState::new(subpass_desc, &subpass_ctx)?);
        }

        Ok(())
    }
}

/// Attachment usage is derived from the format: depth-stencil for
/// `D32_SFLOAT`, color otherwise, always input-attachment capable, sampled
/// when the attachment is published to later passes.
pub fn derive_attachment_usage(format: Format, output: bool) -> ImageUsage {
    let mut usage = ImageUsage::INPUT_ATTACHMENT;

    if format == Format::D32_SFLOAT {
        usage |= ImageUsage::DEPTH_STENCIL_ATTACHMENT;
    } else {
        usage |= ImageUsage::COLOR_ATTACHMENT;
    }

    if output {
        usage |= ImageUsage::SAMPLED;
    }

    usage
}

pub fn clear_value_for(format: Format) -> ClearValue {
    if format == Format::D32_SFLOAT {
        ClearValue::Depth(1.0)
    } else {
        ClearValue::Float([0.0, 0.0, 0.0, 0.0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_get_depth_usage() {
        let usage = derive_attachment_usage(Format::D32_SFLOAT, false);
        assert!(usage.contains(ImageUsage::DEPTH_STENCIL_ATTACHMENT | ImageUsage::INPUT_ATTACHMENT));
        assert!(!usage.contains(ImageUsage::COLOR_ATTACHMENT));
        assert!(!usage.contains(ImageUsage::SAMPLED));
    }

    #[test]
    fn output_color_attachments_are_sampled() {
        let usage = derive_attachment_usage(Format::R16G16B16A16_SFLOAT, true);
        assert!(usage.contains(
            ImageUsage::COLOR_ATTACHMENT | ImageUsage::INPUT_ATTACHMENT | ImageUsage::SAMPLED
        ));
    }

    #[test]
    fn clear_values_match_attachment_kind() {
        assert_eq!(clear_value_for(Format::D32_SFLOAT), ClearValue::Depth(1.0));
        assert_eq!(
            clear_value_for(Format::B8G8R8A8_UNORM),
            ClearValue::Float([0.0, 0.0, 0.0, 0.0])
        );
    }
}
