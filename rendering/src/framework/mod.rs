mod timeline;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use vulkano::command_buffer::{
    AutoCommandBufferBuilder, CommandBufferUsage, PrimaryAutoCommandBuffer, SubpassBeginInfo,
    SubpassContents, SubpassEndInfo,
};
use vulkano::device::Queue;
use vulkano::image::view::ImageView;
use vulkano::pipeline::graphics::viewport::{Scissor, Viewport};
use vulkano::swapchain::{acquire_next_image, SwapchainPresentInfo};
use vulkano::sync::GpuFuture;
use vulkano::{Validated, VulkanError};

use asset::frame_graph::{FrameGraph, PassType};
use asset::Assets;
use gpu::Gpu;
use ui::Gui;
use windowing::EngineWindow;

use crate::camera::CameraState;
use crate::error::RenderError;
use crate::pass::{Pass, PassBuildContext};
use crate::primitives::{collect_scene_primitives, ScenePrimitive};
use crate::record::{record_draw_elements, record_secondary_parallel, BindMemo, RecordContext};
use crate::visibility::SceneVisibility;
use crate::SECONDARY_RECORD_THRESHOLD;

pub use timeline::TimelineSlot;

/// Runs the frame graph: builds the passes once, then per frame walks them
/// in order, batching contiguous passes of equal type into one submission,
/// recording large subpasses across the worker pool, and presenting from the
/// last submission.
pub struct Framework {
    frame_graph: FrameGraph,
    scene_primitives: Vec<ScenePrimitive>,
    thread_count: usize,
    pool: rayon::ThreadPool,
    cache_dir: PathBuf,

    frame_count: u32,
    timeline: Vec<TimelineSlot>,
    shared_image_views: Vec<HashMap<String, Arc<ImageView>>>,
    passes: Vec<Pass>,
    visibility: SceneVisibility,

    viewport: Viewport,
    scissor: Scissor,

    absolute_frame: u64,
    frame_index: u32,
    recreate_swapchain: bool,
}

impl Framework {
    pub fn new(
        gpu: &Gpu,
        assets: &Assets,
        gui: &Gui,
        frame_graph_index: u32,
        root_dir: &Path,
        thread_count: usize,
    ) -> Result<Framework, RenderError> {
        let frame_graph = assets.frame_graph(frame_graph_index)?.clone();
        let frame_count = gui.swapchain_info().image_count;

        let scene_primitives = collect_scene_primitives(assets, &frame_graph)?;
        let visibility =
            SceneVisibility::new(frame_graph.enabled_scenes.iter().map(|scene| scene.index));

        let cache_dir = root_dir.join(".cache").join("engine");
        if let Err(err) = std::fs::create_dir_all(&cache_dir) {
            warn!("could not create cache directory {}: {err}", cache_dir.display());
        }

        let mut shared_image_views = vec![HashMap::new(); frame_count as usize];
        let passes = build_passes(
            gpu,
            assets,
            gui,
            &frame_graph,
            &scene_primitives,
            &cache_dir,
            frame_count,
            &mut shared_image_views,
        )?;

        let timeline = (0..frame_count)
            .map(|_| TimelineSlot::new(frame_count as u64))
            .collect();

        let thread_count = thread_count.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(thread_count)
            .build()
            .map_err(|err| RenderError::ThreadPool(err.to_string()))?;

        let (viewport, scissor) = viewport_and_scissor(gui.swapchain_info().extent);

        info!(
            "frame graph ready: {} passes, {} scene primitives, {} worker threads",
            passes.len(),
            scene_primitives.len(),
            thread_count,
        );

        Ok(Framework {
            frame_graph,
            scene_primitives,
            thread_count,
            pool,
            cache_dir,
            frame_count,
            timeline,
            shared_image_views,
            passes,
            visibility,
            viewport,
            scissor,
            absolute_frame: 0,
            frame_index: 0,
            recreate_swapchain: false,
        })
    }

    pub fn visibility(&self) -> &SceneVisibility {
        &self.visibility
    }

    pub fn absolute_frame(&self) -> u64 {
        self.absolute_frame
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    pub fn timeline(&self) -> &[TimelineSlot] {
        &self.timeline
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// One engine-thread step: skip minimized windows, fold in pending
    /// resizes, then render a frame.
    pub fn tick(
        &mut self,
        gpu: &Gpu,
        assets: &Assets,
        gui: &mut Gui,
        window: &mut EngineWindow,
        camera: &CameraState,
    ) -> Result<(), RenderError> {
        if window.iconified() {
            return Ok(());
        }

        if window.framebuffer_resized() || self.recreate_swapchain {
            window.set_framebuffer_resized(false);
            self.recreate_swapchain = false;
            self.resize(gpu, assets, gui, window)?;
        }

        self.render(gpu, gui, camera)
    }

    fn resize(
        &mut self,
        gpu: &Gpu,
        assets: &Assets,
        gui: &mut Gui,
        window: &EngineWindow,
    ) -> Result<(), RenderError> {
        gpu.wait_idle()?;

        gui.recreate(window.inner_size())?;
        let swapchain_info = gui.swapchain_info().clone();

        let (viewport, scissor) = viewport_and_scissor(swapchain_info.extent);
        self.viewport = viewport;
        self.scissor = scissor;

        if swapchain_info.image_count != self.frame_count {
            // The per-frame arrays are sized by the image count; a new count
            // means a full rebuild.
            self.frame_count = swapchain_info.image_count;
            self.shared_image_views = vec![HashMap::new(); self.frame_count as usize];
            self.timeline = (0..self.frame_count)
                .map(|_| TimelineSlot::new(self.frame_count as u64))
                .collect();
            self.passes = build_passes(
                gpu,
                assets,
                gui,
                &self.frame_graph,
                &self.scene_primitives,
                &self.cache_dir,
                self.frame_count,
                &mut self.shared_image_views,
            )?;
            self.frame_index = (self.absolute_frame % self.frame_count as u64) as u32;
            return Ok(());
        }

        for pass in &mut self.passes {
            let ctx = PassBuildContext {
                gpu,
                assets,
                ui_render_pass: gui.ui_render_pass(),
                frame_count: self.frame_count,
                swapchain_info: gui.swapchain_info(),
                swapchain_image_views: gui.swapchain_image_views(),
                scene_primitives: &self.scene_primitives,
                cache_dir: &self.cache_dir,
            };
            pass.resize(&ctx, &mut self.shared_image_views)?;
        }

        Ok(())
    }

    fn render(&mut self, gpu: &Gpu, gui: &mut Gui, camera: &CameraState) -> Result<(), RenderError> {
        let frame_index = self.frame_index;
        let slot_index = frame_index as usize;

        // begin_frame: the slot's previous submission gates reuse of its
        // per-frame recording state.
        self.timeline[slot_index].wait_previous()?;

        let mut future: Box<dyn GpuFuture> = vulkano::sync::now(gpu.device()).boxed();
        let mut prev_queue: Option<Arc<Queue>> = None;
        let mut acquired_image: Option<u32> = None;
        let mut suboptimal_acquire = false;

        let pass_count = self.passes.len();
        let mut index = 0;
        while index < pass_count {
            // Contiguous passes of one type share a primary command buffer
            // and one submission.
            let batch_type = self.passes[index].ty();
            let mut end = index;
            while end + 1 < pass_count && self.passes[end + 1].ty() == batch_type {
                end += 1;
            }
            let last_batch = end == pass_count - 1;

            let queue = match batch_type {
                PassType::Graphics => gpu.graphics_queue(),
                PassType::Compute => gpu.compute_queue(),
            };

            let mut builder = AutoCommandBufferBuilder::primary(
                gpu.command_buffer_allocator(),
                queue.queue_family_index(),
                CommandBufferUsage::OneTimeSubmit,
            )?;

            for pass_index in index..=end {
                match batch_type {
                    PassType::Graphics => {
                        self.record_graphics_pass(&mut builder, pass_index, gpu, gui, camera)?;
                    }
                    PassType::Compute => {
                        for job in self.passes[pass_index].compute_jobs() {
                            job.record(&mut builder, frame_index)?;
                        }
                    }
                }
            }

            let command_buffer = builder.build()?;

            // A queue switch needs a semaphore edge between the submissions.
            if let Some(prev) = &prev_queue {
                if prev.queue_family_index() != queue.queue_family_index() {
                    future = future.then_signal_semaphore_and_flush()?.boxed();
                }
            }

            // The swapchain image is acquired as late as possible, so the
            // image-available edge sits right next to the writer.
            if last_batch {
                let (image_index, suboptimal, acquire_future) =
                    match acquire_next_image(gui.swapchain(), None).map_err(Validated::unwrap) {
                        Ok(result) => result,
                        Err(VulkanError::OutOfDate) => {
                            self.recreate_swapchain = true;
                            self.timeline[slot_index].abandon();
                            return Ok(());
                        }
                        Err(err) => return Err(RenderError::VulkanRaw(err)),
                    };
                suboptimal_acquire = suboptimal;
                acquired_image = Some(image_index);
                future = future.join(acquire_future).boxed();
            }

            future = future.then_execute(queue.clone(), command_buffer)?.boxed();
            self.timeline[slot_index].next_signal_value();
            prev_queue = Some(queue);
            index = end + 1;
        }

        let Some(image_index) = acquired_image else {
            return Ok(());
        };

        let present_future = future
            .then_swapchain_present(
                gpu.present_queue(),
                SwapchainPresentInfo::swapchain_image_index(gui.swapchain(), image_index),
            )
            .boxed();

        match present_future
            .then_signal_fence_and_flush()
            .map_err(Validated::unwrap)
        {
            Ok(fence) => self.timeline[slot_index].store(fence),
            Err(VulkanError::OutOfDate) => {
                self.recreate_swapchain = true;
                self.timeline[slot_index].abandon();
            }
            Err(err) => return Err(RenderError::Present(err)),
        }

        if suboptimal_acquire {
            self.recreate_swapchain = true;
        }

        self.absolute_frame += 1;
        self.frame_index = (self.absolute_frame % self.frame_count as u64) as u32;

        Ok(())
    }

    fn record_graphics_pass(
        &mut self,
        builder: &mut AutoCommandBufferBuilder<PrimaryAutoCommandBuffer>,
        pass_index: usize,
        gpu: &Gpu,
        gui: &mut Gui,
        camera: &CameraState,
    ) -> Result<(), RenderError> {
        let frame_index = self.frame_index;

        {
            let pass = &mut self.passes[pass_index];
            for subpass in pass.subpasses_mut() {
                subpass.update(frame_index, camera)?;
            }
        }

        let pass = &self.passes[pass_index];
        let _pass_span = tracing::debug_span!("pass", name = pass.name()).entered();
        let render_pass = pass.render_pass();
        let begin_info = pass.render_pass_begin_info(frame_index);

        for (subpass_index, subpass) in pass.subpasses().iter().enumerate() {
            let _subpass_span = tracing::debug_span!("subpass", name = subpass.name()).entered();
            let use_secondary = subpass.draw_elements().len() > SECONDARY_RECORD_THRESHOLD;
            let begin = SubpassBeginInfo {
                contents: if use_secondary {
                    SubpassContents::SecondaryCommandBuffers
                } else {
                    SubpassContents::Inline
                },
                ..Default::default()
            };

            if subpass_index == 0 {
                builder.begin_render_pass(begin_info.clone(), begin)?;
            } else {
                builder.next_subpass(SubpassEndInfo::default(), begin)?;
            }

            let ctx = RecordContext {
                subpass,
                viewport: self.viewport.clone(),
                scissor: self.scissor.clone(),
                frame_index,
                visibility: &self.visibility,
            };

            if use_secondary {
                let secondaries = record_secondary_parallel(
                    &self.pool,
                    gpu,
                    &ctx,
                    render_pass.clone(),
                    subpass_index as u32,
                    self.thread_count,
                )?;
                for secondary in secondaries {
                    builder.execute_commands(secondary)?;
                }
            } else {
                let mut memo = BindMemo::default();
                record_draw_elements(builder, &ctx, 0..subpass.draw_elements().len(), &mut memo)?;
            }

            // The ui overlay always records inline at the tail of its
            // subpass.
            if subpass.is_ui() {
                gui.render(builder);
            }
        }

        builder.end_render_pass(SubpassEndInfo::default())?;

        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn build_passes(
    gpu: &Gpu,
    assets: &Assets,
    gui: &Gui,
    frame_graph: &FrameGraph,
    scene_primitives: &[ScenePrimitive],
    cache_dir: &Path,
    frame_count: u32,
    shared_image_views: &mut [HashMap<String, Arc<ImageView>>],
) -> Result<Vec<Pass>, RenderError> {
    let mut passes = Vec::with_capacity(frame_graph.passes.len());

    for desc in &frame_graph.passes {
        let ctx = PassBuildContext {
            gpu,
            assets,
            ui_render_pass: gui.ui_render_pass(),
            frame_count,
            swapchain_info: gui.swapchain_info(),
            swapchain_image_views: gui.swapchain_image_views(),
            scene_primitives,
            cache_dir,
        };
        passes.push(Pass::new(desc, &ctx, shared_image_views)?);
    }

    Ok(passes)
}

fn viewport_and_scissor(extent: [u32; 2]) -> (Viewport, Scissor) {
    (
        Viewport {
            offset: [0.0, 0.0],
            extent: [extent[0] as f32, extent[1] as f32],
            depth_range: 0.0..=1.0,
        },
        Scissor {
            offset: [0, 0],
            extent,
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::viewport_and_scissor;

    #[test]
    fn viewport_covers_the_full_extent() {
        let (viewport, scissor) = viewport_and_scissor([1920, 1080]);
        assert_eq!(viewport.extent, [1920.0, 1080.0]);
        assert_eq!(viewport.offset, [0.0, 0.0]);
        assert_eq!(scissor.extent, [1920, 1080]);
    }
}
