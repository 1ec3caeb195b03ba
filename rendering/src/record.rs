use std::ops::Range;
use std::sync::Arc;

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use vulkano::command_buffer::{
    AutoCommandBufferBuilder, CommandBufferInheritanceInfo, CommandBufferUsage,
    SecondaryAutoCommandBuffer,
};
use vulkano::pipeline::graphics::viewport::{Scissor, Viewport};
use vulkano::pipeline::PipelineBindPoint;
use vulkano::render_pass::{RenderPass, Subpass};

use gpu::Gpu;

use crate::draw_element::DrawElement;
use crate::error::RenderError;
use crate::subpass::SubpassState;
use crate::visibility::SceneVisibility;

/// Per-recorder memo of the last bound pipeline and layout. Threads never
/// share one; each recorded stream re-binds from scratch.
#[derive(Default)]
pub struct BindMemo {
    pipeline: Option<Arc<vulkano::pipeline::GraphicsPipeline>>,
    pipeline_layout: Option<Arc<vulkano::pipeline::PipelineLayout>>,
}

pub struct RecordContext<'a> {
    pub subpass: &'a SubpassState,
    pub viewport: Viewport,
    pub scissor: Scissor,
    pub frame_index: u32,
    pub visibility: &'a SceneVisibility,
}

/// Records a contiguous range of the subpass's draw elements, skipping
/// hidden scenes.
pub fn record_draw_elements<L>(
    builder: &mut AutoCommandBufferBuilder<L>,
    ctx: &RecordContext<'_>,
    range: Range<usize>,
    memo: &mut BindMemo,
) -> Result<(), RenderError> {
    for draw_element in &ctx.subpass.draw_elements()[range] {
        if draw_element.has_scene && !ctx.visibility.is_visible(draw_element.scene_index) {
            continue;
        }

        builder.set_viewport(0, [ctx.viewport.clone()].into_iter().collect())?;
        builder.set_scissor(0, [ctx.scissor.clone()].into_iter().collect())?;

        record_graphics_command(builder, ctx, draw_element, memo)?;
    }

    Ok(())
}

fn record_graphics_command<L>(
    builder: &mut AutoCommandBufferBuilder<L>,
    ctx: &RecordContext<'_>,
    draw_element: &DrawElement,
    memo: &mut BindMemo,
) -> Result<(), RenderError> {
    let subpass = ctx.subpass;

    let pipeline_changed = memo
        .pipeline
        .as_ref()
        .map(|pipeline| !Arc::ptr_eq(pipeline, &draw_element.pipeline))
        .unwrap_or(true);
    if pipeline_changed {
        builder.bind_pipeline_graphics(draw_element.pipeline.clone())?;
        memo.pipeline = Some(draw_element.pipeline.clone());
    }

    // A new pipeline layout re-establishes the subpass-wide bindings.
    let layout_changed = memo
        .pipeline_layout
        .as_ref()
        .map(|layout| !Arc::ptr_eq(layout, &draw_element.pipeline_layout))
        .unwrap_or(true);
    if layout_changed {
        if subpass.has_push_constant() {
            subpass.push_constants(builder)?;
        }

        if subpass.has_subpass_descriptor_set() {
            builder.bind_descriptor_sets(
                PipelineBindPoint::Graphics,
                draw_element.pipeline_layout.clone(),
                subpass.subpass_descriptor_set_index(),
                subpass.subpass_descriptor_set(ctx.frame_index),
            )?;
        }

        if let Some(bindless_set) = subpass.bindless_descriptor_set() {
            builder.bind_descriptor_sets(
                PipelineBindPoint::Graphics,
                draw_element.pipeline_layout.clone(),
                subpass.bindless_descriptor_set_index(),
                bindless_set,
            )?;
        }

        memo.pipeline_layout = Some(draw_element.pipeline_layout.clone());
    }

    if draw_element.has_descriptor_sets() {
        builder.bind_descriptor_sets(
            PipelineBindPoint::Graphics,
            draw_element.pipeline_layout.clone(),
            subpass.draw_element_descriptor_set_index(),
            draw_element.descriptor_sets[ctx.frame_index as usize].clone(),
        )?;
    }

    if draw_element.has_scene {
        for vertex_info in &draw_element.vertex_infos {
            builder.bind_vertex_buffers(vertex_info.first_binding, vertex_info.buffers.clone())?;
        }

        match &draw_element.index {
            Some(index) => {
                builder.bind_index_buffer(index.buffer.clone())?;
                unsafe { builder.draw_indexed(index.count, 1, 0, 0, 0) }?;
            }
            None => {
                unsafe { builder.draw(draw_element.vertex_count, 1, 0, 0) }?;
            }
        }
    } else {
        // Full-screen triangle.
        unsafe { builder.draw(3, 1, 0, 0) }?;
    }

    Ok(())
}

/// Splits `len` draw elements into at most `parts` non-empty index ranges.
/// Concatenating the ranges in order reproduces `0..len`, which is what
/// keeps cross-thread recording order deterministic.
pub fn partition_ranges(len: usize, parts: usize) -> Vec<Range<usize>> {
    let parts = parts.max(1);
    let base = len / parts;
    let extra = len % parts;

    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0;
    for part in 0..parts {
        let size = base + usize::from(part < extra);
        if size == 0 {
            continue;
        }
        ranges.push(start..start + size);
        start += size;
    }

    ranges
}

/// Records the subpass's draw elements across the worker pool, one secondary
/// command buffer per index range, returned in range order.
pub fn record_secondary_parallel(
    pool: &rayon::ThreadPool,
    gpu: &Gpu,
    ctx: &RecordContext<'_>,
    render_pass: Arc<RenderPass>,
    subpass_index: u32,
    thread_count: usize,
) -> Result<Vec<Arc<SecondaryAutoCommandBuffer>>, RenderError> {
    let ranges = partition_ranges(ctx.subpass.draw_elements().len(), thread_count);

    let subpass = Subpass::from(render_pass, subpass_index).ok_or_else(|| {
        RenderError::InvalidSubpassIndex(ctx.subpass.name().to_string(), subpass_index)
    })?;

    pool.install(|| {
        ranges
            .into_par_iter()
            .map(|range| {
                let mut builder = AutoCommandBufferBuilder::secondary(
                    gpu.command_buffer_allocator(),
                    gpu.graphics_queue().queue_family_index(),
                    CommandBufferUsage::OneTimeSubmit,
                    CommandBufferInheritanceInfo {
                        render_pass: Some(subpass.clone().into()),
                        ..Default::default()
                    },
                )?;

                let mut memo = BindMemo::default();
                record_draw_elements(&mut builder, ctx, range, &mut memo)?;

                Ok(builder.build()?)
            })
            .collect::<Result<Vec<_>, RenderError>>()
    })
}

#[cfg(test)]
mod tests {
    use super::partition_ranges;

    #[test]
    fn ranges_cover_everything_in_order() {
        let ranges = partition_ranges(11, 4);
        assert_eq!(ranges, vec![0..3, 3..6, 6..9, 9..11]);
    }

    #[test]
    fn small_workloads_drop_empty_ranges() {
        let ranges = partition_ranges(2, 8);
        assert_eq!(ranges, vec![0..1, 1..2]);
        assert!(partition_ranges(0, 4).is_empty());
    }

    #[test]
    fn single_thread_takes_the_whole_range() {
        assert_eq!(partition_ranges(5, 1), vec![0..5]);
    }
}
