use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use vulkano::buffer::BufferUsage;
use vulkano::command_buffer::{AutoCommandBufferBuilder, PrimaryAutoCommandBuffer};
use vulkano::descriptor_set::layout::{
    DescriptorSetLayout, DescriptorSetLayoutBinding, DescriptorSetLayoutCreateInfo, DescriptorType,
};
use vulkano::descriptor_set::{DescriptorSet, WriteDescriptorSet};
use vulkano::image::view::ImageView;
use vulkano::pipeline::compute::ComputePipelineCreateInfo;
use vulkano::pipeline::layout::{PipelineLayoutCreateInfo, PushConstantRange};
use vulkano::pipeline::{
    ComputePipeline, PipelineBindPoint, PipelineLayout, PipelineShaderStageCreateInfo,
};

use asset::frame_graph::SubpassDesc;
use asset::Assets;
use gpu::Gpu;

use crate::cache::ResourceCaches;
use crate::error::RenderError;
use crate::spirv::{merge_shader_resources, partition_sets, ShaderResourceKind};
use crate::subpass::assemble_processes;

/// A compute pass job: one reflected compute shader dispatched over a fixed
/// grid, with its descriptor sets resolved from the cross-pass shared views.
pub struct ComputeJob {
    name: String,
    pipeline: Arc<ComputePipeline>,
    pipeline_layout: Arc<PipelineLayout>,
    /// Per in-flight frame, sets in ascending set order.
    descriptor_sets: Vec<Vec<Arc<DescriptorSet>>>,
    group_count: [u32; 3],
}

impl ComputeJob {
    pub fn new(
        gpu: &Gpu,
        assets: &Assets,
        frame_count: u32,
        desc: &SubpassDesc,
        shared_image_views: &[HashMap<String, Arc<ImageView>>],
        caches: &mut ResourceCaches,
    ) -> Result<ComputeJob, RenderError> {
        let shader_index = *desc.shaders.get("compute").ok_or_else(|| {
            RenderError::MissingShaderStage {
                subpass: desc.name.clone(),
                stage: "compute",
            }
        })?;

        let processes = assemble_processes(None, None)?;
        let spirv = caches.request_spirv(assets.shader(shader_index)?, &processes)?;

        let merged = merge_shader_resources(&[spirv.as_ref()]);
        let partition = partition_sets(&merged)?;

        let mut set_layouts: Vec<Arc<DescriptorSetLayout>> = Vec::new();
        for (_, resources) in &partition.sets {
            let mut bindings: BTreeMap<u32, DescriptorSetLayoutBinding> = BTreeMap::new();
            for resource in resources {
                let descriptor_type = match resource.kind {
                    ShaderResourceKind::UniformBuffer => DescriptorType::UniformBuffer,
                    ShaderResourceKind::StorageBuffer => DescriptorType::StorageBuffer,
                    ShaderResourceKind::StorageImage => DescriptorType::StorageImage,
                    ShaderResourceKind::CombinedImageSampler => {
                        DescriptorType::CombinedImageSampler
                    }
                    _ => {
                        return Err(RenderError::UnsupportedShaderResource {
                            name: resource.name.clone(),
                            kind: "compute set",
                        })
                    }
                };

                bindings.insert(
                    resource.binding,
                    DescriptorSetLayoutBinding {
                        stages: resource.stages,
                        descriptor_count: resource.array_size,
                        ..DescriptorSetLayoutBinding::descriptor_type(descriptor_type)
                    },
                );
            }

            set_layouts.push(caches.request_descriptor_set_layout(
                gpu,
                DescriptorSetLayoutCreateInfo {
                    bindings,
                    ..Default::default()
                },
                &format!("{}_compute", desc.name),
            )?);
        }

        let push_constant_ranges: Vec<PushConstantRange> = partition
            .push_constant_ranges
            .iter()
            .map(|resource| PushConstantRange {
                stages: resource.stages,
                offset: resource.offset,
                size: resource.size,
            })
            .collect();

        let pipeline_layout = caches.request_pipeline_layout(
            gpu,
            PipelineLayoutCreateInfo {
                set_layouts: set_layouts.clone(),
                push_constant_ranges,
                ..Default::default()
            },
            &desc.name,
        )?;

        let mut descriptor_sets: Vec<Vec<Arc<DescriptorSet>>> =
            vec![Vec::new(); frame_count as usize];
        for (frame_index, frame_sets) in descriptor_sets.iter_mut().enumerate() {
            for ((_, resources), layout) in partition.sets.iter().zip(&set_layouts) {
                let mut writes = Vec::new();

                for resource in resources {
                    match resource.kind {
                        ShaderResourceKind::UniformBuffer => {
                            let buffer = gpu.create_buffer_from_iter(
                                vec![0u8; resource.size.max(4) as usize],
                                BufferUsage::UNIFORM_BUFFER,
                                "compute_uniform",
                            )?;
                            writes.push(WriteDescriptorSet::buffer(resource.binding, buffer));
                        }
                        ShaderResourceKind::StorageImage
                        | ShaderResourceKind::CombinedImageSampler => {
                            let view = shared_image_views[frame_index]
                                .get(&resource.name)
                                .cloned()
                                .ok_or_else(|| {
                                    RenderError::MissingSharedImageView(resource.name.clone())
                                })?;
                            let write = match resource.kind {
                                ShaderResourceKind::StorageImage => {
                                    WriteDescriptorSet::image_view(resource.binding, view)
                                }
                                _ => WriteDescriptorSet::image_view_sampler(
                                    resource.binding,
                                    view,
                                    gpu.default_sampler(),
                                ),
                            };
                            writes.push(write);
                        }
                        _ => {}
                    }
                }

                frame_sets.push(gpu.allocate_descriptor_set(
                    layout.clone(),
                    writes,
                    &format!("{}_compute", desc.name),
                )?);
            }
        }

        let module = caches.request_shader_module(gpu, &spirv, &desc.name)?;
        let entry_point = module.entry_point("main").ok_or_else(|| {
            RenderError::Reflection(format!("compute shader for {} has no main", desc.name))
        })?;

        let stage = PipelineShaderStageCreateInfo::new(entry_point);
        let pipeline = caches.request_compute_pipeline(
            gpu,
            spirv.hash_value(),
            ComputePipelineCreateInfo::stage_layout(stage, pipeline_layout.clone()),
            &desc.name,
        )?;

        Ok(ComputeJob {
            name: desc.name.clone(),
            pipeline,
            pipeline_layout,
            descriptor_sets,
            group_count: desc.group_count.unwrap_or([1, 1, 1]),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(
        &self,
        builder: &mut AutoCommandBufferBuilder<PrimaryAutoCommandBuffer>,
        frame_index: u32,
    ) -> Result<(), RenderError> {
        builder.bind_pipeline_compute(self.pipeline.clone())?;

        let sets = &self.descriptor_sets[frame_index as usize];
        if !sets.is_empty() {
            builder.bind_descriptor_sets(
                PipelineBindPoint::Compute,
                self.pipeline_layout.clone(),
                0,
                sets.clone(),
            )?;
        }

        unsafe { builder.dispatch(self.group_count) }?;

        Ok(())
    }
}
