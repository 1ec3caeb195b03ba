mod processes;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;
use vulkano::buffer::{BufferUsage, Subbuffer};
use vulkano::descriptor_set::layout::{
    DescriptorBindingFlags, DescriptorSetLayout, DescriptorSetLayoutBinding,
    DescriptorSetLayoutCreateFlags, DescriptorSetLayoutCreateInfo, DescriptorType,
};
use vulkano::descriptor_set::{DescriptorSet, WriteDescriptorSet};
use vulkano::image::sampler::Sampler;
use vulkano::image::view::ImageView;
use vulkano::pipeline::graphics::color_blend::{
    AttachmentBlend, BlendFactor, BlendOp, ColorBlendAttachmentState, ColorBlendState,
    ColorComponents,
};
use vulkano::pipeline::graphics::depth_stencil::{CompareOp, DepthState, DepthStencilState};
use vulkano::pipeline::graphics::input_assembly::{InputAssemblyState, PrimitiveTopology};
use vulkano::pipeline::graphics::multisample::MultisampleState;
use vulkano::pipeline::graphics::rasterization::{CullMode, FrontFace, RasterizationState};
use vulkano::pipeline::graphics::vertex_input::{
    VertexInputAttributeDescription, VertexInputBindingDescription, VertexInputRate,
    VertexInputState,
};
use vulkano::pipeline::graphics::viewport::ViewportState;
use vulkano::pipeline::graphics::GraphicsPipelineCreateInfo;
use vulkano::pipeline::layout::{PipelineLayoutCreateInfo, PushConstantRange};
use vulkano::pipeline::{DynamicState, PipelineShaderStageCreateInfo};
use vulkano::render_pass::{RenderPass, Subpass};
use vulkano::shader::ShaderStages;

use asset::frame_graph::{SubpassDesc, TRANSPARENCY_SCENE_TAG};
use asset::scene_graph::{AlphaMode, Material, Scene};
use asset::{Assets, PunctualLight, PUNCTUAL_LIGHT_MAX_COUNT};
use gpu::Gpu;

use crate::cache::ResourceCaches;
use crate::camera::{matrix_to_array, CameraState};
use crate::draw_element::{split_contiguous, DrawElement, DrawElementVertexInfo, DrawIndex};
use crate::error::RenderError;
use crate::primitives::ScenePrimitive;
use crate::spirv::{
    merge_shader_resources, partition_sets, SetPartition, ShaderResource, ShaderResourceKind,
    Spirv,
};
use crate::uniform::{DrawElementUniform, SubpassUniform};

pub use processes::{assemble_processes, SceneProcessInputs};

/// Sampler array length of the bindless set.
pub const BINDLESS_SAMPLER_MAX_COUNT: u32 = 8;
/// Sampled-image array length of the bindless set.
pub const BINDLESS_IMAGE_MAX_COUNT: u32 = 128;

const BINDLESS_SAMPLER_BINDING: u32 = 0;
const BINDLESS_IMAGE_BINDING: u32 = 1;

/// Everything a subpass build needs from its surrounding pass.
pub struct SubpassBuildContext<'a> {
    pub gpu: &'a Gpu,
    pub assets: &'a Assets,
    pub frame_count: u32,
    pub render_pass: Arc<RenderPass>,
    /// Per frame, the pass's attachment image views in declaration order.
    pub attachment_image_views: &'a [Vec<Arc<ImageView>>],
    pub color_attachment_count: u32,
    pub subpass_index: u32,
    pub scene_primitives: &'a [ScenePrimitive],
    /// Per frame, the cross-pass output views published under their
    /// attachment names.
    pub shared_image_views: &'a [HashMap<String, Arc<ImageView>>],
    pub cache_dir: &'a Path,
}

/// First-use slot assignment for one bindless array. Keys are resource
/// handles; repeated lookups return the slot assigned on first sight, so
/// rebuilds over the same inputs produce identical indices.
struct BindlessIndexAllocator {
    kind: &'static str,
    limit: u32,
    indices: HashMap<usize, u32>,
    next: u32,
}

impl BindlessIndexAllocator {
    fn new(kind: &'static str, limit: u32) -> BindlessIndexAllocator {
        BindlessIndexAllocator {
            kind,
            limit,
            indices: HashMap::new(),
            next: 0,
        }
    }

    /// Returns the key's slot and whether it was newly assigned.
    fn assign(&mut self, key: usize) -> Result<(u32, bool), RenderError> {
        if let Some(&index) = self.indices.get(&key) {
            return Ok((index, false));
        }

        let index = self.next;
        if index >= self.limit {
            return Err(RenderError::BindlessIndexOverflow {
                kind: self.kind,
                index,
                limit: self.limit,
            });
        }

        self.next += 1;
        self.indices.insert(key, index);
        Ok((index, true))
    }

    fn clear(&mut self) {
        self.indices.clear();
        self.next = 0;
    }
}

/// Classification of one descriptor set out of the reflected partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetClass {
    Subpass,
    Bindless,
    DrawElement,
}

fn classify_set(resources: &[ShaderResource]) -> SetClass {
    if resources
        .iter()
        .any(|resource| resource.name.to_lowercase().starts_with("subpass"))
    {
        SetClass::Subpass
    } else if resources
        .iter()
        .any(|resource| resource.name.to_lowercase().starts_with("bindless"))
    {
        SetClass::Bindless
    } else {
        SetClass::DrawElement
    }
}

/// Runtime state of one subpass: its draw elements, the descriptor sets they
/// share and the caches everything was built through.
pub struct SubpassState {
    name: String,
    scene_tag: String,
    is_ui: bool,
    has_scene: bool,
    has_light: bool,
    frame_count: u32,
    subpass_index: u32,

    punctual_lights: Vec<PunctualLight>,
    draw_elements: Vec<DrawElement>,

    subpass_descriptor_set_index: Option<u32>,
    subpass_descriptor_set_layout: Option<Arc<DescriptorSetLayout>>,
    subpass_descriptor_sets: Vec<Arc<DescriptorSet>>,
    subpass_uniform_buffers: Vec<Subbuffer<SubpassUniform>>,

    bindless_descriptor_set_index: Option<u32>,
    bindless_descriptor_set_layout: Option<Arc<DescriptorSetLayout>>,
    bindless_descriptor_set: Option<Arc<DescriptorSet>>,
    bindless_samplers: Vec<Arc<Sampler>>,
    bindless_images: Vec<Arc<ImageView>>,
    sampler_indices: BindlessIndexAllocator,
    image_indices: BindlessIndexAllocator,

    draw_element_descriptor_set_index: u32,

    has_push_constant: bool,
    push_constant_ranges: Vec<PushConstantRange>,

    need_resize: bool,
    caches: ResourceCaches,
}

impl SubpassState {
    pub fn new(
        desc: &SubpassDesc,
        ctx: &SubpassBuildContext<'_>,
    ) -> Result<SubpassState, RenderError> {
        let mut state = SubpassState {
            name: desc.name.clone(),
            scene_tag: desc.scene.clone(),
            is_ui: desc.is_ui(),
            has_scene: desc.has_scene(),
            has_light: !desc.lights.is_empty(),
            frame_count: ctx.frame_count,
            subpass_index: ctx.subpass_index,
            punctual_lights: Vec::new(),
            draw_elements: Vec::new(),
            subpass_descriptor_set_index: None,
            subpass_descriptor_set_layout: None,
            subpass_descriptor_sets: Vec::new(),
            subpass_uniform_buffers: Vec::new(),
            bindless_descriptor_set_index: None,
            bindless_descriptor_set_layout: None,
            bindless_descriptor_set: None,
            bindless_samplers: Vec::new(),
            bindless_images: Vec::new(),
            sampler_indices: BindlessIndexAllocator::new("sampler", BINDLESS_SAMPLER_MAX_COUNT),
            image_indices: BindlessIndexAllocator::new("image", BINDLESS_IMAGE_MAX_COUNT),
            draw_element_descriptor_set_index: u32::MAX,
            has_push_constant: false,
            push_constant_ranges: Vec::new(),
            need_resize: false,
            caches: ResourceCaches::new(ctx.cache_dir.to_path_buf()),
        };

        if state.is_ui {
            return Ok(state);
        }

        // Punctual lights are gathered once, capped at the uniform array
        // length.
        'outer: for &light_index in &desc.lights {
            for light in ctx.assets.light(light_index)?.punctual_lights() {
                if state.punctual_lights.len() == PUNCTUAL_LIGHT_MAX_COUNT {
                    break 'outer;
                }
                state.punctual_lights.push(*light);
            }
        }

        state.create_draw_elements(desc, ctx)?;

        Ok(state)
    }

    /// Rebuilds everything that references attachment image views. Subpasses
    /// with no such references keep their state across a resize.
    pub fn resize(
        &mut self,
        desc: &SubpassDesc,
        ctx: &SubpassBuildContext<'_>,
    ) -> Result<(), RenderError> {
        if !self.need_resize {
            return Ok(());
        }

        self.subpass_descriptor_sets.clear();
        self.subpass_uniform_buffers.clear();
        self.bindless_descriptor_set = None;
        self.bindless_samplers.clear();
        self.bindless_images.clear();
        self.sampler_indices.clear();
        self.image_indices.clear();

        debug!("subpass {} rebuilding for resize", self.name);

        self.create_draw_elements(desc, ctx)
    }

    /// Refreshes the per-view uniform through the persistently mapped
    /// per-frame buffer.
    pub fn update(&mut self, frame_index: u32, camera: &CameraState) -> Result<(), RenderError> {
        if self.subpass_descriptor_sets.is_empty() {
            return Ok(());
        }

        let mut uniform = SubpassUniform {
            pv: matrix_to_array(&camera.pv),
            inverse_pv: matrix_to_array(&camera.inverse_pv),
            camera_position: [
                camera.position[0],
                camera.position[1],
                camera.position[2],
                1.0,
            ],
            ..Default::default()
        };
        for (slot, light) in self.punctual_lights.iter().enumerate() {
            uniform.punctual_lights[slot] = *light;
        }

        *self.subpass_uniform_buffers[frame_index as usize].write()? = uniform;

        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_ui(&self) -> bool {
        self.is_ui
    }

    pub fn draw_elements(&self) -> &[DrawElement] {
        &self.draw_elements
    }

    pub fn need_resize(&self) -> bool {
        self.need_resize
    }

    pub fn has_push_constant(&self) -> bool {
        self.has_push_constant
    }

    pub fn push_constant_ranges(&self) -> &[PushConstantRange] {
        &self.push_constant_ranges
    }

    /// Records the subpass-owned push constants. The ranges are declared in
    /// the pipeline layout; no subpass currently carries push data.
    pub fn push_constants<L>(
        &self,
        _builder: &mut vulkano::command_buffer::AutoCommandBufferBuilder<L>,
    ) -> Result<(), RenderError> {
        Ok(())
    }

    pub fn has_subpass_descriptor_set(&self) -> bool {
        self.subpass_descriptor_set_index.is_some() && !self.subpass_descriptor_sets.is_empty()
    }

    pub fn subpass_descriptor_set_index(&self) -> u32 {
        self.subpass_descriptor_set_index.unwrap_or(u32::MAX)
    }

    pub fn subpass_descriptor_set(&self, frame_index: u32) -> Arc<DescriptorSet> {
        self.subpass_descriptor_sets[frame_index as usize].clone()
    }

    pub fn has_bindless_descriptor_set(&self) -> bool {
        self.bindless_descriptor_set.is_some()
    }

    pub fn bindless_descriptor_set_index(&self) -> u32 {
        self.bindless_descriptor_set_index.unwrap_or(u32::MAX)
    }

    pub fn bindless_descriptor_set(&self) -> Option<Arc<DescriptorSet>> {
        self.bindless_descriptor_set.clone()
    }

    pub fn draw_element_descriptor_set_index(&self) -> u32 {
        self.draw_element_descriptor_set_index
    }

    pub fn bindless_counts(&self) -> (u32, u32) {
        (
            self.bindless_samplers.len() as u32,
            self.bindless_images.len() as u32,
        )
    }
}

impl SubpassState {
    fn create_draw_elements(
        &mut self,
        desc: &SubpassDesc,
        ctx: &SubpassBuildContext<'_>,
    ) -> Result<(), RenderError> {
        self.draw_elements.clear();

        if !self.has_scene {
            let draw_element = self.create_draw_element(desc, ctx, None)?;
            self.draw_elements.push(draw_element);
        } else {
            let transparent = self.scene_tag == TRANSPARENCY_SCENE_TAG;

            for scene_primitive in ctx.scene_primitives {
                let scene = ctx.assets.scene(scene_primitive.scene_index)?;
                let material = scene.material(scene_primitive.primitive.material);
                let blends = material.alpha_mode == AlphaMode::Blend;

                if transparent == blends {
                    let draw_element =
                        self.create_draw_element(desc, ctx, Some(scene_primitive))?;
                    self.draw_elements.push(draw_element);
                }
            }
        }

        self.finalize_bindless_set(ctx)?;

        debug!(
            "subpass {}: {} draw elements, {} bindless samplers, {} bindless images",
            self.name,
            self.draw_elements.len(),
            self.bindless_samplers.len(),
            self.bindless_images.len(),
        );

        Ok(())
    }

    fn create_draw_element(
        &mut self,
        desc: &SubpassDesc,
        ctx: &SubpassBuildContext<'_>,
        scene_primitive: Option<&ScenePrimitive>,
    ) -> Result<DrawElement, RenderError> {
        let (scene, material): (Option<&Scene>, Option<&Material>) = match scene_primitive {
            Some(primitive) => {
                let scene = ctx.assets.scene(primitive.scene_index)?;
                (
                    Some(scene),
                    Some(scene.material(primitive.primitive.material)),
                )
            }
            None => (None, None),
        };

        // Macro assembly drives both compilation and the SPIR-V identity.
        let scene_inputs = match (scene_primitive, material) {
            (Some(primitive), Some(material)) => Some(SceneProcessInputs {
                material,
                vertex_attribute_names: primitive
                    .primitive
                    .vertex_attributes
                    .keys()
                    .map(String::as_str)
                    .collect(),
            }),
            _ => None,
        };
        let processes = assemble_processes(
            scene_inputs,
            self.has_light.then_some(self.punctual_lights.len()),
        )?;

        let vertex_shader = *desc.shaders.get("vertex").ok_or_else(|| {
            RenderError::MissingShaderStage {
                subpass: self.name.clone(),
                stage: "vertex",
            }
        })?;
        let fragment_shader = *desc.shaders.get("fragment").ok_or_else(|| {
            RenderError::MissingShaderStage {
                subpass: self.name.clone(),
                stage: "fragment",
            }
        })?;

        let vert_spirv = self
            .caches
            .request_spirv(ctx.assets.shader(vertex_shader)?, &processes)?;
        let frag_spirv = self
            .caches
            .request_spirv(ctx.assets.shader(fragment_shader)?, &processes)?;

        let merged = merge_shader_resources(&[vert_spirv.as_ref(), frag_spirv.as_ref()]);
        let partition = partition_sets(&merged)?;

        let (set_layouts, classes) = self.create_set_layouts(ctx, &partition)?;

        let uniform = self.build_draw_element_uniform(ctx, scene, scene_primitive, material, &merged)?;

        let (descriptor_sets, uniform_buffers) = self.create_descriptor_sets(
            ctx,
            &partition,
            &classes,
            &uniform,
        )?;

        let push_constant_ranges: Vec<PushConstantRange> = partition
            .push_constant_ranges
            .iter()
            .map(|resource| PushConstantRange {
                stages: resource.stages,
                offset: resource.offset,
                size: resource.size,
            })
            .collect();

        if !push_constant_ranges.is_empty() {
            self.has_push_constant = true;
            self.push_constant_ranges = push_constant_ranges.clone();
        }

        let pipeline_layout = self.caches.request_pipeline_layout(
            ctx.gpu,
            PipelineLayoutCreateInfo {
                set_layouts,
                push_constant_ranges,
                ..Default::default()
            },
            &self.name,
        )?;

        let (vertex_input_state, vertex_infos, index, vertex_count) =
            self.build_vertex_input(scene_primitive, &merged)?;

        let has_depth_stencil = !desc
            .attachment_indices(asset::frame_graph::AttachmentUsage::DepthStencil)
            .is_empty();

        let pipeline = self.create_pipeline(
            ctx,
            material,
            &[&vert_spirv, &frag_spirv],
            pipeline_layout.clone(),
            vertex_input_state,
            has_depth_stencil,
        )?;

        Ok(DrawElement {
            has_scene: self.has_scene,
            scene_index: scene_primitive.map(|p| p.scene_index).unwrap_or(0),
            pipeline,
            pipeline_layout,
            descriptor_sets,
            uniform_buffers,
            vertex_count,
            vertex_infos,
            index,
        })
    }

    /// Creates (or reuses) the descriptor set layout of every reflected set,
    /// in ascending set order, and classifies each set.
    fn create_set_layouts(
        &mut self,
        ctx: &SubpassBuildContext<'_>,
        partition: &SetPartition,
    ) -> Result<(Vec<Arc<DescriptorSetLayout>>, Vec<SetClass>), RenderError> {
        let mut set_layouts = Vec::with_capacity(partition.sets.len());
        let mut classes = Vec::with_capacity(partition.sets.len());

        for (set, resources) in &partition.sets {
            let class = classify_set(resources);
            classes.push(class);

            let layout = match class {
                SetClass::Subpass => {
                    self.subpass_descriptor_set_index = Some(*set);
                    let layout = self.subpass_set_layout(ctx, resources)?;
                    self.subpass_descriptor_set_layout = Some(layout.clone());
                    layout
                }
                SetClass::Bindless => {
                    self.bindless_descriptor_set_index = Some(*set);
                    let layout = self.bindless_set_layout(ctx)?;
                    self.bindless_descriptor_set_layout = Some(layout.clone());
                    layout
                }
                SetClass::DrawElement => {
                    self.draw_element_descriptor_set_index =
                        self.draw_element_descriptor_set_index.min(*set);
                    self.draw_element_set_layout(ctx, resources)?
                }
            };

            set_layouts.push(layout);
        }

        Ok((set_layouts, classes))
    }

    fn subpass_set_layout(
        &mut self,
        ctx: &SubpassBuildContext<'_>,
        resources: &[ShaderResource],
    ) -> Result<Arc<DescriptorSetLayout>, RenderError> {
        let mut bindings: BTreeMap<u32, DescriptorSetLayoutBinding> = BTreeMap::new();

        for resource in resources {
            let descriptor_type = match resource.kind {
                ShaderResourceKind::UniformBuffer => DescriptorType::UniformBuffer,
                ShaderResourceKind::InputAttachment => DescriptorType::InputAttachment,
                _ => {
                    return Err(RenderError::UnsupportedShaderResource {
                        name: resource.name.clone(),
                        kind: "subpass set",
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

        self.caches.request_descriptor_set_layout(
            ctx.gpu,
            DescriptorSetLayoutCreateInfo {
                bindings,
                ..Default::default()
            },
            &format!("{}_subpass", self.name),
        )
    }

    fn bindless_set_layout(
        &mut self,
        ctx: &SubpassBuildContext<'_>,
    ) -> Result<Arc<DescriptorSetLayout>, RenderError> {
        let stages = ShaderStages::VERTEX | ShaderStages::FRAGMENT | ShaderStages::COMPUTE;
        let binding_flags =
            DescriptorBindingFlags::PARTIALLY_BOUND | DescriptorBindingFlags::UPDATE_AFTER_BIND;

        let mut bindings: BTreeMap<u32, DescriptorSetLayoutBinding> = BTreeMap::new();
        bindings.insert(
            BINDLESS_SAMPLER_BINDING,
            DescriptorSetLayoutBinding {
                stages,
                descriptor_count: BINDLESS_SAMPLER_MAX_COUNT,
                binding_flags,
                ..DescriptorSetLayoutBinding::descriptor_type(DescriptorType::Sampler)
            },
        );
        bindings.insert(
            BINDLESS_IMAGE_BINDING,
            DescriptorSetLayoutBinding {
                stages,
                descriptor_count: BINDLESS_IMAGE_MAX_COUNT,
                binding_flags,
                ..DescriptorSetLayoutBinding::descriptor_type(DescriptorType::SampledImage)
            },
        );

        self.caches.request_descriptor_set_layout(
            ctx.gpu,
            DescriptorSetLayoutCreateInfo {
                flags: DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL,
                bindings,
                ..Default::default()
            },
            &format!("{}_bindless", self.name),
        )
    }

    fn draw_element_set_layout(
        &mut self,
        ctx: &SubpassBuildContext<'_>,
        resources: &[ShaderResource],
    ) -> Result<Arc<DescriptorSetLayout>, RenderError> {
        let mut bindings: BTreeMap<u32, DescriptorSetLayoutBinding> = BTreeMap::new();

        for resource in resources {
            let descriptor_type = match resource.kind {
                ShaderResourceKind::UniformBuffer => DescriptorType::UniformBuffer,
                ShaderResourceKind::CombinedImageSampler => DescriptorType::CombinedImageSampler,
                _ => {
                    return Err(RenderError::UnsupportedShaderResource {
                        name: resource.name.clone(),
                        kind: "draw element set",
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

        self.caches.request_descriptor_set_layout(
            ctx.gpu,
            DescriptorSetLayoutCreateInfo {
                bindings,
                ..Default::default()
            },
            &format!("{}_draw_element", self.name),
        )
    }

    /// Assigns bindless indices for the material's textures and fills the
    /// per-draw-element uniform.
    fn build_draw_element_uniform(
        &mut self,
        _ctx: &SubpassBuildContext<'_>,
        scene: Option<&Scene>,
        scene_primitive: Option<&ScenePrimitive>,
        material: Option<&Material>,
        merged: &[ShaderResource],
    ) -> Result<DrawElementUniform, RenderError> {
        let mut uniform = DrawElementUniform::default();

        let (Some(scene), Some(scene_primitive), Some(material)) =
            (scene, scene_primitive, material)
        else {
            return Ok(uniform);
        };

        uniform.model = matrix_to_array(&scene_primitive.model);
        uniform.inverse_model = matrix_to_array(&scene_primitive.inverse_model);
        uniform.base_color_factor = material.base_color_factor;
        uniform.metallic_factor = material.metallic_factor;
        uniform.roughness_factor = material.roughness_factor;
        uniform.normal_scale = material.normal_scale;
        uniform.occlusion_strength = material.occlusion_strength;
        uniform.emissive_factor = [
            material.emissive_factor[0],
            material.emissive_factor[1],
            material.emissive_factor[2],
            1.0,
        ];
        uniform.alpha_mode = material.alpha_mode as u32;
        uniform.alpha_cutoff = material.alpha_cutoff;

        let has_bindless_arrays = merged
            .iter()
            .any(|resource| resource.name == "bindless_samplers")
            && merged
                .iter()
                .any(|resource| resource.name == "bindless_images");
        if !has_bindless_arrays {
            return Ok(uniform);
        }

        for (slot, wanted_texture) in asset::scene_graph::MATERIAL_TEXTURE_NAMES
            .iter()
            .enumerate()
        {
            let Some(&texture_index) = material.textures.get(wanted_texture) else {
                continue;
            };
            let texture = scene.texture(texture_index);

            let sampler = scene.sampler(texture.sampler).sampler.clone();
            let sampler_index = self.bindless_sampler_index(sampler)?;

            let image = scene.image(texture.image).view.clone();
            let image_index = self.bindless_image_index(image)?;

            if slot < 4 {
                uniform.sampler_indices_0[slot] = sampler_index;
                uniform.image_indices_0[slot] = image_index;
            } else {
                uniform.sampler_indices_1[slot - 4] = sampler_index;
                uniform.image_indices_1[slot - 4] = image_index;
            }
        }

        Ok(uniform)
    }

    /// First use of a sampler takes the next free slot; reuse is looked up by
    /// handle so index assignment is deterministic across rebuilds.
    fn bindless_sampler_index(&mut self, sampler: Arc<Sampler>) -> Result<u32, RenderError> {
        let (index, is_new) = self.sampler_indices.assign(Arc::as_ptr(&sampler) as usize)?;
        if is_new {
            self.bindless_samplers.push(sampler);
        }
        Ok(index)
    }

    fn bindless_image_index(&mut self, image: Arc<ImageView>) -> Result<u32, RenderError> {
        let (index, is_new) = self.image_indices.assign(Arc::as_ptr(&image) as usize)?;
        if is_new {
            self.bindless_images.push(image);
        }
        Ok(index)
    }

    /// Allocates and writes the subpass set (once) and the per-frame
    /// draw-element sets.
    fn create_descriptor_sets(
        &mut self,
        ctx: &SubpassBuildContext<'_>,
        partition: &SetPartition,
        classes: &[SetClass],
        uniform: &DrawElementUniform,
    ) -> Result<(Vec<Vec<Arc<DescriptorSet>>>, Vec<Subbuffer<DrawElementUniform>>), RenderError>
    {
        let frame_count = self.frame_count as usize;
        let mut draw_element_sets: Vec<Vec<Arc<DescriptorSet>>> = vec![Vec::new(); frame_count];
        let mut uniform_buffers = Vec::new();

        for ((_, resources), class) in partition.sets.iter().zip(classes) {
            match class {
                SetClass::Subpass => {
                    self.write_subpass_set(ctx, resources)?;
                }
                SetClass::Bindless => {
                    // Accumulated writes are flushed once after all draw
                    // elements are built.
                }
                SetClass::DrawElement => {
                    let layout = self.draw_element_set_layout(ctx, resources)?;

                    for frame_index in 0..frame_count {
                        let mut writes = Vec::new();

                        for resource in resources {
                            match resource.kind {
                                ShaderResourceKind::UniformBuffer
                                    if resource.name == "DrawElement" =>
                                {
                                    let buffer = ctx.gpu.create_buffer_from_data(
                                        *uniform,
                                        BufferUsage::UNIFORM_BUFFER,
                                        "draw_element_uniform",
                                    )?;
                                    writes.push(WriteDescriptorSet::buffer(
                                        resource.binding,
                                        buffer.clone(),
                                    ));
                                    uniform_buffers.push(buffer);
                                }
                                ShaderResourceKind::UniformBuffer => {}
                                ShaderResourceKind::CombinedImageSampler => {
                                    self.need_resize = true;
                                    let view = ctx.shared_image_views[frame_index]
                                        .get(&resource.name)
                                        .cloned()
                                        .ok_or_else(|| {
                                            RenderError::MissingSharedImageView(
                                                resource.name.clone(),
                                            )
                                        })?;
                                    writes.push(WriteDescriptorSet::image_view_sampler(
                                        resource.binding,
                                        view,
                                        ctx.gpu.default_sampler(),
                                    ));
                                }
                                _ => {}
                            }
                        }

                        let set = ctx.gpu.allocate_descriptor_set(
                            layout.clone(),
                            writes,
                            &format!("{}_draw_element", self.name),
                        )?;
                        draw_element_sets[frame_index].push(set);
                    }
                }
            }
        }

        if draw_element_sets.iter().all(Vec::is_empty) {
            draw_element_sets.clear();
        }

        Ok((draw_element_sets, uniform_buffers))
    }

    fn write_subpass_set(
        &mut self,
        ctx: &SubpassBuildContext<'_>,
        resources: &[ShaderResource],
    ) -> Result<(), RenderError> {
        if !self.subpass_descriptor_sets.is_empty() {
            return Ok(());
        }
        let Some(layout) = self.subpass_descriptor_set_layout.clone() else {
            return Ok(());
        };

        for frame_index in 0..self.frame_count as usize {
            let mut writes = Vec::new();

            for resource in resources {
                match resource.kind {
                    ShaderResourceKind::UniformBuffer if resource.name == "Subpass" => {
                        let buffer = ctx.gpu.create_buffer_from_data(
                            SubpassUniform::default(),
                            BufferUsage::UNIFORM_BUFFER,
                            "subpass_uniform",
                        )?;
                        writes.push(WriteDescriptorSet::buffer(resource.binding, buffer.clone()));
                        self.subpass_uniform_buffers.push(buffer);
                    }
                    ShaderResourceKind::InputAttachment => {
                        // Input attachments alias the pass's own image views,
                        // so this subpass must rebuild on resize.
                        self.need_resize = true;
                        let view = ctx.attachment_image_views[frame_index]
                            [resource.input_attachment_index as usize]
                            .clone();
                        writes.push(WriteDescriptorSet::image_view(resource.binding, view));
                    }
                    _ => {}
                }
            }

            let set = ctx.gpu.allocate_descriptor_set(
                layout.clone(),
                writes,
                &format!("{}_subpass", self.name),
            )?;
            self.subpass_descriptor_sets.push(set);
        }

        Ok(())
    }

    /// Allocates the single bindless set and writes the accumulated sampler
    /// and image arrays.
    fn finalize_bindless_set(&mut self, ctx: &SubpassBuildContext<'_>) -> Result<(), RenderError> {
        let Some(layout) = self.bindless_descriptor_set_layout.clone() else {
            return Ok(());
        };
        if self.bindless_descriptor_set.is_some() {
            return Ok(());
        }

        let mut writes = Vec::new();
        if !self.bindless_samplers.is_empty() {
            writes.push(WriteDescriptorSet::sampler_array(
                BINDLESS_SAMPLER_BINDING,
                0,
                self.bindless_samplers.iter().cloned(),
            ));
        }
        if !self.bindless_images.is_empty() {
            writes.push(WriteDescriptorSet::image_view_array(
                BINDLESS_IMAGE_BINDING,
                0,
                self.bindless_images.iter().cloned(),
            ));
        }

        let set = ctx.gpu.allocate_bindless_descriptor_set(
            layout,
            writes,
            &format!("{}_bindless", self.name),
        )?;
        self.bindless_descriptor_set = Some(set);

        Ok(())
    }

    fn build_vertex_input(
        &self,
        scene_primitive: Option<&ScenePrimitive>,
        merged: &[ShaderResource],
    ) -> Result<
        (
            VertexInputState,
            Vec<DrawElementVertexInfo>,
            Option<DrawIndex>,
            u32,
        ),
        RenderError,
    > {
        let mut vertex_input_state = VertexInputState::default();
        let mut vertex_infos = Vec::new();
        let mut index = None;
        let mut vertex_count = 0u32;

        let Some(scene_primitive) = scene_primitive else {
            return Ok((vertex_input_state, vertex_infos, index, vertex_count));
        };

        // Stage inputs are matched to vertex attributes by lowercase
        // semantic name; each match gets its own binding at the shader's
        // location.
        let mut location_attributes = BTreeMap::new();
        for (attribute_name, attribute) in &scene_primitive.primitive.vertex_attributes {
            let lower = attribute_name.to_lowercase();
            let Some(resource) = merged
                .iter()
                .find(|r| r.kind == ShaderResourceKind::StageInput && r.name == lower)
            else {
                continue;
            };

            vertex_input_state.bindings.insert(
                resource.location,
                VertexInputBindingDescription {
                    stride: attribute.stride,
                    input_rate: VertexInputRate::Vertex,
                    ..Default::default()
                },
            );
            vertex_input_state.attributes.insert(
                resource.location,
                VertexInputAttributeDescription {
                    binding: resource.location,
                    format: attribute.format,
                    offset: 0,
                    ..Default::default()
                },
            );

            location_attributes.insert(resource.location, attribute);
            if vertex_count == 0 {
                vertex_count = attribute.count;
            }
        }

        let locations: Vec<u32> = location_attributes.keys().copied().collect();
        for run in split_contiguous(&locations) {
            vertex_infos.push(DrawElementVertexInfo {
                first_binding: run[0],
                buffers: run
                    .iter()
                    .map(|location| location_attributes[location].buffer.clone())
                    .collect(),
            });
        }

        if let Some(index_attribute) = &scene_primitive.primitive.index_attribute {
            index = Some(DrawIndex {
                buffer: index_attribute.buffer.clone(),
                count: index_attribute.count,
            });
        }

        Ok((vertex_input_state, vertex_infos, index, vertex_count))
    }

    fn create_pipeline(
        &mut self,
        ctx: &SubpassBuildContext<'_>,
        material: Option<&Material>,
        spirvs: &[&Arc<Spirv>],
        pipeline_layout: Arc<vulkano::pipeline::PipelineLayout>,
        vertex_input_state: VertexInputState,
        has_depth_stencil: bool,
    ) -> Result<Arc<vulkano::pipeline::GraphicsPipeline>, RenderError> {
        let mut stages = Vec::with_capacity(spirvs.len());
        let mut stage_hashes = Vec::with_capacity(spirvs.len());

        for spirv in spirvs {
            let module = self.caches.request_shader_module(ctx.gpu, spirv, &self.name)?;
            let entry_point = module.entry_point("main").ok_or_else(|| {
                RenderError::Reflection(format!("shader for {} has no main entry point", self.name))
            })?;
            stages.push(PipelineShaderStageCreateInfo::new(entry_point));
            stage_hashes.push(spirv.hash_value());
        }

        let double_sided = material.map(|m| m.double_sided).unwrap_or(false);
        let rasterization_state = RasterizationState {
            cull_mode: if !self.has_scene || double_sided {
                CullMode::None
            } else {
                CullMode::Back
            },
            front_face: FrontFace::CounterClockwise,
            ..Default::default()
        };

        let blend = if self.scene_tag == TRANSPARENCY_SCENE_TAG {
            Some(AttachmentBlend {
                src_color_blend_factor: BlendFactor::SrcAlpha,
                dst_color_blend_factor: BlendFactor::OneMinusSrcAlpha,
                color_blend_op: BlendOp::Add,
                src_alpha_blend_factor: BlendFactor::One,
                dst_alpha_blend_factor: BlendFactor::Zero,
                alpha_blend_op: BlendOp::Add,
            })
        } else {
            None
        };

        let subpass = Subpass::from(ctx.render_pass.clone(), self.subpass_index).ok_or_else(
            || RenderError::InvalidSubpassIndex(self.name.clone(), self.subpass_index),
        )?;

        let create_info = GraphicsPipelineCreateInfo {
            stages: stages.into_iter().collect(),
            vertex_input_state: Some(vertex_input_state),
            input_assembly_state: Some(InputAssemblyState {
                topology: PrimitiveTopology::TriangleList,
                ..Default::default()
            }),
            viewport_state: Some(ViewportState::default()),
            rasterization_state: Some(rasterization_state.clone()),
            multisample_state: Some(MultisampleState::default()),
            depth_stencil_state: has_depth_stencil.then(|| DepthStencilState {
                depth: Some(DepthState {
                    write_enable: true,
                    compare_op: CompareOp::Less,
                }),
                ..Default::default()
            }),
            color_blend_state: Some(ColorBlendState::with_attachment_states(
                ctx.color_attachment_count,
                ColorBlendAttachmentState {
                    blend,
                    color_write_mask: ColorComponents::all(),
                    ..Default::default()
                },
            )),
            dynamic_state: [DynamicState::Viewport, DynamicState::Scissor]
                .into_iter()
                .collect(),
            subpass: Some(subpass.into()),
            ..GraphicsPipelineCreateInfo::layout(pipeline_layout)
        };

        self.caches.request_graphics_pipeline(
            ctx.gpu,
            &stage_hashes,
            &rasterization_state,
            create_info,
            &self.name,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vulkano::shader::ShaderStages;

    fn resource(name: &str, kind: ShaderResourceKind) -> ShaderResource {
        let mut resource = ShaderResource {
            name: name.to_string(),
            kind,
            stages: ShaderStages::FRAGMENT,
            input_attachment_index: 0,
            set: 0,
            binding: 0,
            array_size: 1,
            size: 0,
            offset: 0,
            location: 0,
        };
        resource.set = 0;
        resource
    }

    #[test]
    fn sets_are_classified_by_resource_name() {
        assert_eq!(
            classify_set(&[resource("Subpass", ShaderResourceKind::UniformBuffer)]),
            SetClass::Subpass
        );
        assert_eq!(
            classify_set(&[
                resource("subpass_input_color", ShaderResourceKind::InputAttachment),
                resource("Subpass", ShaderResourceKind::UniformBuffer),
            ]),
            SetClass::Subpass
        );
        assert_eq!(
            classify_set(&[
                resource("bindless_samplers", ShaderResourceKind::Sampler),
                resource("bindless_images", ShaderResourceKind::SampledImage),
            ]),
            SetClass::Bindless
        );
        assert_eq!(
            classify_set(&[resource("DrawElement", ShaderResourceKind::UniformBuffer)]),
            SetClass::DrawElement
        );
        assert_eq!(
            classify_set(&[resource("geometry_color", ShaderResourceKind::CombinedImageSampler)]),
            SetClass::DrawElement
        );
    }

    #[test]
    fn bindless_indices_are_first_use_and_stable() {
        let mut allocator = BindlessIndexAllocator::new("image", 4);

        assert_eq!(allocator.assign(0xa0).unwrap(), (0, true));
        assert_eq!(allocator.assign(0xb0).unwrap(), (1, true));
        assert_eq!(allocator.assign(0xa0).unwrap(), (0, false));

        // A rebuild over the same inputs reproduces the assignment.
        allocator.clear();
        assert_eq!(allocator.assign(0xa0).unwrap(), (0, true));
        assert_eq!(allocator.assign(0xb0).unwrap(), (1, true));
    }

    #[test]
    fn bindless_overflow_is_a_build_error() {
        let mut allocator = BindlessIndexAllocator::new("sampler", 2);
        allocator.assign(1).unwrap();
        allocator.assign(2).unwrap();

        match allocator.assign(3) {
            Err(RenderError::BindlessIndexOverflow { kind, index, limit }) => {
                assert_eq!(kind, "sampler");
                assert_eq!(index, 2);
                assert_eq!(limit, 2);
            }
            other => panic!("expected an overflow error, got {:?}", other.map(|_| ())),
        }
    }
}
