use std::collections::HashMap;

use vulkano::shader::ShaderStages;

use crate::error::RenderError;

/// What a reflected shader resource is, one variant per SPIR-V resource
/// class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderResourceKind {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
    InputAttachment,
    PushConstantBuffer,
    StageInput,
}

#[derive(Debug, Clone)]
pub struct ShaderResource {
    pub name: String,
    pub kind: ShaderResourceKind,
    pub stages: ShaderStages,
    pub input_attachment_index: u32,
    pub set: u32,
    pub binding: u32,
    pub array_size: u32,
    pub size: u32,
    pub offset: u32,
    pub location: u32,
}

impl ShaderResource {
    fn new(name: String, kind: ShaderResourceKind, stages: ShaderStages) -> ShaderResource {
        ShaderResource {
            name,
            kind,
            stages,
            input_attachment_index: 0,
            set: 0,
            binding: 0,
            array_size: 1,
            size: 0,
            offset: 0,
            location: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecializationConstant {
    pub name: String,
    pub constant_id: u32,
}

/// A compiled SPIR-V blob with its stage, content fingerprint and reflected
/// interface.
pub struct Spirv {
    words: Vec<u32>,
    stages: ShaderStages,
    hash_value: u64,
    shader_resources: Vec<ShaderResource>,
    specialization_constants: Vec<SpecializationConstant>,
}

impl Spirv {
    pub fn new(words: Vec<u32>, stages: ShaderStages, hash_value: u64) -> Result<Spirv, RenderError> {
        let shader_resources = reflect_shader_resources(&words, stages)?;
        let specialization_constants = parse_specialization_constants(&words);

        Ok(Spirv {
            words,
            stages,
            hash_value,
            shader_resources,
            specialization_constants,
        })
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn stages(&self) -> ShaderStages {
        self.stages
    }

    pub fn hash_value(&self) -> u64 {
        self.hash_value
    }

    pub fn shader_resources(&self) -> &[ShaderResource] {
        &self.shader_resources
    }

    pub fn specialization_constants(&self) -> &[SpecializationConstant] {
        &self.specialization_constants
    }
}

fn reflect_shader_resources(
    words: &[u32],
    stages: ShaderStages,
) -> Result<Vec<ShaderResource>, RenderError> {
    use spirv_reflect::types::ReflectDescriptorType;

    let module = spirv_reflect::ShaderModule::load_u32_data(words)
        .map_err(|err| RenderError::Reflection(err.to_string()))?;

    let mut resources = Vec::new();

    let bindings = module
        .enumerate_descriptor_bindings(None)
        .map_err(|err| RenderError::Reflection(err.to_string()))?;

    for binding in bindings {
        let kind = match binding.descriptor_type {
            ReflectDescriptorType::Sampler => ShaderResourceKind::Sampler,
            ReflectDescriptorType::CombinedImageSampler => {
                ShaderResourceKind::CombinedImageSampler
            }
            ReflectDescriptorType::SampledImage => ShaderResourceKind::SampledImage,
            ReflectDescriptorType::StorageImage => ShaderResourceKind::StorageImage,
            ReflectDescriptorType::UniformBuffer => ShaderResourceKind::UniformBuffer,
            ReflectDescriptorType::StorageBuffer => ShaderResourceKind::StorageBuffer,
            ReflectDescriptorType::InputAttachment => ShaderResourceKind::InputAttachment,
            _ => continue,
        };

        // Buffer blocks go by their block type name (`Subpass`,
        // `DrawElement`), not the instance name, matching how GLSL declares
        // them.
        let name = match kind {
            ShaderResourceKind::UniformBuffer | ShaderResourceKind::StorageBuffer => binding
                .type_description
                .as_ref()
                .map(|ty| ty.type_name.clone())
                .filter(|type_name| !type_name.is_empty())
                .unwrap_or_else(|| binding.name.clone()),
            _ => binding.name.clone(),
        };

        let mut resource = ShaderResource::new(name, kind, stages);
        resource.set = binding.set;
        resource.binding = binding.binding;
        resource.array_size = binding.count.max(1);
        resource.size = binding.block.size;
        resource.input_attachment_index = binding.input_attachment_index;

        resources.push(resource);
    }

    let push_constants = module
        .enumerate_push_constant_blocks(None)
        .map_err(|err| RenderError::Reflection(err.to_string()))?;

    for block in push_constants {
        let offset = block
            .members
            .iter()
            .map(|member| member.offset)
            .min()
            .unwrap_or(0);

        let mut resource =
            ShaderResource::new(block.name.clone(), ShaderResourceKind::PushConstantBuffer, stages);
        resource.offset = offset;
        resource.size = block.size.saturating_sub(offset);

        resources.push(resource);
    }

    let inputs = module
        .enumerate_input_variables(None)
        .map_err(|err| RenderError::Reflection(err.to_string()))?;

    for input in inputs {
        // Built-ins carry no location and are not vertex streams.
        if input.name.starts_with("gl_") || input.location == u32::MAX {
            continue;
        }

        let mut resource =
            ShaderResource::new(input.name.clone(), ShaderResourceKind::StageInput, stages);
        resource.location = input.location;

        resources.push(resource);
    }

    Ok(resources)
}

/// Merges reflected resources across stages by name, OR-combining the stage
/// masks. Insertion order is the order resources first appear, which keeps
/// later set classification deterministic.
pub fn merge_shader_resources(spirvs: &[&Spirv]) -> Vec<ShaderResource> {
    let mut merged: Vec<ShaderResource> = Vec::new();
    let mut by_name: HashMap<(String, ShaderResourceKind), usize> = HashMap::new();

    for spirv in spirvs {
        for resource in spirv.shader_resources() {
            let key = (resource.name.clone(), resource.kind);
            match by_name.get(&key) {
                Some(&index) => merged[index].stages |= resource.stages,
                None => {
                    by_name.insert(key, merged.len());
                    merged.push(resource.clone());
                }
            }
        }
    }

    merged
}

/// Resources bucketed by descriptor set, plus push-constant ranges. Stage
/// inputs never enter a set.
#[derive(Debug, Default)]
pub struct SetPartition {
    /// Ascending (set number, resources) pairs forming a contiguous range
    /// starting at zero.
    pub sets: Vec<(u32, Vec<ShaderResource>)>,
    pub push_constant_ranges: Vec<ShaderResource>,
}

/// Buckets merged resources by descriptor set number and validates that the
/// used sets form a contiguous `0..=max` range. A gap is a build-time error,
/// never a record-time one.
pub fn partition_sets(resources: &[ShaderResource]) -> Result<SetPartition, RenderError> {
    let mut sets: Vec<(u32, Vec<ShaderResource>)> = Vec::new();
    let mut push_constant_ranges = Vec::new();

    for resource in resources {
        match resource.kind {
            ShaderResourceKind::Sampler
            | ShaderResourceKind::CombinedImageSampler
            | ShaderResourceKind::SampledImage
            | ShaderResourceKind::StorageImage
            | ShaderResourceKind::UniformBuffer
            | ShaderResourceKind::StorageBuffer
            | ShaderResourceKind::InputAttachment => {
                match sets.iter_mut().find(|(set, _)| *set == resource.set) {
                    Some((_, list)) => list.push(resource.clone()),
                    None => sets.push((resource.set, vec![resource.clone()])),
                }
            }
            ShaderResourceKind::PushConstantBuffer => {
                push_constant_ranges.push(resource.clone());
            }
            ShaderResourceKind::StageInput => {}
        }
    }

    sets.sort_by_key(|(set, _)| *set);

    let used: Vec<u32> = sets.iter().map(|(set, _)| *set).collect();
    if used.iter().enumerate().any(|(i, &set)| set != i as u32) {
        return Err(RenderError::ShaderResourceSetGap { used });
    }

    Ok(SetPartition {
        sets,
        push_constant_ranges,
    })
}

const OP_NAME: u32 = 5;
const OP_DECORATE: u32 = 71;
const DECORATION_SPEC_ID: u32 = 1;

/// Scans the raw instruction stream for `OpDecorate ... SpecId` and pairs it
/// with `OpName` debug names.
fn parse_specialization_constants(words: &[u32]) -> Vec<SpecializationConstant> {
    let mut names: HashMap<u32, String> = HashMap::new();
    let mut spec_ids: Vec<(u32, u32)> = Vec::new();

    // Instructions start after the five header words.
    let mut i = 5;
    while i < words.len() {
        let word = words[i];
        let word_count = (word >> 16) as usize;
        let opcode = word & 0xFFFF;
        if word_count == 0 || i + word_count > words.len() {
            break;
        }

        match opcode {
            OP_NAME if word_count >= 3 => {
                names.insert(words[i + 1], decode_literal_string(&words[i + 2..i + word_count]));
            }
            OP_DECORATE if word_count >= 4 && words[i + 2] == DECORATION_SPEC_ID => {
                spec_ids.push((words[i + 1], words[i + 3]));
            }
            _ => {}
        }

        i += word_count;
    }

    spec_ids
        .into_iter()
        .map(|(target, constant_id)| SpecializationConstant {
            name: names.get(&target).cloned().unwrap_or_default(),
            constant_id,
        })
        .collect()
}

fn decode_literal_string(words: &[u32]) -> String {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(name: &str, kind: ShaderResourceKind, set: u32, stages: ShaderStages) -> ShaderResource {
        let mut resource = ShaderResource::new(name.to_string(), kind, stages);
        resource.set = set;
        resource
    }

    fn spirv_with(resources: Vec<ShaderResource>, stages: ShaderStages) -> Spirv {
        Spirv {
            words: vec![],
            stages,
            hash_value: 0,
            shader_resources: resources,
            specialization_constants: vec![],
        }
    }

    #[test]
    fn merge_ors_stage_masks_by_name() {
        let vert = spirv_with(
            vec![resource(
                "Subpass",
                ShaderResourceKind::UniformBuffer,
                0,
                ShaderStages::VERTEX,
            )],
            ShaderStages::VERTEX,
        );
        let frag = spirv_with(
            vec![
                resource(
                    "Subpass",
                    ShaderResourceKind::UniformBuffer,
                    0,
                    ShaderStages::FRAGMENT,
                ),
                resource(
                    "bindless_samplers",
                    ShaderResourceKind::Sampler,
                    1,
                    ShaderStages::FRAGMENT,
                ),
            ],
            ShaderStages::FRAGMENT,
        );

        let merged = merge_shader_resources(&[&vert, &frag]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].stages, ShaderStages::VERTEX | ShaderStages::FRAGMENT);
        assert_eq!(merged[1].stages, ShaderStages::FRAGMENT);
    }

    #[test]
    fn partition_groups_by_set_and_extracts_push_constants() {
        let mut push = ShaderResource::new(
            "PushBlock".to_string(),
            ShaderResourceKind::PushConstantBuffer,
            ShaderStages::VERTEX,
        );
        push.offset = 16;
        push.size = 48;

        let resources = vec![
            resource("Subpass", ShaderResourceKind::UniformBuffer, 0, ShaderStages::VERTEX),
            resource("bindless_samplers", ShaderResourceKind::Sampler, 1, ShaderStages::FRAGMENT),
            resource("DrawElement", ShaderResourceKind::UniformBuffer, 2, ShaderStages::VERTEX),
            push,
            resource("position", ShaderResourceKind::StageInput, 0, ShaderStages::VERTEX),
        ];

        let partition = partition_sets(&resources).unwrap();
        assert_eq!(partition.sets.len(), 3);
        assert_eq!(partition.sets[0].0, 0);
        assert_eq!(partition.sets[2].0, 2);
        assert_eq!(partition.push_constant_ranges.len(), 1);
        assert_eq!(partition.push_constant_ranges[0].offset, 16);
    }

    #[test]
    fn partition_rejects_set_gaps() {
        let resources = vec![
            resource("Subpass", ShaderResourceKind::UniformBuffer, 0, ShaderStages::VERTEX),
            resource("DrawElement", ShaderResourceKind::UniformBuffer, 2, ShaderStages::VERTEX),
        ];

        match partition_sets(&resources) {
            Err(RenderError::ShaderResourceSetGap { used }) => assert_eq!(used, vec![0, 2]),
            other => panic!("expected a set gap error, got {other:?}"),
        }
    }

    #[test]
    fn spec_constant_scan_reads_names_and_ids() {
        // Minimal module: header, OpName %7 "light_count", OpDecorate %7 SpecId 3.
        let mut words = vec![0x0723_0203, 0x0001_0000, 0, 100, 0];

        let name_bytes = u32::from_le_bytes(*b"ligh");
        let name_bytes2 = u32::from_le_bytes(*b"t_co");
        let name_bytes3 = u32::from_le_bytes(*b"unt\0");
        words.push((5 << 16) | OP_NAME);
        words.extend_from_slice(&[7, name_bytes, name_bytes2, name_bytes3]);

        words.push((4 << 16) | OP_DECORATE);
        words.extend_from_slice(&[7, DECORATION_SPEC_ID, 3]);

        let constants = parse_specialization_constants(&words);
        assert_eq!(
            constants,
            vec![SpecializationConstant {
                name: "light_count".to_string(),
                constant_id: 3,
            }]
        );
    }

    #[test]
    fn literal_string_stops_at_nul() {
        let words = [u32::from_le_bytes(*b"ab\0\0")];
        assert_eq!(decode_literal_string(&words), "ab");
    }
}
