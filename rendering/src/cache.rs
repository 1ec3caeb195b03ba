use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;
use vulkano::descriptor_set::layout::{DescriptorSetLayout, DescriptorSetLayoutCreateInfo};
use vulkano::pipeline::compute::ComputePipelineCreateInfo;
use vulkano::pipeline::graphics::rasterization::RasterizationState;
use vulkano::pipeline::graphics::GraphicsPipelineCreateInfo;
use vulkano::pipeline::layout::PipelineLayoutCreateInfo;
use vulkano::pipeline::{ComputePipeline, GraphicsPipeline, PipelineLayout};
use vulkano::shader::ShaderModule;
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use asset::Shader;
use gpu::Gpu;

use crate::error::RenderError;
use crate::spirv::Spirv;

/// Content-addressed caches for everything a subpass builds repeatedly:
/// SPIR-V blobs (disk-backed), descriptor-set layouts, pipeline layouts,
/// shader modules and pipelines (with an on-disk Vulkan pipeline cache).
///
/// Caches are owned by one subpass and never evict; they are only touched
/// from the building thread.
pub struct ResourceCaches {
    cache_dir: PathBuf,
    spirvs: HashMap<u64, Arc<Spirv>>,
    descriptor_set_layouts: HashMap<u64, Arc<DescriptorSetLayout>>,
    pipeline_layouts: HashMap<u64, Arc<PipelineLayout>>,
    shader_modules: HashMap<u64, Arc<ShaderModule>>,
    pipelines: HashMap<u64, Arc<GraphicsPipeline>>,
    compute_pipelines: HashMap<u64, Arc<ComputePipeline>>,
}

impl ResourceCaches {
    pub fn new(cache_dir: PathBuf) -> ResourceCaches {
        ResourceCaches {
            cache_dir,
            spirvs: HashMap::new(),
            descriptor_set_layouts: HashMap::new(),
            pipeline_layouts: HashMap::new(),
            shader_modules: HashMap::new(),
            pipelines: HashMap::new(),
            compute_pipelines: HashMap::new(),
        }
    }

    /// Compiles (or re-reads) a shader for the given macro processes. The
    /// first compile writes `spirv_<hash>.cache`; later runs load it
    /// verbatim.
    pub fn request_spirv(
        &mut self,
        shader: &Shader,
        processes: &[String],
    ) -> Result<Arc<Spirv>, RenderError> {
        let hash_value = shader.hash_value(processes);

        if let Some(spirv) = self.spirvs.get(&hash_value) {
            return Ok(spirv.clone());
        }

        let cache_file = self.cache_dir.join(format!("spirv_{hash_value}.cache"));

        let words = match load_binary_u32(&cache_file) {
            Ok(words) => words,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let words = shader.compile_to_spirv(processes)?;
                write_spirv_cache(&self.cache_dir, &cache_file, &words);
                words
            }
            Err(err) => {
                // A corrupt cache entry is recoverable: recompile and rewrite.
                warn!("discarding corrupt SPIR-V cache {}: {err}", cache_file.display());
                let words = shader.compile_to_spirv(processes)?;
                write_spirv_cache(&self.cache_dir, &cache_file, &words);
                words
            }
        };

        let spirv = Arc::new(Spirv::new(words, shader.stage().stages(), hash_value)?);
        self.spirvs.insert(hash_value, spirv.clone());
        Ok(spirv)
    }

    pub fn request_descriptor_set_layout(
        &mut self,
        gpu: &Gpu,
        create_info: DescriptorSetLayoutCreateInfo,
        name: &str,
    ) -> Result<Arc<DescriptorSetLayout>, RenderError> {
        let mut hasher = Xxh3::new();
        hasher.update(format!("{:?}", create_info.flags).as_bytes());
        for (binding, info) in &create_info.bindings {
            hasher.update(&binding.to_le_bytes());
            hasher.update(format!("{info:?}").as_bytes());
        }
        let hash_value = hasher.digest();

        if let Some(layout) = self.descriptor_set_layouts.get(&hash_value) {
            return Ok(layout.clone());
        }

        let layout = gpu.create_descriptor_set_layout(create_info, name)?;
        self.descriptor_set_layouts.insert(hash_value, layout.clone());
        Ok(layout)
    }

    pub fn request_pipeline_layout(
        &mut self,
        gpu: &Gpu,
        create_info: PipelineLayoutCreateInfo,
        name: &str,
    ) -> Result<Arc<PipelineLayout>, RenderError> {
        let mut hasher = Xxh3::new();
        hasher.update(format!("{:?}", create_info.flags).as_bytes());
        for layout in &create_info.set_layouts {
            hasher.update(&(Arc::as_ptr(layout) as usize).to_le_bytes());
        }
        for range in &create_info.push_constant_ranges {
            hasher.update(format!("{range:?}").as_bytes());
        }
        let hash_value = hasher.digest();

        if let Some(layout) = self.pipeline_layouts.get(&hash_value) {
            return Ok(layout.clone());
        }

        let layout = gpu.create_pipeline_layout(create_info, name)?;
        self.pipeline_layouts.insert(hash_value, layout.clone());
        Ok(layout)
    }

    pub fn request_shader_module(
        &mut self,
        gpu: &Gpu,
        spirv: &Spirv,
        name: &str,
    ) -> Result<Arc<ShaderModule>, RenderError> {
        let hash_value = spirv.hash_value();

        if let Some(module) = self.shader_modules.get(&hash_value) {
            return Ok(module.clone());
        }

        let module = gpu.create_shader_module(spirv.words(), name)?;
        self.shader_modules.insert(hash_value, module.clone());
        Ok(module)
    }

    /// Pipeline cache key: the per-stage SPIR-V fingerprints plus the
    /// rasterization state. Creation goes through the on-disk Vulkan
    /// pipeline cache blob, validated against the current device.
    pub fn request_graphics_pipeline(
        &mut self,
        gpu: &Gpu,
        stage_hashes: &[u64],
        rasterization_state: &RasterizationState,
        create_info: GraphicsPipelineCreateInfo,
        name: &str,
    ) -> Result<Arc<GraphicsPipeline>, RenderError> {
        let mut hasher = Xxh3::new();
        for hash in stage_hashes {
            hasher.update(&hash.to_le_bytes());
        }
        hasher.update(format!("{rasterization_state:?}").as_bytes());
        let hash_value = hasher.digest();

        if let Some(pipeline) = self.pipelines.get(&hash_value) {
            return Ok(pipeline.clone());
        }

        let (cache, had_disk_cache, cache_file) = self.load_pipeline_cache(gpu, hash_value)?;

        let pipeline = gpu.create_graphics_pipeline(create_info, Some(cache.clone()), name)?;

        if !had_disk_cache {
            self.store_pipeline_cache(&cache, &cache_file);
        }

        self.pipelines.insert(hash_value, pipeline.clone());
        Ok(pipeline)
    }

    pub fn request_compute_pipeline(
        &mut self,
        gpu: &Gpu,
        stage_hash: u64,
        create_info: ComputePipelineCreateInfo,
        name: &str,
    ) -> Result<Arc<ComputePipeline>, RenderError> {
        let hash_value = xxh3_64(&stage_hash.to_le_bytes());

        if let Some(pipeline) = self.compute_pipelines.get(&hash_value) {
            return Ok(pipeline.clone());
        }

        let (cache, had_disk_cache, cache_file) = self.load_pipeline_cache(gpu, hash_value)?;

        let pipeline = gpu.create_compute_pipeline(create_info, Some(cache.clone()), name)?;

        if !had_disk_cache {
            self.store_pipeline_cache(&cache, &cache_file);
        }

        self.compute_pipelines.insert(hash_value, pipeline.clone());
        Ok(pipeline)
    }

    fn load_pipeline_cache(
        &self,
        gpu: &Gpu,
        hash_value: u64,
    ) -> Result<(Arc<vulkano::pipeline::cache::PipelineCache>, bool, PathBuf), RenderError> {
        let cache_file = self.cache_dir.join(format!("pipeline_{hash_value}.cache"));

        let physical_device = gpu.physical_device();
        let (vendor_id, device_id) = {
            let properties = physical_device.properties();
            (properties.vendor_id, properties.device_id)
        };
        let mut initial_data = Vec::new();
        let mut had_disk_cache = false;

        match std::fs::read(&cache_file) {
            Ok(data) => {
                if validate_pipeline_cache_header(&data, vendor_id, device_id) {
                    initial_data = data;
                    had_disk_cache = true;
                } else {
                    warn!(
                        "discarding pipeline cache {} from another device",
                        cache_file.display()
                    );
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!("could not read pipeline cache {}: {err}", cache_file.display());
            }
        }

        let cache = gpu.create_pipeline_cache(initial_data, "subpass")?;
        Ok((cache, had_disk_cache, cache_file))
    }

    fn store_pipeline_cache(
        &self,
        cache: &Arc<vulkano::pipeline::cache::PipelineCache>,
        cache_file: &Path,
    ) {
        let data = match cache.get_data() {
            Ok(data) => data,
            Err(err) => {
                warn!("could not read back pipeline cache data: {err}");
                return;
            }
        };

        if let Err(err) = std::fs::create_dir_all(&self.cache_dir)
            .and_then(|_| std::fs::write(cache_file, &data))
        {
            warn!("could not write pipeline cache {}: {err}", cache_file.display());
        }
    }
}

/// The first 32 bytes of a pipeline cache blob are the Vulkan
/// `VkPipelineCacheHeaderVersionOne` header; a cache is only reusable when
/// it was produced by the same vendor/device and carries a valid header.
pub fn validate_pipeline_cache_header(data: &[u8], vendor_id: u32, device_id: u32) -> bool {
    if data.len() < 32 {
        return false;
    }

    let read_u32 = |offset: usize| {
        u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ])
    };

    let header_size = read_u32(0);
    let header_version = read_u32(4);
    let header_vendor_id = read_u32(8);
    let header_device_id = read_u32(12);

    header_size > 0
        && header_version == 1
        && header_vendor_id == vendor_id
        && header_device_id == device_id
}

/// Reads a cached SPIR-V blob: a raw sequence of little-endian u32 words.
pub fn load_binary_u32(path: &Path) -> io::Result<Vec<u32>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is not a multiple of four bytes", path.display()),
        ));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub fn save_binary_u32(path: &Path, words: &[u32]) -> io::Result<()> {
    let mut bytes = Vec::with_capacity(words.len() * 4);
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    std::fs::write(path, bytes)
}

fn write_spirv_cache(cache_dir: &Path, cache_file: &Path, words: &[u32]) {
    if let Err(err) =
        std::fs::create_dir_all(cache_dir).and_then(|_| save_binary_u32(cache_file, words))
    {
        warn!("could not write SPIR-V cache {}: {err}", cache_file.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(header_size: u32, version: u32, vendor: u32, device: u32) -> Vec<u8> {
        let mut data = vec![0u8; 32];
        data[0..4].copy_from_slice(&header_size.to_le_bytes());
        data[4..8].copy_from_slice(&version.to_le_bytes());
        data[8..12].copy_from_slice(&vendor.to_le_bytes());
        data[12..16].copy_from_slice(&device.to_le_bytes());
        data
    }

    #[test]
    fn accepts_a_matching_header() {
        let data = header(32, 1, 0x10de, 0x2204);
        assert!(validate_pipeline_cache_header(&data, 0x10de, 0x2204));
    }

    #[test]
    fn rejects_vendor_or_device_mismatch() {
        let data = header(32, 1, 0x10de, 0x2204);
        assert!(!validate_pipeline_cache_header(&data, 0x1002, 0x2204));
        assert!(!validate_pipeline_cache_header(&data, 0x10de, 0x1111));
    }

    #[test]
    fn rejects_bad_header_fields_and_short_data() {
        assert!(!validate_pipeline_cache_header(&header(0, 1, 1, 1), 1, 1));
        assert!(!validate_pipeline_cache_header(&header(32, 2, 1, 1), 1, 1));
        assert!(!validate_pipeline_cache_header(&[0u8; 16], 1, 1));
    }

    #[test]
    fn spirv_cache_round_trips_little_endian_words() {
        let dir = std::env::temp_dir().join(format!("prism_cache_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("spirv_test.cache");

        let words = vec![0x0723_0203u32, 42, u32::MAX];
        save_binary_u32(&path, &words).unwrap();

        let loaded = load_binary_u32(&path).unwrap();
        assert_eq!(loaded, words);

        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.len() % 4, 0);
    }

    #[test]
    fn truncated_spirv_cache_is_invalid_data() {
        let dir = std::env::temp_dir().join(format!("prism_cache_bad_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("spirv_bad.cache");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let err = load_binary_u32(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
