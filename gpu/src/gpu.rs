use std::sync::Arc;

use tracing::{debug, info, warn};
use vulkano::buffer::{Buffer, BufferContents, BufferCreateInfo, BufferUsage, Subbuffer};
use vulkano::command_buffer::allocator::StandardCommandBufferAllocator;
use vulkano::command_buffer::{
    AutoCommandBufferBuilder, CommandBufferUsage, CopyBufferToImageInfo,
    PrimaryAutoCommandBuffer, PrimaryCommandBufferAbstract,
};
use vulkano::descriptor_set::allocator::StandardDescriptorSetAllocator;
use vulkano::descriptor_set::layout::{DescriptorSetLayout, DescriptorSetLayoutCreateInfo};
use vulkano::descriptor_set::{DescriptorSet, WriteDescriptorSet};
use vulkano::device::physical::{PhysicalDevice, PhysicalDeviceType};
use vulkano::device::{
    Device, DeviceCreateInfo, DeviceExtensions, DeviceFeatures, Queue, QueueCreateInfo,
};
use vulkano::format::Format;
use vulkano::image::sampler::{Filter, Sampler, SamplerAddressMode, SamplerCreateInfo};
use vulkano::image::view::ImageView;
use vulkano::image::{Image, ImageCreateInfo, ImageType, ImageUsage};
use vulkano::instance::debug::{
    DebugUtilsMessageSeverity, DebugUtilsMessageType, DebugUtilsMessenger,
    DebugUtilsMessengerCallback, DebugUtilsMessengerCreateInfo,
};
use vulkano::instance::{Instance, InstanceCreateInfo, InstanceExtensions};
use vulkano::memory::allocator::{AllocationCreateInfo, MemoryTypeFilter, StandardMemoryAllocator};
use vulkano::pipeline::cache::{PipelineCache, PipelineCacheCreateInfo};
use vulkano::pipeline::compute::ComputePipelineCreateInfo;
use vulkano::pipeline::layout::PipelineLayoutCreateInfo;
use vulkano::pipeline::{ComputePipeline, GraphicsPipeline, PipelineLayout};
use vulkano::pipeline::graphics::GraphicsPipelineCreateInfo;
use vulkano::render_pass::{Framebuffer, FramebufferCreateInfo, RenderPass, RenderPassCreateInfo};
use vulkano::shader::{ShaderModule, ShaderModuleCreateInfo};
use vulkano::swapchain::Surface;
use vulkano::sync::GpuFuture;
use vulkano::{Version, VulkanLibrary};

use windowing::window::{required_instance_extensions, EngineWindow};

use crate::error::GpuError;
use crate::queues::{pick_queue_families, QueueFamilyIndices};

/// Owns the Vulkan instance, device, queues and allocators, and acts as the
/// one-shot factory for every Vulkan handle the renderer creates.
///
/// see also https://gpuopen.com/learn/understanding-vulkan-objects/
pub struct Gpu {
    _debug_messenger: Option<DebugUtilsMessenger>,
    instance: Arc<Instance>,
    surface: Arc<Surface>,
    physical_device: Arc<PhysicalDevice>,
    device: Arc<Device>,
    queue_family_indices: QueueFamilyIndices,
    graphics_queue: Arc<Queue>,
    compute_queue: Arc<Queue>,
    transfer_queue: Arc<Queue>,
    present_queue: Arc<Queue>,
    memory_allocator: Arc<StandardMemoryAllocator>,
    command_buffer_allocator: Arc<StandardCommandBufferAllocator>,
    descriptor_set_allocator: Arc<StandardDescriptorSetAllocator>,
    bindless_descriptor_set_allocator: Arc<StandardDescriptorSetAllocator>,
    default_sampler: Arc<Sampler>,
}

impl Gpu {
    pub fn new(window: &EngineWindow) -> Result<Gpu, GpuError> {
        let (instance, debug_messenger) = create_instance()?;

        let surface = window.create_surface(instance.clone())?;

        let device_extensions = DeviceExtensions {
            khr_swapchain: true,
            ..DeviceExtensions::empty()
        };

        let device_features = required_device_features();

        let (physical_device, queue_family_indices) = find_physical_device(
            instance.clone(),
            surface.clone(),
            &device_extensions,
            &device_features,
        )?;

        info!(
            "using device: {} (type: {:?})",
            physical_device.properties().device_name,
            physical_device.properties().device_type,
        );

        let (device, queues) = create_logical_device(
            physical_device.clone(),
            queue_family_indices,
            &device_extensions,
            &device_features,
        )?;

        let queue_for = |family: u32| {
            queues
                .iter()
                .find(|queue| queue.queue_family_index() == family)
                .cloned()
                .ok_or_else(|| GpuError::DeviceInit(format!("missing queue for family {family}")))
        };

        let graphics_queue = queue_for(queue_family_indices.graphics)?;
        let compute_queue = queue_for(queue_family_indices.compute)?;
        let transfer_queue = queue_for(queue_family_indices.transfer)?;
        let present_queue = queue_for(queue_family_indices.present)?;

        let memory_allocator = Arc::new(StandardMemoryAllocator::new_default(device.clone()));

        let command_buffer_allocator = Arc::new(StandardCommandBufferAllocator::new(
            device.clone(),
            Default::default(),
        ));

        let descriptor_set_allocator = Arc::new(StandardDescriptorSetAllocator::new(
            device.clone(),
            Default::default(),
        ));

        // Bindless sets live in their own update-after-bind pool.
        let bindless_descriptor_set_allocator = Arc::new(StandardDescriptorSetAllocator::new(
            device.clone(),
            Default::default(),
        ));

        let default_sampler = Sampler::new(
            device.clone(),
            SamplerCreateInfo {
                mag_filter: Filter::Linear,
                min_filter: Filter::Linear,
                address_mode: [SamplerAddressMode::Repeat; 3],
                ..Default::default()
            },
        )?;

        Ok(Gpu {
            _debug_messenger: debug_messenger,
            instance,
            surface,
            physical_device,
            device,
            queue_family_indices,
            graphics_queue,
            compute_queue,
            transfer_queue,
            present_queue,
            memory_allocator,
            command_buffer_allocator,
            descriptor_set_allocator,
            bindless_descriptor_set_allocator,
            default_sampler,
        })
    }

    pub fn instance(&self) -> Arc<Instance> {
        self.instance.clone()
    }

    pub fn surface(&self) -> Arc<Surface> {
        self.surface.clone()
    }

    pub fn physical_device(&self) -> Arc<PhysicalDevice> {
        self.physical_device.clone()
    }

    pub fn device(&self) -> Arc<Device> {
        self.device.clone()
    }

    pub fn queue_family_indices(&self) -> QueueFamilyIndices {
        self.queue_family_indices
    }

    pub fn graphics_queue(&self) -> Arc<Queue> {
        self.graphics_queue.clone()
    }

    pub fn compute_queue(&self) -> Arc<Queue> {
        self.compute_queue.clone()
    }

    pub fn transfer_queue(&self) -> Arc<Queue> {
        self.transfer_queue.clone()
    }

    pub fn present_queue(&self) -> Arc<Queue> {
        self.present_queue.clone()
    }

    pub fn memory_allocator(&self) -> Arc<StandardMemoryAllocator> {
        self.memory_allocator.clone()
    }

    pub fn command_buffer_allocator(&self) -> Arc<StandardCommandBufferAllocator> {
        self.command_buffer_allocator.clone()
    }

    pub fn descriptor_set_allocator(&self) -> Arc<StandardDescriptorSetAllocator> {
        self.descriptor_set_allocator.clone()
    }

    pub fn default_sampler(&self) -> Arc<Sampler> {
        self.default_sampler.clone()
    }

    pub fn wait_idle(&self) -> Result<(), GpuError> {
        self.device.wait_idle()?;
        Ok(())
    }
}

/// Factory operations. Each wraps the corresponding `*CreateInfo` and records
/// a debug object name from a (name, kind, optional index) triple.
impl Gpu {
    pub fn create_buffer_from_data<T>(
        &self,
        data: T,
        usage: BufferUsage,
        name: &str,
    ) -> Result<Subbuffer<T>, GpuError>
    where
        T: BufferContents,
    {
        self.name_object(name, "buffer", None);
        let buffer = Buffer::from_data(
            self.memory_allocator.clone(),
            BufferCreateInfo {
                usage,
                ..Default::default()
            },
            AllocationCreateInfo {
                memory_type_filter: MemoryTypeFilter::PREFER_DEVICE
                    | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            data,
        )?;
        Ok(buffer)
    }

    pub fn create_buffer_from_iter<T, I>(
        &self,
        iter: I,
        usage: BufferUsage,
        name: &str,
    ) -> Result<Subbuffer<[T]>, GpuError>
    where
        T: BufferContents,
        I: IntoIterator<Item = T>,
        I::IntoIter: ExactSizeIterator,
    {
        self.name_object(name, "buffer", None);
        let buffer = Buffer::from_iter(
            self.memory_allocator.clone(),
            BufferCreateInfo {
                usage,
                ..Default::default()
            },
            AllocationCreateInfo {
                memory_type_filter: MemoryTypeFilter::PREFER_DEVICE
                    | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            iter,
        )?;
        Ok(buffer)
    }

    pub fn create_image(
        &self,
        create_info: ImageCreateInfo,
        name: &str,
    ) -> Result<Arc<Image>, GpuError> {
        self.name_object(name, "image", None);
        let image = Image::new(
            self.memory_allocator.clone(),
            create_info,
            AllocationCreateInfo::default(),
        )?;
        Ok(image)
    }

    pub fn create_image_view(&self, image: Arc<Image>, name: &str) -> Result<Arc<ImageView>, GpuError> {
        self.name_object(name, "image_view", None);
        Ok(ImageView::new_default(image)?)
    }

    pub fn create_sampler(
        &self,
        create_info: SamplerCreateInfo,
        name: &str,
    ) -> Result<Arc<Sampler>, GpuError> {
        self.name_object(name, "sampler", None);
        Ok(Sampler::new(self.device.clone(), create_info)?)
    }

    pub fn create_render_pass(
        &self,
        create_info: RenderPassCreateInfo,
        name: &str,
    ) -> Result<Arc<RenderPass>, GpuError> {
        self.name_object(name, "render_pass", None);
        Ok(RenderPass::new(self.device.clone(), create_info)?)
    }

    pub fn create_framebuffer(
        &self,
        render_pass: Arc<RenderPass>,
        create_info: FramebufferCreateInfo,
        name: &str,
        index: u32,
    ) -> Result<Arc<Framebuffer>, GpuError> {
        self.name_object(name, "framebuffer", Some(index));
        Ok(Framebuffer::new(render_pass, create_info)?)
    }

    pub fn create_descriptor_set_layout(
        &self,
        create_info: DescriptorSetLayoutCreateInfo,
        name: &str,
    ) -> Result<Arc<DescriptorSetLayout>, GpuError> {
        self.name_object(name, "descriptor_set_layout", None);
        Ok(DescriptorSetLayout::new(self.device.clone(), create_info)?)
    }

    pub fn create_pipeline_layout(
        &self,
        create_info: PipelineLayoutCreateInfo,
        name: &str,
    ) -> Result<Arc<PipelineLayout>, GpuError> {
        self.name_object(name, "pipeline_layout", None);
        Ok(PipelineLayout::new(self.device.clone(), create_info)?)
    }

    pub fn create_shader_module(
        &self,
        words: &[u32],
        name: &str,
    ) -> Result<Arc<ShaderModule>, GpuError> {
        self.name_object(name, "shader_module", None);
        let module =
            unsafe { ShaderModule::new(self.device.clone(), ShaderModuleCreateInfo::new(words)) }?;
        Ok(module)
    }

    pub fn create_pipeline_cache(
        &self,
        initial_data: Vec<u8>,
        name: &str,
    ) -> Result<Arc<PipelineCache>, GpuError> {
        self.name_object(name, "pipeline_cache", None);
        let cache = unsafe {
            PipelineCache::new(
                self.device.clone(),
                PipelineCacheCreateInfo {
                    initial_data,
                    ..Default::default()
                },
            )
        }?;
        Ok(cache)
    }

    pub fn create_graphics_pipeline(
        &self,
        create_info: GraphicsPipelineCreateInfo,
        cache: Option<Arc<PipelineCache>>,
        name: &str,
    ) -> Result<Arc<GraphicsPipeline>, GpuError> {
        self.name_object(name, "graphics_pipeline", None);
        Ok(GraphicsPipeline::new(self.device.clone(), cache, create_info)?)
    }

    pub fn create_compute_pipeline(
        &self,
        create_info: ComputePipelineCreateInfo,
        cache: Option<Arc<PipelineCache>>,
        name: &str,
    ) -> Result<Arc<ComputePipeline>, GpuError> {
        self.name_object(name, "compute_pipeline", None);
        Ok(ComputePipeline::new(self.device.clone(), cache, create_info)?)
    }

    /// Allocates a descriptor set from the normal pool. Pool exhaustion is the
    /// dedicated `DescriptorAllocation` error kind so pass building can fail
    /// cleanly.
    pub fn allocate_descriptor_set(
        &self,
        layout: Arc<DescriptorSetLayout>,
        writes: impl IntoIterator<Item = WriteDescriptorSet>,
        name: &str,
    ) -> Result<Arc<DescriptorSet>, GpuError> {
        self.name_object(name, "descriptor_set", None);
        DescriptorSet::new(self.descriptor_set_allocator.clone(), layout, writes, [])
            .map_err(GpuError::DescriptorAllocation)
    }

    /// Allocates a descriptor set from the update-after-bind pool.
    pub fn allocate_bindless_descriptor_set(
        &self,
        layout: Arc<DescriptorSetLayout>,
        writes: impl IntoIterator<Item = WriteDescriptorSet>,
        name: &str,
    ) -> Result<Arc<DescriptorSet>, GpuError> {
        self.name_object(name, "descriptor_set", None);
        DescriptorSet::new(
            self.bindless_descriptor_set_allocator.clone(),
            layout,
            writes,
            [],
        )
        .map_err(GpuError::DescriptorAllocation)
    }

    /// Uploads pixel data into a freshly created sampled image. The transfer
    /// is synchronous: the copy is submitted to the transfer queue and waited
    /// on before returning.
    pub fn upload_image(
        &self,
        bytes: Vec<u8>,
        format: Format,
        extent: [u32; 3],
        name: &str,
    ) -> Result<Arc<ImageView>, GpuError> {
        let staging = Buffer::from_iter(
            self.memory_allocator.clone(),
            BufferCreateInfo {
                usage: BufferUsage::TRANSFER_SRC,
                ..Default::default()
            },
            AllocationCreateInfo {
                memory_type_filter: MemoryTypeFilter::PREFER_HOST
                    | MemoryTypeFilter::HOST_SEQUENTIAL_WRITE,
                ..Default::default()
            },
            bytes,
        )?;

        let image = self.create_image(
            ImageCreateInfo {
                image_type: ImageType::Dim2d,
                format,
                extent,
                usage: ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
                ..Default::default()
            },
            name,
        )?;

        let mut builder = AutoCommandBufferBuilder::primary(
            self.command_buffer_allocator.clone(),
            self.transfer_queue.queue_family_index(),
            CommandBufferUsage::OneTimeSubmit,
        )?;

        builder.copy_buffer_to_image(CopyBufferToImageInfo::buffer_image(staging, image.clone()))?;

        self.transfer_submit(builder)?;

        self.create_image_view(image, name)
    }

    /// Synchronous transfer submission: execute and wait for completion.
    pub fn transfer_submit(
        &self,
        builder: AutoCommandBufferBuilder<PrimaryAutoCommandBuffer>,
    ) -> Result<(), GpuError> {
        let command_buffer = builder.build()?;
        let future = command_buffer
            .execute(self.transfer_queue.clone())?
            .then_signal_fence_and_flush()?;
        future.wait(None)?;
        Ok(())
    }

    fn name_object(&self, name: &str, kind: &str, index: Option<u32>) {
        if cfg!(debug_assertions) {
            debug!("create {}", debug_name(name, kind, index));
        }
    }
}

/// Formats the (name, kind, optional index) triple used to label every
/// created Vulkan object.
pub fn debug_name(name: &str, kind: &str, index: Option<u32>) -> String {
    match index {
        Some(index) => format!("{kind} {name} {index}"),
        None => format!("{kind} {name}"),
    }
}

fn required_device_features() -> DeviceFeatures {
    DeviceFeatures {
        timeline_semaphore: true,
        synchronization2: true,
        descriptor_indexing: true,
        descriptor_binding_partially_bound: true,
        runtime_descriptor_array: true,
        shader_sampled_image_array_non_uniform_indexing: true,
        descriptor_binding_sampled_image_update_after_bind: true,
        ..DeviceFeatures::empty()
    }
}

fn create_instance() -> Result<(Arc<Instance>, Option<DebugUtilsMessenger>), GpuError> {
    let library = VulkanLibrary::new()?;

    let supported_extensions = library.supported_extensions();
    let supported_layers: Vec<_> = library
        .layer_properties()
        .map_err(|err| GpuError::DeviceInit(format!("could not enumerate layers: {err}")))?
        .collect();

    let validation_layer = String::from("VK_LAYER_KHRONOS_validation");
    let debug_enabled = cfg!(debug_assertions)
        && supported_extensions.ext_debug_utils
        && supported_layers.iter().any(|l| l.name() == validation_layer);

    let instance_extensions = InstanceExtensions {
        ext_debug_utils: debug_enabled,
        ..required_instance_extensions(&library)
    };

    let mut layers = vec![];
    if debug_enabled {
        layers.push(validation_layer);
    }

    let instance = Instance::new(
        library,
        InstanceCreateInfo {
            enabled_extensions: instance_extensions,
            enabled_layers: layers,
            max_api_version: Some(Version::major_minor(1, 3)),
            ..Default::default()
        },
    )?;

    // The messenger must stay alive as long as the instance, otherwise the
    // callback is dropped and no more messages are printed.
    let debug_messenger = if debug_enabled {
        create_debug_messenger(instance.clone())
    } else {
        None
    };

    Ok((instance, debug_messenger))
}

fn create_debug_messenger(instance: Arc<Instance>) -> Option<DebugUtilsMessenger> {
    let callback = unsafe {
        DebugUtilsMessengerCallback::new(|severity, ty, data| {
            let ty = if ty.intersects(DebugUtilsMessageType::VALIDATION) {
                "validation"
            } else if ty.intersects(DebugUtilsMessageType::PERFORMANCE) {
                "performance"
            } else {
                "general"
            };

            if severity.intersects(DebugUtilsMessageSeverity::ERROR) {
                tracing::error!("[{ty}] {}", data.message);
            } else if severity.intersects(DebugUtilsMessageSeverity::WARNING) {
                warn!("[{ty}] {}", data.message);
            }
        })
    };

    DebugUtilsMessenger::new(
        instance,
        DebugUtilsMessengerCreateInfo {
            message_severity: DebugUtilsMessageSeverity::ERROR | DebugUtilsMessageSeverity::WARNING,
            message_type: DebugUtilsMessageType::GENERAL
                | DebugUtilsMessageType::VALIDATION
                | DebugUtilsMessageType::PERFORMANCE,
            ..DebugUtilsMessengerCreateInfo::user_callback(callback)
        },
    )
    .ok()
}

fn find_physical_device(
    instance: Arc<Instance>,
    surface: Arc<Surface>,
    device_extensions: &DeviceExtensions,
    device_features: &DeviceFeatures,
) -> Result<(Arc<PhysicalDevice>, QueueFamilyIndices), GpuError> {
    instance
        .enumerate_physical_devices()
        .map_err(|err| GpuError::DeviceInit(format!("could not enumerate devices: {err}")))?
        .filter(|p| p.api_version() >= Version::V1_2)
        .filter(|p| p.supported_extensions().contains(device_extensions))
        .filter(|p| p.supported_features().contains(device_features))
        .filter_map(|p| {
            let family_flags: Vec<_> = p
                .queue_family_properties()
                .iter()
                .map(|q| q.queue_flags)
                .collect();
            let present_support: Vec<_> = (0..family_flags.len())
                .map(|i| p.surface_support(i as u32, &surface).unwrap_or(false))
                .collect();

            pick_queue_families(&family_flags, &present_support).map(|indices| (p, indices))
        })
        // Highest device-type score wins; ties go to the first enumerated.
        .min_by_key(|(p, _)| match p.properties().device_type {
            PhysicalDeviceType::DiscreteGpu => 0,
            PhysicalDeviceType::IntegratedGpu => 1,
            PhysicalDeviceType::VirtualGpu => 2,
            PhysicalDeviceType::Cpu => 3,
            _ => 4,
        })
        .ok_or_else(|| {
            GpuError::DeviceInit(
                "no physical device supports the required features and queues".to_string(),
            )
        })
}

fn create_logical_device(
    physical_device: Arc<PhysicalDevice>,
    queue_family_indices: QueueFamilyIndices,
    device_extensions: &DeviceExtensions,
    device_features: &DeviceFeatures,
) -> Result<(Arc<Device>, Vec<Arc<Queue>>), GpuError> {
    let queue_create_infos = queue_family_indices
        .unique()
        .into_iter()
        .map(|queue_family_index| QueueCreateInfo {
            queue_family_index,
            ..Default::default()
        })
        .collect();

    let (device, queues) = Device::new(
        physical_device,
        DeviceCreateInfo {
            enabled_extensions: *device_extensions,
            enabled_features: *device_features,
            queue_create_infos,
            ..Default::default()
        },
    )?;

    Ok((device, queues.collect()))
}

#[cfg(test)]
mod tests {
    use super::debug_name;

    #[test]
    fn debug_name_formats_triple() {
        assert_eq!(debug_name("geometry", "render_pass", None), "render_pass geometry");
        assert_eq!(debug_name("geometry", "framebuffer", Some(2)), "framebuffer geometry 2");
    }
}
