mod error;
mod gpu;
mod queues;

pub use error::GpuError;
pub use gpu::{debug_name, Gpu};
pub use queues::QueueFamilyIndices;

/// Sampler slots in the bindless descriptor pool.
pub const BINDLESS_SAMPLER_POOL_SIZE: u32 = 128;
/// Sampled image slots in the bindless descriptor pool.
pub const BINDLESS_IMAGE_POOL_SIZE: u32 = 1024;
/// Descriptors of each core type in the normal descriptor pool.
pub const NORMAL_POOL_SIZE: u32 = 1024;
