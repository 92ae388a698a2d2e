//! Vulkan resource management
//!
//! GPU buffers and their upload paths, textures, descriptor sets and the
//! arenas the device keeps its resources in.

/// Dynamic ring and static device-local buffers
pub mod buffer;

/// Descriptor set keys, caches and pools
pub mod descriptor;

/// Handle-keyed resource arenas
pub mod registry;

/// Sampled and depth textures
pub mod texture;

/// Staging copies and one-time submissions
pub mod upload;

pub use buffer::{GpuBuffer, VulkanBuffer};
pub use descriptor::{DescriptorSetCache, DescriptorSetKey, ResourceInfo};
pub use registry::{IdleWait, ResourceRegistry};
pub use texture::VulkanTexture;
pub use upload::{StagingTransfer, UploadContext};
