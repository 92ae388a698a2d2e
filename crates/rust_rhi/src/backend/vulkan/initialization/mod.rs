//! Vulkan bring-up: instance, surface, physical and logical device

pub mod context;
pub mod surface;

pub use context::{LogicalDevice, PhysicalDeviceInfo, VulkanContext, VulkanError, VulkanInstance, VulkanResult};
pub use surface::{GlfwSurface, RawWindowSurface, Surface, SurfaceProvider};
