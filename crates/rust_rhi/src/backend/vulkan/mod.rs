//! Vulkan backend
//!
//! Requires Vulkan 1.3 with dynamic rendering.

pub mod device;
pub mod initialization;
pub mod rendering;
pub mod resources;
pub mod state;

pub use device::{FrameStats, VulkanDevice};
pub use initialization::{GlfwSurface, RawWindowSurface, SurfaceProvider, VulkanError, VulkanResult};
