//! # Vulkan Synchronization Primitives
//!
//! RAII wrappers for semaphores and fences plus the per-frame bundle
//! [`FrameSync`]. The in-flight fence is created signaled so the first wait
//! on a fresh frame slot returns immediately.
//!
//! Frame code talks to its sync objects through [`FrameSyncObjects`], which
//! lets the backpressure ordering be exercised without a GPU.

use ash::{vk, Device};

use crate::backend::vulkan::initialization::{VulkanError, VulkanResult};

/// Semaphore wrapper with RAII cleanup
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { device.create_semaphore(&create_info, None).map_err(VulkanError::Api)? };
        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        let fence = unsafe { device.create_fence(&create_info, None).map_err(VulkanError::Api)? };

        Ok(Self { device, fence })
    }

    /// Block until signaled or `timeout` nanoseconds pass
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe { self.device.wait_for_fences(&[self.fence], true, timeout).map_err(VulkanError::Api) }
    }

    /// Return to the unsignaled state
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]).map_err(VulkanError::Api) }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization objects owned by one frame slot
pub trait FrameSyncObjects {
    /// Block until the GPU has finished the slot's previous submission
    fn wait_in_flight(&self) -> VulkanResult<()>;

    /// Unsignal the in-flight fence before a new submission
    fn reset_in_flight(&self) -> VulkanResult<()>;

    /// Fence signaled when the slot's submission completes
    fn in_flight_fence(&self) -> vk::Fence;

    /// Signaled by the presentation engine when the acquired image is ready
    fn image_available(&self) -> vk::Semaphore;
}

/// Frame synchronization objects for in-flight frame management
pub struct FrameSync {
    image_available: Semaphore,
    in_flight: Fence,
}

impl FrameSync {
    /// Create frame synchronization objects
    pub fn new(device: &Device) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device.clone(), true)?,
        })
    }
}

impl FrameSyncObjects for FrameSync {
    fn wait_in_flight(&self) -> VulkanResult<()> {
        self.in_flight.wait(u64::MAX)
    }

    fn reset_in_flight(&self) -> VulkanResult<()> {
        self.in_flight.reset()
    }

    fn in_flight_fence(&self) -> vk::Fence {
        self.in_flight.handle()
    }

    fn image_available(&self) -> vk::Semaphore {
        self.image_available.handle()
    }
}
