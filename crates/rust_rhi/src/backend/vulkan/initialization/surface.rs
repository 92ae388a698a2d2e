//! Window surface creation
//!
//! The platform layer is kept behind [`SurfaceProvider`]: it names the
//! instance extensions it needs, creates a `VkSurfaceKHR` once the instance
//! exists, and reports the drawable size used for the initial swapchain.

use std::ffi::{CStr, CString};

use ash::extensions::khr;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

use super::context::{VulkanError, VulkanResult};

/// Source of a presentable window surface
pub trait SurfaceProvider {
    /// Instance extensions required to create the surface
    fn required_instance_extensions(&self) -> VulkanResult<Vec<CString>>;

    /// Create the surface on `instance`; ownership passes to the caller
    fn create_surface(&self, entry: &Entry, instance: &Instance) -> VulkanResult<vk::SurfaceKHR>;

    /// Current drawable size in pixels
    fn drawable_size(&self) -> (u32, u32);
}

/// Surface for a GLFW window
pub struct GlfwSurface<'a> {
    glfw: &'a glfw::Glfw,
    window: &'a glfw::Window,
}

impl<'a> GlfwSurface<'a> {
    /// Wrap a GLFW context and one of its windows
    pub fn new(glfw: &'a glfw::Glfw, window: &'a glfw::Window) -> Self {
        Self { glfw, window }
    }
}

impl SurfaceProvider for GlfwSurface<'_> {
    fn required_instance_extensions(&self) -> VulkanResult<Vec<CString>> {
        let names = self.glfw.get_required_instance_extensions().ok_or_else(|| {
            VulkanError::InitializationFailed("GLFW reports no Vulkan support".to_string())
        })?;

        names
            .into_iter()
            .map(|name| {
                CString::new(name)
                    .map_err(|e| VulkanError::InitializationFailed(format!("Bad extension name: {}", e)))
            })
            .collect()
    }

    fn create_surface(&self, _entry: &Entry, instance: &Instance) -> VulkanResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance.handle(), std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(VulkanError::InitializationFailed(format!(
                "Failed to create Vulkan surface: {:?}",
                result
            )))
        }
    }

    fn drawable_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }
}

/// Surface for any window exposing raw-window-handle 0.5 handles
pub struct RawWindowSurface<'a, W> {
    window: &'a W,
    size: (u32, u32),
}

impl<'a, W> RawWindowSurface<'a, W>
where
    W: HasRawWindowHandle + HasRawDisplayHandle,
{
    /// Wrap a window and its current drawable size
    pub fn new(window: &'a W, width: u32, height: u32) -> Self {
        Self {
            window,
            size: (width, height),
        }
    }
}

impl<W> SurfaceProvider for RawWindowSurface<'_, W>
where
    W: HasRawWindowHandle + HasRawDisplayHandle,
{
    fn required_instance_extensions(&self) -> VulkanResult<Vec<CString>> {
        let names = ash_window::enumerate_required_extensions(self.window.raw_display_handle())
            .map_err(VulkanError::Api)?;

        // SAFETY: ash-window returns pointers to static nul-terminated names
        Ok(names.iter().map(|&ptr| unsafe { CStr::from_ptr(ptr) }.to_owned()).collect())
    }

    fn create_surface(&self, entry: &Entry, instance: &Instance) -> VulkanResult<vk::SurfaceKHR> {
        unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.window.raw_display_handle(),
                self.window.raw_window_handle(),
                None,
            )
        }
        .map_err(|e| VulkanError::InitializationFailed(format!("Failed to create surface: {:?}", e)))
    }

    fn drawable_size(&self) -> (u32, u32) {
        self.size
    }
}

/// Owned surface with its extension loader
pub struct Surface {
    loader: khr::Surface,
    surface: vk::SurfaceKHR,
}

impl Surface {
    /// Create through `provider`
    pub fn new(entry: &Entry, instance: &Instance, provider: &dyn SurfaceProvider) -> VulkanResult<Self> {
        let loader = khr::Surface::new(entry, instance);
        let surface = provider.create_surface(entry, instance)?;
        Ok(Self { loader, surface })
    }

    /// Raw handle
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Surface capabilities for a physical device
    pub fn capabilities(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Supported formats
    pub fn formats(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_formats(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Supported present modes
    pub fn present_modes(&self, physical_device: vk::PhysicalDevice) -> VulkanResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .map_err(VulkanError::Api)
        }
    }

    /// Whether a queue family can present to this surface
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family_index: u32) -> VulkanResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, queue_family_index, self.surface)
                .map_err(VulkanError::Api)
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
