//! Vulkan context management
//!
//! Instance, physical device selection and logical device creation.
//! Construction is all-or-nothing: every step returns a `VulkanResult`, and
//! objects created by earlier steps are released by their `Drop` impls when
//! a later step fails.

use std::ffi::{CStr, CString};

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device, Entry, Instance};
use thiserror::Error;

use super::surface::{Surface, SurfaceProvider};

const VALIDATION_LAYER: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_LAYER_KHRONOS_validation\0") };

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(#[from] vk::Result),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// No physical device passed the capability checks
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Shader bytecode was rejected before reaching the driver
    #[error("Invalid shader bytecode: {0}")]
    ShaderBytecode(String),
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

impl From<VulkanError> for crate::rhi::RhiError {
    fn from(error: VulkanError) -> Self {
        Self::BackendError(error.to_string())
    }
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create an instance with the extensions `surface` needs
    ///
    /// Validation is skipped with a warning when the layer is not installed.
    pub fn new(surface: &dyn SurfaceProvider, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {:?}", e)))?;

        let app_name_cstr = CString::new(app_name)
            .map_err(|e| VulkanError::InitializationFailed(format!("Invalid application name: {}", e)))?;
        let engine_name_cstr = CString::new("RustRhi").unwrap_or_default();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_3);

        let validation = enable_validation && Self::validation_layer_available(&entry)?;
        if enable_validation && !validation {
            log::warn!("Validation requested but {:?} is not installed", VALIDATION_LAYER);
        }

        let required_extensions = surface.required_instance_extensions()?;
        let mut extensions: Vec<*const std::ffi::c_char> = required_extensions.iter().map(|ext| ext.as_ptr()).collect();
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names: Vec<*const std::ffi::c_char> =
            if validation { vec![VALIDATION_LAYER.as_ptr()] } else { Vec::new() };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        log::info!("Vulkan instance created (validation: {})", validation);

        Ok(Self { entry, instance, debug })
    }

    fn validation_layer_available(entry: &Entry) -> VulkanResult<bool> {
        let layers = entry.enumerate_instance_layer_properties()?;
        Ok(layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER))
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe { debug_utils.create_debug_utils_messenger(&create_info, None).map_err(VulkanError::Api) }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Routes validation messages into `log`
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Index of the graphics queue family
    pub graphics_family: u32,
    /// Index of the presentation queue family
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Pick the best device that can render to `surface`
    ///
    /// Discrete GPUs win over integrated ones. Devices without Vulkan 1.3,
    /// dynamic rendering, the swapchain extension, or a usable surface format
    /// are rejected.
    pub fn select_suitable_device(instance: &Instance, surface: &Surface) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices()? };

        let candidates = devices
            .into_iter()
            .filter_map(|device| match Self::evaluate_device(instance, device, surface) {
                Ok(info) => Some((device_score(info.properties.device_type), info)),
                Err(e) => {
                    log::debug!("Skipping physical device: {}", e);
                    None
                }
            });

        let info = best_scored(candidates)?;
        log::info!("Selected GPU: {}", info.name());
        Ok(info)
    }

    fn evaluate_device(instance: &Instance, device: vk::PhysicalDevice, surface: &Surface) -> VulkanResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        if properties.api_version < vk::API_VERSION_1_3 {
            return Err(VulkanError::InitializationFailed("Vulkan 1.3 not supported".to_string()));
        }

        let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::builder().push_next(&mut features13);
        unsafe { instance.get_physical_device_features2(device, &mut features2) };
        if features13.dynamic_rendering == vk::FALSE {
            return Err(VulkanError::InitializationFailed("Dynamic rendering not supported".to_string()));
        }

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics_family = None;
        let mut present_family = None;
        for (index, family) in (0u32..).zip(queue_families.iter()) {
            let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
            let present = surface.supports_present(device, index)?;

            // A family that does both avoids queue ownership transfers
            if graphics && present {
                graphics_family = Some(index);
                present_family = Some(index);
                break;
            }
            if graphics && graphics_family.is_none() {
                graphics_family = Some(index);
            }
            if present && present_family.is_none() {
                present_family = Some(index);
            }
        }

        let graphics_family = graphics_family
            .ok_or_else(|| VulkanError::InitializationFailed("No graphics queue family found".to_string()))?;
        let present_family = present_family
            .ok_or_else(|| VulkanError::InitializationFailed("No present queue family found".to_string()))?;

        let extensions = unsafe { instance.enumerate_device_extension_properties(device)? };
        let has_swapchain = extensions
            .iter()
            .any(|available| unsafe { CStr::from_ptr(available.extension_name.as_ptr()) } == SwapchainLoader::name());
        if !has_swapchain {
            return Err(VulkanError::InitializationFailed(
                "Required device extensions not supported".to_string(),
            ));
        }

        if surface.formats(device)?.is_empty() || surface.present_modes(device)?.is_empty() {
            return Err(VulkanError::InitializationFailed("Surface has no formats or present modes".to_string()));
        }

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        Ok(Self {
            device,
            properties,
            memory_properties,
            graphics_family,
            present_family,
        })
    }

    /// Driver-reported device name
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    /// Graphics operations queue
    pub graphics_queue: vk::Queue,
    /// Surface presentation queue
    pub present_queue: vk::Queue,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create a logical device with dynamic rendering enabled
    pub fn new(instance: &Instance, physical_device: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let mut families = vec![physical_device.graphics_family, physical_device.present_family];
        families.dedup();

        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];
        let mut features13 = vk::PhysicalDeviceVulkan13Features::builder().dynamic_rendering(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .push_next(&mut features13);

        let device = unsafe { instance.create_device(physical_device.device, &create_info, None)? };

        let graphics_queue = unsafe { device.get_device_queue(physical_device.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical_device.present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Owns the instance, surface and device
///
/// Fields drop in declaration order: device, then surface, then instance.
/// Everything created from the device must be dropped before the context.
pub struct VulkanContext {
    device: LogicalDevice,
    physical_device: PhysicalDeviceInfo,
    surface: Surface,
    instance: VulkanInstance,
}

impl VulkanContext {
    /// Bring up Vulkan for the window behind `surface_provider`
    pub fn new(surface_provider: &dyn SurfaceProvider, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(surface_provider, app_name, enable_validation)?;
        let surface = Surface::new(&instance.entry, &instance.instance, surface_provider)?;
        let physical_device = PhysicalDeviceInfo::select_suitable_device(&instance.instance, &surface)?;
        let device = LogicalDevice::new(&instance.instance, &physical_device)?;

        Ok(Self {
            device,
            physical_device,
            surface,
            instance,
        })
    }

    /// Get a reference to the Vulkan instance
    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Get the surface
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Get the physical device info
    pub fn physical_device(&self) -> &PhysicalDeviceInfo {
        &self.physical_device
    }

    /// Get the raw Device handle
    pub fn raw_device(&self) -> Device {
        self.device.device.clone()
    }

    /// Get the swapchain loader
    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Get the graphics queue
    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    /// Get the present queue
    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    /// Get the graphics queue family index
    pub fn graphics_queue_family(&self) -> u32 {
        self.physical_device.graphics_family
    }

    /// Block until all queues are idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle().map_err(VulkanError::Api) }
    }
}

/// Preference for a device type; higher wins
fn device_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 3,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
        _ => 1,
    }
}

/// Highest-scoring candidate; the first one on ties
fn best_scored<T>(candidates: impl IntoIterator<Item = (u32, T)>) -> VulkanResult<T> {
    let mut best: Option<(u32, T)> = None;
    for (score, candidate) in candidates {
        if best.as_ref().map_or(true, |(best_score, _)| score > *best_score) {
            best = Some((score, candidate));
        }
    }
    best.map(|(_, candidate)| candidate).ok_or(VulkanError::NoSuitableDevice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::RhiError;

    #[test]
    fn test_discrete_preferred_over_integrated() {
        let candidates = [
            (device_score(vk::PhysicalDeviceType::INTEGRATED_GPU), "integrated"),
            (device_score(vk::PhysicalDeviceType::CPU), "cpu"),
            (device_score(vk::PhysicalDeviceType::DISCRETE_GPU), "discrete"),
            (device_score(vk::PhysicalDeviceType::DISCRETE_GPU), "second discrete"),
        ];
        assert_eq!(best_scored(candidates).unwrap(), "discrete");
    }

    #[test]
    fn test_no_candidates_is_no_suitable_device() {
        let result = best_scored(Vec::<(u32, ())>::new());
        assert!(matches!(result, Err(VulkanError::NoSuitableDevice)));
    }

    #[test]
    fn test_no_suitable_device_message() {
        let error: RhiError = VulkanError::NoSuitableDevice.into();
        assert_eq!(error.to_string(), "Backend error: No suitable GPU found");
    }
}
