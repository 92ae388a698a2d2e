//! # Swapchain Manager
//!
//! Owns the presentable images, their views and the ring of [`Frame`]s.
//!
//! Surface configuration is chosen by small pure functions so the choices
//! can be tested without a GPU:
//!
//! - format: `B8G8R8A8_SRGB` / `SRGB_NONLINEAR` when offered, else the first
//! - present mode: `MAILBOX` unless vsync is requested, else `FIFO`
//! - extent: the surface's current extent, or the drawable size clamped to
//!   the surface limits when the current extent is undefined
//! - image count: at least 3, at least the surface minimum, at most the
//!   surface maximum when one is reported
//!
//! Each presentable image has its own render-finished semaphore: the submit
//! that renders into image `i` signals semaphore `i` and the present of image
//! `i` waits on it. A frame slot's fence only proves its submission finished,
//! not that the presentation engine is done with the semaphore, so the
//! semaphore must follow the image rather than the slot.
//!
//! A rebuild chains the new swapchain from the old one, then recreates the
//! per-image semaphores and every frame's sync objects. It is skipped
//! entirely for a zero-sized drawable.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::prelude::VkResult;
use ash::{vk, Device};

use crate::backend::vulkan::initialization::{VulkanContext, VulkanError, VulkanResult};
use crate::backend::vulkan::resources::descriptor::FrameDescriptorPool;

use super::frame::Frame;
use super::sync::{FrameSync, Semaphore};

/// Frame slot as used by the Vulkan device
pub type VulkanFrame = Frame<FrameSync, FrameDescriptorPool>;

const PREFERRED_IMAGE_COUNT: u32 = 3;

/// Prefer 8-bit sRGB BGRA, else whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == vk::Format::B8G8R8A8_SRGB && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// `MAILBOX` when available and vsync is off; `FIFO` otherwise
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Surface extent, falling back to the clamped drawable size
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: drawable.0.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: drawable.1.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// `max(3, min_image_count)`, clamped to a non-zero `max_image_count`
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = PREFERRED_IMAGE_COUNT.max(caps.min_image_count);
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Requested drawable size and vsync mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainSettings {
    width: u32,
    height: u32,
    vsync: bool,
}

impl SwapchainSettings {
    /// Initial settings
    pub fn new(width: u32, height: u32, vsync: bool) -> Self {
        Self { width, height, vsync }
    }

    /// Accept a new size and vsync mode
    ///
    /// Returns false and leaves the settings untouched when either dimension
    /// is zero (minimized window).
    pub fn apply_resize(&mut self, width: u32, height: u32, vsync: bool) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        *self = Self { width, height, vsync };
        true
    }

    /// Requested drawable size
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether vsync is requested
    pub fn vsync(&self) -> bool {
        self.vsync
    }
}

/// Which frame slot last rendered into each swapchain image
#[derive(Debug, Clone, Default)]
pub struct ImageOwnership {
    owners: Vec<Option<usize>>,
}

impl ImageOwnership {
    /// Table for `image_count` unowned images
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    /// Record `frame_index` as the image's owner
    ///
    /// Returns the previous owner when it is a different slot, whose
    /// submission must finish before the image is rendered again.
    pub fn claim(&mut self, image_index: usize, frame_index: usize) -> Option<usize> {
        let slot = self.owners.get_mut(image_index)?;
        let previous = slot.replace(frame_index);
        previous.filter(|&owner| owner != frame_index)
    }
}

/// One object per swapchain image, recreated with the image list
pub struct PerImage<T> {
    items: Vec<T>,
}

impl<T> PerImage<T> {
    /// Call `create` once per image
    pub fn new(image_count: usize, create: impl FnMut() -> VulkanResult<T>) -> VulkanResult<Self> {
        let items = std::iter::repeat_with(create).take(image_count).collect::<VulkanResult<Vec<_>>>()?;
        Ok(Self { items })
    }

    /// No objects; used before the image list is known
    pub fn empty() -> Self {
        Self { items: Vec::new() }
    }

    /// Object belonging to `image_index`
    pub fn get(&self, image_index: u32) -> Option<&T> {
        self.items.get(image_index as usize)
    }

    /// Number of images covered
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True before any image exists
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

struct Chain {
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

/// Swapchain and frame ring
pub struct Swapchain {
    device: Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    settings: SwapchainSettings,
    image_owners: ImageOwnership,
    render_finished: PerImage<Semaphore>,
    frames: Vec<VulkanFrame>,
}

impl Swapchain {
    /// Create the swapchain and take ownership of the frame ring
    pub fn new(context: &VulkanContext, settings: SwapchainSettings, frames: Vec<VulkanFrame>) -> VulkanResult<Self> {
        if frames.is_empty() {
            return Err(VulkanError::InitializationFailed("Frame ring is empty".to_string()));
        }

        let chain = Self::create_chain(context, settings, vk::SwapchainKHR::null())?;
        log::info!(
            "[SWAPCHAIN] Created {}x{} {:?} {:?} with {} images, {} frames in flight",
            chain.extent.width,
            chain.extent.height,
            chain.format.format,
            chain.present_mode,
            chain.images.len(),
            frames.len()
        );

        let mut swapchain = Self {
            device: context.raw_device(),
            loader: context.swapchain_loader().clone(),
            swapchain: chain.swapchain,
            image_owners: ImageOwnership::new(chain.images.len()),
            images: chain.images,
            image_views: chain.image_views,
            format: chain.format,
            extent: chain.extent,
            present_mode: chain.present_mode,
            settings,
            render_finished: PerImage::empty(),
            frames,
        };
        // Built after `swapchain` so a failure here still releases the chain
        swapchain.render_finished = swapchain.create_image_semaphores()?;
        Ok(swapchain)
    }

    fn create_chain(
        context: &VulkanContext,
        settings: SwapchainSettings,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Chain> {
        let physical = context.physical_device().device;
        let surface = context.surface();
        let caps = surface.capabilities(physical)?;
        let format = choose_surface_format(&surface.formats(physical)?)
            .ok_or_else(|| VulkanError::InitializationFailed("Surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&surface.present_modes(physical)?, settings.vsync());
        let extent = choose_extent(&caps, settings.size());
        if extent.width == 0 || extent.height == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "surface extent is zero".to_string(),
            });
        }

        let (queue_families, sharing_mode) = {
            let info = context.physical_device();
            if info.graphics_family == info.present_family {
                (vec![], vk::SharingMode::EXCLUSIVE)
            } else {
                (vec![info.graphics_family, info.present_family], vk::SharingMode::CONCURRENT)
            }
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(choose_image_count(&caps))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_families)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let loader = context.swapchain_loader();
        let device = context.raw_device();
        let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };

        let destroy_partial = |views: &[vk::ImageView]| unsafe {
            for &view in views {
                device.destroy_image_view(view, None);
            }
            loader.destroy_swapchain(swapchain, None);
        };

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                destroy_partial(&[]);
                return Err(VulkanError::Api(e));
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            match unsafe { device.create_image_view(&create_info, None) } {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    destroy_partial(&image_views);
                    return Err(VulkanError::Api(e));
                }
            }
        }

        Ok(Chain {
            swapchain,
            images,
            image_views,
            format,
            extent,
            present_mode,
        })
    }

    /// Rebuild for a new drawable size
    ///
    /// Returns `Ok(false)` without touching anything when the size is zero in
    /// either dimension, or when the surface currently reports a zero extent.
    pub fn rebuild(&mut self, context: &VulkanContext, width: u32, height: u32, vsync: bool) -> VulkanResult<bool> {
        let mut settings = self.settings;
        if !settings.apply_resize(width, height, vsync) {
            log::debug!("[SWAPCHAIN] Skipping rebuild for {}x{}", width, height);
            return Ok(false);
        }

        context.wait_idle()?;

        let chain = match Self::create_chain(context, settings, self.swapchain) {
            Ok(chain) => chain,
            Err(VulkanError::InvalidOperation { reason }) => {
                log::debug!("[SWAPCHAIN] Skipping rebuild: {}", reason);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        self.destroy_chain();
        self.swapchain = chain.swapchain;
        self.images = chain.images;
        self.image_views = chain.image_views;
        self.format = chain.format;
        self.extent = chain.extent;
        self.present_mode = chain.present_mode;
        self.settings = settings;
        self.image_owners = ImageOwnership::new(self.images.len());
        self.render_finished = self.create_image_semaphores()?;

        for frame in &mut self.frames {
            frame.replace_sync(FrameSync::new(&self.device)?);
        }

        log::debug!(
            "[SWAPCHAIN] Rebuilt {}x{} {:?} with {} images",
            self.extent.width,
            self.extent.height,
            self.present_mode,
            self.images.len()
        );
        Ok(true)
    }

    fn create_image_semaphores(&self) -> VulkanResult<PerImage<Semaphore>> {
        PerImage::new(self.images.len(), || Semaphore::new(self.device.clone()))
    }

    /// Semaphore signaled when rendering into `image_index` is done
    pub fn render_finished(&self, image_index: u32) -> vk::Semaphore {
        self.render_finished
            .get(image_index)
            .map_or_else(vk::Semaphore::null, Semaphore::handle)
    }

    /// Acquire the next image, signaling `semaphore` when it is ready
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> VkResult<(u32, bool)> {
        unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        }
    }

    /// Queue `image_index` for presentation after `wait_semaphore`
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphore: vk::Semaphore) -> VkResult<bool> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }

    /// Wait until no other frame slot is still rendering into `image_index`,
    /// then mark it as owned by `frame_index`
    pub fn claim_image(&mut self, image_index: u32, frame_index: usize) -> VulkanResult<()> {
        if let Some(owner) = self.image_owners.claim(image_index as usize, frame_index) {
            if let Some(frame) = self.frames.get(owner) {
                frame.wait_in_flight()?;
            }
        }
        Ok(())
    }

    fn destroy_chain(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
    }

    /// Frame slot `index`
    pub fn frame(&self, index: usize) -> &VulkanFrame {
        &self.frames[index % self.frames.len()]
    }

    /// Mutable frame slot `index`
    pub fn frame_mut(&mut self, index: usize) -> &mut VulkanFrame {
        let len = self.frames.len();
        &mut self.frames[index % len]
    }

    /// Swapchain image
    pub fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    /// Swapchain image view
    pub fn image_view(&self, index: u32) -> vk::ImageView {
        self.image_views[index as usize]
    }

    /// Color format
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Number of presentable images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Current size and vsync request
    pub fn settings(&self) -> SwapchainSettings {
        self.settings
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_chain();
    }
}
