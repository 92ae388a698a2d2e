//! # Textures
//!
//! A color texture owns one image, one view, one sampler and one descriptor
//! set written eagerly at creation against the device's fixed texture set
//! layout (binding 0, combined image sampler). All of it is created in a
//! single blocking upload:
//!
//! 1. the whole image goes `Undefined -> TransferDstOptimal`
//! 2. level 0 is copied from a staging buffer (or cleared when no data is given)
//! 3. further mips are blitted down from the previous level
//! 4. every level ends in `ShaderReadOnlyOptimal`
//!
//! After that the image is read-only until it is destroyed. [`LayoutTracker`]
//! rejects any other sequence.
//!
//! Depth textures skip the upload, the sampler and the descriptor set; they
//! stay `Undefined` until used as an attachment.

use std::rc::Rc;

use ash::{vk, Device};

use crate::backend::vulkan::initialization::{VulkanError, VulkanResult};
use crate::backend::vulkan::rendering::commands::transition_image_layout;
use crate::rhi::handles::{TextureDesc, TextureFormat, TextureUsage};

use super::buffer::{find_memory_type, HostWrite};
use super::descriptor::{write_descriptor_set, DescriptorPool, DescriptorSetKey, ResourceInfo};
use super::upload::{StagingTransfer, UploadContext};

/// Whole-image layout state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTracker {
    current: vk::ImageLayout,
}

impl LayoutTracker {
    /// Freshly created image
    pub fn new() -> Self {
        Self {
            current: vk::ImageLayout::UNDEFINED,
        }
    }

    /// Current layout
    pub fn current(&self) -> vk::ImageLayout {
        self.current
    }

    /// Move to `to`, returning the previous layout
    ///
    /// Only `Undefined -> TransferDstOptimal -> ShaderReadOnlyOptimal` is allowed.
    pub fn transition(&mut self, to: vk::ImageLayout) -> VulkanResult<vk::ImageLayout> {
        let allowed = matches!(
            (self.current, to),
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                | (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        );
        if !allowed {
            return Err(VulkanError::InvalidOperation {
                reason: format!("texture layout {:?} -> {:?} is not permitted", self.current, to),
            });
        }
        Ok(std::mem::replace(&mut self.current, to))
    }
}

impl Default for LayoutTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage format for a texture format
pub fn vk_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Rgba8 | TextureFormat::Rgb8 => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba16F => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Depth24Stencil8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

/// Mip count actually allocated for `desc`
pub fn mip_levels(desc: &TextureDesc<'_>) -> u32 {
    if desc.format.is_depth() {
        return 1;
    }
    desc.mips.clamp(1, desc.full_mip_chain())
}

/// Bytes of level-0 pixel data `desc` requires
pub fn required_data_len(desc: &TextureDesc<'_>) -> usize {
    desc.width as usize * desc.height as usize * desc.format.bytes_per_pixel()
}

/// Reject descs the image cannot be built from
///
/// Depth textures are render targets only, so they take no pixel data.
fn check_desc(desc: &TextureDesc<'_>) -> VulkanResult<()> {
    if desc.width == 0 || desc.height == 0 {
        return Err(VulkanError::InvalidOperation {
            reason: format!("texture size {}x{} is empty", desc.width, desc.height),
        });
    }
    let Some(data) = desc.data else {
        return Ok(());
    };
    if desc.format.is_depth() {
        return Err(VulkanError::InvalidOperation {
            reason: format!("{:?} texture cannot be created with pixel data", desc.format),
        });
    }
    let required = required_data_len(desc);
    if data.len() < required {
        return Err(VulkanError::InvalidOperation {
            reason: format!(
                "{}x{} {:?} texture needs {} bytes, got {}",
                desc.width,
                desc.height,
                desc.format,
                required,
                data.len()
            ),
        });
    }
    Ok(())
}

/// RGB8 pixels to RGBA8 with opaque alpha
pub fn expand_rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .flat_map(|px| [px[0], px[1], px[2], u8::MAX])
        .collect()
}

fn image_usage(desc: &TextureDesc<'_>, mips: u32) -> vk::ImageUsageFlags {
    if desc.format.is_depth() {
        return vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    let mut usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST;
    if mips > 1 || desc.usage.contains(TextureUsage::TRANSFER_SRC) {
        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if desc.usage.contains(TextureUsage::COLOR_ATTACHMENT) {
        usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    usage
}

fn mip_extent(size: u32, level: u32) -> i32 {
    (size >> level).max(1) as i32
}

struct TextureDescriptor {
    pool: Rc<DescriptorPool>,
    set: vk::DescriptorSet,
}

/// Backend texture behind a `TextureHandle`
pub struct VulkanTexture {
    device: Device,
    descriptor: Option<TextureDescriptor>,
    sampler: vk::Sampler,
    view: vk::ImageView,
    image: vk::Image,
    memory: vk::DeviceMemory,
    layout: LayoutTracker,
    width: u32,
    height: u32,
    mip_levels: u32,
    format: TextureFormat,
    usage: TextureUsage,
}

impl VulkanTexture {
    /// Create the image and its children, upload `desc.data`, and write the
    /// eager descriptor set from `descriptor_pool` with `set_layout`
    pub fn create(
        device: &Device,
        upload: &mut UploadContext,
        descriptor_pool: &Rc<DescriptorPool>,
        set_layout: vk::DescriptorSetLayout,
        desc: &TextureDesc<'_>,
    ) -> VulkanResult<Self> {
        check_desc(desc)?;

        let mips = mip_levels(desc);
        let mut texture = Self {
            device: device.clone(),
            descriptor: None,
            sampler: vk::Sampler::null(),
            view: vk::ImageView::null(),
            image: vk::Image::null(),
            memory: vk::DeviceMemory::null(),
            layout: LayoutTracker::new(),
            width: desc.width,
            height: desc.height,
            mip_levels: mips,
            format: desc.format,
            usage: desc.usage,
        };

        texture.create_image(upload.memory_properties(), image_usage(desc, mips))?;
        texture.create_view()?;

        if !desc.format.is_depth() {
            texture.upload(upload, desc)?;
            texture.create_sampler()?;
            texture.write_descriptor(descriptor_pool, set_layout)?;
        }

        log::debug!(
            "[TEXTURE] Created {}x{} {:?} texture with {} mip level(s)",
            desc.width,
            desc.height,
            desc.format,
            mips
        );
        Ok(texture)
    }

    fn create_image(
        &mut self,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        usage: vk::ImageUsageFlags,
    ) -> VulkanResult<()> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: self.width,
                height: self.height,
                depth: 1,
            })
            .mip_levels(self.mip_levels)
            .array_layers(1)
            .format(vk_format(self.format))
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        self.image = unsafe { self.device.create_image(&image_info, None)? };

        let requirements = unsafe { self.device.get_image_memory_requirements(self.image) };
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(find_memory_type(
                memory_properties,
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?);

        self.memory = unsafe { self.device.allocate_memory(&alloc_info, None)? };
        unsafe { self.device.bind_image_memory(self.image, self.memory, 0)? };
        Ok(())
    }

    fn aspect(&self) -> vk::ImageAspectFlags {
        if self.format.is_depth() {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }

    fn create_view(&mut self) -> VulkanResult<()> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk_format(self.format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: self.aspect(),
                base_mip_level: 0,
                level_count: self.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        self.view = unsafe { self.device.create_image_view(&view_info, None)? };
        Ok(())
    }

    fn create_sampler(&mut self) -> VulkanResult<()> {
        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(false)
            .max_anisotropy(1.0)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .min_lod(0.0)
            .max_lod(self.mip_levels as f32);

        self.sampler = unsafe { self.device.create_sampler(&sampler_info, None)? };
        Ok(())
    }

    fn upload(&mut self, upload: &mut UploadContext, desc: &TextureDesc<'_>) -> VulkanResult<()> {
        let pixels = desc.data.map(|data| {
            let data = &data[..required_data_len(desc)];
            if desc.format == TextureFormat::Rgb8 {
                expand_rgb_to_rgba(data)
            } else {
                data.to_vec()
            }
        });

        let staging = match &pixels {
            Some(pixels) => {
                let mut staging = upload.create_staging(pixels.len() as u64)?;
                staging.write_unchecked(0, pixels);
                Some(staging)
            }
            None => None,
        };

        let old = self.layout.transition(vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        self.layout.transition(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;

        let (image, width, height, mips) = (self.image, self.width, self.height, self.mip_levels);
        upload.submit_one_time(|device, cb| {
            transition_image_layout(device, cb, image, old, vk::ImageLayout::TRANSFER_DST_OPTIMAL, 0, mips)?;

            match &staging {
                Some(staging) => {
                    let region = vk::BufferImageCopy::builder()
                        .buffer_offset(0)
                        .buffer_row_length(0)
                        .buffer_image_height(0)
                        .image_subresource(vk::ImageSubresourceLayers {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            mip_level: 0,
                            base_array_layer: 0,
                            layer_count: 1,
                        })
                        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                        .image_extent(vk::Extent3D { width, height, depth: 1 })
                        .build();
                    unsafe {
                        device.cmd_copy_buffer_to_image(
                            cb,
                            staging.handle(),
                            image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &[region],
                        );
                    }
                }
                None => {
                    let range = vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: mips,
                        base_array_layer: 0,
                        layer_count: 1,
                    };
                    unsafe {
                        device.cmd_clear_color_image(
                            cb,
                            image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &vk::ClearColorValue::default(),
                            &[range],
                        );
                    }
                }
            }

            if staging.is_some() {
                record_mip_chain(device, cb, image, width, height, mips)
            } else {
                transition_image_layout(
                    device,
                    cb,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    0,
                    mips,
                )
            }
        })
    }

    fn write_descriptor(&mut self, pool: &Rc<DescriptorPool>, set_layout: vk::DescriptorSetLayout) -> VulkanResult<()> {
        let set = pool.allocate(set_layout)?;
        self.descriptor = Some(TextureDescriptor {
            pool: Rc::clone(pool),
            set,
        });

        if let Some(info) = self.descriptor_info() {
            let mut key = DescriptorSetKey::new(0);
            key.bind(0, info);
            write_descriptor_set(&self.device, set, &key);
        }
        Ok(())
    }

    /// Sampled-image info for descriptor writes; `None` for depth textures
    pub fn descriptor_info(&self) -> Option<ResourceInfo> {
        if self.sampler == vk::Sampler::null() {
            return None;
        }
        Some(ResourceInfo::Image {
            view: self.view,
            sampler: self.sampler,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        })
    }

    /// The eagerly written single-texture descriptor set
    pub fn descriptor_set(&self) -> Option<vk::DescriptorSet> {
        self.descriptor.as_ref().map(|d| d.set)
    }

    /// Image view
    pub fn image_view(&self) -> vk::ImageView {
        self.view
    }

    /// Current whole-image layout
    pub fn layout(&self) -> vk::ImageLayout {
        self.layout.current()
    }

    /// Width in texels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in texels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Allocated mip levels
    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Texel format
    pub fn format(&self) -> TextureFormat {
        self.format
    }

    /// Usage flags
    pub fn usage(&self) -> TextureUsage {
        self.usage
    }
}

/// Blit each level from the one above and leave all levels shader-readable
fn record_mip_chain(
    device: &Device,
    cb: vk::CommandBuffer,
    image: vk::Image,
    width: u32,
    height: u32,
    mips: u32,
) -> VulkanResult<()> {
    for level in 1..mips {
        transition_image_layout(
            device,
            cb,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            level - 1,
            1,
        )?;

        let blit = vk::ImageBlit::builder()
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: mip_extent(width, level - 1),
                    y: mip_extent(height, level - 1),
                    z: 1,
                },
            ])
            .src_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level - 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: mip_extent(width, level),
                    y: mip_extent(height, level),
                    z: 1,
                },
            ])
            .dst_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level,
                base_array_layer: 0,
                layer_count: 1,
            })
            .build();

        unsafe {
            device.cmd_blit_image(
                cb,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }

        transition_image_layout(
            device,
            cb,
            image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            level - 1,
            1,
        )?;
    }

    // The last level was only ever written
    transition_image_layout(
        device,
        cb,
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        mips - 1,
        1,
    )
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        if let Some(descriptor) = self.descriptor.take() {
            descriptor.pool.free(descriptor.set);
        }
        unsafe {
            if self.sampler != vk::Sampler::null() {
                self.device.destroy_sampler(self.sampler, None);
            }
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            if self.image != vk::Image::null() {
                self.device.destroy_image(self.image, None);
            }
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(width: u32, height: u32, mips: u32, format: TextureFormat) -> TextureDesc<'static> {
        TextureDesc {
            width,
            height,
            mips,
            format,
            usage: TextureUsage::SAMPLED,
            data: None,
        }
    }

    #[test]
    fn test_layout_protocol() {
        let mut tracker = LayoutTracker::new();
        assert_eq!(tracker.current(), vk::ImageLayout::UNDEFINED);

        let old = tracker.transition(vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(old, vk::ImageLayout::UNDEFINED);
        tracker.transition(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(tracker.current(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_read_only_is_final() {
        let mut tracker = LayoutTracker::new();
        tracker.transition(vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        tracker.transition(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap();

        assert!(tracker.transition(vk::ImageLayout::TRANSFER_DST_OPTIMAL).is_err());
        assert!(tracker.transition(vk::ImageLayout::UNDEFINED).is_err());
        assert_eq!(tracker.current(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_skipping_upload_layout_rejected() {
        let mut tracker = LayoutTracker::new();
        assert!(tracker.transition(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).is_err());
        assert_eq!(tracker.current(), vk::ImageLayout::UNDEFINED);
    }

    #[test]
    fn test_rgb_expansion() {
        let rgba = expand_rgb_to_rgba(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(rgba, vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn test_mip_clamping() {
        assert_eq!(mip_levels(&desc(256, 256, 1, TextureFormat::Rgba8)), 1);
        assert_eq!(mip_levels(&desc(256, 256, 4, TextureFormat::Rgba8)), 4);
        assert_eq!(mip_levels(&desc(256, 64, 100, TextureFormat::Rgba8)), 9);
        assert_eq!(mip_levels(&desc(1, 1, 5, TextureFormat::Rgba8)), 1);
        assert_eq!(mip_levels(&desc(64, 64, 0, TextureFormat::Rgba8)), 1);
        assert_eq!(mip_levels(&desc(64, 64, 4, TextureFormat::Depth24Stencil8)), 1);
    }

    #[test]
    fn test_required_data_len() {
        assert_eq!(required_data_len(&desc(4, 2, 1, TextureFormat::Rgba8)), 32);
        assert_eq!(required_data_len(&desc(4, 2, 1, TextureFormat::Rgb8)), 24);
        assert_eq!(required_data_len(&desc(4, 2, 1, TextureFormat::Rgba16F)), 64);
    }

    #[test]
    fn test_desc_checks() {
        assert!(check_desc(&desc(4, 4, 1, TextureFormat::Rgba8)).is_ok());
        assert!(check_desc(&desc(0, 4, 1, TextureFormat::Rgba8)).is_err());

        let pixels = vec![0u8; 64];
        let with_data = |format, len: usize| TextureDesc {
            data: Some(&pixels[..len]),
            ..desc(4, 4, 1, format)
        };
        assert!(check_desc(&with_data(TextureFormat::Rgba8, 64)).is_ok());
        assert!(check_desc(&with_data(TextureFormat::Rgba8, 63)).is_err());
        assert!(check_desc(&desc(4, 4, 1, TextureFormat::Depth24Stencil8)).is_ok());
        assert!(matches!(
            check_desc(&with_data(TextureFormat::Depth24Stencil8, 64)),
            Err(VulkanError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_formats_and_usage() {
        assert_eq!(vk_format(TextureFormat::Rgb8), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(vk_format(TextureFormat::Depth24Stencil8), vk::Format::D24_UNORM_S8_UINT);

        let depth = desc(8, 8, 1, TextureFormat::Depth24Stencil8);
        assert_eq!(image_usage(&depth, 1), vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);

        let mipped = desc(8, 8, 4, TextureFormat::Rgba8);
        let usage = image_usage(&mipped, 4);
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::SAMPLED));
        assert!(!image_usage(&desc(8, 8, 1, TextureFormat::Rgba8), 1).contains(vk::ImageUsageFlags::TRANSFER_SRC));
    }

    #[test]
    fn test_mip_extent_floors_at_one() {
        assert_eq!(mip_extent(256, 0), 256);
        assert_eq!(mip_extent(256, 3), 32);
        assert_eq!(mip_extent(3, 4), 1);
    }
}
