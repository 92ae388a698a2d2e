//! Command pools, frame command recording and image layout transitions

use ash::{vk, Device};

use crate::backend::vulkan::initialization::{VulkanError, VulkanResult};
use crate::backend::vulkan::state::recording::CommandRecorder;

use super::pipeline::GRAPHICS_STAGES;

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe { device.create_command_pool(&pool_create_info, None).map_err(VulkanError::Api)? };

        Ok(Self { device, command_pool })
    }

    /// Allocate primary command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.allocate_command_buffers(&alloc_info).map_err(VulkanError::Api) }
    }

    /// Return command buffers to the pool
    pub fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(self.command_pool, command_buffers) };
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // Buffers from this pool may still be executing
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Records into a frame's command buffer
pub struct VulkanRecorder<'a> {
    device: &'a Device,
    command_buffer: vk::CommandBuffer,
}

impl<'a> VulkanRecorder<'a> {
    /// Recorder for a command buffer in the recording state
    pub fn new(device: &'a Device, command_buffer: vk::CommandBuffer) -> Self {
        Self { device, command_buffer }
    }
}

impl CommandRecorder for VulkanRecorder<'_> {
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(self.command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
        unsafe { self.device.cmd_bind_vertex_buffers(self.command_buffer, 0, &[buffer], &[0]) };
    }

    fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.command_buffer, buffer, 0, vk::IndexType::UINT32);
        }
    }

    fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set: u32, descriptor_set: vk::DescriptorSet) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set,
                &[descriptor_set],
                &[],
            );
        }
    }

    fn push_constants(&mut self, layout: vk::PipelineLayout, data: &[u8]) {
        unsafe {
            self.device
                .cmd_push_constants(self.command_buffer, layout, GRAPHICS_STAGES, 0, data);
        }
    }

    fn draw_indexed(&mut self, index_count: u32) {
        unsafe { self.device.cmd_draw_indexed(self.command_buffer, index_count, 1, 0, 0, 0) };
    }
}

/// Access and stage masks for one layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    /// Accesses that must complete before the transition
    pub src_access: vk::AccessFlags,
    /// Accesses that wait for the transition
    pub dst_access: vk::AccessFlags,
    /// Stage the transition waits on
    pub src_stage: vk::PipelineStageFlags,
    /// Stage that waits on the transition
    pub dst_stage: vk::PipelineStageFlags,
}

/// Masks for the layout transitions this backend performs
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Option<TransitionMasks> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => (A::TRANSFER_WRITE, A::TRANSFER_READ, S::TRANSFER, S::TRANSFER),
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => {
            (A::TRANSFER_READ, A::SHADER_READ, S::TRANSFER, S::FRAGMENT_SHADER)
        }
        // The acquire semaphore is waited on at COLOR_ATTACHMENT_OUTPUT
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            A::COLOR_ATTACHMENT_WRITE,
            S::COLOR_ATTACHMENT_OUTPUT,
            S::COLOR_ATTACHMENT_OUTPUT,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => (
            A::COLOR_ATTACHMENT_WRITE,
            A::empty(),
            S::COLOR_ATTACHMENT_OUTPUT,
            S::BOTTOM_OF_PIPE,
        ),
        _ => return None,
    };

    Some(TransitionMasks {
        src_access,
        dst_access,
        src_stage,
        dst_stage,
    })
}

/// Record a layout transition barrier for `level_count` mips starting at `base_mip`
pub fn transition_image_layout(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    base_mip: u32,
    level_count: u32,
) -> VulkanResult<()> {
    let masks = transition_masks(old_layout, new_layout).ok_or_else(|| VulkanError::InvalidOperation {
        reason: format!("unsupported layout transition {:?} -> {:?}", old_layout, new_layout),
    })?;

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: base_mip,
            level_count,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access)
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_transitions() {
        let begin = transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL).unwrap();
        assert_eq!(begin.dst_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(begin.src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);

        let end = transition_masks(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR).unwrap();
        assert_eq!(end.src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(end.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn test_upload_transitions() {
        let to_dst = transition_masks(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        let to_read =
            transition_masks(vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_unsupported_transition() {
        assert!(transition_masks(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::TRANSFER_DST_OPTIMAL).is_none());
        assert!(transition_masks(vk::ImageLayout::PRESENT_SRC_KHR, vk::ImageLayout::UNDEFINED).is_none());
    }
}
