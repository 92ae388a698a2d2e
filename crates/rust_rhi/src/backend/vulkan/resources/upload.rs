//! # Staging Uploads
//!
//! Device-local memory is filled by writing into a temporary host-visible
//! staging buffer, recording a copy in a one-time command buffer, submitting
//! it, and blocking on a fence until the copy is done. Only then is the
//! staging buffer released. Uploads are rare (resource creation, occasional
//! static updates) so they are never overlapped with frame work.

use ash::{vk, Device};

use crate::backend::vulkan::initialization::{VulkanError, VulkanResult};
use crate::backend::vulkan::rendering::commands::CommandPool;
use crate::backend::vulkan::state::sync::Fence;

use super::buffer::{check_write, GpuBuffer, HostWrite};

/// Staging copies into device-local buffers
pub trait StagingTransfer {
    /// Host-writable staging storage
    type Staging: HostWrite;

    /// Allocate staging storage of `size` bytes
    fn create_staging(&mut self, size: u64) -> VulkanResult<Self::Staging>;

    /// Copy `size` bytes from `staging` to `dst` at `dst_offset` and wait for completion
    fn copy_and_wait(&mut self, staging: &Self::Staging, dst: vk::Buffer, dst_offset: u64, size: u64) -> VulkanResult<()>;
}

/// Write `data` at `offset` of the device-local `dst` through a staging buffer
///
/// Returns `Ok(false)` when the write was rejected (empty or out of bounds).
/// Blocks until the GPU copy has completed.
pub fn upload_static<T: StagingTransfer>(
    transfer: &mut T,
    dst: vk::Buffer,
    capacity: u64,
    offset: u64,
    data: &[u8],
) -> VulkanResult<bool> {
    if !check_write(capacity, offset, data.len()) {
        return Ok(false);
    }

    let size = data.len() as u64;
    let mut staging = transfer.create_staging(size)?;
    staging.write_unchecked(0, data);
    transfer.copy_and_wait(&staging, dst, offset, size)?;
    drop(staging);
    Ok(true)
}

/// Queue, pool and fence for blocking one-time submissions
pub struct UploadContext {
    device: Device,
    queue: vk::Queue,
    fence: Fence,
    command_pool: CommandPool,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl UploadContext {
    /// Create on the graphics queue family
    pub fn new(
        device: Device,
        queue: vk::Queue,
        queue_family_index: u32,
        memory_properties: vk::PhysicalDeviceMemoryProperties,
    ) -> VulkanResult<Self> {
        Ok(Self {
            command_pool: CommandPool::new(device.clone(), queue_family_index)?,
            fence: Fence::new(device.clone(), false)?,
            device,
            queue,
            memory_properties,
        })
    }

    /// Record with `record`, submit, and block until the GPU is done
    pub fn submit_one_time<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer) -> VulkanResult<()>,
    {
        let command_buffer = self
            .command_pool
            .allocate_command_buffers(1)?
            .pop()
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: "no command buffer allocated".to_string(),
            })?;

        let result = self.record_and_wait(command_buffer, record);
        self.command_pool.free_command_buffers(&[command_buffer]);
        result
    }

    fn record_and_wait<F>(&self, command_buffer: vk::CommandBuffer, record: F) -> VulkanResult<()>
    where
        F: FnOnce(&Device, vk::CommandBuffer) -> VulkanResult<()>,
    {
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info)? };
        record(&self.device, command_buffer)?;
        unsafe { self.device.end_command_buffer(command_buffer)? };

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();

        self.fence.reset()?;
        unsafe { self.device.queue_submit(self.queue, &[submit_info], self.fence.handle())? };
        self.fence.wait(u64::MAX)
    }

    /// Memory properties used for staging allocations
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }
}

impl StagingTransfer for UploadContext {
    type Staging = GpuBuffer;

    fn create_staging(&mut self, size: u64) -> VulkanResult<GpuBuffer> {
        GpuBuffer::host_visible(&self.device, &self.memory_properties, size, vk::BufferUsageFlags::TRANSFER_SRC)
    }

    fn copy_and_wait(&mut self, staging: &GpuBuffer, dst: vk::Buffer, dst_offset: u64, size: u64) -> VulkanResult<()> {
        self.submit_one_time(|device, command_buffer| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset,
                size,
            };
            unsafe { device.cmd_copy_buffer(command_buffer, staging.handle(), dst, &[region]) };
            Ok(())
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::collections::HashMap;

    /// Device-local buffers simulated as byte vectors, readable after a copy
    #[derive(Default)]
    pub struct ReadbackTransfer {
        pub device_memory: HashMap<vk::Buffer, Vec<u8>>,
        pub staging_created: usize,
        pub copies: usize,
    }

    impl ReadbackTransfer {
        pub fn with_buffer(buffer: vk::Buffer, contents: Vec<u8>) -> Self {
            let mut transfer = Self::default();
            transfer.device_memory.insert(buffer, contents);
            transfer
        }
    }

    impl StagingTransfer for ReadbackTransfer {
        type Staging = Vec<u8>;

        fn create_staging(&mut self, size: u64) -> VulkanResult<Vec<u8>> {
            self.staging_created += 1;
            Ok(vec![0; size as usize])
        }

        fn copy_and_wait(&mut self, staging: &Vec<u8>, dst: vk::Buffer, dst_offset: u64, size: u64) -> VulkanResult<()> {
            self.copies += 1;
            let memory = self.device_memory.get_mut(&dst).ok_or(VulkanError::InvalidOperation {
                reason: "unknown buffer".to_string(),
            })?;
            let start = dst_offset as usize;
            memory[start..start + size as usize].copy_from_slice(&staging[..size as usize]);
            Ok(())
        }
    }

    /// Read-back reflects exactly the written bytes at the offset
    #[test]
    fn test_static_upload_read_back() {
        let dst = vk::Buffer::from_raw(42);
        let mut transfer = ReadbackTransfer::with_buffer(dst, vec![0xAA; 32]);

        assert!(upload_static(&mut transfer, dst, 32, 8, &[1, 2, 3, 4]).unwrap());

        let memory = &transfer.device_memory[&dst];
        assert_eq!(&memory[8..12], &[1, 2, 3, 4]);
        assert!(memory[..8].iter().all(|&b| b == 0xAA));
        assert!(memory[12..].iter().all(|&b| b == 0xAA));
        assert_eq!(transfer.staging_created, 1);
        assert_eq!(transfer.copies, 1);
    }

    #[test]
    fn test_consecutive_uploads() {
        let dst = vk::Buffer::from_raw(7);
        let mut transfer = ReadbackTransfer::with_buffer(dst, vec![0; 8]);
        upload_static(&mut transfer, dst, 8, 0, &[9; 8]).unwrap();
        upload_static(&mut transfer, dst, 8, 6, &[5, 6]).unwrap();
        assert_eq!(transfer.device_memory[&dst], vec![9, 9, 9, 9, 9, 9, 5, 6]);
    }

    /// Rejected writes never allocate staging memory or submit a copy
    #[test]
    fn test_rejected_upload_touches_nothing() {
        let dst = vk::Buffer::from_raw(1);
        let mut transfer = ReadbackTransfer::with_buffer(dst, vec![0; 16]);

        assert!(!upload_static(&mut transfer, dst, 16, 12, &[1; 8]).unwrap());
        assert!(!upload_static(&mut transfer, dst, 16, 0, &[]).unwrap());
        assert_eq!(transfer.staging_created, 0);
        assert_eq!(transfer.copies, 0);
        assert!(transfer.device_memory[&dst].iter().all(|&b| b == 0));
    }
}
