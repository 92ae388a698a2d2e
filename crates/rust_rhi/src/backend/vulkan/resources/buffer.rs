//! # GPU Buffers
//!
//! Two storage strategies, fixed at creation:
//!
//! - **Dynamic**: one host-visible, host-coherent buffer per frame in flight,
//!   mapped once at creation and never unmapped. A write lands in the slot of
//!   the current frame, so it cannot alias data an earlier in-flight frame is
//!   still reading. Initial data is copied into every slot.
//! - **Static**: one device-local buffer that is never mapped. Writes go
//!   through a staging buffer and a blocking copy (see [`upload`]).
//!
//! Writes past the end of a buffer, and empty writes, are logged and
//! dropped whole. A write is never partially applied.
//!
//! [`upload`]: super::upload

use ash::{vk, Device};

use crate::backend::vulkan::initialization::{VulkanError, VulkanResult};
use crate::rhi::handles::{BufferDesc, BufferType};

use super::descriptor::ResourceInfo;
use super::upload::{upload_static, StagingTransfer};

/// Find a memory type index with `properties` among `type_filter`'s bits
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    memory_properties.memory_types[..memory_properties.memory_type_count as usize]
        .iter()
        .zip(0u32..)
        .find(|(memory_type, index)| {
            type_filter & (1 << index) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(_, index)| index)
        .ok_or(VulkanError::NoSuitableMemoryType)
}

/// Whether `len` bytes fit at `offset` in a buffer of `capacity` bytes
///
/// Logs the reason when they do not.
pub fn check_write(capacity: u64, offset: u64, len: usize) -> bool {
    if len == 0 {
        log::error!("[BUFFER] Ignoring write with no data");
        return false;
    }
    match offset.checked_add(len as u64) {
        Some(end) if end <= capacity => true,
        _ => {
            log::error!(
                "[BUFFER] Ignoring write of {} bytes at offset {} into {}-byte buffer",
                len,
                offset,
                capacity
            );
            false
        }
    }
}

/// Host-writable byte storage
pub trait HostWrite {
    /// Size in bytes
    fn capacity(&self) -> u64;

    /// Copy `data` to `offset`; the range has already been checked
    fn write_unchecked(&mut self, offset: u64, data: &[u8]);

    /// Checked write; returns whether anything was written
    fn write_at(&mut self, offset: u64, data: &[u8]) -> bool {
        if !check_write(self.capacity(), offset, data.len()) {
            return false;
        }
        self.write_unchecked(offset, data);
        true
    }
}

impl HostWrite for Vec<u8> {
    fn capacity(&self) -> u64 {
        self.len() as u64
    }

    fn write_unchecked(&mut self, offset: u64, data: &[u8]) {
        let start = offset as usize;
        self[start..start + data.len()].copy_from_slice(data);
    }
}

/// Buffer plus its dedicated memory allocation
pub struct GpuBuffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    mapped: Option<*mut u8>,
}

impl GpuBuffer {
    /// Create a buffer and bind fresh memory to it
    ///
    /// Host-visible memory is mapped immediately and stays mapped until drop.
    pub fn new(
        device: &Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None)? };

        // From here on the partially built value cleans up after itself
        let mut gpu_buffer = Self {
            device: device.clone(),
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
            mapped: None,
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = find_memory_type(memory_properties, requirements.memory_type_bits, properties)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        gpu_buffer.memory = unsafe { device.allocate_memory(&alloc_info, None)? };
        unsafe { device.bind_buffer_memory(buffer, gpu_buffer.memory, 0)? };

        if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            let ptr = unsafe { device.map_memory(gpu_buffer.memory, 0, size, vk::MemoryMapFlags::empty())? };
            gpu_buffer.mapped = Some(ptr.cast::<u8>());
        }

        Ok(gpu_buffer)
    }

    /// Host-visible, host-coherent buffer for staging and per-frame data
    pub fn host_visible(
        device: &Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        Self::new(
            device,
            memory_properties,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Raw buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Whether the buffer is persistently mapped
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }
}

impl HostWrite for GpuBuffer {
    fn capacity(&self) -> u64 {
        self.size
    }

    fn write_unchecked(&mut self, offset: u64, data: &[u8]) {
        let Some(ptr) = self.mapped else {
            log::error!("[BUFFER] Write to a buffer that is not host-visible");
            return;
        };
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.take().is_some() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.buffer, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

/// One host-writable allocation per frame in flight
pub struct FrameRingBuffer<M> {
    slots: Vec<M>,
}

impl<M: HostWrite> FrameRingBuffer<M> {
    /// Ring over `slots`; all slots must have the same capacity
    pub fn new(slots: Vec<M>) -> Self {
        debug_assert!(!slots.is_empty(), "frame ring needs at least one slot");
        debug_assert!(slots.windows(2).all(|w| w[0].capacity() == w[1].capacity()));
        Self { slots }
    }

    /// Write into the slot belonging to `frame_index`
    pub fn write(&mut self, frame_index: usize, offset: u64, data: &[u8]) -> bool {
        let len = self.slots.len();
        self.slots[frame_index % len].write_at(offset, data)
    }

    /// Write into every slot
    pub fn write_all(&mut self, offset: u64, data: &[u8]) -> bool {
        if !check_write(self.capacity(), offset, data.len()) {
            return false;
        }
        for slot in &mut self.slots {
            slot.write_unchecked(offset, data);
        }
        true
    }

    /// Slot belonging to `frame_index`
    pub fn slot(&self, frame_index: usize) -> &M {
        &self.slots[frame_index % self.slots.len()]
    }

    /// Per-slot capacity
    pub fn capacity(&self) -> u64 {
        self.slots.first().map_or(0, HostWrite::capacity)
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True for a ring without slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn usage_flags(ty: BufferType) -> vk::BufferUsageFlags {
    match ty {
        BufferType::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferType::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        BufferType::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
    }
}

enum Storage {
    Dynamic(FrameRingBuffer<GpuBuffer>),
    Static(GpuBuffer),
}

/// Backend buffer behind a `BufferHandle`
pub struct VulkanBuffer {
    ty: BufferType,
    size: u64,
    storage: Storage,
}

impl VulkanBuffer {
    /// Allocate per `desc` and upload its initial data
    pub fn create<T>(
        device: &Device,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        transfer: &mut T,
        desc: &BufferDesc<'_>,
        frames_in_flight: usize,
    ) -> VulkanResult<Self>
    where
        T: StagingTransfer,
    {
        if desc.size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "buffer size is zero".to_string(),
            });
        }
        if let Some(data) = desc.data {
            if data.len() as u64 > desc.size {
                return Err(VulkanError::InvalidOperation {
                    reason: format!("{} bytes of initial data exceed buffer size {}", data.len(), desc.size),
                });
            }
        }

        let usage = usage_flags(desc.ty);
        let storage = if desc.is_dynamic {
            let slots = (0..frames_in_flight.max(1))
                .map(|_| GpuBuffer::host_visible(device, memory_properties, desc.size, usage))
                .collect::<VulkanResult<Vec<_>>>()?;
            let mut ring = FrameRingBuffer::new(slots);
            if let Some(data) = desc.data.filter(|d| !d.is_empty()) {
                ring.write_all(0, data);
            }
            Storage::Dynamic(ring)
        } else {
            let buffer = GpuBuffer::new(
                device,
                memory_properties,
                desc.size,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?;
            if let Some(data) = desc.data.filter(|d| !d.is_empty()) {
                upload_static(transfer, buffer.handle(), desc.size, 0, data)?;
            }
            Storage::Static(buffer)
        };

        log::debug!(
            "[BUFFER] Created {:?} buffer, {} bytes, {}",
            desc.ty,
            desc.size,
            if desc.is_dynamic { "dynamic" } else { "static" }
        );

        Ok(Self {
            ty: desc.ty,
            size: desc.size,
            storage,
        })
    }

    /// Write `data` at `offset`
    ///
    /// Dynamic buffers write the slot for `frame_index`; static buffers
    /// block on a staging copy.
    pub fn update<T: StagingTransfer>(&mut self, transfer: &mut T, frame_index: usize, offset: u64, data: &[u8]) {
        match &mut self.storage {
            Storage::Dynamic(ring) => {
                ring.write(frame_index, offset, data);
            }
            Storage::Static(buffer) => {
                if let Err(e) = upload_static(transfer, buffer.handle(), self.size, offset, data) {
                    log::error!("[BUFFER] Static upload failed: {}", e);
                }
            }
        }
    }

    /// Buffer to bind for `frame_index`
    pub fn handle(&self, frame_index: usize) -> vk::Buffer {
        match &self.storage {
            Storage::Dynamic(ring) => ring.slot(frame_index).handle(),
            Storage::Static(buffer) => buffer.handle(),
        }
    }

    /// Descriptor info covering the whole buffer for `frame_index`
    pub fn descriptor_info(&self, frame_index: usize) -> ResourceInfo {
        ResourceInfo::Buffer {
            buffer: self.handle(frame_index),
            offset: 0,
            range: self.size,
        }
    }

    /// Binding type
    pub fn buffer_type(&self) -> BufferType {
        self.ty
    }

    /// Capacity in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether this is a per-frame host-visible buffer
    pub fn is_dynamic(&self) -> bool {
        matches!(self.storage, Storage::Dynamic(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in props.memory_types.iter_mut().zip(flags) {
            slot.property_flags = property_flags;
        }
        props
    }

    #[test]
    fn test_find_memory_type() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, host]);

        assert_eq!(find_memory_type(&props, 0b11, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(), 0);
        assert_eq!(find_memory_type(&props, 0b11, host).unwrap(), 1);
        // Type 1 filtered out by the requirement bits
        assert!(matches!(
            find_memory_type(&props, 0b01, host),
            Err(VulkanError::NoSuitableMemoryType)
        ));
    }

    #[test]
    fn test_check_write() {
        assert!(check_write(16, 0, 16));
        assert!(check_write(16, 8, 8));
        assert!(!check_write(16, 8, 9));
        assert!(!check_write(16, 0, 0));
        assert!(!check_write(16, u64::MAX, 1));
    }

    /// Each of R+1 frames writes a tag; every slot keeps only its own frames' data
    #[test]
    fn test_ring_slots_never_alias() {
        const RING: usize = 3;
        let mut ring = FrameRingBuffer::new(vec![vec![0u8; 8]; RING]);

        for frame in 0..=RING {
            let tag = [frame as u8 + 1; 8];
            assert!(ring.write(frame % RING, 0, &tag));

            for slot in 0..RING {
                let expected = (0..=frame).filter(|f| f % RING == slot).last().map_or(0, |f| f as u8 + 1);
                assert_eq!(ring.slot(slot), &vec![expected; 8], "slot {} after frame {}", slot, frame);
            }
        }
    }

    #[test]
    fn test_ring_write_all_and_rejects() {
        let mut ring = FrameRingBuffer::new(vec![vec![0u8; 4]; 2]);
        assert!(ring.write_all(1, &[7, 7]));
        assert_eq!(ring.slot(0), &vec![0, 7, 7, 0]);
        assert_eq!(ring.slot(1), &vec![0, 7, 7, 0]);

        // Over capacity: nothing written anywhere
        assert!(!ring.write_all(3, &[1, 1]));
        assert!(!ring.write(0, 2, &[9, 9, 9]));
        assert!(!ring.write(0, 0, &[]));
        assert_eq!(ring.slot(0), &vec![0, 7, 7, 0]);
    }
}
