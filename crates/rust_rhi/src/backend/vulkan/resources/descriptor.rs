//! # Descriptor Sets
//!
//! Descriptor state is resolved lazily. Bind calls accumulate resources
//! into a [`DescriptorSetKey`] per set index; at draw time each key is turned
//! into a real `VkDescriptorSet` through the current frame's
//! [`DescriptorSetCache`]. Cached sets live until the frame slot is reclaimed,
//! at which point the whole cache and its pools are reset.
//!
//! The key carries an order-independent hash: each binding contributes an
//! FNV-1a digest of `(binding index, resource handles)` and contributions are
//! combined with XOR. Rebinding a slot XORs the old contribution out again.
//! Cache lookups hash with that value and confirm hits with a full equality
//! check of the bound resources.

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use ash::vk::{self, Handle};
use ash::Device;

use crate::backend::vulkan::initialization::{VulkanError, VulkanResult};
use crate::foundation::hash::{fnv1a_words, FnvBuildHasher};

/// A resource written into one descriptor binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceInfo {
    /// Uniform buffer range
    Buffer {
        /// Buffer handle
        buffer: vk::Buffer,
        /// Start of the range
        offset: u64,
        /// Range length
        range: u64,
    },
    /// Combined image sampler
    Image {
        /// Image view
        view: vk::ImageView,
        /// Sampler
        sampler: vk::Sampler,
        /// Layout the image is in when sampled
        layout: vk::ImageLayout,
    },
}

impl ResourceInfo {
    fn contribution(&self, binding: u32) -> u64 {
        match *self {
            Self::Buffer { buffer, offset, range } => {
                fnv1a_words(&[u64::from(binding), 0, buffer.as_raw(), offset, range])
            }
            Self::Image { view, sampler, layout } => fnv1a_words(&[
                u64::from(binding),
                1,
                view.as_raw(),
                sampler.as_raw(),
                layout.as_raw() as u64,
            ]),
        }
    }

    fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::Buffer { .. } => vk::DescriptorType::UNIFORM_BUFFER,
            Self::Image { .. } => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// Identity of "these resources at these bindings of set `set`"
#[derive(Debug, Clone)]
pub struct DescriptorSetKey {
    set: u32,
    bindings: BTreeMap<u32, ResourceInfo>,
    hash: u64,
}

impl DescriptorSetKey {
    /// Empty key for descriptor set `set`
    pub fn new(set: u32) -> Self {
        Self {
            set,
            bindings: BTreeMap::new(),
            hash: fnv1a_words(&[u64::from(set)]),
        }
    }

    /// Bind `info` at `binding`, replacing any previous resource there
    pub fn bind(&mut self, binding: u32, info: ResourceInfo) {
        if let Some(previous) = self.bindings.insert(binding, info) {
            self.hash ^= previous.contribution(binding);
        }
        self.hash ^= info.contribution(binding);
    }

    /// Descriptor set index
    pub fn set(&self) -> u32 {
        self.set
    }

    /// Bound resources by binding index
    pub fn bindings(&self) -> &BTreeMap<u32, ResourceInfo> {
        &self.bindings
    }

    /// True when nothing is bound
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// The rolling identity hash
    pub fn identity_hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for DescriptorSetKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.set == other.set && self.bindings == other.bindings
    }
}

impl Eq for DescriptorSetKey {}

impl Hash for DescriptorSetKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Source of populated descriptor sets for one frame slot
pub trait DescriptorAllocator {
    /// Allocate a set with `layout` and write every binding in `key`
    fn allocate(&mut self, layout: vk::DescriptorSetLayout, key: &DescriptorSetKey) -> VulkanResult<vk::DescriptorSet>;

    /// Recycle every set handed out since the last reset
    fn reset(&mut self) -> VulkanResult<()>;
}

/// Per-frame memo of descriptor sets keyed by layout and bound resources
pub struct DescriptorSetCache<A> {
    allocator: A,
    sets: HashMap<vk::DescriptorSetLayout, HashMap<DescriptorSetKey, vk::DescriptorSet, FnvBuildHasher>>,
}

impl<A: DescriptorAllocator> DescriptorSetCache<A> {
    /// Empty cache over `allocator`
    pub fn new(allocator: A) -> Self {
        Self {
            allocator,
            sets: HashMap::new(),
        }
    }

    /// Return the set for `(layout, key)`, allocating and writing it on a miss
    pub fn get_descriptor_set(
        &mut self,
        layout: vk::DescriptorSetLayout,
        key: &DescriptorSetKey,
    ) -> VulkanResult<vk::DescriptorSet> {
        let per_layout = self.sets.entry(layout).or_default();
        if let Some(&set) = per_layout.get(key) {
            return Ok(set);
        }

        let set = self.allocator.allocate(layout, key)?;
        per_layout.insert(key.clone(), set);
        log::trace!("[DESCRIPTOR] Allocated set {} with {} bindings", key.set(), key.bindings().len());
        Ok(set)
    }

    /// Drop every cached set and recycle the allocator
    pub fn reset(&mut self) -> VulkanResult<()> {
        self.sets.clear();
        self.allocator.reset()
    }

    /// Number of cached sets
    pub fn len(&self) -> usize {
        self.sets.values().map(HashMap::len).sum()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The underlying allocator
    pub fn allocator(&self) -> &A {
        &self.allocator
    }
}

/// Descriptor set layout builder for creating reusable layouts
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new descriptor set layout builder
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, binding: u32, ty: vk::DescriptorType, stage_flags: vk::ShaderStageFlags) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .stage_flags(stage_flags)
                .build(),
        );
        self
    }

    /// Add a uniform buffer binding
    pub fn add_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::UNIFORM_BUFFER, stage_flags)
    }

    /// Add a combined image sampler binding
    pub fn add_combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.add(binding, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, stage_flags)
    }

    /// Build the descriptor set layout
    pub fn build(self, device: &Device) -> VulkanResult<DescriptorSetLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&self.bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }.map_err(VulkanError::Api)?;

        Ok(DescriptorSetLayout {
            layout,
            device: device.clone(),
        })
    }
}

/// Descriptor set layout wrapper with automatic cleanup
pub struct DescriptorSetLayout {
    layout: vk::DescriptorSetLayout,
    device: Device,
}

impl DescriptorSetLayout {
    /// Get the Vulkan descriptor set layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptors of each type reserved per set
const DESCRIPTORS_PER_SET: u32 = 4;

fn pool_descriptor_count(max_sets: u32) -> u32 {
    max_sets.saturating_mul(DESCRIPTORS_PER_SET)
}

fn create_pool(
    device: &Device,
    max_sets: u32,
    flags: vk::DescriptorPoolCreateFlags,
) -> VulkanResult<vk::DescriptorPool> {
    let pool_sizes = [
        vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(pool_descriptor_count(max_sets))
            .build(),
        vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(pool_descriptor_count(max_sets))
            .build(),
    ];

    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .flags(flags)
        .max_sets(max_sets)
        .pool_sizes(&pool_sizes);

    unsafe { device.create_descriptor_pool(&pool_info, None) }.map_err(VulkanError::Api)
}

/// Write every binding of `key` into `set`
pub fn write_descriptor_set(device: &Device, set: vk::DescriptorSet, key: &DescriptorSetKey) {
    // Info arrays are fully built before any write points into them
    let mut buffer_infos = Vec::new();
    let mut image_infos = Vec::new();
    for info in key.bindings().values() {
        match *info {
            ResourceInfo::Buffer { buffer, offset, range } => {
                buffer_infos.push(vk::DescriptorBufferInfo { buffer, offset, range });
            }
            ResourceInfo::Image { view, sampler, layout } => image_infos.push(vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout: layout,
            }),
        }
    }

    let (mut next_buffer, mut next_image) = (0, 0);
    let writes: Vec<vk::WriteDescriptorSet> = key
        .bindings()
        .iter()
        .map(|(&binding, info)| {
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(binding)
                .descriptor_type(info.descriptor_type());
            match info {
                ResourceInfo::Buffer { .. } => {
                    next_buffer += 1;
                    write.buffer_info(&buffer_infos[next_buffer - 1..next_buffer]).build()
                }
                ResourceInfo::Image { .. } => {
                    next_image += 1;
                    write.image_info(&image_infos[next_image - 1..next_image]).build()
                }
            }
        })
        .collect();

    unsafe { device.update_descriptor_sets(&writes, &[]) };
}

/// Growable chain of descriptor pools reset once per frame slot reuse
pub struct FrameDescriptorPool {
    device: Device,
    pools: Vec<vk::DescriptorPool>,
    active: usize,
    sets_per_pool: u32,
}

impl FrameDescriptorPool {
    /// Create with one pool of `sets_per_pool` sets
    pub fn new(device: Device, sets_per_pool: u32) -> VulkanResult<Self> {
        let pool = create_pool(&device, sets_per_pool, vk::DescriptorPoolCreateFlags::empty())?;
        Ok(Self {
            device,
            pools: vec![pool],
            active: 0,
            sets_per_pool,
        })
    }

    fn try_allocate(&self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pools[self.active])
            .set_layouts(&layouts);
        unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.map(|sets| sets[0])
    }
}

impl DescriptorAllocator for FrameDescriptorPool {
    fn allocate(&mut self, layout: vk::DescriptorSetLayout, key: &DescriptorSetKey) -> VulkanResult<vk::DescriptorSet> {
        let set = match self.try_allocate(layout) {
            Ok(set) => set,
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                self.active += 1;
                if self.active == self.pools.len() {
                    log::debug!("[DESCRIPTOR] Frame pool exhausted; adding pool #{}", self.active);
                    let pool = create_pool(&self.device, self.sets_per_pool, vk::DescriptorPoolCreateFlags::empty())?;
                    self.pools.push(pool);
                }
                self.try_allocate(layout).map_err(VulkanError::Api)?
            }
            Err(e) => return Err(VulkanError::Api(e)),
        };

        write_descriptor_set(&self.device, set, key);
        Ok(set)
    }

    fn reset(&mut self) -> VulkanResult<()> {
        for &pool in &self.pools[..=self.active] {
            unsafe { self.device.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty()) }
                .map_err(VulkanError::Api)?;
        }
        self.active = 0;
        Ok(())
    }
}

impl Drop for FrameDescriptorPool {
    fn drop(&mut self) {
        unsafe {
            for &pool in &self.pools {
                self.device.destroy_descriptor_pool(pool, None);
            }
        }
    }
}

/// Long-lived pool whose sets are freed individually
pub struct DescriptorPool {
    pool: vk::DescriptorPool,
    device: Device,
}

impl DescriptorPool {
    /// Create a pool for up to `max_sets` sets
    pub fn new(device: Device, max_sets: u32) -> VulkanResult<Self> {
        let pool = create_pool(&device, max_sets, vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)?;
        Ok(Self { pool, device })
    }

    /// Allocate one set with `layout`
    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }.map_err(VulkanError::Api)?;
        Ok(sets[0])
    }

    /// Return `set` to the pool
    pub fn free(&self, set: vk::DescriptorSet) {
        if let Err(e) = unsafe { self.device.free_descriptor_sets(self.pool, &[set]) } {
            log::warn!("[DESCRIPTOR] Failed to free descriptor set: {:?}", e);
        }
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn buffer(raw: u64) -> ResourceInfo {
        ResourceInfo::Buffer {
            buffer: vk::Buffer::from_raw(raw),
            offset: 0,
            range: 256,
        }
    }

    fn image(raw: u64) -> ResourceInfo {
        ResourceInfo::Image {
            view: vk::ImageView::from_raw(raw),
            sampler: vk::Sampler::from_raw(raw + 1),
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    #[test]
    fn test_pool_descriptor_count_saturates() {
        assert_eq!(pool_descriptor_count(256), 1024);
        assert_eq!(pool_descriptor_count(u32::MAX / 2), u32::MAX);
    }

    fn std_hash(key: &DescriptorSetKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Bind order does not affect identity
    #[test]
    fn test_key_order_independent() {
        let mut a = DescriptorSetKey::new(0);
        a.bind(0, buffer(10));
        a.bind(1, image(20));

        let mut b = DescriptorSetKey::new(0);
        b.bind(1, image(20));
        b.bind(0, buffer(10));

        assert_eq!(a, b);
        assert_eq!(a.identity_hash(), b.identity_hash());
        assert_eq!(std_hash(&a), std_hash(&b));
    }

    #[test]
    fn test_key_changes_with_handle_or_binding() {
        let mut base = DescriptorSetKey::new(0);
        base.bind(0, buffer(10));
        base.bind(1, image(20));

        let mut other_handle = DescriptorSetKey::new(0);
        other_handle.bind(0, buffer(11));
        other_handle.bind(1, image(20));

        let mut other_binding = DescriptorSetKey::new(0);
        other_binding.bind(2, buffer(10));
        other_binding.bind(1, image(20));

        let mut swapped = DescriptorSetKey::new(0);
        swapped.bind(1, buffer(10));
        swapped.bind(0, image(20));

        for key in [&other_handle, &other_binding, &swapped] {
            assert_ne!(&base, key);
            assert_ne!(base.identity_hash(), key.identity_hash());
        }
    }

    /// Rebinding a slot removes the old resource's contribution
    #[test]
    fn test_rebind_replaces_contribution() {
        let mut rebound = DescriptorSetKey::new(1);
        rebound.bind(0, buffer(5));
        rebound.bind(0, buffer(6));

        let mut direct = DescriptorSetKey::new(1);
        direct.bind(0, buffer(6));

        assert_eq!(rebound, direct);
        assert_eq!(rebound.identity_hash(), direct.identity_hash());
        assert_eq!(rebound.bindings().len(), 1);
    }

    #[test]
    fn test_set_index_is_part_of_identity() {
        let mut a = DescriptorSetKey::new(0);
        a.bind(0, buffer(1));
        let mut b = DescriptorSetKey::new(1);
        b.bind(0, buffer(1));
        assert_ne!(a, b);
        assert_ne!(a.identity_hash(), b.identity_hash());
    }

    /// Equal hashes alone do not make keys equal
    #[test]
    fn test_equality_checks_bindings() {
        let mut a = DescriptorSetKey::new(0);
        a.bind(0, buffer(1));
        let mut forged = DescriptorSetKey::new(0);
        forged.bind(0, buffer(2));
        forged.hash = a.hash;
        assert_ne!(a, forged);
    }

    #[derive(Default)]
    struct CountingAllocator {
        next: u64,
        allocations: usize,
        resets: usize,
    }

    impl DescriptorAllocator for CountingAllocator {
        fn allocate(&mut self, _layout: vk::DescriptorSetLayout, _key: &DescriptorSetKey) -> VulkanResult<vk::DescriptorSet> {
            self.next += 1;
            self.allocations += 1;
            Ok(vk::DescriptorSet::from_raw(self.next))
        }

        fn reset(&mut self) -> VulkanResult<()> {
            self.resets += 1;
            Ok(())
        }
    }

    #[test]
    fn test_cache_hit_and_miss() {
        let mut cache = DescriptorSetCache::new(CountingAllocator::default());
        let layout = vk::DescriptorSetLayout::from_raw(1);

        let mut key = DescriptorSetKey::new(0);
        key.bind(0, buffer(10));
        let first = cache.get_descriptor_set(layout, &key).unwrap();
        let again = cache.get_descriptor_set(layout, &key).unwrap();
        assert_eq!(first, again);
        assert_eq!(cache.allocator().allocations, 1);

        let mut other = DescriptorSetKey::new(0);
        other.bind(0, buffer(11));
        let second = cache.get_descriptor_set(layout, &other).unwrap();
        assert_ne!(first, second);

        // Same key under another layout is a separate entry
        let third = cache.get_descriptor_set(vk::DescriptorSetLayout::from_raw(2), &key).unwrap();
        assert_ne!(first, third);
        assert_eq!(cache.len(), 3);
    }

    /// Hash-colliding keys still get their own sets
    #[test]
    fn test_cache_collision_falls_back_to_equality() {
        let mut cache = DescriptorSetCache::new(CountingAllocator::default());
        let layout = vk::DescriptorSetLayout::from_raw(1);

        let mut a = DescriptorSetKey::new(0);
        a.bind(0, buffer(1));
        let mut forged = DescriptorSetKey::new(0);
        forged.bind(0, buffer(2));
        forged.hash = a.hash;

        let set_a = cache.get_descriptor_set(layout, &a).unwrap();
        let set_forged = cache.get_descriptor_set(layout, &forged).unwrap();
        assert_ne!(set_a, set_forged);
        assert_eq!(cache.allocator().allocations, 2);
    }

    #[test]
    fn test_cache_reset() {
        let mut cache = DescriptorSetCache::new(CountingAllocator::default());
        let layout = vk::DescriptorSetLayout::from_raw(1);
        let mut key = DescriptorSetKey::new(0);
        key.bind(0, image(3));

        let before = cache.get_descriptor_set(layout, &key).unwrap();
        cache.reset().unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.allocator().resets, 1);

        let after = cache.get_descriptor_set(layout, &key).unwrap();
        assert_ne!(before, after);
        assert_eq!(cache.allocator().allocations, 2);
    }
}
