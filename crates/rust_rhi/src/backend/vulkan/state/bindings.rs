//! Pending descriptor bindings
//!
//! `bind_uniform_buffer` and `bind_texture` only record what should be bound.
//! Each slot is resolved through the bound pipeline's [`ShaderLayout`] to a
//! `(set, binding)` pair and folded into that set's [`DescriptorSetKey`]. The
//! keys are drained and turned into real descriptor sets at draw time.

use std::collections::BTreeMap;

use crate::backend::vulkan::resources::descriptor::{DescriptorSetKey, ResourceInfo};
use crate::rhi::shader_layout::{BindingKind, ShaderLayout};

/// Bindings accumulated since the last draw, keyed by set index
#[derive(Debug, Default)]
pub struct PendingBindings {
    sets: BTreeMap<u32, DescriptorSetKey>,
}

impl PendingBindings {
    /// Empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `info` for `slot`
    ///
    /// Unknown slots and resources that do not match the slot's kind are
    /// logged and ignored; returns whether the binding was recorded.
    pub fn bind(&mut self, layout: &ShaderLayout, slot: u32, info: ResourceInfo) -> bool {
        let Some(binding) = layout.resolve(slot) else {
            log::error!("[BINDING] Slot {} is not declared by the bound pipeline's shader layout", slot);
            return false;
        };

        let kind_matches = matches!(
            (&binding.kind, &info),
            (BindingKind::UniformBuffer(_), ResourceInfo::Buffer { .. }) | (BindingKind::Sampler, ResourceInfo::Image { .. })
        );
        if !kind_matches {
            log::error!(
                "[BINDING] Slot {} (set {}, binding {}) expects {}",
                slot,
                binding.set,
                binding.binding,
                match binding.kind {
                    BindingKind::UniformBuffer(_) => "a uniform buffer",
                    BindingKind::Sampler => "a texture",
                }
            );
            return false;
        }

        self.sets
            .entry(binding.set)
            .or_insert_with(|| DescriptorSetKey::new(binding.set))
            .bind(binding.binding, info);
        true
    }

    /// Take every pending key, leaving the accumulator empty
    pub fn drain(&mut self) -> impl Iterator<Item = DescriptorSetKey> {
        std::mem::take(&mut self.sets).into_values()
    }

    /// Forget everything pending
    pub fn clear(&mut self) {
        self.sets.clear();
    }

    /// True when nothing is pending
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Pending key for `set`
    pub fn get(&self, set: u32) -> Option<&DescriptorSetKey> {
        self.sets.get(&set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::shader_layout::{ShaderDataType, UniformBlockLayout};
    use ash::vk::{self, Handle};

    fn layout() -> ShaderLayout {
        let camera = UniformBlockLayout::new("Camera", [("view_proj", ShaderDataType::Mat4)]);
        let material = UniformBlockLayout::new("Material", [("tint", ShaderDataType::Vec4)]);
        ShaderLayout::builder()
            .uniform_buffer(0, 0, 0, camera)
            .uniform_buffer(1, 1, 0, material)
            .sampler(2, 1, 1)
            .build()
    }

    fn ubo(raw: u64) -> ResourceInfo {
        ResourceInfo::Buffer {
            buffer: vk::Buffer::from_raw(raw),
            offset: 0,
            range: 64,
        }
    }

    fn texture(raw: u64) -> ResourceInfo {
        ResourceInfo::Image {
            view: vk::ImageView::from_raw(raw),
            sampler: vk::Sampler::from_raw(raw),
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    #[test]
    fn test_slots_group_by_set() {
        let layout = layout();
        let mut pending = PendingBindings::new();
        assert!(pending.bind(&layout, 0, ubo(1)));
        assert!(pending.bind(&layout, 1, ubo(2)));
        assert!(pending.bind(&layout, 2, texture(3)));

        assert_eq!(pending.get(0).unwrap().bindings().len(), 1);
        let set1 = pending.get(1).unwrap();
        assert_eq!(set1.bindings().len(), 2);
        assert_eq!(set1.bindings()[&1], texture(3));
    }

    #[test]
    fn test_unknown_slot_is_noop() {
        let mut pending = PendingBindings::new();
        assert!(!pending.bind(&layout(), 9, ubo(1)));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_kind_mismatch_is_noop() {
        let layout = layout();
        let mut pending = PendingBindings::new();
        assert!(!pending.bind(&layout, 2, ubo(1)));
        assert!(!pending.bind(&layout, 0, texture(1)));
        assert!(pending.is_empty());
    }

    /// Draining hands out keys in set order and resets the accumulator
    #[test]
    fn test_drain_clears() {
        let layout = layout();
        let mut pending = PendingBindings::new();
        pending.bind(&layout, 2, texture(3));
        pending.bind(&layout, 0, ubo(1));

        let sets: Vec<u32> = pending.drain().map(|key| key.set()).collect();
        assert_eq!(sets, vec![0, 1]);
        assert!(pending.is_empty());
    }

    /// Same resources bound in a different order give the same key
    #[test]
    fn test_bind_order_independent() {
        let layout = layout();
        let mut a = PendingBindings::new();
        a.bind(&layout, 1, ubo(2));
        a.bind(&layout, 2, texture(3));
        let mut b = PendingBindings::new();
        b.bind(&layout, 2, texture(3));
        b.bind(&layout, 1, ubo(2));
        assert_eq!(a.get(1), b.get(1));
    }
}
