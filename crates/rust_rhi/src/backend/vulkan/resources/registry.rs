//! Resource arenas keyed by generational handles
//!
//! Removing a resource always waits for the GPU first: a destroyed buffer or
//! texture may still be referenced by a frame in flight.

use ash::Device;
use slotmap::{Key, SlotMap};

/// Blocks until the GPU no longer uses any resource
pub trait IdleWait {
    /// Wait for all submitted work to finish
    fn wait_idle(&self);
}

impl IdleWait for Device {
    fn wait_idle(&self) {
        if let Err(e) = unsafe { self.device_wait_idle() } {
            log::error!("[DEVICE] device_wait_idle failed before destroy: {:?}", e);
        }
    }
}

/// Arena of one resource kind
pub struct ResourceRegistry<K: Key, V> {
    kind: &'static str,
    resources: SlotMap<K, V>,
}

impl<K: Key, V> ResourceRegistry<K, V> {
    /// Empty registry; `kind` names the resource in log messages
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            resources: SlotMap::with_key(),
        }
    }

    /// Store a resource and return its handle
    pub fn insert(&mut self, resource: V) -> K {
        self.resources.insert(resource)
    }

    /// Resolve a handle, logging stale ones
    pub fn get(&self, handle: K) -> Option<&V> {
        let resource = self.resources.get(handle);
        if resource.is_none() {
            log::error!("[DEVICE] Unknown {} handle {:?}", self.kind, handle);
        }
        resource
    }

    /// Resolve a handle mutably, logging stale ones
    pub fn get_mut(&mut self, handle: K) -> Option<&mut V> {
        let kind = self.kind;
        let resource = self.resources.get_mut(handle);
        if resource.is_none() {
            log::error!("[DEVICE] Unknown {} handle {:?}", kind, handle);
        }
        resource
    }

    /// Whether `handle` resolves
    pub fn contains(&self, handle: K) -> bool {
        self.resources.contains_key(handle)
    }

    /// Wait for the GPU, then drop the resource behind `handle`
    ///
    /// Returns false for stale handles; nothing is waited on in that case.
    pub fn destroy(&mut self, handle: K, gpu: &impl IdleWait) -> bool {
        if !self.resources.contains_key(handle) {
            log::warn!("[DEVICE] Ignoring destroy of unknown {} handle {:?}", self.kind, handle);
            return false;
        }
        gpu.wait_idle();
        drop(self.resources.remove(handle));
        true
    }

    /// Wait for the GPU, then drop every resource
    pub fn clear(&mut self, gpu: &impl IdleWait) {
        if self.resources.is_empty() {
            return;
        }
        gpu.wait_idle();
        log::debug!("[DEVICE] Releasing {} {} resource(s)", self.resources.len(), self.kind);
        self.resources.clear();
    }

    /// Live resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Iterate over live resources
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.resources.values()
    }
}
