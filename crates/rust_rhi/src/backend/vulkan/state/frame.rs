//! Per-frame context
//!
//! One slot of the frames-in-flight ring: a command buffer, the slot's sync
//! objects and its descriptor set cache. A slot is reclaimed at the start of
//! every frame that uses it: first its fence is waited on, then its cached
//! descriptor sets are dropped. Nothing may allocate descriptor sets for the
//! slot between those two steps and the reset.
//!
//! The in-flight fence is only reset inside [`Frame::submit`], right before
//! the queue submission that will signal it. If that submission fails the
//! fence stays unsignaled with nothing pending, so the slot stops waiting on
//! it until the next successful submission.

use ash::vk;

use crate::backend::vulkan::initialization::VulkanResult;
use crate::backend::vulkan::resources::descriptor::{DescriptorAllocator, DescriptorSetCache, DescriptorSetKey};

use super::sync::FrameSyncObjects;

/// One slot of the frame ring
pub struct Frame<S, A> {
    command_buffer: vk::CommandBuffer,
    sync: S,
    descriptors: DescriptorSetCache<A>,
    // False while the fence is reset with no submission that will signal it
    fence_pending: bool,
}

impl<S: FrameSyncObjects, A: DescriptorAllocator> Frame<S, A> {
    /// Assemble a frame slot
    pub fn new(command_buffer: vk::CommandBuffer, sync: S, allocator: A) -> Self {
        Self {
            command_buffer,
            sync,
            descriptors: DescriptorSetCache::new(allocator),
            fence_pending: true,
        }
    }

    /// Wait for the slot's previous GPU work, then recycle its descriptor sets
    ///
    /// This is the CPU's backpressure point: it blocks until the frame that
    /// last used this slot has finished on the GPU.
    pub fn reclaim(&mut self) -> VulkanResult<()> {
        self.wait_in_flight()?;
        self.descriptors.reset()
    }

    /// Block until the slot's last submission has finished
    ///
    /// Returns at once when the last submission attempt failed.
    pub fn wait_in_flight(&self) -> VulkanResult<()> {
        if self.fence_pending {
            self.sync.wait_in_flight()?;
        }
        Ok(())
    }

    /// Reset the in-flight fence and hand it to `submit`
    pub fn submit<F>(&mut self, submit: F) -> VulkanResult<()>
    where
        F: FnOnce(vk::Fence) -> VulkanResult<()>,
    {
        self.fence_pending = false;
        self.sync.reset_in_flight()?;
        submit(self.sync.in_flight_fence())?;
        self.fence_pending = true;
        Ok(())
    }

    /// Cached or freshly written descriptor set for `key`
    pub fn descriptor_set(
        &mut self,
        layout: vk::DescriptorSetLayout,
        key: &DescriptorSetKey,
    ) -> VulkanResult<vk::DescriptorSet> {
        self.descriptors.get_descriptor_set(layout, key)
    }

    /// The slot's command buffer
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// The slot's sync objects
    pub fn sync(&self) -> &S {
        &self.sync
    }

    /// Swap in new sync objects, returning the old ones
    ///
    /// Only valid while the device is idle.
    pub fn replace_sync(&mut self, sync: S) -> S {
        self.fence_pending = true;
        std::mem::replace(&mut self.sync, sync)
    }

    /// Number of descriptor sets cached this cycle
    pub fn cached_descriptor_sets(&self) -> usize {
        self.descriptors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::vulkan::initialization::VulkanError;
    use ash::vk::Handle;
    use std::cell::Cell;
    use std::sync::{Arc, Condvar, Mutex};
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        FenceWaitReturned,
        CacheReset,
        Allocated,
    }

    type EventLog = Arc<Mutex<Vec<Event>>>;

    /// Fence that blocks waiters until `signal` is called from another thread
    struct BlockingFence {
        signaled: Arc<(Mutex<bool>, Condvar)>,
        log: EventLog,
    }

    impl FrameSyncObjects for BlockingFence {
        fn wait_in_flight(&self) -> VulkanResult<()> {
            let (lock, cvar) = &*self.signaled;
            let mut signaled = lock.lock().unwrap();
            while !*signaled {
                signaled = cvar.wait(signaled).unwrap();
            }
            self.log.lock().unwrap().push(Event::FenceWaitReturned);
            Ok(())
        }

        fn reset_in_flight(&self) -> VulkanResult<()> {
            *self.signaled.0.lock().unwrap() = false;
            Ok(())
        }

        fn in_flight_fence(&self) -> vk::Fence {
            vk::Fence::null()
        }

        fn image_available(&self) -> vk::Semaphore {
            vk::Semaphore::null()
        }
    }

    struct LoggingAllocator {
        log: EventLog,
        next: u64,
    }

    impl DescriptorAllocator for LoggingAllocator {
        fn allocate(&mut self, _layout: vk::DescriptorSetLayout, _key: &DescriptorSetKey) -> VulkanResult<vk::DescriptorSet> {
            self.log.lock().unwrap().push(Event::Allocated);
            self.next += 1;
            Ok(vk::DescriptorSet::from_raw(self.next))
        }

        fn reset(&mut self) -> VulkanResult<()> {
            self.log.lock().unwrap().push(Event::CacheReset);
            Ok(())
        }
    }

    fn frame(signaled: bool) -> (Frame<BlockingFence, LoggingAllocator>, Arc<(Mutex<bool>, Condvar)>, EventLog) {
        let log: EventLog = Arc::default();
        let fence = Arc::new((Mutex::new(signaled), Condvar::new()));
        let frame = Frame::new(
            vk::CommandBuffer::null(),
            BlockingFence {
                signaled: Arc::clone(&fence),
                log: Arc::clone(&log),
            },
            LoggingAllocator {
                log: Arc::clone(&log),
                next: 0,
            },
        );
        (frame, fence, log)
    }

    /// `reclaim` blocks until the fence signals, then resets before any allocation
    #[test]
    fn test_reclaim_waits_for_fence_then_resets() {
        let (mut frame, fence, log) = frame(false);

        let signaller = {
            let fence = Arc::clone(&fence);
            let log = Arc::clone(&log);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                // Nothing may have happened while the fence was unsignaled
                assert!(log.lock().unwrap().is_empty());
                let (lock, cvar) = &*fence;
                *lock.lock().unwrap() = true;
                cvar.notify_all();
            })
        };

        frame.reclaim().unwrap();
        let mut key = DescriptorSetKey::new(0);
        key.bind(
            0,
            crate::backend::vulkan::resources::descriptor::ResourceInfo::Buffer {
                buffer: vk::Buffer::from_raw(1),
                offset: 0,
                range: 16,
            },
        );
        frame.descriptor_set(vk::DescriptorSetLayout::from_raw(1), &key).unwrap();
        signaller.join().unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![Event::FenceWaitReturned, Event::CacheReset, Event::Allocated]
        );
    }

    /// Sets cached in one cycle are not served after the slot is reclaimed
    #[test]
    fn test_reclaim_drops_cached_sets() {
        let (mut frame, _fence, log) = frame(true);
        let layout = vk::DescriptorSetLayout::from_raw(9);
        let key = DescriptorSetKey::new(0);

        let first = frame.descriptor_set(layout, &key).unwrap();
        assert_eq!(frame.descriptor_set(layout, &key).unwrap(), first);
        assert_eq!(frame.cached_descriptor_sets(), 1);

        frame.reclaim().unwrap();
        assert_eq!(frame.cached_descriptor_sets(), 0);
        let second = frame.descriptor_set(layout, &key).unwrap();
        assert_ne!(first, second);

        let allocations = log.lock().unwrap().iter().filter(|e| **e == Event::Allocated).count();
        assert_eq!(allocations, 2);
    }

    /// Fence that reports a wait on it while unsignaled instead of blocking
    struct CheckedFence {
        signaled: Cell<bool>,
    }

    impl FrameSyncObjects for CheckedFence {
        fn wait_in_flight(&self) -> VulkanResult<()> {
            if self.signaled.get() {
                Ok(())
            } else {
                Err(VulkanError::InvalidOperation {
                    reason: "wait would never return".to_string(),
                })
            }
        }

        fn reset_in_flight(&self) -> VulkanResult<()> {
            self.signaled.set(false);
            Ok(())
        }

        fn in_flight_fence(&self) -> vk::Fence {
            vk::Fence::from_raw(5)
        }

        fn image_available(&self) -> vk::Semaphore {
            vk::Semaphore::null()
        }
    }

    fn checked_frame() -> Frame<CheckedFence, LoggingAllocator> {
        Frame::new(
            vk::CommandBuffer::null(),
            CheckedFence {
                signaled: Cell::new(true),
            },
            LoggingAllocator {
                log: EventLog::default(),
                next: 0,
            },
        )
    }

    /// A failed submission must not leave the slot waiting on its fence forever
    #[test]
    fn test_failed_submit_does_not_block_reclaim() {
        let mut frame = checked_frame();
        frame.reclaim().unwrap();

        let result = frame.submit(|fence| {
            assert_eq!(fence, vk::Fence::from_raw(5));
            Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))
        });
        assert!(result.is_err());
        assert!(!frame.sync().signaled.get());

        frame.reclaim().unwrap();
        frame.wait_in_flight().unwrap();
    }

    #[test]
    fn test_successful_submit_waits_on_fence() {
        let mut frame = checked_frame();
        frame.submit(|_| Ok(())).unwrap();
        // Fence is reset and owed a signal by the GPU
        assert!(frame.reclaim().is_err());

        frame.sync().signaled.set(true);
        frame.reclaim().unwrap();
    }

    #[test]
    fn test_replaced_sync_is_waited_on() {
        let mut frame = checked_frame();
        let _ = frame.submit(|_| Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)));
        let old = frame.replace_sync(CheckedFence {
            signaled: Cell::new(false),
        });
        assert!(!old.signaled.get());
        assert!(frame.wait_in_flight().is_err());
    }
}
