//! Frame-scoped state: sync objects, frame slots, swapchain, pending bindings
//! and draw-call routing

pub mod bindings;
pub mod frame;
pub mod recording;
pub mod swapchain;
pub mod sync;

pub use bindings::PendingBindings;
pub use frame::Frame;
pub use recording::{while_recording, BoundPipeline, CommandRecorder, DrawState};
pub use swapchain::{Swapchain, SwapchainSettings, VulkanFrame};
pub use sync::{Fence, FrameSync, FrameSyncObjects, Semaphore};
