//! # Draw-call routing
//!
//! [`DrawState`] holds what the client has bound inside the open frame: the
//! current pipeline and the pending descriptor bindings. It decides which
//! calls turn into commands and which are contract violations to log and
//! drop. Commands go out through a [`CommandRecorder`], so the routing runs
//! the same against a real command buffer or a recording stand-in.
//!
//! Rules:
//! - resource binds and push constants need a bound pipeline
//! - push constants must be non-empty and fit the pipeline's range
//! - `draw_indexed` resolves every pending set, then clears them
//! - `reset` (end of frame) forgets the pipeline and all pending bindings

use ash::vk;

use crate::backend::vulkan::initialization::VulkanResult;
use crate::backend::vulkan::resources::descriptor::{DescriptorSetKey, ResourceInfo};
use crate::rhi::frame_state::FrameLifecycle;
use crate::rhi::shader_layout::ShaderLayout;

use super::bindings::PendingBindings;

/// Sink for the commands of one frame
pub trait CommandRecorder {
    /// Bind a graphics pipeline
    fn bind_pipeline(&mut self, pipeline: vk::Pipeline);

    /// Bind vertex buffer 0
    fn bind_vertex_buffer(&mut self, buffer: vk::Buffer);

    /// Bind a 32-bit index buffer
    fn bind_index_buffer(&mut self, buffer: vk::Buffer);

    /// Bind one descriptor set at `set`
    fn bind_descriptor_set(&mut self, layout: vk::PipelineLayout, set: u32, descriptor_set: vk::DescriptorSet);

    /// Push constants to the vertex and fragment stages at offset 0
    fn push_constants(&mut self, layout: vk::PipelineLayout, data: &[u8]);

    /// Indexed draw of one instance
    fn draw_indexed(&mut self, index_count: u32);
}

/// What the routing needs to know about a pipeline
pub trait BoundPipeline {
    /// Pipeline handle
    fn handle(&self) -> vk::Pipeline;

    /// Pipeline layout handle
    fn layout(&self) -> vk::PipelineLayout;

    /// Descriptor set layout for set index `set`
    fn set_layout(&self, set: u32) -> Option<vk::DescriptorSetLayout>;

    /// Reflected bindings used to resolve bind slots
    fn shader_layout(&self) -> &ShaderLayout;

    /// Size of the push constant range; zero when there is none
    fn push_constant_size(&self) -> u32;
}

/// Run `open` only while a frame is recording; log `call` otherwise
///
/// After a `begin_frame` that skipped the frame the lifecycle is idle, so
/// every bind and draw of that iteration ends up here as `None`.
pub fn while_recording<R>(lifecycle: &FrameLifecycle, call: &str, open: impl FnOnce() -> R) -> Option<R> {
    if !lifecycle.is_recording() {
        log::warn!("[FRAME] {} outside begin_frame/end_frame; ignored", call);
        return None;
    }
    Some(open())
}

/// Bound pipeline plus pending descriptor bindings of the open frame
#[derive(Debug)]
pub struct DrawState<H> {
    current: Option<H>,
    pending: PendingBindings,
}

impl<H> Default for DrawState<H> {
    fn default() -> Self {
        Self {
            current: None,
            pending: PendingBindings::new(),
        }
    }
}

impl<H: Copy + PartialEq> DrawState<H> {
    /// Nothing bound
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle of the bound pipeline
    pub fn current(&self) -> Option<H> {
        self.current
    }

    /// Bindings waiting for the next draw
    pub fn pending(&self) -> &PendingBindings {
        &self.pending
    }

    /// Forget the pipeline and everything pending
    pub fn reset(&mut self) {
        self.current = None;
        self.pending.clear();
    }

    /// Drop `handle` if it is the bound pipeline
    pub fn forget(&mut self, handle: H) {
        if self.current == Some(handle) {
            self.reset();
        }
    }

    /// Record a pipeline bind and make `handle` current
    ///
    /// Switching to a different pipeline drops bindings resolved against
    /// the previous one's layout.
    pub fn bind_pipeline<R, P>(&mut self, recorder: &mut R, handle: H, pipeline: &P)
    where
        R: CommandRecorder + ?Sized,
        P: BoundPipeline,
    {
        recorder.bind_pipeline(pipeline.handle());
        if self.current != Some(handle) {
            self.pending.clear();
        }
        self.current = Some(handle);
    }

    /// Queue `info` for `slot` of the bound pipeline
    pub fn bind_resource<P: BoundPipeline>(&mut self, pipeline: Option<&P>, call: &str, slot: u32, info: ResourceInfo) -> bool {
        let Some(pipeline) = pipeline else {
            log::warn!("[FRAME] {} with no pipeline bound; ignored", call);
            return false;
        };
        self.pending.bind(pipeline.shader_layout(), slot, info)
    }

    /// Push `data` through the bound pipeline's layout
    pub fn push_constants<R, P>(&self, recorder: &mut R, pipeline: Option<&P>, data: &[u8]) -> bool
    where
        R: CommandRecorder + ?Sized,
        P: BoundPipeline,
    {
        let Some(pipeline) = pipeline else {
            log::warn!("[FRAME] push_constants with no pipeline bound; ignored");
            return false;
        };
        if data.is_empty() {
            log::error!("[FRAME] push_constants called with no data; ignored");
            return false;
        }
        if data.len() > pipeline.push_constant_size() as usize {
            log::error!(
                "[FRAME] {} bytes of push constants exceed the pipeline's {}-byte range; ignored",
                data.len(),
                pipeline.push_constant_size()
            );
            return false;
        }

        recorder.push_constants(pipeline.layout(), data);
        true
    }

    /// Resolve pending sets through `resolve`, bind them, then draw
    ///
    /// Pending bindings are consumed whether or not the draw is recorded.
    pub fn draw_indexed<R, P, F>(&mut self, recorder: &mut R, pipeline: Option<&P>, index_count: u32, mut resolve: F) -> bool
    where
        R: CommandRecorder + ?Sized,
        P: BoundPipeline,
        F: FnMut(vk::DescriptorSetLayout, &DescriptorSetKey) -> VulkanResult<vk::DescriptorSet>,
    {
        let Some(pipeline) = pipeline else {
            log::warn!("[FRAME] draw_indexed with no pipeline bound; ignored");
            self.pending.clear();
            return false;
        };

        for key in self.pending.drain() {
            let Some(set_layout) = pipeline.set_layout(key.set()) else {
                log::error!("[DESCRIPTOR] Pipeline has no set {}; bindings dropped", key.set());
                continue;
            };
            match resolve(set_layout, &key) {
                Ok(descriptor_set) => recorder.bind_descriptor_set(pipeline.layout(), key.set(), descriptor_set),
                Err(e) => {
                    log::error!("[DESCRIPTOR] Failed to resolve set {}: {}; draw skipped", key.set(), e);
                    return false;
                }
            }
        }

        recorder.draw_indexed(index_count);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::vulkan::initialization::VulkanError;
    use crate::rhi::shader_layout::{ShaderDataType, UniformBlockLayout};
    use ash::vk::Handle;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Command {
        Pipeline(u64),
        VertexBuffer(u64),
        IndexBuffer(u64),
        DescriptorSet(u32, u64),
        PushConstants(usize),
        Draw(u32),
    }

    #[derive(Default)]
    struct CommandLog(Vec<Command>);

    impl CommandRecorder for CommandLog {
        fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
            self.0.push(Command::Pipeline(pipeline.as_raw()));
        }

        fn bind_vertex_buffer(&mut self, buffer: vk::Buffer) {
            self.0.push(Command::VertexBuffer(buffer.as_raw()));
        }

        fn bind_index_buffer(&mut self, buffer: vk::Buffer) {
            self.0.push(Command::IndexBuffer(buffer.as_raw()));
        }

        fn bind_descriptor_set(&mut self, _layout: vk::PipelineLayout, set: u32, descriptor_set: vk::DescriptorSet) {
            self.0.push(Command::DescriptorSet(set, descriptor_set.as_raw()));
        }

        fn push_constants(&mut self, _layout: vk::PipelineLayout, data: &[u8]) {
            self.0.push(Command::PushConstants(data.len()));
        }

        fn draw_indexed(&mut self, index_count: u32) {
            self.0.push(Command::Draw(index_count));
        }
    }

    struct FakePipeline {
        raw: u64,
        shader_layout: ShaderLayout,
        set_count: u32,
    }

    impl FakePipeline {
        fn new(raw: u64) -> Self {
            let camera = UniformBlockLayout::new("Camera", [("view_proj", ShaderDataType::Mat4)]);
            Self {
                raw,
                shader_layout: ShaderLayout::builder()
                    .uniform_buffer(0, 0, 0, camera)
                    .sampler(1, 1, 0)
                    .build(),
                set_count: 2,
            }
        }
    }

    impl BoundPipeline for FakePipeline {
        fn handle(&self) -> vk::Pipeline {
            vk::Pipeline::from_raw(self.raw)
        }

        fn layout(&self) -> vk::PipelineLayout {
            vk::PipelineLayout::from_raw(self.raw)
        }

        fn set_layout(&self, set: u32) -> Option<vk::DescriptorSetLayout> {
            (set < self.set_count).then(|| vk::DescriptorSetLayout::from_raw(100 + u64::from(set)))
        }

        fn shader_layout(&self) -> &ShaderLayout {
            &self.shader_layout
        }

        fn push_constant_size(&self) -> u32 {
            8
        }
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

    /// Resolver handing out `1000 + set` and counting calls
    fn resolver(calls: &mut u32) -> impl FnMut(vk::DescriptorSetLayout, &DescriptorSetKey) -> VulkanResult<vk::DescriptorSet> + '_ {
        move |_, key| {
            *calls += 1;
            Ok(vk::DescriptorSet::from_raw(1000 + u64::from(key.set())))
        }
    }

    #[test]
    fn test_draw_resolves_pending_sets_then_clears() {
        let pipeline = FakePipeline::new(7);
        let mut log = CommandLog::default();
        let mut state = DrawState::new();
        let mut calls = 0;

        state.bind_pipeline(&mut log, 1u32, &pipeline);
        assert!(state.bind_resource(Some(&pipeline), "bind_texture", 1, texture(3)));
        assert!(state.bind_resource(Some(&pipeline), "bind_uniform_buffer", 0, ubo(2)));
        assert!(state.draw_indexed(&mut log, Some(&pipeline), 6, resolver(&mut calls)));
        assert!(state.pending().is_empty());

        // Second draw has nothing pending, so no descriptor sets are bound
        assert!(state.draw_indexed(&mut log, Some(&pipeline), 3, resolver(&mut calls)));

        assert_eq!(calls, 2);
        assert_eq!(
            log.0,
            vec![
                Command::Pipeline(7),
                Command::DescriptorSet(0, 1000),
                Command::DescriptorSet(1, 1001),
                Command::Draw(6),
                Command::Draw(3),
            ]
        );
    }

    #[test]
    fn test_draw_without_pipeline_is_noop_and_clears() {
        let pipeline = FakePipeline::new(7);
        let mut log = CommandLog::default();
        let mut state: DrawState<u32> = DrawState::new();
        let mut calls = 0;

        // Bindings queued against a pipeline that is no longer current
        state.bind_resource(Some(&pipeline), "bind_uniform_buffer", 0, ubo(2));
        assert!(!state.pending().is_empty());

        assert!(!state.draw_indexed(&mut log, None::<&FakePipeline>, 6, resolver(&mut calls)));
        assert!(state.pending().is_empty());
        assert_eq!(calls, 0);
        assert!(log.0.is_empty());
    }

    #[test]
    fn test_bind_without_pipeline_is_noop() {
        let mut state: DrawState<u32> = DrawState::new();
        assert!(!state.bind_resource(None::<&FakePipeline>, "bind_texture", 1, texture(3)));
        assert!(state.pending().is_empty());
    }

    #[test]
    fn test_push_constants_contract() {
        let pipeline = FakePipeline::new(7);
        let mut log = CommandLog::default();
        let state: DrawState<u32> = DrawState::new();

        assert!(!state.push_constants(&mut log, None::<&FakePipeline>, &[0; 8]));
        assert!(!state.push_constants(&mut log, Some(&pipeline), &[]));
        assert!(!state.push_constants(&mut log, Some(&pipeline), &[0; 12]));
        assert!(log.0.is_empty());

        assert!(state.push_constants(&mut log, Some(&pipeline), &[0; 8]));
        assert_eq!(log.0, vec![Command::PushConstants(8)]);
    }

    /// End of frame forgets the pipeline, so the next frame must bind again
    #[test]
    fn test_reset_forgets_pipeline_and_bindings() {
        let pipeline = FakePipeline::new(7);
        let mut log = CommandLog::default();
        let mut state = DrawState::new();

        state.bind_pipeline(&mut log, 1u32, &pipeline);
        state.bind_resource(Some(&pipeline), "bind_uniform_buffer", 0, ubo(2));
        state.reset();

        assert_eq!(state.current(), None);
        assert!(state.pending().is_empty());
    }

    #[test]
    fn test_switching_pipeline_drops_pending() {
        let first = FakePipeline::new(7);
        let second = FakePipeline::new(8);
        let mut log = CommandLog::default();
        let mut state = DrawState::new();

        state.bind_pipeline(&mut log, 1u32, &first);
        state.bind_resource(Some(&first), "bind_uniform_buffer", 0, ubo(2));
        // Rebinding the same pipeline keeps what is queued
        state.bind_pipeline(&mut log, 1u32, &first);
        assert!(!state.pending().is_empty());

        state.bind_pipeline(&mut log, 2u32, &second);
        assert!(state.pending().is_empty());
        assert_eq!(state.current(), Some(2));

        state.forget(1);
        assert_eq!(state.current(), Some(2));
        state.forget(2);
        assert_eq!(state.current(), None);
    }

    #[test]
    fn test_resolve_failure_skips_draw() {
        let pipeline = FakePipeline::new(7);
        let mut log = CommandLog::default();
        let mut state = DrawState::new();

        state.bind_pipeline(&mut log, 1u32, &pipeline);
        state.bind_resource(Some(&pipeline), "bind_uniform_buffer", 0, ubo(2));
        let drawn = state.draw_indexed(&mut log, Some(&pipeline), 6, |_, _| {
            Err(VulkanError::InvalidOperation {
                reason: "pool exhausted".to_string(),
            })
        });

        assert!(!drawn);
        assert!(state.pending().is_empty());
        assert_eq!(log.0, vec![Command::Pipeline(7)]);
    }

    /// A frame that `begin_frame` skipped records nothing
    #[test]
    fn test_calls_after_skipped_frame_are_ignored() {
        let mut lifecycle = FrameLifecycle::new(2);
        let mut opened = 0;

        assert!(while_recording(&lifecycle, "draw_indexed", || opened += 1).is_none());

        // Acquire reported out of date after the frame was started
        lifecycle.begin();
        lifecycle.abandon();
        assert!(while_recording(&lifecycle, "bind_pipeline_state", || opened += 1).is_none());
        assert_eq!(opened, 0);

        lifecycle.begin();
        assert!(while_recording(&lifecycle, "bind_pipeline_state", || opened += 1).is_some());
        lifecycle.end();
        assert!(while_recording(&lifecycle, "draw_indexed", || opened += 1).is_none());
        assert_eq!(opened, 1);
    }
}
