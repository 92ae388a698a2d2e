//! Backend-agnostic graphics device interface

use super::error::RhiResult;
use super::handles::{
    BufferDesc, BufferHandle, PipelineDesc, PipelineHandle, ShaderDesc, ShaderHandle, TextureDesc, TextureHandle,
};

/// A graphics device
///
/// Resource creation returns errors. Everything in the per-frame path is
/// infallible from the caller's point of view except for device loss:
/// calls made out of order (drawing with no pipeline bound, binding an
/// unknown slot, writing past a buffer's end) are logged and ignored.
///
/// The expected per-frame sequence is:
///
/// ```text
/// if begin_frame()? {
///     bind_pipeline_state, bind_vertex_buffer, bind_index_buffer,
///     bind_uniform_buffer, bind_texture, push_constants, draw_indexed ...
///     end_frame()?;
///     present()?;
/// }
/// ```
pub trait GraphicsDevice {
    /// Create a buffer, uploading `desc.data` if present
    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> RhiResult<BufferHandle>;

    /// Create a texture, uploading `desc.data` if present
    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> RhiResult<TextureHandle>;

    /// Create a shader program; stages with identical bytecode share a module
    fn create_shader(&mut self, desc: &ShaderDesc<'_>) -> RhiResult<ShaderHandle>;

    /// Get or create the pipeline for `(desc.shader, desc.vertex_layout)`
    fn create_pipeline_state(&mut self, desc: &PipelineDesc) -> RhiResult<PipelineHandle>;

    /// Write `data` at `offset`
    ///
    /// Dynamic buffers write into the current frame's ring slot. Static
    /// buffers are updated through a staging copy and block until the GPU
    /// has finished it.
    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// Destroy a buffer after the GPU is idle
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Destroy a texture after the GPU is idle
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Destroy a shader after the GPU is idle
    fn destroy_shader(&mut self, shader: ShaderHandle);

    /// Destroy a pipeline state after the GPU is idle
    fn destroy_pipeline_state(&mut self, pipeline: PipelineHandle);

    /// Start a frame
    ///
    /// Blocks until the GPU has released the current ring slot. Returns
    /// `Ok(false)` when no frame was started (swapchain out of date or
    /// window minimized); the caller must skip its draws, `end_frame` and
    /// `present` for this iteration.
    fn begin_frame(&mut self) -> RhiResult<bool>;

    /// Close the frame pass and submit the frame's commands
    fn end_frame(&mut self) -> RhiResult<()>;

    /// Queue the frame's image for presentation and advance the frame ring
    fn present(&mut self) -> RhiResult<()>;

    /// Bind a pipeline for subsequent draws
    fn bind_pipeline_state(&mut self, pipeline: PipelineHandle);

    /// Bind the vertex stream
    fn bind_vertex_buffer(&mut self, buffer: BufferHandle);

    /// Bind the 32-bit index stream
    fn bind_index_buffer(&mut self, buffer: BufferHandle);

    /// Queue a uniform buffer for `slot`; resolved at the next draw
    fn bind_uniform_buffer(&mut self, buffer: BufferHandle, slot: u32);

    /// Queue a texture for `slot`; resolved at the next draw
    fn bind_texture(&mut self, texture: TextureHandle, slot: u32);

    /// Push constants to the vertex and fragment stages at offset 0
    fn push_constants(&mut self, data: &[u8]);

    /// Resolve queued bindings and draw `index_count` indices
    fn draw_indexed(&mut self, index_count: u32);

    /// Mark the swapchain stale; it is rebuilt at the next `begin_frame`
    fn update_swapchain(&mut self);

    /// Record a new drawable size and mark the swapchain stale
    fn resize(&mut self, width: u32, height: u32);

    /// Ring slot of the current frame
    fn frame_index(&self) -> usize;

    /// Frame ring size
    fn frames_in_flight(&self) -> usize;

    /// Wait for the GPU to go idle and drop pending per-frame state
    ///
    /// Must run before the owner releases resources created by this device.
    fn on_destroy(&mut self);
}
