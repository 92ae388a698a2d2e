//! # Vulkan Graphics Device
//!
//! [`VulkanDevice`] implements [`GraphicsDevice`] on top of the context,
//! swapchain, frame ring and resource registries.
//!
//! ## Frame flow
//!
//! ```text
//! begin_frame   rebuild if stale -> wait slot fence -> reset slot descriptors
//!               -> acquire -> wait previous image owner
//!               -> begin commands -> Undefined->ColorAttachment -> begin rendering
//! bind_*        record pipeline/vertex/index binds; queue descriptor bindings
//! draw_indexed  resolve queued bindings through the slot's descriptor cache, draw
//! end_frame     end rendering -> ColorAttachment->PresentSrc
//!               -> reset fence -> submit (signals the image's render-finished)
//! present       queue present -> advance ring index
//! ```
//!
//! Bind and draw routing lives in [`DrawState`]; this type only supplies the
//! command buffer and the resources behind the handles.
//!
//! A failure after an image was acquired abandons the frame and marks the
//! swapchain stale, so the next `begin_frame` rebuilds the chain together
//! with every slot's sync objects.
//!
//! Swapchain staleness (resize, out-of-date acquire or present) is only
//! recorded when it is noticed. The rebuild happens at the start of the next
//! `begin_frame`, never in the middle of a frame.
//!
//! ## Teardown
//!
//! Dropping the device waits for the GPU, releases pipelines, textures,
//! buffers and shaders in that order, then the per-frame objects, and the
//! context last.

use std::rc::Rc;

use ash::{vk, Device};

use crate::backend::vulkan::initialization::{SurfaceProvider, VulkanContext, VulkanError, VulkanResult};
use crate::backend::vulkan::rendering::commands::{transition_image_layout, CommandPool, VulkanRecorder};
use crate::backend::vulkan::rendering::pipeline::{PipelineCache, PipelineKey, VulkanPipelineState};
use crate::backend::vulkan::rendering::shader::VulkanShader;
use crate::backend::vulkan::resources::buffer::VulkanBuffer;
use crate::backend::vulkan::resources::descriptor::{
    DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder, FrameDescriptorPool,
};
use crate::backend::vulkan::resources::registry::{IdleWait, ResourceRegistry};
use crate::backend::vulkan::resources::texture::VulkanTexture;
use crate::backend::vulkan::resources::upload::UploadContext;
use crate::backend::vulkan::state::{
    while_recording, CommandRecorder, DrawState, Frame, FrameSync, FrameSyncObjects, Swapchain, SwapchainSettings,
    VulkanFrame,
};
use crate::core::config::RhiConfig;
use crate::rhi::device::GraphicsDevice;
use crate::rhi::error::{RhiError, RhiResult};
use crate::rhi::frame_state::FrameLifecycle;
use crate::rhi::handles::{
    BufferDesc, BufferHandle, BufferType, PipelineDesc, PipelineHandle, ShaderDesc, ShaderHandle, TextureDesc,
    TextureHandle,
};

/// Frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames queued for presentation
    pub presented: u64,
    /// Frames dropped: acquire out of date, minimized window, failed submit or present
    pub skipped: u64,
    /// Swapchain rebuilds performed
    pub swapchain_rebuilds: u64,
}

fn init_failed(e: VulkanError) -> RhiError {
    log::error!("[DEVICE] Initialization failed: {}", e);
    RhiError::InitializationFailed(e.to_string())
}

fn creation_failed(kind: &'static str) -> impl Fn(VulkanError) -> RhiError {
    move |e| {
        log::error!("[DEVICE] Failed to create {}: {}", kind, e);
        RhiError::ResourceCreationFailed(format!("{}: {}", kind, e))
    }
}

/// Vulkan implementation of [`GraphicsDevice`]
///
/// Fields drop in declaration order after [`Drop::drop`] has released every
/// registry, so per-frame objects go before the context.
pub struct VulkanDevice {
    pipelines: ResourceRegistry<PipelineHandle, VulkanPipelineState>,
    textures: ResourceRegistry<TextureHandle, VulkanTexture>,
    buffers: ResourceRegistry<BufferHandle, VulkanBuffer>,
    shaders: ResourceRegistry<ShaderHandle, VulkanShader>,
    pipeline_cache: PipelineCache<PipelineHandle>,
    texture_pool: Rc<DescriptorPool>,
    texture_set_layout: DescriptorSetLayout,
    upload: UploadContext,
    swapchain: Swapchain,
    // Owns the frame ring's command buffers
    _command_pool: CommandPool,
    device: Device,
    context: VulkanContext,

    config: RhiConfig,
    lifecycle: FrameLifecycle,
    image_index: u32,
    draw: DrawState<PipelineHandle>,
    drawable_size: (u32, u32),
    stats: FrameStats,
}

impl VulkanDevice {
    /// Bring up Vulkan for the window behind `surface` and build the frame ring
    ///
    /// Either every native object is created or none survives: a failure at
    /// any step releases what was created before it.
    pub fn new(surface: &dyn SurfaceProvider, config: RhiConfig) -> RhiResult<Self> {
        config.validate().map_err(RhiError::InitializationFailed)?;

        let context =
            VulkanContext::new(surface, &config.application_name, config.validation_enabled()).map_err(init_failed)?;
        let device = context.raw_device();
        log::info!("[DEVICE] Using {}", context.physical_device().name());

        let command_pool = CommandPool::new(device.clone(), context.graphics_queue_family()).map_err(init_failed)?;
        let frames = Self::create_frames(&device, &command_pool, &config).map_err(init_failed)?;

        let drawable_size = surface.drawable_size();
        let settings = SwapchainSettings::new(drawable_size.0, drawable_size.1, config.vsync);
        let swapchain = Swapchain::new(&context, settings, frames).map_err(init_failed)?;

        let upload = UploadContext::new(
            device.clone(),
            context.graphics_queue(),
            context.graphics_queue_family(),
            context.physical_device().memory_properties,
        )
        .map_err(init_failed)?;

        let texture_set_layout = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
            .build(&device)
            .map_err(init_failed)?;
        let texture_pool = Rc::new(DescriptorPool::new(device.clone(), config.max_textures).map_err(init_failed)?);

        log::info!(
            "[DEVICE] Ready: {} frames in flight, vsync {}",
            config.frames_in_flight,
            if config.vsync { "on" } else { "off" }
        );

        Ok(Self {
            pipelines: ResourceRegistry::new("pipeline"),
            textures: ResourceRegistry::new("texture"),
            buffers: ResourceRegistry::new("buffer"),
            shaders: ResourceRegistry::new("shader"),
            pipeline_cache: PipelineCache::new(),
            texture_pool,
            texture_set_layout,
            upload,
            swapchain,
            _command_pool: command_pool,
            device,
            context,
            lifecycle: FrameLifecycle::new(config.frames_in_flight),
            config,
            image_index: 0,
            draw: DrawState::new(),
            drawable_size,
            stats: FrameStats::default(),
        })
    }

    fn create_frames(
        device: &Device,
        command_pool: &CommandPool,
        config: &RhiConfig,
    ) -> VulkanResult<Vec<VulkanFrame>> {
        let command_buffers = command_pool.allocate_command_buffers(config.frames_in_flight as u32)?;
        command_buffers
            .into_iter()
            .map(|command_buffer| {
                Ok(Frame::new(
                    command_buffer,
                    FrameSync::new(device)?,
                    FrameDescriptorPool::new(device.clone(), config.descriptor_sets_per_frame)?,
                ))
            })
            .collect()
    }

    /// Frame counters since creation
    pub fn frame_stats(&self) -> FrameStats {
        self.stats
    }

    /// Configuration the device was created with
    pub fn config(&self) -> &RhiConfig {
        &self.config
    }

    /// Current swapchain extent in pixels
    pub fn extent(&self) -> (u32, u32) {
        let extent = self.swapchain.extent();
        (extent.width, extent.height)
    }

    fn rebuild_swapchain(&mut self) -> RhiResult<bool> {
        let (width, height) = self.drawable_size;
        if !self.swapchain.rebuild(&self.context, width, height, self.config.vsync)? {
            return Ok(false);
        }
        self.lifecycle.clear_stale();
        self.stats.swapchain_rebuilds += 1;
        log::debug!(
            "[FRAME] Swapchain rebuilt ({} total), extent {:?}",
            self.stats.swapchain_rebuilds,
            self.swapchain.extent()
        );
        Ok(true)
    }

    fn skip_frame(&mut self, reason: &str) -> RhiResult<bool> {
        log::debug!("[FRAME] Skipping frame: {}", reason);
        self.lifecycle.abandon();
        self.stats.skipped += 1;
        Ok(false)
    }

    fn begin_recording(&self, command_buffer: vk::CommandBuffer, image_index: u32) -> VulkanResult<()> {
        let device = &self.device;
        let image = self.swapchain.image(image_index);
        let extent = self.swapchain.extent();

        unsafe {
            device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(VulkanError::Api)?;
            let begin_info =
                vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(command_buffer, &begin_info).map_err(VulkanError::Api)?;
        }

        transition_image_layout(
            device,
            command_buffer,
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            0,
            1,
        )?;

        let color_attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(self.swapchain.image_view(image_index))
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.config.clear_color,
                },
            })
            .build();
        let color_attachments = [color_attachment];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let rendering_info = vk::RenderingInfo::builder()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            device.cmd_begin_rendering(command_buffer, &rendering_info);
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[render_area]);
        }
        Ok(())
    }

    /// Current command buffer when a frame is open; logs `call` otherwise
    fn recording_command_buffer(&self, call: &str) -> Option<vk::CommandBuffer> {
        while_recording(&self.lifecycle, call, || {
            self.swapchain.frame(self.lifecycle.frame_index()).command_buffer()
        })
    }

    /// Give up on a frame whose image was already acquired
    ///
    /// The acquire semaphore may be left signaled, so the slot's sync objects
    /// are replaced by the rebuild that the stale flag triggers.
    fn fail_frame(&mut self, error: VulkanError) -> RhiError {
        log::error!("[FRAME] Frame failed after acquire: {}", error);
        self.draw.reset();
        self.lifecycle.abandon();
        self.lifecycle.mark_stale();
        self.stats.skipped += 1;
        RhiError::RenderingFailed(error.to_string())
    }

    fn destroy_allowed(&self, kind: &str) -> bool {
        if self.lifecycle.is_recording() {
            log::warn!("[DEVICE] Ignoring destroy of {} while a frame is recording", kind);
            return false;
        }
        true
    }
}

impl GraphicsDevice for VulkanDevice {
    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> RhiResult<BufferHandle> {
        let buffer = VulkanBuffer::create(
            &self.device,
            &self.context.physical_device().memory_properties,
            &mut self.upload,
            desc,
            self.config.frames_in_flight,
        )
        .map_err(creation_failed("buffer"))?;
        Ok(self.buffers.insert(buffer))
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> RhiResult<TextureHandle> {
        let texture = VulkanTexture::create(
            &self.device,
            &mut self.upload,
            &self.texture_pool,
            self.texture_set_layout.handle(),
            desc,
        )
        .map_err(creation_failed("texture"))?;
        Ok(self.textures.insert(texture))
    }

    fn create_shader(&mut self, desc: &ShaderDesc<'_>) -> RhiResult<ShaderHandle> {
        let shader = VulkanShader::create(&self.device, desc).map_err(creation_failed("shader"))?;
        Ok(self.shaders.insert(shader))
    }

    fn create_pipeline_state(&mut self, desc: &PipelineDesc) -> RhiResult<PipelineHandle> {
        let Self {
            shaders,
            pipelines,
            pipeline_cache,
            swapchain,
            device,
            ..
        } = self;

        let shader = shaders.get(desc.shader).ok_or(RhiError::InvalidHandle("shader"))?;
        let key = PipelineKey::new(shader.id(), &desc.vertex_layout);
        let color_format = swapchain.format();

        pipeline_cache
            .get_or_create(key, || {
                let state = VulkanPipelineState::create(device, shader, desc, color_format)?;
                Ok(pipelines.insert(state))
            })
            .map_err(creation_failed("pipeline"))
    }

    fn update_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let frame_index = self.lifecycle.frame_index();
        if let Some(target) = self.buffers.get_mut(buffer) {
            target.update(&mut self.upload, frame_index, offset, data);
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if self.destroy_allowed("buffer") {
            self.buffers.destroy(buffer, &self.device);
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.destroy_allowed("texture") {
            self.textures.destroy(texture, &self.device);
        }
    }

    fn destroy_shader(&mut self, shader: ShaderHandle) {
        if self.destroy_allowed("shader") {
            self.shaders.destroy(shader, &self.device);
        }
    }

    fn destroy_pipeline_state(&mut self, pipeline: PipelineHandle) {
        if !self.destroy_allowed("pipeline") {
            return;
        }
        if self.pipelines.destroy(pipeline, &self.device) {
            self.pipeline_cache.remove_value(&pipeline);
            self.draw.forget(pipeline);
        }
    }

    fn begin_frame(&mut self) -> RhiResult<bool> {
        if !self.lifecycle.can_begin() {
            log::warn!("[FRAME] begin_frame called in state {:?}; ignored", self.lifecycle.state());
            return Ok(false);
        }

        if self.lifecycle.is_stale() && !self.rebuild_swapchain()? {
            return self.skip_frame("swapchain stale and surface has no area");
        }

        let frame_index = self.lifecycle.frame_index();
        let frame = self.swapchain.frame_mut(frame_index);
        frame.reclaim()?;
        let image_available = frame.sync().image_available();

        let image_index = match self.swapchain.acquire_next_image(image_available) {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    self.lifecycle.mark_stale();
                }
                index
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.lifecycle.mark_stale();
                return self.skip_frame("acquire reported out of date");
            }
            Err(e) => return Err(VulkanError::Api(e).into()),
        };

        let command_buffer = self.swapchain.frame(frame_index).command_buffer();
        let started = self
            .swapchain
            .claim_image(image_index, frame_index)
            .and_then(|()| self.begin_recording(command_buffer, image_index));
        if let Err(e) = started {
            return Err(self.fail_frame(e));
        }

        self.image_index = image_index;
        self.draw.reset();
        self.lifecycle.begin();
        log::trace!("[FRAME] Began frame slot {} on image {}", frame_index, image_index);
        Ok(true)
    }

    fn end_frame(&mut self) -> RhiResult<()> {
        let Some(command_buffer) = self.recording_command_buffer("end_frame") else {
            return Ok(());
        };
        let Self {
            device,
            swapchain,
            context,
            lifecycle,
            image_index,
            ..
        } = self;

        unsafe { device.cmd_end_rendering(command_buffer) };
        let transitioned = transition_image_layout(
            device,
            command_buffer,
            swapchain.image(*image_index),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            0,
            1,
        );

        let wait_semaphores = [swapchain.frame(lifecycle.frame_index()).sync().image_available()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [swapchain.render_finished(*image_index)];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        let frame = swapchain.frame_mut(lifecycle.frame_index());
        let submitted = transitioned
            .and_then(|()| unsafe { device.end_command_buffer(command_buffer) }.map_err(VulkanError::Api))
            .and_then(|()| {
                frame.submit(|fence| {
                    unsafe { device.queue_submit(context.graphics_queue(), &[submit_info], fence) }
                        .map_err(VulkanError::Api)
                })
            });

        if let Err(e) = submitted {
            return Err(self.fail_frame(e));
        }

        self.draw.reset();
        self.lifecycle.end();
        Ok(())
    }

    fn present(&mut self) -> RhiResult<()> {
        if !self.lifecycle.can_present() {
            log::warn!("[FRAME] present called in state {:?}; ignored", self.lifecycle.state());
            return Ok(());
        }

        let render_finished = self.swapchain.render_finished(self.image_index);
        let result = self
            .swapchain
            .present(self.context.present_queue(), self.image_index, render_finished);

        // The ring advances whatever presentation reported
        self.lifecycle.presented();

        match result {
            Ok(suboptimal) => {
                if suboptimal {
                    self.lifecycle.mark_stale();
                }
                self.stats.presented += 1;
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("[FRAME] Present reported out of date");
                self.lifecycle.mark_stale();
                self.stats.skipped += 1;
                Ok(())
            }
            Err(e) => {
                log::error!("[FRAME] Present failed: {:?}", e);
                self.lifecycle.mark_stale();
                self.stats.skipped += 1;
                Err(VulkanError::Api(e).into())
            }
        }
    }

    fn bind_pipeline_state(&mut self, pipeline: PipelineHandle) {
        let Some(command_buffer) = self.recording_command_buffer("bind_pipeline_state") else {
            return;
        };
        let Some(state) = self.pipelines.get(pipeline) else {
            return;
        };

        let mut recorder = VulkanRecorder::new(&self.device, command_buffer);
        self.draw.bind_pipeline(&mut recorder, pipeline, state);
        self.lifecycle.note_recorded();
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferHandle) {
        let Some(command_buffer) = self.recording_command_buffer("bind_vertex_buffer") else {
            return;
        };
        let Some(vertex_buffer) = self.buffers.get(buffer) else {
            return;
        };
        if vertex_buffer.buffer_type() != BufferType::Vertex {
            log::warn!("[FRAME] Binding {:?} buffer as vertex buffer", vertex_buffer.buffer_type());
        }

        VulkanRecorder::new(&self.device, command_buffer).bind_vertex_buffer(vertex_buffer.handle(self.lifecycle.frame_index()));
        self.lifecycle.note_recorded();
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle) {
        let Some(command_buffer) = self.recording_command_buffer("bind_index_buffer") else {
            return;
        };
        let Some(index_buffer) = self.buffers.get(buffer) else {
            return;
        };
        if index_buffer.buffer_type() != BufferType::Index {
            log::warn!("[FRAME] Binding {:?} buffer as index buffer", index_buffer.buffer_type());
        }

        VulkanRecorder::new(&self.device, command_buffer).bind_index_buffer(index_buffer.handle(self.lifecycle.frame_index()));
        self.lifecycle.note_recorded();
    }

    fn bind_uniform_buffer(&mut self, buffer: BufferHandle, slot: u32) {
        if self.recording_command_buffer("bind_uniform_buffer").is_none() {
            return;
        }
        let Some(uniform) = self.buffers.get(buffer) else {
            return;
        };

        let info = uniform.descriptor_info(self.lifecycle.frame_index());
        let pipeline = self.draw.current().and_then(|p| self.pipelines.get(p));
        if self.draw.bind_resource(pipeline, "bind_uniform_buffer", slot, info) {
            self.lifecycle.note_recorded();
        }
    }

    fn bind_texture(&mut self, texture: TextureHandle, slot: u32) {
        if self.recording_command_buffer("bind_texture").is_none() {
            return;
        }
        let Some(sampled) = self.textures.get(texture) else {
            return;
        };
        let Some(info) = sampled.descriptor_info() else {
            log::error!("[BINDING] {:?} texture cannot be sampled", sampled.format());
            return;
        };

        let pipeline = self.draw.current().and_then(|p| self.pipelines.get(p));
        if self.draw.bind_resource(pipeline, "bind_texture", slot, info) {
            self.lifecycle.note_recorded();
        }
    }

    fn push_constants(&mut self, data: &[u8]) {
        let Some(command_buffer) = self.recording_command_buffer("push_constants") else {
            return;
        };

        let pipeline = self.draw.current().and_then(|p| self.pipelines.get(p));
        let mut recorder = VulkanRecorder::new(&self.device, command_buffer);
        if self.draw.push_constants(&mut recorder, pipeline, data) {
            self.lifecycle.note_recorded();
        }
    }

    fn draw_indexed(&mut self, index_count: u32) {
        let Some(command_buffer) = self.recording_command_buffer("draw_indexed") else {
            return;
        };

        let Self {
            pipelines,
            swapchain,
            draw,
            device,
            lifecycle,
            ..
        } = self;
        let pipeline = draw.current().and_then(|p| pipelines.get(p));
        let frame = swapchain.frame_mut(lifecycle.frame_index());
        let mut recorder = VulkanRecorder::new(device, command_buffer);

        if draw.draw_indexed(&mut recorder, pipeline, index_count, |layout, key| frame.descriptor_set(layout, key)) {
            lifecycle.note_recorded();
        }
    }

    fn update_swapchain(&mut self) {
        self.lifecycle.mark_stale();
    }

    fn resize(&mut self, width: u32, height: u32) {
        log::debug!("[FRAME] Drawable resized to {}x{}", width, height);
        self.drawable_size = (width, height);
        self.lifecycle.mark_stale();
    }

    fn frame_index(&self) -> usize {
        self.lifecycle.frame_index()
    }

    fn frames_in_flight(&self) -> usize {
        self.lifecycle.ring_size()
    }

    fn on_destroy(&mut self) {
        if self.lifecycle.is_recording() {
            log::warn!("[DEVICE] on_destroy called with a frame still recording");
        }
        self.device.wait_idle();
        self.draw.reset();
        log::info!(
            "[DEVICE] Idle; {} frames presented, {} skipped, {} swapchain rebuilds",
            self.stats.presented,
            self.stats.skipped,
            self.stats.swapchain_rebuilds
        );
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        self.device.wait_idle();
        self.pipeline_cache.clear();
        self.pipelines.clear(&self.device);
        self.textures.clear(&self.device);
        self.buffers.clear(&self.device);
        self.shaders.clear(&self.device);
        log::debug!("[DEVICE] Resources released");
    }
}
