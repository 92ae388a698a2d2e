//! # Rust RHI
//!
//! A rendering hardware interface: client code creates buffers, textures,
//! shaders and pipeline states through the [`GraphicsDevice`](rhi::GraphicsDevice)
//! trait and drives frames with a fixed call sequence, without touching the
//! native graphics API.
//!
//! The Vulkan backend keeps several frames in flight, rebuilds the swapchain
//! lazily after resizes, resolves descriptor sets at draw time through a
//! per-frame cache, and uploads device-local data through staging buffers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rust_rhi::prelude::*;
//!
//! fn run(glfw: &glfw::Glfw, window: &glfw::Window) -> Result<(), RhiError> {
//!     let surface = GlfwSurface::new(glfw, window);
//!     let mut device = VulkanDevice::new(&surface, RhiConfig::new("demo"))?;
//!
//!     if device.begin_frame()? {
//!         // bind_pipeline_state, bind_*, draw_indexed ...
//!         device.end_frame()?;
//!         device.present()?;
//!     }
//!
//!     device.on_destroy();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod backend;
pub mod config;
pub mod core;
pub mod foundation;
pub mod rhi;

/// Common imports for RHI users
pub mod prelude {
    pub use crate::{
        backend::vulkan::{FrameStats, GlfwSurface, RawWindowSurface, SurfaceProvider, VulkanDevice},
        core::config::RhiConfig,
        foundation::math::{Mat4, Vec2, Vec3, Vec4},
        rhi::{
            BufferDesc, BufferHandle, BufferType, CullMode, FillMode, GraphicsDevice, PipelineDesc, PipelineHandle,
            PrimitiveTopology, RhiError, RhiResult, ShaderDesc, ShaderHandle, ShaderLayout, ShaderStage,
            ShaderStageDesc, TextureDesc, TextureFormat, TextureHandle, TextureUsage, UniformBlock,
            UniformBlockLayout, UniformValue, VertexFormat, VertexLayout,
        },
    };
}
