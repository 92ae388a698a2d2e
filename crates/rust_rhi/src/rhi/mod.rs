//! Backend-agnostic rendering hardware interface
//!
//! Everything here is plain data plus the [`GraphicsDevice`] trait; no
//! native graphics API types appear in this module.

pub mod device;
pub mod error;
pub mod frame_state;
pub mod handles;
pub mod shader_layout;
pub mod uniform;
pub mod vertex_layout;

pub use device::GraphicsDevice;
pub use error::{RhiError, RhiResult};
pub use frame_state::{FrameLifecycle, FrameState};
pub use handles::{
    BufferDesc, BufferHandle, BufferType, CullMode, FillMode, PipelineDesc, PipelineHandle, PrimitiveTopology,
    ShaderDesc, ShaderHandle, ShaderStage, ShaderStageDesc, TextureDesc, TextureFormat, TextureHandle, TextureUsage,
};
pub use shader_layout::{BindingKind, ShaderBinding, ShaderDataType, ShaderLayout, UniformBlockLayout};
pub use uniform::{UniformBlock, UniformValue};
pub use vertex_layout::{VertexAttribute, VertexFormat, VertexLayout};
