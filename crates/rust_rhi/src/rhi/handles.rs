//! Resource handles and creation descriptors
//!
//! Handles are generational keys into the device's resource arenas. A handle
//! outlives its resource safely: after `destroy_*` it simply stops resolving.

use std::sync::Arc;

use bitflags::bitflags;
use slotmap::new_key_type;

use super::shader_layout::ShaderLayout;
use super::vertex_layout::VertexLayout;

new_key_type! {
    /// Handle to a GPU buffer
    pub struct BufferHandle;
    /// Handle to a sampled or attachment texture
    pub struct TextureHandle;
    /// Handle to a set of shader stages
    pub struct ShaderHandle;
    /// Handle to a compiled pipeline state
    pub struct PipelineHandle;
}

/// What a buffer is bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    /// Vertex attribute stream
    Vertex,
    /// 32-bit index stream
    Index,
    /// Uniform block storage
    Uniform,
}

/// Buffer creation parameters
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    /// Capacity in bytes
    pub size: u64,
    /// Binding type
    pub ty: BufferType,
    /// Initial contents, at most `size` bytes
    pub data: Option<&'a [u8]>,
    /// Host-visible and ring-buffered per frame in flight when true,
    /// device-local and staging-uploaded when false
    pub is_dynamic: bool,
}

impl<'a> BufferDesc<'a> {
    /// Device-local buffer initialised with `data`
    pub fn with_data(ty: BufferType, data: &'a [u8]) -> Self {
        Self {
            size: data.len() as u64,
            ty,
            data: Some(data),
            is_dynamic: false,
        }
    }

    /// Host-visible per-frame buffer of `size` bytes
    pub fn dynamic(ty: BufferType, size: u64) -> Self {
        Self {
            size,
            ty,
            data: None,
            is_dynamic: true,
        }
    }
}

/// Texel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit RGBA, sRGB-agnostic unorm
    Rgba8,
    /// 8-bit RGB; stored as RGBA with opaque alpha
    Rgb8,
    /// 16-bit float RGBA
    Rgba16F,
    /// Packed depth and stencil
    Depth24Stencil8,
}

impl TextureFormat {
    /// Bytes per texel in the caller-supplied pixel data
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8 | Self::Depth24Stencil8 => 4,
            Self::Rgb8 => 3,
            Self::Rgba16F => 8,
        }
    }

    /// True for depth/stencil formats
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth24Stencil8)
    }
}

bitflags! {
    /// How a texture will be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Read by shaders through a sampler
        const SAMPLED = 1 << 0;
        /// Rendered into as a color attachment
        const COLOR_ATTACHMENT = 1 << 1;
        /// Used as a depth/stencil attachment
        const DEPTH_STENCIL_ATTACHMENT = 1 << 2;
        /// Copied from
        const TRANSFER_SRC = 1 << 3;
    }
}

/// Texture creation parameters
#[derive(Debug, Clone, Copy)]
pub struct TextureDesc<'a> {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Requested mip levels; clamped to the full chain
    pub mips: u32,
    /// Texel format
    pub format: TextureFormat,
    /// Usage flags
    pub usage: TextureUsage,
    /// Level-0 pixels, tightly packed rows
    pub data: Option<&'a [u8]>,
}

impl<'a> TextureDesc<'a> {
    /// Single-mip sampled RGBA8 texture with contents
    pub fn rgba8(width: u32, height: u32, data: &'a [u8]) -> Self {
        Self {
            width,
            height,
            mips: 1,
            format: TextureFormat::Rgba8,
            usage: TextureUsage::SAMPLED,
            data: Some(data),
        }
    }

    /// Full mip chain length for these dimensions
    pub fn full_mip_chain(&self) -> u32 {
        32 - self.width.max(self.height).max(1).leading_zeros()
    }
}

/// Shader pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    /// Vertex stage
    Vertex,
    /// Fragment stage
    Fragment,
    /// Geometry stage
    Geometry,
    /// Compute stage
    Compute,
}

/// One stage's compiled bytecode
#[derive(Debug, Clone)]
pub struct ShaderStageDesc<'a> {
    /// Stage this code runs in
    pub stage: ShaderStage,
    /// SPIR-V bytecode
    pub bytecode: &'a [u8],
    /// Entry point, `"main"` by default
    pub entry_point: String,
}

impl<'a> ShaderStageDesc<'a> {
    /// Stage with the default `main` entry point
    pub fn new(stage: ShaderStage, bytecode: &'a [u8]) -> Self {
        Self {
            stage,
            bytecode,
            entry_point: "main".to_string(),
        }
    }

    /// Override the entry point
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }
}

/// Shader creation parameters
#[derive(Debug, Clone, Default)]
pub struct ShaderDesc<'a> {
    /// Stages in this program
    pub stages: Vec<ShaderStageDesc<'a>>,
}

impl<'a> ShaderDesc<'a> {
    /// Add a stage
    pub fn stage(mut self, stage: ShaderStageDesc<'a>) -> Self {
        self.stages.push(stage);
        self
    }
}

/// Primitive assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    /// Independent triangles
    #[default]
    TriangleList,
    /// Triangle strip
    TriangleStrip,
    /// Independent lines
    LineList,
    /// Points
    PointList,
}

/// Polygon rasterization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    /// Filled polygons
    #[default]
    Solid,
    /// Edges only
    Wireframe,
}

/// Face culling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    #[default]
    Back,
}

/// Pipeline state creation parameters
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    /// Shader program
    pub shader: ShaderHandle,
    /// Resource bindings the shader expects
    pub shader_layout: Arc<ShaderLayout>,
    /// Vertex input layout
    pub vertex_layout: VertexLayout,
    /// Primitive topology
    pub topology: PrimitiveTopology,
    /// Fill mode
    pub fill_mode: FillMode,
    /// Cull mode
    pub cull_mode: CullMode,
    /// Standard alpha blending on the color attachment
    pub enable_blending: bool,
    /// Push constant range in bytes, shared by vertex and fragment stages
    pub push_constant_size: u32,
}

impl PipelineDesc {
    /// Defaults for everything but the shader and layouts
    pub fn new(shader: ShaderHandle, shader_layout: Arc<ShaderLayout>, vertex_layout: VertexLayout) -> Self {
        Self {
            shader,
            shader_layout,
            vertex_layout,
            topology: PrimitiveTopology::default(),
            fill_mode: FillMode::default(),
            cull_mode: CullMode::default(),
            enable_blending: false,
            push_constant_size: 0,
        }
    }
}
