//! Uniform values and CPU-side uniform block images

use std::sync::Arc;

use crate::foundation::math::{Mat4, Vec2, Vec3, Vec4};

use super::shader_layout::{ShaderDataType, UniformBlockLayout};

/// A value that can be written into a uniform block member
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    /// 32-bit signed integer
    Int(i32),
    /// 32-bit float
    Float(f32),
    /// 2D vector
    Vec2(Vec2),
    /// 3D vector
    Vec3(Vec3),
    /// 4D vector
    Vec4(Vec4),
    /// 4x4 matrix, written column-major
    Mat4(Mat4),
}

impl UniformValue {
    /// The shader type this value fills
    pub const fn data_type(&self) -> ShaderDataType {
        match self {
            Self::Int(_) => ShaderDataType::Int,
            Self::Float(_) => ShaderDataType::Float,
            Self::Vec2(_) => ShaderDataType::Vec2,
            Self::Vec3(_) => ShaderDataType::Vec3,
            Self::Vec4(_) => ShaderDataType::Vec4,
            Self::Mat4(_) => ShaderDataType::Mat4,
        }
    }

    /// Write the value's bytes to the start of `dst`
    ///
    /// `dst` must hold at least `data_type().size()` bytes.
    fn write_to(&self, dst: &mut [u8]) {
        let bytes: &[u8] = match self {
            Self::Int(v) => bytemuck::bytes_of(v),
            Self::Float(v) => bytemuck::bytes_of(v),
            Self::Vec2(v) => bytemuck::cast_slice(v.as_slice()),
            Self::Vec3(v) => bytemuck::cast_slice(v.as_slice()),
            Self::Vec4(v) => bytemuck::cast_slice(v.as_slice()),
            Self::Mat4(m) => bytemuck::cast_slice(m.as_slice()),
        };
        dst[..bytes.len()].copy_from_slice(bytes);
    }
}

/// Byte image of one uniform block, ready for `update_buffer`
#[derive(Debug, Clone)]
pub struct UniformBlock {
    layout: Arc<UniformBlockLayout>,
    data: Vec<u8>,
}

impl UniformBlock {
    /// Zero-filled block for `layout`
    pub fn new(layout: Arc<UniformBlockLayout>) -> Self {
        let data = vec![0; layout.size() as usize];
        Self { layout, data }
    }

    /// The block's layout
    pub fn layout(&self) -> &UniformBlockLayout {
        &self.layout
    }

    /// Set member `name`
    ///
    /// Unknown names are logged and ignored. A value whose type differs from
    /// the member's declared type is a bug in the caller: it asserts in
    /// debug builds and is ignored in release builds.
    pub fn set(&mut self, name: &str, value: UniformValue) -> &mut Self {
        let Some(member) = self.layout.member(name) else {
            log::warn!("[UNIFORM] Block '{}' has no member '{}'", self.layout.name(), name);
            return self;
        };

        if member.ty != value.data_type() {
            debug_assert!(
                false,
                "uniform '{}' is {:?}, got {:?}",
                name,
                member.ty,
                value.data_type()
            );
            log::error!(
                "[UNIFORM] Type mismatch for '{}': expected {:?}, got {:?}",
                name,
                member.ty,
                value.data_type()
            );
            return self;
        }

        let offset = member.offset as usize;
        value.write_to(&mut self.data[offset..]);
        self
    }

    /// Packed bytes
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}
