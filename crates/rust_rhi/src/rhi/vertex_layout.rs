//! Vertex input layout
//!
//! Attributes are packed in declaration order into a single interleaved
//! stream. The layout's hash is part of the pipeline cache key.

use std::hash::Hasher;

use crate::foundation::hash::Fnv1a;

/// Attribute element formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    /// One float
    Float,
    /// Two floats
    Float2,
    /// Three floats
    Float3,
    /// Four floats
    Float4,
    /// One 32-bit signed integer
    Int,
    /// Four normalized unsigned bytes
    UByte4Norm,
}

impl VertexFormat {
    /// Bytes per element
    pub const fn size(self) -> u32 {
        match self {
            Self::Float | Self::Int | Self::UByte4Norm => 4,
            Self::Float2 => 8,
            Self::Float3 => 12,
            Self::Float4 => 16,
        }
    }

    const fn tag(self) -> u8 {
        match self {
            Self::Float => 0,
            Self::Float2 => 1,
            Self::Float3 => 2,
            Self::Float4 => 3,
            Self::Int => 4,
            Self::UByte4Norm => 5,
        }
    }
}

/// One vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader input location
    pub location: u32,
    /// Element format
    pub format: VertexFormat,
    /// Offset within the vertex
    pub offset: u32,
}

/// Interleaved vertex layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayout {
    attributes: Vec<VertexAttribute>,
    stride: u32,
    hash: u64,
}

impl VertexLayout {
    /// Pack `formats` at consecutive locations starting from 0
    pub fn new(formats: &[VertexFormat]) -> Self {
        let mut offset = 0;
        let attributes = formats
            .iter()
            .zip(0..)
            .map(|(&format, location)| {
                let attribute = VertexAttribute { location, format, offset };
                offset += format.size();
                attribute
            })
            .collect::<Vec<_>>();

        let mut hasher = Fnv1a::default();
        hasher.write_u32(offset);
        for attribute in &attributes {
            hasher.write_u32(attribute.location);
            hasher.write_u8(attribute.format.tag());
            hasher.write_u32(attribute.offset);
        }

        Self {
            attributes,
            stride: offset,
            hash: hasher.finish(),
        }
    }

    /// Attributes in location order
    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    /// Bytes per vertex
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Identity hash used by the pipeline cache
    pub fn layout_hash(&self) -> u64 {
        self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offsets_and_stride() {
        let layout = VertexLayout::new(&[VertexFormat::Float3, VertexFormat::Float2, VertexFormat::UByte4Norm]);
        let offsets: Vec<u32> = layout.attributes().iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 20]);
        assert_eq!(layout.stride(), 24);
        assert_eq!(layout.attributes()[2].location, 2);
    }

    #[test]
    fn test_hash_distinguishes_order() {
        let a = VertexLayout::new(&[VertexFormat::Float3, VertexFormat::Float2]);
        let b = VertexLayout::new(&[VertexFormat::Float2, VertexFormat::Float3]);
        let a2 = VertexLayout::new(&[VertexFormat::Float3, VertexFormat::Float2]);
        assert_ne!(a.layout_hash(), b.layout_hash());
        assert_eq!(a.layout_hash(), a2.layout_hash());
    }
}
