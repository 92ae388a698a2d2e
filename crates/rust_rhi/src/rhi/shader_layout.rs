//! # Shader Resource Layout
//!
//! Describes which uniform buffers and samplers a shader expects and where.
//! Each binding is addressed by the client through a flat `slot` number and
//! resolves to a `(set, binding)` pair on the GPU side.
//!
//! Uniform block members are laid out with std140 rules:
//!
//! | type  | size | alignment |
//! |-------|------|-----------|
//! | int   | 4    | 4         |
//! | float | 4    | 4         |
//! | vec2  | 8    | 8         |
//! | vec3  | 12   | 16        |
//! | vec4  | 16   | 16        |
//! | mat4  | 64   | 16        |
//!
//! The block size is rounded up to a multiple of 16. Offsets are computed once
//! when the layout is built; a built layout is immutable.

/// Scalar, vector and matrix types a uniform member can have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderDataType {
    /// 32-bit signed integer
    Int,
    /// 32-bit float
    Float,
    /// Two floats
    Vec2,
    /// Three floats
    Vec3,
    /// Four floats
    Vec4,
    /// Column-major 4x4 float matrix
    Mat4,
}

impl ShaderDataType {
    /// Bytes occupied by the value itself
    pub const fn size(self) -> u32 {
        match self {
            Self::Int | Self::Float => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            Self::Mat4 => 64,
        }
    }

    /// std140 base alignment
    pub const fn alignment(self) -> u32 {
        match self {
            Self::Int | Self::Float => 4,
            Self::Vec2 => 8,
            Self::Vec3 | Self::Vec4 | Self::Mat4 => 16,
        }
    }
}

const fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) / alignment * alignment
}

/// One member of a uniform block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformMember {
    /// Member name as written in the shader
    pub name: String,
    /// Member type
    pub ty: ShaderDataType,
    /// Byte offset within the block
    pub offset: u32,
}

/// std140 layout of one uniform block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlockLayout {
    name: String,
    members: Vec<UniformMember>,
    size: u32,
}

impl UniformBlockLayout {
    /// Lay out `members` in declaration order
    pub fn new<S: Into<String>>(name: impl Into<String>, members: impl IntoIterator<Item = (S, ShaderDataType)>) -> Self {
        let mut offset = 0;
        let members = members
            .into_iter()
            .map(|(member_name, ty)| {
                let member_offset = align_up(offset, ty.alignment());
                offset = member_offset + ty.size();
                UniformMember {
                    name: member_name.into(),
                    ty,
                    offset: member_offset,
                }
            })
            .collect();

        Self {
            name: name.into(),
            members,
            size: align_up(offset, 16),
        }
    }

    /// Block name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Members in declaration order
    pub fn members(&self) -> &[UniformMember] {
        &self.members
    }

    /// Total size including trailing padding
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Look up a member by name
    pub fn member(&self, name: &str) -> Option<&UniformMember> {
        self.members.iter().find(|m| m.name == name)
    }
}

/// What sits at a binding point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingKind {
    /// Uniform buffer with a known block layout
    UniformBuffer(UniformBlockLayout),
    /// Combined image sampler
    Sampler,
}

/// One resource binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBinding {
    /// Client-facing slot number
    pub slot: u32,
    /// Descriptor set index
    pub set: u32,
    /// Binding index within the set
    pub binding: u32,
    /// Resource kind
    pub kind: BindingKind,
}

/// All resource bindings of a shader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderLayout {
    bindings: Vec<ShaderBinding>,
}

impl ShaderLayout {
    /// Start an empty layout
    pub fn builder() -> ShaderLayoutBuilder {
        ShaderLayoutBuilder::default()
    }

    /// Every binding, in insertion order
    pub fn bindings(&self) -> &[ShaderBinding] {
        &self.bindings
    }

    /// Resolve a client slot
    pub fn resolve(&self, slot: u32) -> Option<&ShaderBinding> {
        self.bindings.iter().find(|b| b.slot == slot)
    }

    /// Bindings declared in descriptor set `set`
    pub fn bindings_in_set(&self, set: u32) -> impl Iterator<Item = &ShaderBinding> {
        self.bindings.iter().filter(move |b| b.set == set)
    }

    /// Number of descriptor sets a pipeline layout needs, counting gaps
    pub fn set_count(&self) -> u32 {
        self.bindings.iter().map(|b| b.set + 1).max().unwrap_or(0)
    }
}

/// Builder for [`ShaderLayout`]
#[derive(Debug, Default)]
pub struct ShaderLayoutBuilder {
    bindings: Vec<ShaderBinding>,
}

impl ShaderLayoutBuilder {
    /// Add a uniform buffer binding
    pub fn uniform_buffer(mut self, slot: u32, set: u32, binding: u32, block: UniformBlockLayout) -> Self {
        self.push(slot, set, binding, BindingKind::UniformBuffer(block));
        self
    }

    /// Add a combined image sampler binding
    pub fn sampler(mut self, slot: u32, set: u32, binding: u32) -> Self {
        self.push(slot, set, binding, BindingKind::Sampler);
        self
    }

    fn push(&mut self, slot: u32, set: u32, binding: u32, kind: BindingKind) {
        if self.bindings.iter().any(|b| b.slot == slot || (b.set == set && b.binding == binding)) {
            log::warn!("[LAYOUT] Duplicate slot {} or (set {}, binding {}); keeping the first", slot, set, binding);
            return;
        }
        self.bindings.push(ShaderBinding { slot, set, binding, kind });
    }

    /// Freeze the layout
    pub fn build(self) -> ShaderLayout {
        ShaderLayout { bindings: self.bindings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ShaderDataType::*;

    fn offsets(layout: &UniformBlockLayout) -> Vec<u32> {
        layout.members().iter().map(|m| m.offset).collect()
    }

    #[test]
    fn test_float_vec3_mat4() {
        let layout = UniformBlockLayout::new("Block", [("a", Float), ("b", Vec3), ("c", Mat4)]);
        assert_eq!(offsets(&layout), vec![0, 16, 32]);
        assert_eq!(layout.size(), 96);
    }

    /// vec3 needs padding after the leading float
    #[test]
    fn test_float_vec3_padding() {
        let layout = UniformBlockLayout::new("Block", [("a", Float), ("b", Vec3)]);
        assert_eq!(offsets(&layout), vec![0, 16]);
        assert_eq!(layout.size(), 32);
    }

    /// A scalar packs into the tail of a vec3
    #[test]
    fn test_vec3_float_packs() {
        let layout = UniformBlockLayout::new("Block", [("a", Vec3), ("b", Float)]);
        assert_eq!(offsets(&layout), vec![0, 12]);
        assert_eq!(layout.size(), 16);
    }

    #[test]
    fn test_mat4_first() {
        let layout = UniformBlockLayout::new("Block", [("m", Mat4), ("a", Float), ("b", Vec3)]);
        assert_eq!(offsets(&layout), vec![0, 64, 80]);
        assert_eq!(layout.size(), 96);
    }

    #[test]
    fn test_vec2_alignment() {
        let layout = UniformBlockLayout::new("Block", [("a", Float), ("b", Vec2), ("c", Int), ("d", Vec4)]);
        assert_eq!(offsets(&layout), vec![0, 8, 16, 32]);
        assert_eq!(layout.size(), 48);
    }

    #[test]
    fn test_empty_block() {
        let layout = UniformBlockLayout::new("Empty", Vec::<(&str, ShaderDataType)>::new());
        assert_eq!(layout.size(), 0);
        assert!(layout.members().is_empty());
    }

    #[test]
    fn test_slot_resolution() {
        let layout = ShaderLayout::builder()
            .uniform_buffer(0, 0, 0, UniformBlockLayout::new("Camera", [("view_proj", Mat4)]))
            .sampler(1, 1, 0)
            .build();

        let camera = layout.resolve(0).unwrap();
        assert_eq!((camera.set, camera.binding), (0, 0));
        assert!(matches!(layout.resolve(1).unwrap().kind, BindingKind::Sampler));
        assert!(layout.resolve(7).is_none());
        assert_eq!(layout.set_count(), 2);
    }

    #[test]
    fn test_duplicate_binding_ignored() {
        let layout = ShaderLayout::builder().sampler(0, 0, 0).sampler(1, 0, 0).sampler(0, 0, 1).build();
        assert_eq!(layout.bindings().len(), 1);
    }

    /// Set indices with no bindings still count toward the pipeline layout
    #[test]
    fn test_set_count_with_gap() {
        let layout = ShaderLayout::builder().sampler(0, 2, 0).build();
        assert_eq!(layout.set_count(), 3);
        assert_eq!(layout.bindings_in_set(1).count(), 0);
    }
}
