//! Math value types carried through uniform packing
//!
//! The RHI never does math with these; it only needs their byte layout.

/// 2D vector
pub type Vec2 = nalgebra::Vector2<f32>;
/// 3D vector
pub type Vec3 = nalgebra::Vector3<f32>;
/// 4D vector
pub type Vec4 = nalgebra::Vector4<f32>;
/// 4x4 matrix, column-major storage
pub type Mat4 = nalgebra::Matrix4<f32>;
