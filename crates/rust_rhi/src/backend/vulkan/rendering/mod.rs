//! Command recording helpers, shader modules and pipelines

pub mod commands;
pub mod pipeline;
pub mod shader;

pub use commands::{transition_image_layout, CommandPool, VulkanRecorder};
pub use pipeline::{PipelineCache, PipelineKey, VulkanPipelineState};
pub use shader::{ShaderModule, VulkanShader};
