//! # Pipeline States
//!
//! A pipeline state is derived entirely from its description: descriptor set
//! layouts come from the shader layout (one per set index, with empty layouts
//! filling any gaps), vertex input from the vertex layout, and the color
//! attachment format from the swapchain. Rendering uses dynamic rendering, so
//! no render pass is involved. Viewport and scissor are dynamic state.
//!
//! Pipelines are cached by `(shader id, vertex layout hash)`. Asking for the
//! same pair again returns the existing pipeline instead of compiling a new one.

use std::collections::HashMap;
use std::sync::Arc;

use ash::{vk, Device};

use crate::backend::vulkan::initialization::{VulkanError, VulkanResult};
use crate::backend::vulkan::resources::descriptor::{DescriptorSetLayout, DescriptorSetLayoutBuilder};
use crate::backend::vulkan::state::recording::BoundPipeline;
use crate::rhi::handles::{CullMode, FillMode, PipelineDesc, PrimitiveTopology, ShaderStage};
use crate::rhi::shader_layout::{BindingKind, ShaderLayout};
use crate::rhi::vertex_layout::{VertexFormat, VertexLayout};

use super::shader::{stage_flags, VulkanShader};

/// Stages that see descriptors and push constants
pub const GRAPHICS_STAGES: vk::ShaderStageFlags =
    vk::ShaderStageFlags::from_raw(vk::ShaderStageFlags::VERTEX.as_raw() | vk::ShaderStageFlags::FRAGMENT.as_raw());

/// Pipeline cache identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    /// Identifier of the shader program
    pub shader_id: u64,
    /// Hash of the vertex layout
    pub vertex_layout_hash: u64,
}

impl PipelineKey {
    /// Key for a shader and vertex layout pair
    pub fn new(shader_id: u64, vertex_layout: &VertexLayout) -> Self {
        Self {
            shader_id,
            vertex_layout_hash: vertex_layout.layout_hash(),
        }
    }
}

/// Get-or-create cache of pipeline states
#[derive(Debug)]
pub struct PipelineCache<V> {
    entries: HashMap<PipelineKey, V>,
}

impl<V: Clone + PartialEq> PipelineCache<V> {
    /// Empty cache
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Cached value for `key`, or the result of `create` stored under it
    pub fn get_or_create<F>(&mut self, key: PipelineKey, create: F) -> VulkanResult<V>
    where
        F: FnOnce() -> VulkanResult<V>,
    {
        if let Some(existing) = self.entries.get(&key) {
            log::trace!("[PIPELINE] Cache hit for {:?}", key);
            return Ok(existing.clone());
        }
        let value = create()?;
        self.entries.insert(key, value.clone());
        Ok(value)
    }

    /// Forget every entry holding `value`
    pub fn remove_value(&mut self, value: &V) {
        self.entries.retain(|_, v| v != value);
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached pipelines
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone + PartialEq> Default for PipelineCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Descriptor types per binding for every set index below the highest used
///
/// Set indices the shader never uses get an empty list.
pub fn derive_set_bindings(layout: &ShaderLayout) -> Vec<Vec<(u32, vk::DescriptorType)>> {
    (0..layout.set_count())
        .map(|set| {
            let mut bindings: Vec<_> = layout
                .bindings_in_set(set)
                .map(|b| {
                    let ty = match b.kind {
                        BindingKind::UniformBuffer(_) => vk::DescriptorType::UNIFORM_BUFFER,
                        BindingKind::Sampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    };
                    (b.binding, ty)
                })
                .collect();
            bindings.sort_by_key(|&(binding, _)| binding);
            bindings
        })
        .collect()
}

/// Attribute format
pub fn vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float => vk::Format::R32_SFLOAT,
        VertexFormat::Float2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::Int => vk::Format::R32_SINT,
        VertexFormat::UByte4Norm => vk::Format::R8G8B8A8_UNORM,
    }
}

fn topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
    }
}

fn polygon_mode(fill: FillMode) -> vk::PolygonMode {
    match fill {
        FillMode::Solid => vk::PolygonMode::FILL,
        FillMode::Wireframe => vk::PolygonMode::LINE,
    }
}

fn cull_flags(cull: CullMode) -> vk::CullModeFlags {
    match cull {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

/// Backend pipeline behind a `PipelineHandle`
pub struct VulkanPipelineState {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layouts: Vec<DescriptorSetLayout>,
    shader_layout: Arc<ShaderLayout>,
    push_constant_size: u32,
    key: PipelineKey,
}

impl VulkanPipelineState {
    /// Compile a graphics pipeline rendering into `color_format`
    pub fn create(
        device: &Device,
        shader: &VulkanShader,
        desc: &PipelineDesc,
        color_format: vk::Format,
    ) -> VulkanResult<Self> {
        let set_layouts = derive_set_bindings(&desc.shader_layout)
            .into_iter()
            .map(|bindings| {
                bindings
                    .into_iter()
                    .fold(DescriptorSetLayoutBuilder::new(), |builder, (binding, ty)| match ty {
                        vk::DescriptorType::UNIFORM_BUFFER => builder.add_uniform_buffer(binding, GRAPHICS_STAGES),
                        _ => builder.add_combined_image_sampler(binding, GRAPHICS_STAGES),
                    })
                    .build(device)
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let mut state = Self {
            device: device.clone(),
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            set_layouts,
            shader_layout: Arc::clone(&desc.shader_layout),
            push_constant_size: desc.push_constant_size,
            key: PipelineKey::new(shader.id(), &desc.vertex_layout),
        };

        state.create_layout()?;
        state.create_pipeline(shader, desc, color_format)?;

        log::debug!(
            "[PIPELINE] Created pipeline for shader #{} ({} set layout(s), {} push constant bytes)",
            shader.id(),
            state.set_layouts.len(),
            desc.push_constant_size
        );
        Ok(state)
    }

    fn create_layout(&mut self) -> VulkanResult<()> {
        let set_layouts: Vec<_> = self.set_layouts.iter().map(DescriptorSetLayout::handle).collect();
        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: GRAPHICS_STAGES,
            offset: 0,
            size: self.push_constant_size,
        }];
        let ranges: &[vk::PushConstantRange] = if self.push_constant_size > 0 {
            &push_constant_ranges
        } else {
            &[]
        };

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(ranges);
        self.layout = unsafe { self.device.create_pipeline_layout(&layout_info, None)? };
        Ok(())
    }

    fn create_pipeline(&mut self, shader: &VulkanShader, desc: &PipelineDesc, color_format: vk::Format) -> VulkanResult<()> {
        let shader_stages: Vec<_> = shader
            .stages()
            .iter()
            .filter(|s| {
                if s.stage == ShaderStage::Compute {
                    log::warn!("[PIPELINE] Skipping compute stage in graphics pipeline");
                    return false;
                }
                true
            })
            .map(|s| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage_flags(s.stage))
                    .module(s.module.handle())
                    .name(&s.entry_point)
                    .build()
            })
            .collect();
        if shader_stages.is_empty() {
            return Err(VulkanError::InvalidOperation {
                reason: "pipeline has no graphics stages".to_string(),
            });
        }

        let vertex_layout = &desc.vertex_layout;
        let binding_descriptions = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: vertex_layout.stride(),
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attribute_descriptions: Vec<_> = vertex_layout
            .attributes()
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: 0,
                format: vertex_format(a.format),
                offset: a.offset,
            })
            .collect();
        let bindings: &[vk::VertexInputBindingDescription] = if attribute_descriptions.is_empty() {
            &[]
        } else {
            &binding_descriptions
        };
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(bindings)
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(topology(desc.topology))
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(polygon_mode(desc.fill_mode))
            .line_width(1.0)
            .cull_mode(cull_flags(desc.cull_mode))
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachment = if desc.enable_blending {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build()
        } else {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
                .build()
        };
        let color_blend_attachments = [color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let color_formats = [color_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder().color_attachment_formats(&color_formats);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, err)| {
                    log::error!("[PIPELINE] vkCreateGraphicsPipelines failed: {:?}", err);
                    VulkanError::Api(err)
                })?
        };

        self.pipeline = pipelines.into_iter().next().ok_or_else(|| VulkanError::InvalidOperation {
            reason: "no pipeline returned".to_string(),
        })?;
        Ok(())
    }

    /// Cache identity
    pub fn key(&self) -> PipelineKey {
        self.key
    }
}

impl BoundPipeline for VulkanPipelineState {
    fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    fn set_layout(&self, set: u32) -> Option<vk::DescriptorSetLayout> {
        self.set_layouts.get(set as usize).map(DescriptorSetLayout::handle)
    }

    fn shader_layout(&self) -> &ShaderLayout {
        &self.shader_layout
    }

    fn push_constant_size(&self) -> u32 {
        self.push_constant_size
    }
}

impl Drop for VulkanPipelineState {
    fn drop(&mut self) {
        log::debug!("[PIPELINE] Dropping pipeline {:?}", self.pipeline);
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                self.device.destroy_pipeline(self.pipeline, None);
            }
            if self.layout != vk::PipelineLayout::null() {
                self.device.destroy_pipeline_layout(self.layout, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhi::shader_layout::{ShaderDataType, UniformBlockLayout};
    use crate::rhi::vertex_layout::VertexFormat;

    fn block() -> UniformBlockLayout {
        UniformBlockLayout::new("Camera", [("view_proj", ShaderDataType::Mat4)])
    }

    #[test]
    fn test_cache_returns_same_object() {
        let layout = VertexLayout::new(&[VertexFormat::Float3, VertexFormat::Float2]);
        let mut cache: PipelineCache<Arc<u32>> = PipelineCache::new();
        let mut created = 0;

        let first = cache
            .get_or_create(PipelineKey::new(7, &layout), || {
                created += 1;
                Ok(Arc::new(1))
            })
            .unwrap();
        let second = cache
            .get_or_create(PipelineKey::new(7, &layout), || {
                created += 1;
                Ok(Arc::new(2))
            })
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(created, 1);
    }

    #[test]
    fn test_cache_distinguishes_vertex_layouts() {
        let a = VertexLayout::new(&[VertexFormat::Float3]);
        let b = VertexLayout::new(&[VertexFormat::Float3, VertexFormat::Float4]);
        let mut cache: PipelineCache<Arc<u32>> = PipelineCache::new();

        let first = cache.get_or_create(PipelineKey::new(1, &a), || Ok(Arc::new(1))).unwrap();
        let second = cache.get_or_create(PipelineKey::new(1, &b), || Ok(Arc::new(2))).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_failed_creation_is_not_cached() {
        let layout = VertexLayout::new(&[VertexFormat::Float2]);
        let mut cache: PipelineCache<u32> = PipelineCache::new();

        let failed = cache.get_or_create(PipelineKey::new(3, &layout), || {
            Err(VulkanError::InvalidOperation { reason: "boom".to_string() })
        });
        assert!(failed.is_err());
        assert!(cache.is_empty());

        assert_eq!(cache.get_or_create(PipelineKey::new(3, &layout), || Ok(9)).unwrap(), 9);
    }

    #[test]
    fn test_remove_value() {
        let layout = VertexLayout::new(&[VertexFormat::Float2]);
        let mut cache: PipelineCache<u32> = PipelineCache::new();
        cache.get_or_create(PipelineKey::new(1, &layout), || Ok(10)).unwrap();
        cache.get_or_create(PipelineKey::new(2, &layout), || Ok(20)).unwrap();

        cache.remove_value(&10);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_or_create(PipelineKey::new(1, &layout), || Ok(11)).unwrap(), 11);
    }

    #[test]
    fn test_set_bindings_fill_gaps() {
        let layout = ShaderLayout::builder()
            .uniform_buffer(0, 0, 0, block())
            .sampler(1, 2, 1)
            .sampler(2, 2, 0)
            .build();

        let sets = derive_set_bindings(&layout);
        assert_eq!(sets.len(), 3);
        assert_eq!(sets[0], vec![(0, vk::DescriptorType::UNIFORM_BUFFER)]);
        assert!(sets[1].is_empty());
        assert_eq!(
            sets[2],
            vec![
                (0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
                (1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            ]
        );
    }

    #[test]
    fn test_empty_layout_has_no_sets() {
        assert!(derive_set_bindings(&ShaderLayout::default()).is_empty());
    }

    #[test]
    fn test_state_conversions() {
        assert_eq!(vertex_format(VertexFormat::Float3), vk::Format::R32G32B32_SFLOAT);
        assert_eq!(vertex_format(VertexFormat::UByte4Norm), vk::Format::R8G8B8A8_UNORM);
        assert_eq!(polygon_mode(FillMode::Wireframe), vk::PolygonMode::LINE);
        assert_eq!(cull_flags(CullMode::None), vk::CullModeFlags::NONE);
        assert_eq!(topology(PrimitiveTopology::TriangleStrip), vk::PrimitiveTopology::TRIANGLE_STRIP);
        assert!(GRAPHICS_STAGES.contains(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT));
    }
}
