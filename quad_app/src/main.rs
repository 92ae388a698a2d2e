//! Quad demo
//!
//! Draws a spinning, textured quad through the RHI's per-frame call sequence.
//! Shaders are compiled by `build.rs`; run with `VULKAN_SDK` set.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use glfw::{Action, Key, WindowEvent};
use rust_rhi::foundation::logging;
use rust_rhi::prelude::*;
use rust_rhi::rhi::ShaderDataType;
use thiserror::Error;

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;
const CHECKER_SIZE: u32 = 64;

const UNIFORM_SLOT: u32 = 0;
const TEXTURE_SLOT: u32 = 1;

#[derive(Error, Debug)]
enum DemoError {
    #[error("GLFW error: {0}")]
    Glfw(String),

    #[error("Failed to read shader {path:?}: {source}")]
    Shader { path: PathBuf, source: std::io::Error },

    #[error(transparent)]
    Rhi(#[from] RhiError),
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

unsafe impl bytemuck::Pod for QuadVertex {}
unsafe impl bytemuck::Zeroable for QuadVertex {}

const VERTICES: [QuadVertex; 4] = [
    QuadVertex { position: [-0.5, -0.5], uv: [0.0, 0.0] },
    QuadVertex { position: [0.5, -0.5], uv: [1.0, 0.0] },
    QuadVertex { position: [0.5, 0.5], uv: [1.0, 1.0] },
    QuadVertex { position: [-0.5, 0.5], uv: [0.0, 1.0] },
];

const INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

/// RGB checkerboard, 8 texels per square
fn checkerboard(size: u32) -> Vec<u8> {
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            if (x / 8 + y / 8) % 2 == 0 {
                [235, 235, 235]
            } else {
                [40, 90, 200]
            }
        })
        .collect()
}

fn load_spirv(name: &str) -> Result<Vec<u8>, DemoError> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("target/shaders").join(name);
    std::fs::read(&path).map_err(|source| DemoError::Shader { path, source })
}

struct Scene {
    pipeline: PipelineHandle,
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    uniform_buffer: BufferHandle,
    texture: TextureHandle,
    uniforms: UniformBlock,
}

impl Scene {
    fn new(device: &mut VulkanDevice) -> Result<Self, DemoError> {
        let vertex_code = load_spirv("quad.vert.spv")?;
        let fragment_code = load_spirv("quad.frag.spv")?;
        let shader = device.create_shader(
            &ShaderDesc::default()
                .stage(ShaderStageDesc::new(ShaderStage::Vertex, &vertex_code))
                .stage(ShaderStageDesc::new(ShaderStage::Fragment, &fragment_code)),
        )?;

        let frame_block = UniformBlockLayout::new(
            "Frame",
            [
                ("transform", ShaderDataType::Mat4),
                ("tint", ShaderDataType::Vec4),
                ("time", ShaderDataType::Float),
            ],
        );
        let shader_layout = ShaderLayout::builder()
            .uniform_buffer(UNIFORM_SLOT, 0, 0, frame_block.clone())
            .sampler(TEXTURE_SLOT, 1, 0)
            .build();

        let mut pipeline_desc = PipelineDesc::new(
            shader,
            Arc::new(shader_layout),
            VertexLayout::new(&[VertexFormat::Float2, VertexFormat::Float2]),
        );
        pipeline_desc.cull_mode = CullMode::None;
        pipeline_desc.enable_blending = true;
        pipeline_desc.push_constant_size = std::mem::size_of::<[f32; 2]>() as u32;
        let pipeline = device.create_pipeline_state(&pipeline_desc)?;

        let vertex_buffer =
            device.create_buffer(&BufferDesc::with_data(BufferType::Vertex, bytemuck::cast_slice(&VERTICES)))?;
        let index_buffer =
            device.create_buffer(&BufferDesc::with_data(BufferType::Index, bytemuck::cast_slice(&INDICES)))?;
        let uniform_buffer =
            device.create_buffer(&BufferDesc::dynamic(BufferType::Uniform, u64::from(frame_block.size())))?;

        let pixels = checkerboard(CHECKER_SIZE);
        let texture = device.create_texture(&TextureDesc {
            width: CHECKER_SIZE,
            height: CHECKER_SIZE,
            mips: u32::MAX,
            format: TextureFormat::Rgb8,
            usage: TextureUsage::SAMPLED,
            data: Some(&pixels),
        })?;

        Ok(Self {
            pipeline,
            vertex_buffer,
            index_buffer,
            uniform_buffer,
            texture,
            uniforms: UniformBlock::new(Arc::new(frame_block)),
        })
    }

    fn draw(&mut self, device: &mut VulkanDevice, elapsed: f32) {
        let (width, height) = device.extent();
        let aspect = width as f32 / height.max(1) as f32;
        let transform = Mat4::new_nonuniform_scaling(&Vec3::new(1.0 / aspect, 1.0, 1.0))
            * Mat4::new_rotation(Vec3::z() * elapsed);

        self.uniforms
            .set("transform", UniformValue::Mat4(transform))
            .set("tint", UniformValue::Vec4(Vec4::new(1.0, 1.0, 1.0, 1.0)))
            .set("time", UniformValue::Float(elapsed));
        device.update_buffer(self.uniform_buffer, 0, self.uniforms.bytes());

        let offset = [0.25 * (elapsed * 0.7).sin(), 0.0f32];

        device.bind_pipeline_state(self.pipeline);
        device.bind_vertex_buffer(self.vertex_buffer);
        device.bind_index_buffer(self.index_buffer);
        device.bind_uniform_buffer(self.uniform_buffer, UNIFORM_SLOT);
        device.bind_texture(self.texture, TEXTURE_SLOT);
        device.push_constants(bytemuck::cast_slice(&offset));
        device.draw_indexed(INDICES.len() as u32);
    }
}

fn run() -> Result<(), DemoError> {
    let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|e| DemoError::Glfw(format!("{:?}", e)))?;
    glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
    glfw.window_hint(glfw::WindowHint::Resizable(true));

    let (mut window, events) = glfw
        .create_window(WIDTH, HEIGHT, "RHI Quad", glfw::WindowMode::Windowed)
        .ok_or_else(|| DemoError::Glfw("window creation failed".to_string()))?;
    window.set_key_polling(true);
    window.set_framebuffer_size_polling(true);

    let mut device = {
        let surface = GlfwSurface::new(&glfw, &window);
        VulkanDevice::new(&surface, RhiConfig::new("quad_demo").with_clear_color([0.02, 0.02, 0.05, 1.0]))?
    };
    let mut scene = Scene::new(&mut device)?;

    let start = Instant::now();
    while !window.should_close() {
        glfw.poll_events();
        for (_, event) in glfw::flush_messages(&events) {
            match event {
                WindowEvent::FramebufferSize(width, height) => {
                    device.resize(width.max(0) as u32, height.max(0) as u32);
                }
                WindowEvent::Key(Key::Escape, _, Action::Press, _) => window.set_should_close(true),
                _ => {}
            }
        }

        if !device.begin_frame()? {
            // Minimized or out of date; try again shortly
            std::thread::sleep(Duration::from_millis(16));
            continue;
        }
        scene.draw(&mut device, start.elapsed().as_secs_f32());
        device.end_frame()?;
        device.present()?;
    }

    device.on_destroy();
    let stats = device.frame_stats();
    log::info!(
        "Presented {} frames ({} skipped, {} swapchain rebuilds)",
        stats.presented,
        stats.skipped,
        stats.swapchain_rebuilds
    );
    Ok(())
}

fn main() {
    logging::init();

    if let Err(e) = run() {
        log::error!("quad_demo failed: {}", e);
        std::process::exit(1);
    }
}
