//! SPIR-V shader modules and multi-stage shader programs

use std::ffi::CString;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::{vk, Device};

use crate::backend::vulkan::initialization::{VulkanError, VulkanResult};
use crate::rhi::handles::{ShaderDesc, ShaderStage, ShaderStageDesc};

static NEXT_SHADER_ID: AtomicU64 = AtomicU64::new(1);

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a shader module from SPIR-V bytes
    pub fn from_bytes(device: &Device, bytes: &[u8]) -> VulkanResult<Self> {
        log::debug!("[SHADER] Creating shader module from {} bytes", bytes.len());

        // Copies into u32 words, so the input slice needs no particular alignment
        let code = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| {
            log::error!("[SHADER] Invalid SPIR-V: {}", e);
            VulkanError::ShaderBytecode(e.to_string())
        })?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe {
            device.create_shader_module(&create_info, None).map_err(|e| {
                log::error!("[SHADER] vkCreateShaderModule failed: {:?}", e);
                VulkanError::Api(e)
            })?
        };

        Ok(Self {
            device: device.clone(),
            module,
        })
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// One stage of a program: a possibly shared module plus its entry point
pub struct StageModule<M> {
    /// Pipeline stage
    pub stage: ShaderStage,
    /// Module; stages with identical bytecode share one
    pub module: Arc<M>,
    /// Entry point name
    pub entry_point: CString,
}

/// Build one module per distinct bytecode among `stages`
///
/// Stages whose bytecode is byte-for-byte identical receive the same module.
pub fn dedup_stage_modules<M, F>(stages: &[ShaderStageDesc<'_>], mut create: F) -> VulkanResult<Vec<StageModule<M>>>
where
    F: FnMut(&[u8]) -> VulkanResult<M>,
{
    let mut built: Vec<(&[u8], Arc<M>)> = Vec::new();
    let mut result = Vec::with_capacity(stages.len());

    for desc in stages {
        let module = match built.iter().find(|(code, _)| *code == desc.bytecode) {
            Some((_, module)) => Arc::clone(module),
            None => {
                let module = Arc::new(create(desc.bytecode)?);
                built.push((desc.bytecode, Arc::clone(&module)));
                module
            }
        };

        let entry_point = CString::new(desc.entry_point.as_str()).map_err(|_| {
            VulkanError::ShaderBytecode(format!("entry point {:?} contains a NUL byte", desc.entry_point))
        })?;

        result.push(StageModule {
            stage: desc.stage,
            module,
            entry_point,
        });
    }

    Ok(result)
}

/// Stage flag for a shader stage
pub fn stage_flags(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

/// Backend shader behind a `ShaderHandle`
pub struct VulkanShader {
    id: u64,
    stages: Vec<StageModule<ShaderModule>>,
}

impl VulkanShader {
    /// Create modules for every stage in `desc`
    pub fn create(device: &Device, desc: &ShaderDesc<'_>) -> VulkanResult<Self> {
        if desc.stages.is_empty() {
            return Err(VulkanError::ShaderBytecode("shader has no stages".to_string()));
        }

        let stages = dedup_stage_modules(&desc.stages, |code| ShaderModule::from_bytes(device, code))?;
        let id = NEXT_SHADER_ID.fetch_add(1, Ordering::Relaxed);
        log::debug!("[SHADER] Created shader #{} with {} stage(s)", id, stages.len());

        Ok(Self { id, stages })
    }

    /// Process-unique, monotonically increasing identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stages in creation order
    pub fn stages(&self) -> &[StageModule<ShaderModule>] {
        &self.stages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeModule(usize);

    #[test]
    fn test_identical_bytecode_shares_module() {
        let code = [3u8, 2, 35, 7, 0, 0, 1, 0];
        let stages = [
            ShaderStageDesc::new(ShaderStage::Vertex, &code).with_entry_point("vs_main"),
            ShaderStageDesc::new(ShaderStage::Fragment, &code).with_entry_point("fs_main"),
        ];
        let created = Cell::new(0);

        let modules = dedup_stage_modules(&stages, |_| {
            created.set(created.get() + 1);
            Ok(FakeModule(created.get()))
        })
        .unwrap();

        assert_eq!(created.get(), 1);
        assert!(Arc::ptr_eq(&modules[0].module, &modules[1].module));
        assert_eq!(modules[0].entry_point.to_str().unwrap(), "vs_main");
        assert_eq!(modules[1].entry_point.to_str().unwrap(), "fs_main");
    }

    #[test]
    fn test_distinct_bytecode_gets_distinct_modules() {
        let vertex = [3u8, 2, 35, 7, 1, 0, 0, 0];
        let fragment = [3u8, 2, 35, 7, 2, 0, 0, 0];
        let stages = [
            ShaderStageDesc::new(ShaderStage::Vertex, &vertex),
            ShaderStageDesc::new(ShaderStage::Fragment, &fragment),
            ShaderStageDesc::new(ShaderStage::Geometry, &vertex),
        ];
        let created = Cell::new(0);

        let modules = dedup_stage_modules(&stages, |_| {
            created.set(created.get() + 1);
            Ok(FakeModule(created.get()))
        })
        .unwrap();

        assert_eq!(created.get(), 2);
        assert!(!Arc::ptr_eq(&modules[0].module, &modules[1].module));
        assert!(Arc::ptr_eq(&modules[0].module, &modules[2].module));
        assert_eq!(modules[1].module.0, 2);
        assert_eq!(modules[0].entry_point.to_str().unwrap(), "main");
    }

    #[test]
    fn test_creation_error_propagates() {
        let code = [0u8; 4];
        let stages = [ShaderStageDesc::new(ShaderStage::Vertex, &code)];
        let result = dedup_stage_modules::<FakeModule, _>(&stages, |_| {
            Err(VulkanError::ShaderBytecode("bad".to_string()))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_nul_entry_point_rejected() {
        let code = [0u8; 4];
        let stages = [ShaderStage::Vertex].map(|s| ShaderStageDesc::new(s, &code).with_entry_point("ma\0in"));
        assert!(dedup_stage_modules(&stages, |_| Ok(FakeModule(0))).is_err());
    }

    #[test]
    fn test_ids_increase() {
        let a = NEXT_SHADER_ID.fetch_add(1, Ordering::Relaxed);
        let b = NEXT_SHADER_ID.fetch_add(1, Ordering::Relaxed);
        assert!(b > a);
    }

    #[test]
    fn test_stage_flags() {
        assert_eq!(stage_flags(ShaderStage::Vertex), vk::ShaderStageFlags::VERTEX);
        assert_eq!(stage_flags(ShaderStage::Geometry), vk::ShaderStageFlags::GEOMETRY);
    }
}
