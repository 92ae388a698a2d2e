//! # RHI Configuration
//!
//! Settings consumed by [`VulkanDevice`](crate::backend::vulkan::VulkanDevice)
//! at construction. Every field has a default, so partial TOML/RON files are
//! accepted.

use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};

/// Upper bound for either descriptor pool capacity
pub const MAX_DESCRIPTOR_SETS: u32 = 65_536;

/// Device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhiConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Size of the frame ring; bounds how far the CPU may run ahead of the GPU
    pub frames_in_flight: usize,
    /// Prefer FIFO presentation over MAILBOX
    pub vsync: bool,
    /// Whether to enable Vulkan validation layers. `None` enables them in debug builds only
    pub enable_validation: Option<bool>,
    /// Clear color applied by the frame pass (RGBA, linear)
    pub clear_color: [f32; 4],
    /// Descriptor sets each frame-scoped pool can hand out before a reset
    pub descriptor_sets_per_frame: u32,
    /// Capacity of the pool backing the texture descriptor sets
    pub max_textures: u32,
}

impl RhiConfig {
    /// Create a configuration with defaults and the given application name
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Set the frame ring size
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Enable or disable vsync
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the clear color
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Set the per-frame descriptor pool capacity
    pub fn with_descriptor_sets_per_frame(mut self, sets: u32) -> Self {
        self.descriptor_sets_per_frame = sets;
        self
    }

    /// Resolve the validation setting against the build type
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }

        if self.frames_in_flight == 0 {
            return Err("Frames in flight must be at least 1".to_string());
        }

        if self.frames_in_flight > 8 {
            return Err("Frames in flight should not exceed 8".to_string());
        }

        if self.descriptor_sets_per_frame == 0 || self.max_textures == 0 {
            return Err("Descriptor pool capacities must be non-zero".to_string());
        }

        if self.descriptor_sets_per_frame > MAX_DESCRIPTOR_SETS || self.max_textures > MAX_DESCRIPTOR_SETS {
            return Err(format!("Descriptor pool capacities should not exceed {}", MAX_DESCRIPTOR_SETS));
        }

        if self.clear_color.iter().any(|c| !c.is_finite()) {
            return Err("Clear color components must be finite".to_string());
        }

        Ok(())
    }

    /// Load from a `.toml`/`.ron` file and validate
    pub fn load_validated(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}

impl Default for RhiConfig {
    fn default() -> Self {
        Self {
            application_name: "Rust RHI Application".to_string(),
            frames_in_flight: 3,
            vsync: true,
            enable_validation: None,
            clear_color: [0.05, 0.05, 0.08, 1.0],
            descriptor_sets_per_frame: 256,
            max_textures: 1024,
        }
    }
}

impl Config for RhiConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    #[test]
    fn test_default_is_valid() {
        let config = RhiConfig::default();
        assert_eq!(config.frames_in_flight, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        assert!(RhiConfig::default().with_frames_in_flight(0).validate().is_err());
        assert!(RhiConfig::default().with_frames_in_flight(9).validate().is_err());
        assert!(RhiConfig::default().with_frames_in_flight(8).validate().is_ok());
        assert!(RhiConfig::default().with_frames_in_flight(1).validate().is_ok());
    }

    #[test]
    fn test_descriptor_capacity_bounds() {
        assert!(RhiConfig::default().with_descriptor_sets_per_frame(0).validate().is_err());
        assert!(RhiConfig::default()
            .with_descriptor_sets_per_frame(MAX_DESCRIPTOR_SETS)
            .validate()
            .is_ok());
        assert!(RhiConfig::default()
            .with_descriptor_sets_per_frame(MAX_DESCRIPTOR_SETS + 1)
            .validate()
            .is_err());

        let config = RhiConfig {
            max_textures: u32::MAX,
            ..RhiConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(RhiConfig::new("").validate().is_err());
    }

    /// Partial files fall back to defaults for missing keys
    #[test]
    fn test_partial_toml() {
        let config = RhiConfig::from_str_with_format(
            "application_name = \"demo\"\nframes_in_flight = 2\nvsync = false\n",
            ConfigFormat::Toml,
        )
        .unwrap();
        assert_eq!(config.application_name, "demo");
        assert_eq!(config.frames_in_flight, 2);
        assert!(!config.vsync);
        assert_eq!(config.max_textures, RhiConfig::default().max_textures);
    }

    #[test]
    fn test_ron_round_trip() {
        let config = RhiConfig::new("ron").with_clear_color([1.0, 0.0, 0.0, 1.0]).with_validation(true);
        let text = config.to_string_with_format(ConfigFormat::Ron).unwrap();
        let parsed = RhiConfig::from_str_with_format(&text, ConfigFormat::Ron).unwrap();
        assert_eq!(parsed, config);
    }
}
