//! Errors surfaced by the RHI
//!
//! Only construction and resource creation report errors to callers.
//! Per-frame contract violations are logged and ignored instead.

use thiserror::Error;

use crate::config::ConfigError;

/// Result alias for RHI operations
pub type RhiResult<T> = Result<T, RhiError>;

/// RHI error type
///
/// Backend errors are flattened to strings so no native API types leak
/// through the device interface.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Device bring-up failed; the device was not constructed
    ///
    /// Raised for missing drivers, unsupported features, or a surface that
    /// could not be created.
    #[error("RHI initialization failed: {0}")]
    InitializationFailed(String),

    /// A buffer, texture, shader, or pipeline could not be created
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// A frame could not be recorded or submitted
    #[error("Rendering failed: {0}")]
    RenderingFailed(String),

    /// The handle does not name a live resource of this device
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),

    /// Error reported by the graphics backend
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Configuration could not be loaded or was invalid
    #[error(transparent)]
    Config(#[from] ConfigError),
}
