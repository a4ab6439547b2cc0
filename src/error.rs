//! Error types for screenshot capture
//!
//! Only setup steps return these. The capture path itself logs failures and
//! reports an empty result instead.

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while preparing or running a capture
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to initialize the render engine or a capturer
    #[error("Engine initialization failed: {0}")]
    InitializationError(String),

    /// Failed to read the source document or start a page load
    #[error("Failed to load: {0}")]
    LoadError(String),

    /// Failed to scale or encode a raster
    #[error("Composition failed: {0}")]
    ComposeError(String),

    /// Failed to spawn or talk to the worker process
    #[error("Worker process failed: {0}")]
    ProcessError(String),

    /// Invalid configuration or request
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
