//! RFox Screenshot
//!
//! Renders an HTML document headlessly and captures a bitmap of the fully
//! rendered page, scaled to a caller-chosen size, for use as an artifact in a
//! document-processing pipeline.
//!
//! # Features
//!
//! - **Bounded waits**: every capture ends on exactly one of snapshot success,
//!   snapshot failure, load failure or timeout
//! - **Best effort**: degraded outcomes are logged and reported as an empty
//!   result, never raised
//! - **Process isolation**: the same capture can run in a worker process whose
//!   log output is relayed back to the host
//! - **CDP Backend** (default): headless Chrome via the `headless_chrome` crate
//!
//! # Example
//!
//! ```no_run
//! use rfshot::{CaptureConfig, CaptureRequest};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CaptureConfig::from_env();
//! let mut capturer = rfshot::new_capturer(&config, Arc::new(rfshot::LogCrateSink))?;
//!
//! let request = CaptureRequest::html("<h1>Hello</h1>", "http://example.com/", 320, 240)?;
//! if let Some(screenshot) = capturer.capture(&request) {
//!     std::fs::write("hello.png", screenshot.decode()?)?;
//! }
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as Base64Engine;
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::{CaptureConfig, CaptureMode, ProxySettings, Viewport};

pub mod logging;
pub use logging::{LogCrateSink, LogEvent, LogLevel, LogSink, MemorySink, StdoutSink};

pub mod compositor;
pub mod engine;
pub mod event_loop;
pub mod timeout;

pub mod controller;
pub use controller::{InProcessCapturer, SnapshotController, SnapshotOutcome, Termination};

pub mod bridge;
pub use bridge::{ExternalCapturer, ProcessBridge, ProcessOutcome};

#[cfg(feature = "cdp")]
pub mod cdp;

// Async-friendly handle serializing captures on one long-lived capturer
pub mod async_api;
pub use async_api::Screenshoter;

/// Mime type of every screenshot this crate produces
pub const PNG_MIME_TYPE: &str = "image/png";

/// Encoding tag for base64-wrapped screenshot data
pub const BASE64_ENCODING: &str = "base64";

/// Where the HTML to render comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Inline document body
    Html(String),
    /// File holding the document body
    Path(PathBuf),
}

/// One capture: what to render, where it claims to come from, and the size of
/// the resulting image
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub source: Source,
    /// Origin URI; relative references in the document resolve against it
    pub uri: String,
    pub width: u32,
    pub height: u32,
    /// Overrides the configured deadline for this request
    pub timeout: Option<Duration>,
}

impl CaptureRequest {
    pub fn new(source: Source, uri: impl Into<String>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::ConfigError(format!(
                "screenshot size must be non-zero, got {}x{}",
                width, height
            )));
        }
        Ok(Self {
            source,
            uri: uri.into(),
            width,
            height,
            timeout: None,
        })
    }

    pub fn html(body: impl Into<String>, uri: impl Into<String>, width: u32, height: u32) -> Result<Self> {
        Self::new(Source::Html(body.into()), uri, width, height)
    }

    pub fn path(path: impl Into<PathBuf>, uri: impl Into<String>, width: u32, height: u32) -> Result<Self> {
        Self::new(Source::Path(path.into()), uri, width, height)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_timeout_seconds(self, seconds: u64) -> Self {
        self.with_timeout(Duration::from_secs(seconds))
    }
}

/// A captured, encoded screenshot artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    pub mime_type: String,
    /// Image data, wrapped according to `encoding`
    pub data: String,
    /// `Some("base64")` for base64 text; `None` for raw data
    pub encoding: Option<String>,
}

impl Screenshot {
    /// Wrap PNG bytes as a base64-encoded `image/png` artifact
    pub fn from_png(png: &[u8]) -> Self {
        Self {
            mime_type: PNG_MIME_TYPE.to_string(),
            data: Base64Engine::encode(&base64::engine::general_purpose::STANDARD, png),
            encoding: Some(BASE64_ENCODING.to_string()),
        }
    }

    /// Image bytes with the transfer encoding removed
    pub fn decode(&self) -> Result<Vec<u8>> {
        match self.encoding.as_deref() {
            Some(BASE64_ENCODING) => {
                Base64Engine::decode(&base64::engine::general_purpose::STANDARD, &self.data)
                    .map_err(|e| Error::Other(format!("Invalid base64 screenshot data: {}", e)))
            }
            None => Ok(self.data.as_bytes().to_vec()),
            Some(other) => Err(Error::Other(format!("Unsupported screenshot encoding: {}", other))),
        }
    }
}

/// Something that turns a [`CaptureRequest`] into an optional screenshot.
///
/// `None` is a valid outcome: the page failed to load, timed out, or rendered
/// nothing. The reason is reported through the capturer's [`LogSink`].
pub trait Capturer {
    fn capture(&mut self, request: &CaptureRequest) -> Option<Screenshot>;
}

impl<C: Capturer + ?Sized> Capturer for Box<C> {
    fn capture(&mut self, request: &CaptureRequest) -> Option<Screenshot> {
        (**self).capture(request)
    }
}

/// Create a capturer that drives a render engine on the calling thread.
///
/// Uses the CDP backend; fails when the crate is built without it.
#[cfg(feature = "cdp")]
pub fn in_process_capturer(config: &CaptureConfig, log: Arc<dyn LogSink>) -> Result<Box<dyn Capturer + Send>> {
    let view = cdp::ChromeView::new(config)?;
    Ok(Box::new(InProcessCapturer::new(view, config, log)))
}

#[cfg(not(feature = "cdp"))]
pub fn in_process_capturer(_config: &CaptureConfig, _log: Arc<dyn LogSink>) -> Result<Box<dyn Capturer + Send>> {
    Err(Error::InitializationError(
        "no render engine compiled in; enable the `cdp` feature".into(),
    ))
}

/// Create the capturer selected by `config.mode`
pub fn new_capturer(config: &CaptureConfig, log: Arc<dyn LogSink>) -> Result<Box<dyn Capturer + Send>> {
    match config.mode {
        CaptureMode::InProcess => in_process_capturer(config, log),
        CaptureMode::External => Ok(Box::new(ExternalCapturer::from_config(config, log))),
    }
}
