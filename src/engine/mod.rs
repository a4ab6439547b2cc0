//! Render engine seam
//!
//! A render engine loads HTML, rasterizes the rendered document, and can be
//! asked to close its view. It is treated as opaque: everything it reports
//! arrives asynchronously as a [`ViewEvent`] posted through an [`EventSink`].

pub mod scripted;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::RgbaImage;
use thiserror::Error;

pub use crate::event_loop::EventSink;
use crate::Result;

/// Details of a failed page load as reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    /// URI that failed to load
    pub uri: String,
    /// Engine error domain (e.g. `cdp`, `network`)
    pub kind: String,
    /// Engine error code
    pub code: i32,
    pub message: String,
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}({}): {}", self.uri, self.kind, self.code, self.message)
    }
}

/// Load progress reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Started,
    Redirected,
    Committed,
    Finished,
    Failed(LoadFailure),
}

impl LoadState {
    /// Short lower-case name used in log tags
    pub fn nick(&self) -> &'static str {
        match self {
            LoadState::Started => "started",
            LoadState::Redirected => "redirected",
            LoadState::Committed => "committed",
            LoadState::Finished => "finished",
            LoadState::Failed(_) => "failed",
        }
    }
}

/// Why a snapshot request produced no raster
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot was cancelled")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

/// Identity-bearing handle for one in-flight snapshot request.
///
/// Clones share the cancelled flag. Two tokens are equal only when they are
/// clones of the same original, so a late result for a superseded request can
/// always be told apart from the current one.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl PartialEq for CancellationToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.cancelled, &other.cancelled)
    }
}

impl Eq for CancellationToken {}

/// Something the engine reports back to the controller
#[derive(Debug)]
pub enum ViewEvent {
    Load(LoadState),
    SnapshotReady {
        token: CancellationToken,
        result: std::result::Result<RgbaImage, SnapshotError>,
    },
    /// The view confirmed a close request
    Closed,
}

/// A headless view the controller can drive.
///
/// Implementations must not block: long work happens elsewhere and its
/// outcome is posted through the sink. The sink passed to each call belongs
/// to the current run; events posted through an older sink are discarded.
pub trait RenderView {
    /// Start loading `body` as if it had been fetched from `uri`
    fn load_html(&mut self, body: &str, uri: &str, events: &EventSink) -> Result<()>;

    /// Request a raster of the full document, keyed to `token`
    fn snapshot(&mut self, token: &CancellationToken, events: &EventSink);

    /// Ask the view to close; confirmation arrives as [`ViewEvent::Closed`]
    fn try_close(&mut self, events: &EventSink);

    /// Whether a load is still in progress
    fn is_loading(&self) -> bool;

    /// Current URI of the view, if any
    fn uri(&self) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_compare_by_identity() {
        let a = CancellationToken::new(1);
        let a2 = a.clone();
        let b = CancellationToken::new(1);
        assert_eq!(a, a2);
        assert_ne!(a, b);

        a.cancel();
        assert!(a2.is_cancelled());
        assert!(!b.is_cancelled());
    }

    #[test]
    fn load_failure_display_names_uri_and_code() {
        let failure = LoadFailure {
            uri: "http://example.com/".into(),
            kind: "network".into(),
            code: 404,
            message: "Not Found".into(),
        };
        assert_eq!(
            failure.to_string(),
            "http://example.com/: network(404): Not Found"
        );
        assert_eq!(LoadState::Failed(failure).nick(), "failed");
    }
}
