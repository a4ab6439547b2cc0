//! Deterministic render engine driven by a [`PageScript`]
//!
//! Useful for dry runs without a browser and for exercising the controller's
//! state machine: load states, snapshot latency, failures, cancellation and
//! close confirmation are all spelled out up front. Events are posted from
//! short-lived helper threads, like a real engine calling back from its own
//! thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use image::{Rgba, RgbaImage};

use super::{CancellationToken, LoadState, RenderView, SnapshotError, ViewEvent};
use crate::event_loop::EventSink;
use crate::Result;

/// Outcome of one snapshot request
#[derive(Debug, Clone)]
pub enum SnapshotScript {
    Raster(RgbaImage),
    Fail(String),
    /// Never answer
    Never,
}

/// One snapshot answer and how long it takes
#[derive(Debug, Clone)]
pub struct SnapshotStep {
    pub delay: Duration,
    pub outcome: SnapshotScript,
}

impl SnapshotStep {
    pub fn raster(raster: RgbaImage) -> Self {
        Self { delay: Duration::ZERO, outcome: SnapshotScript::Raster(raster) }
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        Self::raster(RgbaImage::from_pixel(width, height, Rgba(rgba)))
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self { delay: Duration::ZERO, outcome: SnapshotScript::Fail(message.into()) }
    }

    pub fn never() -> Self {
        Self { delay: Duration::ZERO, outcome: SnapshotScript::Never }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Everything the scripted view will do for one page
#[derive(Debug, Clone)]
pub struct PageScript {
    /// Wait before the first load state is posted
    pub load_delay: Duration,
    /// Load states posted in order; the page stops loading at `Finished` or
    /// `Failed`, and keeps loading forever if neither appears
    pub states: Vec<LoadState>,
    /// Answers for successive snapshot requests; the last one repeats
    pub snapshots: Vec<SnapshotStep>,
    /// Answer cancelled requests with their scripted outcome instead of
    /// [`SnapshotError::Cancelled`]
    pub ignore_cancellation: bool,
    /// Post [`ViewEvent::Closed`] when asked to close
    pub confirm_close: bool,
}

impl Default for PageScript {
    fn default() -> Self {
        Self {
            load_delay: Duration::ZERO,
            states: vec![LoadState::Started, LoadState::Committed, LoadState::Finished],
            snapshots: vec![SnapshotStep::solid(800, 600, [255, 255, 255, 255])],
            ignore_cancellation: false,
            confirm_close: true,
        }
    }
}

impl PageScript {
    /// A page that loads normally and snapshots to `raster`
    pub fn rendering(raster: RgbaImage) -> Self {
        Self {
            snapshots: vec![SnapshotStep::raster(raster)],
            ..Self::default()
        }
    }
}

pub struct ScriptedView {
    script: PageScript,
    snapshot_requests: usize,
    loading: Arc<AtomicBool>,
    uri: Arc<Mutex<Option<String>>>,
    close_requests: usize,
}

impl ScriptedView {
    pub fn new(script: PageScript) -> Self {
        Self {
            script,
            snapshot_requests: 0,
            loading: Arc::new(AtomicBool::new(false)),
            uri: Arc::new(Mutex::new(None)),
            close_requests: 0,
        }
    }

    /// Replace the script used from the next load on
    pub fn set_script(&mut self, script: PageScript) {
        self.script = script;
        self.snapshot_requests = 0;
    }

    pub fn snapshot_requests(&self) -> usize {
        self.snapshot_requests
    }

    pub fn close_requests(&self) -> usize {
        self.close_requests
    }
}

impl RenderView for ScriptedView {
    fn load_html(&mut self, _body: &str, uri: &str, events: &EventSink) -> Result<()> {
        if let Ok(mut current) = self.uri.lock() {
            *current = Some(uri.to_string());
        }
        self.loading.store(true, Ordering::SeqCst);

        let states = self.script.states.clone();
        let delay = self.script.load_delay;
        let loading = self.loading.clone();
        let events = events.clone();
        thread::spawn(move || {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            for state in states {
                let stops = matches!(state, LoadState::Finished | LoadState::Failed(_));
                if stops {
                    loading.store(false, Ordering::SeqCst);
                }
                if !events.post(ViewEvent::Load(state)) {
                    return;
                }
            }
        });
        Ok(())
    }

    fn snapshot(&mut self, token: &CancellationToken, events: &EventSink) {
        let index = self.snapshot_requests;
        self.snapshot_requests += 1;
        let step = match self.script.snapshots.get(index).or(self.script.snapshots.last()) {
            Some(step) => step.clone(),
            None => return,
        };
        if matches!(step.outcome, SnapshotScript::Never) {
            return;
        }

        let ignore_cancellation = self.script.ignore_cancellation;
        let token = token.clone();
        let events = events.clone();
        thread::spawn(move || {
            if !step.delay.is_zero() {
                thread::sleep(step.delay);
            }
            let result = if token.is_cancelled() && !ignore_cancellation {
                Err(SnapshotError::Cancelled)
            } else {
                match step.outcome {
                    SnapshotScript::Raster(raster) => Ok(raster),
                    SnapshotScript::Fail(message) => Err(SnapshotError::Failed(message)),
                    SnapshotScript::Never => return,
                }
            };
            events.post(ViewEvent::SnapshotReady { token, result });
        });
    }

    fn try_close(&mut self, events: &EventSink) {
        self.close_requests += 1;
        if self.script.confirm_close {
            self.loading.store(false, Ordering::SeqCst);
            events.post(ViewEvent::Closed);
        }
    }

    fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    fn uri(&self) -> Option<String> {
        self.uri.lock().ok().and_then(|u| u.clone())
    }
}
