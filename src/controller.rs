//! Snapshot controller: one bounded, cancellable capture at a time
//!
//! A run moves through `Idle → Loading → Capturing → Done`, or straight to
//! `Done` on a load failure or timeout. When the deadline passes while the
//! page is still loading, the run first waits in `Closing` for the view to
//! confirm a close request. Exactly one outcome is committed per run; events
//! arriving after that are ignored.

use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;

use crate::compositor;
use crate::config::CaptureConfig;
use crate::engine::{CancellationToken, LoadFailure, LoadState, RenderView, SnapshotError, ViewEvent};
use crate::event_loop::{EventLoop, EventSink, LoopEvent};
use crate::logging::{LogSink, LOG_TAG};
use crate::timeout::TimeoutGuard;
use crate::{CaptureRequest, Capturer, Screenshot, Source};

/// Which terminal event ended a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// A raster was composed and encoded
    Captured,
    /// The snapshot had zero width; nothing to compose
    Empty,
    /// The engine could not produce a raster, or composing it failed
    SnapshotFailed,
    /// The source could not be read or the engine reported a failed load
    LoadFailed,
    /// The deadline passed before any other terminal event
    TimedOut,
}

/// Committed result of one run
#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    pub result: Option<Screenshot>,
    pub termination: Termination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Loading,
    Capturing,
    Closing,
    Done,
}

/// Per-run state. Lives only for the duration of [`SnapshotController::run`].
struct Run<'a> {
    request: &'a CaptureRequest,
    sink: EventSink,
    phase: Phase,
    outcome: Option<SnapshotOutcome>,
    guard: TimeoutGuard,
    close_guard: Option<TimeoutGuard>,
}

impl Run<'_> {
    /// Commit the run's outcome. Only the first call has any effect.
    fn commit(&mut self, result: Option<Screenshot>, termination: Termination) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(SnapshotOutcome { result, termination });
        true
    }
}

/// Drives one render view through load → snapshot → compose.
///
/// The controller owns its view and loop, so `run` taking `&mut self` is what
/// serializes captures on a reused view.
pub struct SnapshotController<V: RenderView> {
    view: V,
    event_loop: EventLoop,
    log: Arc<dyn LogSink>,
    default_timeout: Duration,
    close_grace: Option<Duration>,
    run_id: u64,
    current: Option<CancellationToken>,
    next_token: u64,
}

impl<V: RenderView> SnapshotController<V> {
    pub fn new(view: V, config: &CaptureConfig, log: Arc<dyn LogSink>) -> Self {
        Self {
            view,
            event_loop: EventLoop::new(),
            log,
            default_timeout: config.timeout(),
            close_grace: config.close_grace,
            run_id: 0,
            current: None,
            next_token: 1,
        }
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    fn uri(&self) -> String {
        self.view.uri().unwrap_or_default()
    }

    /// Capture `request`, blocking until exactly one terminal event.
    pub fn run(&mut self, request: &CaptureRequest) -> SnapshotOutcome {
        self.run_id += 1;
        let dropped = self.event_loop.drain();
        if dropped > 0 {
            self.log.debug(&format!(
                "{}[loop][drain] dropped {} stale event(s)",
                LOG_TAG, dropped
            ));
        }

        let body = match load_source(&request.source) {
            Ok(body) => body,
            Err(e) => {
                self.log.error(&format!(
                    "{}[load][failed] failed to read source: {}: {}",
                    LOG_TAG, request.uri, e
                ));
                return SnapshotOutcome { result: None, termination: Termination::LoadFailed };
            }
        };

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let mut run = Run {
            request,
            sink: self.event_loop.sink(self.run_id),
            phase: Phase::Idle,
            outcome: None,
            guard: TimeoutGuard::arm(&mut self.event_loop, timeout),
            close_guard: None,
        };

        self.log.debug(&format!("{}[load][html] {}", LOG_TAG, request.uri));
        if let Err(e) = self.view.load_html(&body, &request.uri, &run.sink) {
            self.log.error(&format!(
                "{}[load][failed] failed to load URI: {}: {}",
                LOG_TAG, request.uri, e
            ));
            run.commit(None, Termination::LoadFailed);
            self.finish(&mut run);
        } else {
            run.phase = Phase::Loading;
        }

        while run.phase != Phase::Done {
            match self.event_loop.next() {
                Some(LoopEvent::Timer(id)) => {
                    if run.guard.fire(id) {
                        self.on_timeout(&mut run);
                    } else if run.close_guard.as_mut().is_some_and(|g| g.fire(id)) {
                        self.log.error(&format!(
                            "{}[load][close-timeout] no close confirmation: {}",
                            LOG_TAG,
                            self.uri()
                        ));
                        self.finish(&mut run);
                    }
                }
                Some(LoopEvent::View(envelope)) if envelope.run != self.run_id => {
                    self.log.debug(&format!(
                        "{}[loop][stale] ignoring event from run {}",
                        LOG_TAG, envelope.run
                    ));
                }
                Some(LoopEvent::View(envelope)) => self.on_view_event(&mut run, envelope.event),
                None => {
                    self.log.error(&format!("{}[loop][closed] event loop disconnected", LOG_TAG));
                    run.commit(None, Termination::SnapshotFailed);
                    self.finish(&mut run);
                }
            }
        }

        run.outcome.unwrap_or(SnapshotOutcome { result: None, termination: Termination::SnapshotFailed })
    }

    fn on_view_event(&mut self, run: &mut Run<'_>, event: ViewEvent) {
        // Timed out and waiting for the close confirmation: only that matters.
        if run.phase == Phase::Closing {
            if matches!(event, ViewEvent::Closed) {
                self.log.error(&format!("{}[load][closed] {}", LOG_TAG, self.uri()));
                self.finish(run);
            }
            return;
        }

        match event {
            ViewEvent::Load(LoadState::Failed(failure)) => self.on_load_failed(run, failure),
            ViewEvent::Load(state) => {
                self.log.debug(&format!("{}[load][{}] {}", LOG_TAG, state.nick(), self.uri()));
                if state == LoadState::Finished {
                    self.start_snapshot(run);
                }
            }
            ViewEvent::SnapshotReady { token, result } => self.on_snapshot(run, token, result),
            ViewEvent::Closed => {
                self.log.debug(&format!("{}[load][closed] {}", LOG_TAG, self.uri()));
            }
        }
    }

    fn start_snapshot(&mut self, run: &mut Run<'_>) {
        self.log.debug(&format!("{}[screenshot][start] {}", LOG_TAG, self.uri()));
        self.cancel_snapshot();
        let token = CancellationToken::new(self.next_token);
        self.next_token += 1;
        self.current = Some(token.clone());
        self.view.snapshot(&token, &run.sink);
        run.phase = Phase::Capturing;
    }

    fn cancel_snapshot(&mut self) {
        if let Some(token) = self.current.take() {
            self.log.debug(&format!(
                "{}[snapshot][cancel] cancel screenshot: {}",
                LOG_TAG,
                self.uri()
            ));
            token.cancel();
        }
    }

    fn on_snapshot(
        &mut self,
        run: &mut Run<'_>,
        token: CancellationToken,
        result: Result<RgbaImage, SnapshotError>,
    ) {
        let is_current = self.current.as_ref() == Some(&token);

        let raster = match result {
            Err(e) => {
                self.log.error(&format!(
                    "{}[screenshot][failed] failed to create snapshot: {}: {}",
                    LOG_TAG,
                    self.uri(),
                    e
                ));
                if is_current {
                    self.current = None;
                    run.commit(None, Termination::SnapshotFailed);
                    self.finish(run);
                }
                return;
            }
            Ok(raster) if !is_current => {
                self.log.debug(&format!(
                    "{}[screenshot][stale] discarding {}x{} snapshot #{}: {}",
                    LOG_TAG,
                    raster.width(),
                    raster.height(),
                    token.id(),
                    self.uri()
                ));
                return;
            }
            Ok(raster) => raster,
        };

        self.current = None;
        self.log.debug(&format!(
            "{}[screenshot][finish] {}: {}x{}",
            LOG_TAG,
            self.uri(),
            raster.width(),
            raster.height()
        ));

        if raster.width() == 0 {
            run.commit(None, Termination::Empty);
        } else {
            match compositor::compose(&raster, run.request.width, run.request.height) {
                Ok(png) => {
                    run.commit(Some(Screenshot::from_png(&png)), Termination::Captured);
                }
                Err(e) => {
                    self.log.error(&format!(
                        "{}[screenshot][failed] failed to compose snapshot: {}: {}",
                        LOG_TAG,
                        self.uri(),
                        e
                    ));
                    run.commit(None, Termination::SnapshotFailed);
                }
            }
        }
        self.finish(run);
    }

    fn on_load_failed(&mut self, run: &mut Run<'_>, failure: LoadFailure) {
        self.cancel_snapshot();
        self.log.error(&format!(
            "{}[load][failed] failed to load URI: {}",
            LOG_TAG, failure
        ));
        run.commit(None, Termination::LoadFailed);
        self.finish(run);
    }

    fn on_timeout(&mut self, run: &mut Run<'_>) {
        let loading = self.view.is_loading();
        self.log.error(&format!(
            "{}[load][timeout] timeout to load URI: {:?}: {}{}",
            LOG_TAG,
            run.guard.duration(),
            self.uri(),
            if loading { ": loading" } else { "" }
        ));
        self.cancel_snapshot();
        run.commit(None, Termination::TimedOut);

        if loading {
            run.phase = Phase::Closing;
            if let Some(grace) = self.close_grace {
                run.close_guard = Some(TimeoutGuard::arm(&mut self.event_loop, grace));
            }
            self.view.try_close(&run.sink);
        } else {
            self.finish(run);
        }
    }

    fn finish(&mut self, run: &mut Run<'_>) {
        run.guard.disarm(&mut self.event_loop);
        if let Some(guard) = run.close_guard.as_mut() {
            guard.disarm(&mut self.event_loop);
        }
        run.phase = Phase::Done;
    }
}

fn load_source(source: &Source) -> std::io::Result<String> {
    match source {
        Source::Html(body) => Ok(body.clone()),
        Source::Path(path) => std::fs::read_to_string(path),
    }
}

/// [`Capturer`] that runs the controller on the caller's thread
pub struct InProcessCapturer<V: RenderView> {
    controller: SnapshotController<V>,
}

impl<V: RenderView> InProcessCapturer<V> {
    pub fn new(view: V, config: &CaptureConfig, log: Arc<dyn LogSink>) -> Self {
        Self {
            controller: SnapshotController::new(view, config, log),
        }
    }
}

impl<V: RenderView> Capturer for InProcessCapturer<V> {
    fn capture(&mut self, request: &CaptureRequest) -> Option<Screenshot> {
        self.controller.run(request).result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::scripted::{PageScript, ScriptedView, SnapshotStep};
    use crate::logging::{LogLevel, MemorySink};

    fn controller(script: PageScript) -> (SnapshotController<ScriptedView>, Arc<MemorySink>) {
        let log = MemorySink::new();
        let ctl = SnapshotController::new(ScriptedView::new(script), &CaptureConfig::default(), log.clone());
        (ctl, log)
    }

    fn request() -> CaptureRequest {
        CaptureRequest::html("<html><body>hi</body></html>", "http://example.com/", 80, 60)
            .unwrap()
            .with_timeout(Duration::from_millis(500))
    }

    #[test]
    fn zero_width_snapshot_commits_empty_result() {
        let (mut ctl, log) = controller(PageScript::rendering(RgbaImage::new(0, 0)));
        let outcome = ctl.run(&request());
        assert!(outcome.result.is_none());
        assert_eq!(outcome.termination, Termination::Empty);
        assert_eq!(log.count(LogLevel::Error, "[load][timeout]"), 0);
    }

    #[test]
    fn snapshot_failure_is_logged_and_empty() {
        let (mut ctl, log) = controller(PageScript {
            snapshots: vec![SnapshotStep::fail("raster extraction failed")],
            ..PageScript::default()
        });
        let outcome = ctl.run(&request());
        assert!(outcome.result.is_none());
        assert_eq!(outcome.termination, Termination::SnapshotFailed);
        assert_eq!(log.count(LogLevel::Error, "[screenshot][failed]"), 1);
    }

    #[test]
    fn unreadable_source_path_is_a_load_failure() {
        let (mut ctl, log) = controller(PageScript::default());
        let req = CaptureRequest::path("/nonexistent/rfshot/page.html", "file:///nonexistent", 10, 10).unwrap();
        let outcome = ctl.run(&req);
        assert_eq!(outcome.termination, Termination::LoadFailed);
        assert_eq!(log.count(LogLevel::Error, "[load][failed]"), 1);
        assert_eq!(ctl.view().snapshot_requests(), 0);
    }
}
