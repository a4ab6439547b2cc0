//! Capture properties of the in-process controller, driven by the scripted engine

use std::sync::Arc;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use rfshot::engine::scripted::{PageScript, ScriptedView, SnapshotStep};
use rfshot::engine::{LoadFailure, LoadState};
use rfshot::{CaptureConfig, CaptureRequest, LogLevel, MemorySink, Screenshot, SnapshotController, Termination};

const RED: [u8; 4] = [255, 0, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

fn controller_with(
    script: PageScript,
    config: CaptureConfig,
) -> (SnapshotController<ScriptedView>, Arc<MemorySink>) {
    let log = MemorySink::new();
    let ctl = SnapshotController::new(ScriptedView::new(script), &config, log.clone());
    (ctl, log)
}

fn controller(script: PageScript) -> (SnapshotController<ScriptedView>, Arc<MemorySink>) {
    controller_with(script, CaptureConfig::default())
}

fn request(width: u32, height: u32, timeout_ms: u64) -> CaptureRequest {
    CaptureRequest::html(
        "<!DOCTYPE html><html><body><h1>Hello</h1></body></html>",
        "http://example.com/page.html",
        width,
        height,
    )
    .expect("valid request")
    .with_timeout(Duration::from_millis(timeout_ms))
}

fn decode(shot: &Screenshot) -> RgbaImage {
    let png = shot.decode().expect("base64");
    assert_eq!(&png[0..8], b"\x89PNG\r\n\x1a\n");
    image::load_from_memory(&png).expect("png").to_rgba8()
}

fn close_to(px: &Rgba<u8>, want: [u8; 4]) -> bool {
    px.0.iter().zip(want.iter()).all(|(a, b)| (*a as i16 - *b as i16).abs() <= 8)
}

#[test]
fn finished_load_yields_image_of_requested_size() {
    let script = PageScript {
        snapshots: vec![SnapshotStep::solid(1600, 1200, RED)],
        ..PageScript::default()
    };
    let (mut ctl, log) = controller(script);

    let outcome = ctl.run(&request(800, 600, 2000));
    assert_eq!(outcome.termination, Termination::Captured);
    let shot = outcome.result.expect("screenshot");
    assert_eq!(shot.mime_type, "image/png");
    assert_eq!(shot.encoding.as_deref(), Some("base64"));

    let img = decode(&shot);
    assert_eq!(img.dimensions(), (800, 600));
    // ratio 0.5: scaled content covers the whole canvas
    assert!(img.pixels().all(|px| close_to(px, RED)));

    assert_eq!(log.count(LogLevel::Debug, "[screenshot][finish]"), 1);
    assert_eq!(log.count(LogLevel::Debug, "1600x1200"), 1);
    assert!(log.messages(LogLevel::Error).is_empty());
}

#[test]
fn upscaled_raster_with_other_aspect_leaves_white_band() {
    let script = PageScript {
        snapshots: vec![SnapshotStep::solid(400, 200, BLUE)],
        ..PageScript::default()
    };
    let (mut ctl, _log) = controller(script);

    let img = decode(&ctl.run(&request(800, 600, 2000)).result.expect("screenshot"));
    assert_eq!(img.dimensions(), (800, 600));
    assert!(close_to(img.get_pixel(10, 10), BLUE));
    assert!(close_to(img.get_pixel(790, 390), BLUE));
    assert_eq!(img.get_pixel(10, 590).0, [255, 255, 255, 255]);
    assert_eq!(img.get_pixel(790, 500).0, [255, 255, 255, 255]);
}

#[test]
fn zero_width_raster_gives_empty_result() {
    let (mut ctl, log) = controller(PageScript::rendering(RgbaImage::new(0, 0)));
    let outcome = ctl.run(&request(800, 600, 2000));
    assert!(outcome.result.is_none());
    assert_eq!(outcome.termination, Termination::Empty);
    assert!(log.messages(LogLevel::Error).is_empty());
}

#[test]
fn load_failure_is_logged_once_with_uri() {
    let script = PageScript {
        states: vec![
            LoadState::Started,
            LoadState::Failed(LoadFailure {
                uri: "http://example.com/missing.css".into(),
                kind: "network".into(),
                code: 404,
                message: "Not Found".into(),
            }),
        ],
        ..PageScript::default()
    };
    let (mut ctl, log) = controller(script);

    let outcome = ctl.run(&request(800, 600, 2000));
    assert!(outcome.result.is_none());
    assert_eq!(outcome.termination, Termination::LoadFailed);

    let failures: Vec<String> = log
        .messages(LogLevel::Error)
        .into_iter()
        .filter(|m| m.contains("[load][failed]"))
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("http://example.com/missing.css"));
    assert!(failures[0].contains("network(404): Not Found"));
    assert_eq!(ctl.view().snapshot_requests(), 0);
}

#[test]
fn load_failure_after_finish_cancels_pending_snapshot() {
    let script = PageScript {
        states: vec![
            LoadState::Finished,
            LoadState::Failed(LoadFailure {
                uri: "http://example.com/page.html".into(),
                kind: "network".into(),
                code: 7,
                message: "reset".into(),
            }),
        ],
        snapshots: vec![SnapshotStep::solid(100, 100, RED).after(Duration::from_millis(100))],
        ..PageScript::default()
    };
    let (mut ctl, log) = controller(script);

    let outcome = ctl.run(&request(100, 100, 2000));
    assert!(outcome.result.is_none());
    assert_eq!(outcome.termination, Termination::LoadFailed);
    assert_eq!(log.count(LogLevel::Debug, "[snapshot][cancel]"), 1);
    assert_eq!(log.count(LogLevel::Error, "[load][failed]"), 1);
}

#[test]
fn timeout_while_loading_closes_view_first() {
    let script = PageScript {
        // never finishes loading
        states: vec![LoadState::Started, LoadState::Committed],
        ..PageScript::default()
    };
    let (mut ctl, log) = controller(script);

    let outcome = ctl.run(&request(800, 600, 150));
    assert!(outcome.result.is_none());
    assert_eq!(outcome.termination, Termination::TimedOut);

    let timeouts: Vec<String> = log
        .messages(LogLevel::Error)
        .into_iter()
        .filter(|m| m.contains("[load][timeout]"))
        .collect();
    assert_eq!(timeouts.len(), 1);
    assert!(timeouts[0].contains("http://example.com/page.html"));
    assert!(timeouts[0].ends_with(": loading"));
    assert_eq!(log.count(LogLevel::Error, "[load][closed]"), 1);
    assert_eq!(ctl.view().close_requests(), 1);
}

#[test]
fn timeout_during_capture_ignores_late_snapshot() {
    let script = PageScript {
        snapshots: vec![SnapshotStep::solid(800, 600, RED).after(Duration::from_millis(400))],
        ..PageScript::default()
    };
    let (mut ctl, log) = controller(script);

    let outcome = ctl.run(&request(800, 600, 100));
    assert!(outcome.result.is_none());
    assert_eq!(outcome.termination, Termination::TimedOut);
    assert_eq!(log.count(LogLevel::Error, "[load][timeout]"), 1);
    assert_eq!(log.count(LogLevel::Error, ": loading"), 0);
    assert_eq!(ctl.view().close_requests(), 0);

    // The red snapshot lands while the next run is in flight and must not leak into it.
    ctl.view_mut().set_script(PageScript {
        load_delay: Duration::from_millis(500),
        snapshots: vec![SnapshotStep::solid(800, 600, BLUE)],
        ..PageScript::default()
    });
    let second = ctl.run(&request(800, 600, 3000));
    assert_eq!(second.termination, Termination::Captured);
    let img = decode(&second.result.expect("screenshot"));
    assert!(img.pixels().all(|px| close_to(px, BLUE)));
    assert_eq!(log.count(LogLevel::Error, "[load][timeout]"), 1);
}

#[test]
fn superseded_snapshot_is_discarded() {
    let script = PageScript {
        states: vec![LoadState::Started, LoadState::Finished, LoadState::Finished],
        snapshots: vec![
            SnapshotStep::solid(200, 150, RED).after(Duration::from_millis(50)),
            SnapshotStep::solid(200, 150, BLUE).after(Duration::from_millis(200)),
        ],
        ignore_cancellation: true,
        ..PageScript::default()
    };
    let (mut ctl, log) = controller(script);

    let outcome = ctl.run(&request(200, 150, 3000));
    assert_eq!(outcome.termination, Termination::Captured);
    let img = decode(&outcome.result.expect("screenshot"));
    assert!(img.pixels().all(|px| close_to(px, BLUE)));

    assert_eq!(ctl.view().snapshot_requests(), 2);
    assert_eq!(log.count(LogLevel::Debug, "[snapshot][cancel]"), 1);
    assert_eq!(log.count(LogLevel::Debug, "[screenshot][stale]"), 1);
}

#[test]
fn cancelled_snapshot_error_does_not_end_run() {
    let script = PageScript {
        states: vec![LoadState::Finished, LoadState::Finished],
        snapshots: vec![
            SnapshotStep::solid(200, 150, RED).after(Duration::from_millis(50)),
            SnapshotStep::solid(200, 150, BLUE).after(Duration::from_millis(200)),
        ],
        ..PageScript::default()
    };
    let (mut ctl, log) = controller(script);

    let outcome = ctl.run(&request(200, 150, 3000));
    assert_eq!(outcome.termination, Termination::Captured);
    assert!(outcome.result.is_some());
    let failures = log.messages(LogLevel::Error);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("[screenshot][failed]"));
    assert!(failures[0].contains("cancelled"));
}

#[test]
fn sequential_runs_are_independent() {
    let (mut ctl, _log) = controller(PageScript {
        snapshots: vec![SnapshotStep::solid(1600, 1200, RED)],
        ..PageScript::default()
    });
    let first = decode(&ctl.run(&request(800, 600, 2000)).result.expect("first"));
    assert!(first.pixels().all(|px| close_to(px, RED)));

    ctl.view_mut().set_script(PageScript {
        snapshots: vec![SnapshotStep::solid(400, 300, BLUE)],
        ..PageScript::default()
    });
    let second = decode(&ctl.run(&request(800, 600, 2000)).result.expect("second"));
    assert_eq!(second.dimensions(), (800, 600));
    assert!(second.pixels().all(|px| close_to(px, BLUE)));
}

#[test]
fn close_grace_bounds_unconfirmed_close() {
    let script = PageScript {
        states: vec![LoadState::Started],
        confirm_close: false,
        ..PageScript::default()
    };
    let config = CaptureConfig {
        close_grace: Some(Duration::from_millis(100)),
        ..CaptureConfig::default()
    };
    let (mut ctl, log) = controller_with(script, config);

    let outcome = ctl.run(&request(800, 600, 100));
    assert!(outcome.result.is_none());
    assert_eq!(outcome.termination, Termination::TimedOut);
    assert_eq!(log.count(LogLevel::Error, "[load][timeout]"), 1);
    assert_eq!(log.count(LogLevel::Error, "[load][close-timeout]"), 1);
    assert_eq!(log.count(LogLevel::Error, "[load][closed]"), 0);
}

#[test]
fn snapshot_failure_ends_run_with_empty_result() {
    let script = PageScript {
        snapshots: vec![SnapshotStep::fail("GPU process crashed")],
        ..PageScript::default()
    };
    let (mut ctl, log) = controller(script);

    let outcome = ctl.run(&request(800, 600, 2000));
    assert!(outcome.result.is_none());
    assert_eq!(outcome.termination, Termination::SnapshotFailed);
    assert_eq!(log.count(LogLevel::Error, "GPU process crashed"), 1);
}
