//! Shared screenshot service tests

use rfshot::engine::scripted::{PageScript, ScriptedView, SnapshotStep};
use rfshot::{CaptureConfig, CaptureRequest, Error, InProcessCapturer, LogLevel, MemorySink, Screenshoter};
use std::sync::Arc;

async fn scripted_service(log: Arc<MemorySink>) -> Screenshoter {
    Screenshoter::new(move || {
        let script = PageScript {
            snapshots: vec![SnapshotStep::solid(640, 480, [0, 200, 0, 255])],
            ..PageScript::default()
        };
        Ok(InProcessCapturer::new(ScriptedView::new(script), &CaptureConfig::default(), log))
    })
    .await
    .expect("service starts")
}

fn request(uri: &str) -> CaptureRequest {
    CaptureRequest::html("<p>queued</p>", uri, 320, 240)
        .unwrap()
        .with_timeout_seconds(2)
}

#[tokio::test]
async fn concurrent_captures_are_serialized() {
    let log = MemorySink::new();
    let service = scripted_service(log.clone()).await;
    let other = service.clone();

    let (a, b, c) = tokio::join!(
        service.capture(request("http://example.com/a")),
        other.capture(request("http://example.com/b")),
        service.capture(request("http://example.com/c")),
    );

    for shot in [a, b, c] {
        let shot = shot.expect("worker alive").expect("screenshot");
        let png = shot.decode().unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!((img.width(), img.height()), (320, 240));
    }
    assert_eq!(log.count(LogLevel::Debug, "[screenshot][finish]"), 3);
    assert!(log.messages(LogLevel::Error).is_empty());

    service.close().await.unwrap();
}

#[tokio::test]
async fn factory_error_fails_startup() {
    let result = Screenshoter::new(|| -> rfshot::Result<InProcessCapturer<ScriptedView>> {
        Err(Error::InitializationError("no browser".into()))
    })
    .await;

    match result {
        Err(Error::InitializationError(msg)) => assert_eq!(msg, "no browser"),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("service should not start"),
    }
}

#[tokio::test]
async fn capture_after_close_is_an_error() {
    let service = scripted_service(MemorySink::new()).await;
    let handle = service.clone();
    service.close().await.unwrap();

    assert!(handle.capture(request("http://example.com/late")).await.is_err());
}
