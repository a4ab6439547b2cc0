//! Async handle over a capturer that lives on its own thread

use crate::{CaptureConfig, CaptureRequest, Capturer, Error, LogSink, Result, Screenshot};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;

enum Command {
    Capture(CaptureRequest, oneshot::Sender<Option<Screenshot>>),
    Close(oneshot::Sender<()>),
}

/// An async-friendly screenshot service backed by a dedicated worker thread.
///
/// The worker thread owns one long-lived capturer (and with it the render
/// engine) and serves requests one at a time in arrival order, so any number
/// of clones can share it without ever running two captures on the same view.
#[derive(Clone)]
pub struct Screenshoter {
    cmd_tx: Sender<Command>,
}

impl Screenshoter {
    /// Start the worker thread and build the capturer on it.
    ///
    /// The capturer never leaves the worker thread, so it does not need to be
    /// `Send`; only the factory does.
    pub async fn new<F, C>(factory: F) -> Result<Self>
    where
        F: FnOnce() -> Result<C> + Send + 'static,
        C: Capturer + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx): (oneshot::Sender<Result<()>>, oneshot::Receiver<Result<()>>) =
            oneshot::channel();

        thread::spawn(move || {
            let mut capturer = match factory() {
                Ok(c) => c,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };

            let _ = init_tx.send(Ok(()));

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::Capture(request, resp) => {
                        let res = capturer.capture(&request);
                        let _ = resp.send(res);
                    }
                    Command::Close(resp) => {
                        let _ = resp.send(());
                        break;
                    }
                }
            }
        });

        let init_res = init_rx
            .await
            .map_err(|e| Error::Other(format!("Worker init canceled: {}", e)))?;
        init_res?;

        Ok(Self { cmd_tx })
    }

    /// Start a service using the capturer selected by `config`
    pub async fn from_config(config: CaptureConfig, log: Arc<dyn LogSink>) -> Result<Self> {
        Self::new(move || crate::new_capturer(&config, log)).await
    }

    /// Queue a capture and wait for its result.
    ///
    /// `Ok(None)` means the capture ran and produced nothing; `Err` only means
    /// the worker thread is gone.
    pub async fn capture(&self, request: CaptureRequest) -> Result<Option<Screenshot>> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Capture(request, tx))
            .map_err(|_| Error::Other("Screenshot worker has shut down".into()))?;
        rx.await
            .map_err(|e| Error::Other(format!("Capture canceled: {}", e)))
    }

    /// Stop the worker thread once queued captures are done.
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Close(tx));
        rx.await
            .map_err(|e| Error::Other(format!("Close canceled: {}", e)))
    }
}
