//! External-process capture
//!
//! [`ProcessBridge`] spawns a worker (normally the `rfshot` binary), hands it
//! the request as positional arguments, relays its tagged stdout lines into the
//! host's [`LogSink`] while it runs, and replays its stderr afterwards. The
//! only outcome signals are the exit status and the output file.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;

use crate::config::{ceil_seconds, CaptureConfig, TIMEOUT_ENV};
use crate::logging::{LogEvent, LogSink, DEBUG_PREFIX, ERROR_PREFIX, LOG_TAG};
use crate::{CaptureRequest, Capturer, Error, Result, Screenshot, Source};

/// What the host learns from one worker run
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// Worker spawned and exited successfully
    pub success: bool,
    /// Raw stderr lines, in order
    pub stderr: Vec<String>,
    /// Log events relayed from stdout, in order
    pub events: Vec<LogEvent>,
}

/// Classify one worker stdout line. Untagged lines are dropped.
pub fn parse_log_line(line: &str) -> Option<LogEvent> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if let Some(rest) = line.strip_prefix(DEBUG_PREFIX) {
        Some(LogEvent::debug(rest))
    } else {
        line.strip_prefix(ERROR_PREFIX).map(LogEvent::error)
    }
}

// Drain the worker's stdout until EOF, forwarding tagged lines as they arrive.
fn relay_lines<R: Read>(stdout: R, log: &dyn LogSink) -> Vec<LogEvent> {
    let mut reader = BufReader::new(stdout);
    let mut events = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.strip_suffix('\n').unwrap_or(text.as_ref());
                if let Some(event) = parse_log_line(line) {
                    log.emit(&event);
                    events.push(event);
                }
            }
            Err(e) => {
                log.error(&format!("{}[process][relay] failed to read worker output: {}", LOG_TAG, e));
                break;
            }
        }
    }
    events
}

fn read_stderr(mut file: File) -> std::io::Result<Vec<String>> {
    file.seek(SeekFrom::Start(0))?;
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;
    Ok(String::from_utf8_lossy(&raw).lines().map(|l| l.to_string()).collect())
}

/// Spawns capture workers and relays their output
#[derive(Clone)]
pub struct ProcessBridge {
    program: PathBuf,
    leading_args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    log: Arc<dyn LogSink>,
}

impl ProcessBridge {
    pub fn new(program: impl Into<PathBuf>, log: Arc<dyn LogSink>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            envs: Vec::new(),
            log,
        }
    }

    /// Argument placed before the five positional request arguments
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.leading_args.push(arg.as_ref().to_os_string());
        self
    }

    /// Extra environment variable for the worker
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs.push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    fn command_line(&self, args: &[OsString]) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.leading_args.iter().map(|a| a.as_os_str()))
            .chain(args.iter().map(|a| a.as_os_str()))
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    // Start the worker with stdout piped and stderr going to `stderr_file`.
    fn spawn(&self, args: &[OsString], stderr_file: &File) -> Result<Child> {
        let stderr = stderr_file.try_clone()?;
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(stderr));
        // Dropping `command` on return releases the parent's copy of the
        // stderr handle; the child then holds the only write ends.
        command
            .spawn()
            .map_err(|e| Error::ProcessError(format!("{}: {}", self.program.display(), e)))
    }

    /// Run one worker to completion.
    ///
    /// Returns after the worker has exited and every stdout line has been
    /// relayed. A missing or empty `output_path` afterwards means no
    /// screenshot was produced; the cause is only visible in the log sink.
    pub fn run(&self, source_path: &Path, uri: &str, output_path: &Path, width: u32, height: u32) -> ProcessOutcome {
        let args: Vec<OsString> = vec![
            source_path.as_os_str().to_os_string(),
            OsString::from(uri),
            output_path.as_os_str().to_os_string(),
            OsString::from(width.to_string()),
            OsString::from(height.to_string()),
        ];
        let command_line = self.command_line(&args);

        let spawned = tempfile::tempfile()
            .map_err(Error::from)
            .and_then(|file| self.spawn(&args, &file).map(|child| (child, file)));
        let (mut child, stderr_file) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                self.log.error(&format!(
                    "{}[process][failed] failed to spawn worker: {}: {}",
                    LOG_TAG, command_line, e
                ));
                return ProcessOutcome::default();
            }
        };

        let relay = child.stdout.take().map(|stdout| {
            let log = self.log.clone();
            thread::spawn(move || relay_lines(stdout, log.as_ref()))
        });

        let status = child.wait();
        let events = match relay {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                self.log.error(&format!("{}[process][relay] log relay thread panicked", LOG_TAG));
                Vec::new()
            }),
            None => Vec::new(),
        };

        let success = matches!(&status, Ok(s) if s.success());
        if !success {
            self.log.error(&format!(
                "{}[process][failed] failed to run worker: {}: {}: {}",
                LOG_TAG,
                command_line,
                self.program.display(),
                describe_status(&status)
            ));
        }

        let stderr = match read_stderr(stderr_file) {
            Ok(lines) => lines,
            Err(e) => {
                self.log.error(&format!("{}[process][stderr] failed to read worker stderr: {}", LOG_TAG, e));
                Vec::new()
            }
        };
        for line in &stderr {
            self.log.error(line);
        }

        ProcessOutcome { success, stderr, events }
    }
}

fn describe_status(status: &std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(s) => s.to_string(),
        Err(e) => format!("wait failed: {}", e),
    }
}

/// [`Capturer`] that runs every request in a fresh worker process
pub struct ExternalCapturer {
    bridge: ProcessBridge,
    log: Arc<dyn LogSink>,
}

impl ExternalCapturer {
    pub fn new(bridge: ProcessBridge, log: Arc<dyn LogSink>) -> Self {
        Self { bridge, log }
    }

    pub fn from_config(config: &CaptureConfig, log: Arc<dyn LogSink>) -> Self {
        let bridge = config
            .worker_env()
            .into_iter()
            .fold(ProcessBridge::new(config.worker_program(), log.clone()), |bridge, (key, value)| {
                bridge.env(key, value)
            });
        Self::new(bridge, log)
    }
}

impl Capturer for ExternalCapturer {
    fn capture(&mut self, request: &CaptureRequest) -> Option<Screenshot> {
        let scratch = match tempfile::Builder::new().prefix("rfshot").tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                self.log.error(&format!("{}[process][failed] failed to create scratch dir: {}", LOG_TAG, e));
                return None;
            }
        };

        let source_path = match &request.source {
            Source::Path(path) => path.clone(),
            Source::Html(body) => {
                let path = scratch.path().join("source.html");
                if let Err(e) = std::fs::write(&path, body) {
                    self.log.error(&format!(
                        "{}[process][failed] failed to write source: {}: {}",
                        LOG_TAG,
                        path.display(),
                        e
                    ));
                    return None;
                }
                path
            }
        };
        let output_path = scratch.path().join("screenshot.png");

        let mut bridge = self.bridge.clone();
        if let Some(timeout) = request.timeout {
            bridge = bridge.env(TIMEOUT_ENV, ceil_seconds(timeout).to_string());
        }
        bridge.run(&source_path, &request.uri, &output_path, request.width, request.height);

        match std::fs::read(&output_path) {
            Ok(png) if !png.is_empty() => Some(Screenshot::from_png(&png)),
            _ => {
                self.log.debug(&format!("{}[process][empty] no screenshot: {}", LOG_TAG, request.uri));
                None
            }
        }
    }
}
