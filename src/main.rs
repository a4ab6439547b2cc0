//! Capture worker: renders one HTML file and writes the screenshot as PNG.
//!
//! Log events go to stdout as `debug: ` / `error: ` lines for the host's
//! process bridge to relay. An absent screenshot is not a failure; the exit
//! code is non-zero only when the capture could not be set up.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use rfshot::{CaptureConfig, CaptureMode, CaptureRequest, StdoutSink};

#[derive(Parser, Debug)]
#[command(name = "rfshot", version, about = "Render an HTML file headlessly and save a PNG screenshot")]
struct Args {
    /// File holding the HTML to render
    source: PathBuf,
    /// Origin URI the document is loaded as
    uri: String,
    /// Where to write the PNG
    output: PathBuf,
    /// Screenshot width in pixels
    width: u32,
    /// Screenshot height in pixels
    height: u32,
}

fn run(args: &Args) -> anyhow::Result<()> {
    // The worker always captures in-process; external mode here would recurse.
    let config = CaptureConfig {
        mode: CaptureMode::InProcess,
        ..CaptureConfig::from_env()
    };
    let request = CaptureRequest::path(&args.source, &args.uri, args.width, args.height)?;

    let mut capturer = rfshot::new_capturer(&config, Arc::new(StdoutSink))?;
    if let Some(screenshot) = capturer.capture(&request) {
        let png = screenshot.decode()?;
        std::fs::write(&args.output, png)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("rfshot: {:#}", e);
        std::process::exit(1);
    }
}
