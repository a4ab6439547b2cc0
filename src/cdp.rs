//! Chrome DevTools Protocol render view

use crate::config::{CaptureConfig, Viewport};
use crate::engine::{CancellationToken, LoadFailure, LoadState, RenderView, SnapshotError, ViewEvent};
use crate::event_loop::EventSink;
use crate::{Error, Result};
use base64::Engine as Base64Engine;
use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use image::RgbaImage;
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

/// Error code reported for navigation failures; CDP does not expose one.
const NAVIGATION_FAILED: i32 = -1;

const DOCUMENT_WIDTH_JS: &str = "Math.max(document.documentElement.scrollWidth, \
     document.body ? document.body.scrollWidth : 0)";
const DOCUMENT_HEIGHT_JS: &str = "Math.max(document.documentElement.scrollHeight, \
     document.body ? document.body.scrollHeight : 0)";

/// Headless Chrome view (uses the `headless_chrome` crate)
///
/// Launches one browser and drives a single tab. Blocking CDP calls run on
/// helper threads and report back through the run's [`EventSink`], so the
/// controller's loop never blocks on the browser.
pub struct ChromeView {
    browser: Browser,
    tab: Arc<Tab>,
    loading: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    uri: Arc<Mutex<Option<String>>>,
    viewport: Viewport,
}

impl ChromeView {
    pub fn new(config: &CaptureConfig) -> Result<Self> {
        let proxy_rules = config.proxies.chrome_rules();

        let launch_options = LaunchOptions::default_builder()
            .headless(true)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .proxy_server(proxy_rules.as_deref())
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser = Browser::new(launch_options)
            .map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;

        Ok(Self {
            browser,
            tab,
            loading: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
            uri: Arc::new(Mutex::new(None)),
            viewport: config.viewport,
        })
    }

    // A closed tab cannot be reused; open a fresh one for the next load.
    fn ensure_tab(&mut self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            self.tab = self
                .browser
                .new_tab()
                .map_err(|e| Error::LoadError(format!("Failed to reopen tab: {}", e)))?;
            self.closed.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Insert `<base href>` so relative references resolve against the origin URI.
fn with_base_href(body: &str, uri: &str) -> String {
    if uri.is_empty() {
        return body.to_string();
    }
    let base = format!("<base href=\"{}\">", uri.replace('"', "&quot;"));
    let lower = body.to_ascii_lowercase();
    match lower.find("<head") {
        Some(start) => match lower[start..].find('>') {
            Some(end) => {
                let at = start + end + 1;
                format!("{}{}{}", &body[..at], base, &body[at..])
            }
            None => format!("{}{}", base, body),
        },
        None => format!("{}{}", base, body),
    }
}

/// Clip covering the whole document; never smaller than the window.
fn full_document_clip(width: Option<f64>, height: Option<f64>, viewport: Viewport) -> Page::Viewport {
    let at_least = |measured: Option<f64>, window: u32| {
        measured
            .filter(|v| v.is_finite())
            .map_or(window as f64, |v| v.ceil().max(window as f64))
    };
    Page::Viewport {
        x: 0.0,
        y: 0.0,
        width: at_least(width, viewport.width),
        height: at_least(height, viewport.height),
        scale: 1.0,
    }
}

fn document_extent(tab: &Tab, expression: &str) -> Option<f64> {
    tab.evaluate(expression, false)
        .ok()
        .and_then(|remote| remote.value)
        .and_then(|value| value.as_f64())
}

// Rasterize the full rendered document, not just the visible window.
fn capture_document(tab: &Tab, viewport: Viewport) -> std::result::Result<RgbaImage, SnapshotError> {
    let clip = full_document_clip(
        document_extent(tab, DOCUMENT_WIDTH_JS),
        document_extent(tab, DOCUMENT_HEIGHT_JS),
        viewport,
    );
    let png = tab
        .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, Some(clip), true)
        .map_err(|e| SnapshotError::Failed(format!("Screenshot failed: {}", e)))?;
    image::load_from_memory(&png)
        .map(|img| img.to_rgba8())
        .map_err(|e| SnapshotError::Failed(format!("Invalid screenshot data: {}", e)))
}

fn data_url(document: &str) -> String {
    format!(
        "data:text/html;charset=utf-8;base64,{}",
        Base64Engine::encode(&base64::engine::general_purpose::STANDARD, document)
    )
}

impl RenderView for ChromeView {
    fn load_html(&mut self, body: &str, uri: &str, events: &EventSink) -> Result<()> {
        self.ensure_tab()?;
        if let Ok(mut current) = self.uri.lock() {
            *current = Some(uri.to_string());
        }

        let url = data_url(&with_base_href(body, uri));
        let tab = self.tab.clone();
        let loading = self.loading.clone();
        let events = events.clone();
        let uri = uri.to_string();

        loading.store(true, Ordering::SeqCst);
        events.post(ViewEvent::Load(LoadState::Started));
        thread::spawn(move || {
            let navigated = tab
                .navigate_to(&url)
                .and_then(|t| t.wait_until_navigated())
                .map(|_| ());
            loading.store(false, Ordering::SeqCst);
            match navigated {
                Ok(()) => {
                    events.post(ViewEvent::Load(LoadState::Committed));
                    events.post(ViewEvent::Load(LoadState::Finished));
                }
                Err(e) => {
                    events.post(ViewEvent::Load(LoadState::Failed(LoadFailure {
                        uri,
                        kind: "cdp".to_string(),
                        code: NAVIGATION_FAILED,
                        message: e.to_string(),
                    })));
                }
            }
        });
        Ok(())
    }

    fn snapshot(&mut self, token: &CancellationToken, events: &EventSink) {
        let tab = self.tab.clone();
        let viewport = self.viewport;
        let token = token.clone();
        let events = events.clone();
        thread::spawn(move || {
            let result = capture_document(&tab, viewport);
            let result = if token.is_cancelled() {
                Err(SnapshotError::Cancelled)
            } else {
                result
            };
            events.post(ViewEvent::SnapshotReady { token, result });
        });
    }

    fn try_close(&mut self, events: &EventSink) {
        let tab = self.tab.clone();
        let closed = self.closed.clone();
        let loading = self.loading.clone();
        let events = events.clone();
        closed.store(true, Ordering::SeqCst);
        thread::spawn(move || match tab.close(true) {
            Ok(_) => {
                loading.store(false, Ordering::SeqCst);
                events.post(ViewEvent::Closed);
            }
            Err(e) => warn!(target: "rfshot", "failed to close tab: {}", e),
        });
    }

    fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    fn uri(&self) -> Option<String> {
        self.uri.lock().ok().and_then(|u| u.clone())
    }
}
