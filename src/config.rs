//! Environment-style configuration
//!
//! Every knob can be set in code through [`CaptureConfig`]'s public fields or
//! read from the process environment with [`CaptureConfig::from_env`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::Error;

/// Timeout applied when neither the request nor the environment sets one.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 5;

/// Overrides the default timeout (integer seconds).
pub const TIMEOUT_ENV: &str = "RFSHOT_TIMEOUT";
/// Selects `in-process` or `external` capture.
pub const MODE_ENV: &str = "RFSHOT_MODE";
/// Path of the worker program used in external mode.
pub const WORKER_ENV: &str = "RFSHOT_WORKER";
/// Optional deadline (seconds) for the close handshake after a timeout.
pub const CLOSE_GRACE_ENV: &str = "RFSHOT_CLOSE_GRACE";
/// Offscreen window size as `WIDTHxHEIGHT`.
pub const VIEWPORT_ENV: &str = "RFSHOT_VIEWPORT";

const PROXY_ENVS: [(&str, &str); 3] = [
    ("http_proxy", "HTTP_PROXY"),
    ("https_proxy", "HTTPS_PROXY"),
    ("ftp_proxy", "FTP_PROXY"),
];

/// Name of the worker binary looked up next to the current executable.
pub const WORKER_BIN: &str = "rfshot";

/// Where captures run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Drive the render engine on the caller's thread
    #[default]
    InProcess,
    /// Delegate each capture to a worker process
    External,
}

impl FromStr for CaptureMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "in-process" | "inprocess" | "internal" => Ok(CaptureMode::InProcess),
            "external" | "process" | "subprocess" => Ok(CaptureMode::External),
            other => Err(Error::ConfigError(format!("unknown capture mode: {}", other))),
        }
    }
}

/// Per-scheme proxy URLs applied to the render engine's network context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub http: Option<String>,
    pub https: Option<String>,
    pub ftp: Option<String>,
}

impl ProxySettings {
    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none() && self.ftp.is_none()
    }

    /// `(scheme, proxy)` pairs for every configured scheme
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [("http", &self.http), ("https", &self.https), ("ftp", &self.ftp)]
            .into_iter()
            .filter_map(|(scheme, proxy)| proxy.as_deref().map(|p| (scheme, p)))
            .collect()
    }

    /// Chrome `--proxy-server` rule list, e.g. `http=proxy:3128;https=proxy:3129`.
    pub fn chrome_rules(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let rules = self
            .entries()
            .into_iter()
            .map(|(scheme, proxy)| format!("{}={}", scheme, proxy))
            .collect::<Vec<_>>()
            .join(";");
        Some(rules)
    }
}

/// Size of the offscreen window the engine lays the page out in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Viewport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::ConfigError(format!("invalid viewport: {}", s));
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width = w.trim().parse::<u32>().map_err(|_| invalid())?;
        let height = h.trim().parse::<u32>().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

/// Configuration shared by every capture made through one capturer
///
/// # Examples
///
/// ```
/// let cfg = rfshot::CaptureConfig::default();
/// assert_eq!(cfg.timeout_seconds, 5);
/// assert_eq!(cfg.mode, rfshot::CaptureMode::InProcess);
/// ```
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Deadline for one load-plus-capture run, in seconds
    pub timeout_seconds: u64,
    /// Proxies for the engine's network context
    pub proxies: ProxySettings,
    /// In-process or external-process execution
    pub mode: CaptureMode,
    /// Worker program for external mode; `None` means [`WORKER_BIN`] next to
    /// the current executable
    pub worker_path: Option<PathBuf>,
    /// Offscreen window size
    pub viewport: Viewport,
    /// Secondary deadline for the close handshake after a timeout. `None`
    /// waits for the engine's confirmation without a bound.
    pub close_grace: Option<Duration>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            proxies: ProxySettings::default(),
            mode: CaptureMode::default(),
            worker_path: None,
            viewport: lookup(VIEWPORT_ENV)
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            close_grace: None,
        }
    }
}

impl CaptureConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let proxy = |(lower, upper): (&str, &str)| {
            lookup(lower)
                .or_else(|| lookup(upper))
                .filter(|v| !v.trim().is_empty())
        };

        let mode = match lookup(MODE_ENV) {
            Some(value) => value.parse().unwrap_or_else(|e| {
                log::warn!(target: "rfshot", "{}; falling back to in-process", e);
                CaptureMode::InProcess
            }),
            None => CaptureMode::InProcess,
        };

        Self {
            timeout_seconds: parse_timeout_seconds(lookup(TIMEOUT_ENV).as_deref()),
            proxies: ProxySettings {
                http: proxy(PROXY_ENVS[0]),
                https: proxy(PROXY_ENVS[1]),
                ftp: proxy(PROXY_ENVS[2]),
            },
            mode,
            worker_path: lookup(WORKER_ENV).filter(|v| !v.is_empty()).map(PathBuf::from),
            viewport: Viewport::default(),
            close_grace: lookup(CLOSE_GRACE_ENV)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        }
    }

    /// Default deadline as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Environment that makes a worker's [`CaptureConfig::from_env`] see this
    /// configuration.
    ///
    /// Unset values are passed as empty strings so the worker does not fall
    /// back to whatever the host environment holds.
    pub fn worker_env(&self) -> Vec<(&'static str, String)> {
        let mut env = vec![(TIMEOUT_ENV, self.timeout_seconds.to_string())];
        let proxies = [&self.proxies.http, &self.proxies.https, &self.proxies.ftp];
        for ((lower, upper), proxy) in PROXY_ENVS.into_iter().zip(proxies) {
            let value = proxy.clone().unwrap_or_default();
            env.push((lower, value.clone()));
            env.push((upper, value));
        }
        env.push((
            CLOSE_GRACE_ENV,
            self.close_grace.map(|g| ceil_seconds(g).to_string()).unwrap_or_default(),
        ));
        env.push((VIEWPORT_ENV, self.viewport.to_string()));
        env
    }

    /// Worker program to spawn in external mode
    pub fn worker_program(&self) -> PathBuf {
        if let Some(path) = &self.worker_path {
            return path.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BIN)))
            .unwrap_or_else(|| PathBuf::from(format!("./{}", WORKER_BIN)))
    }
}

/// Parse a timeout override; missing or unparsable values give the default.
pub fn parse_timeout_seconds(value: Option<&str>) -> u64 {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECONDS)
}

/// Whole seconds, rounded up so a worker never undercuts the deadline.
pub fn ceil_seconds(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
