//! Client configuration loading: endpoints, retry budgets, and reconnect policy.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::services::backoff::BackoffPolicy;

/// Default location on disk where the client looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/sync.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "STUDY_SYNC_CONFIG_PATH";
/// Environment variable that overrides the API base URL.
const API_URL_ENV: &str = "STUDY_SYNC_API_URL";
/// Environment variable holding the bearer credential used by the binary.
const TOKEN_ENV: &str = "STUDY_SYNC_TOKEN";
/// API base used when nothing is configured.
const DEFAULT_API_BASE: &str = "http://localhost:8080/api/v1";
/// Path of the realtime endpoint relative to the API base.
const REALTIME_PATH: &str = "/ws/dashboard";

/// Attempt ceiling and delay policy for retried writes.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay policy between attempts.
    pub backoff: BackoffPolicy,
    /// Optional ceiling on the cumulative time spent retrying.
    pub max_elapsed: Option<Duration>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: BackoffPolicy::new(Duration::from_millis(400), Duration::from_secs(30))
                .with_jitter(Duration::from_millis(150)),
            max_elapsed: None,
        }
    }
}

/// Reconnect policy for the realtime channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeSettings {
    /// Reconnect automatically after an abnormal close.
    pub auto_reconnect: bool,
    /// Reconnect attempts allowed in a single failure streak.
    pub max_reconnect_attempts: u32,
    /// Delay policy between reconnect attempts.
    pub backoff: BackoffPolicy,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_reconnect_attempts: 5,
            backoff: BackoffPolicy::new(Duration::from_millis(1_000), Duration::from_millis(30_000)),
        }
    }
}

/// Cadence of the reading tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingSettings {
    /// Interval between periodic progress observations.
    pub flush_interval: Duration,
    /// Estimated time needed to read a chapter, reported with every observation.
    pub estimated_seconds: u64,
}

impl Default for ReadingSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(10),
            estimated_seconds: 600,
        }
    }
}

/// Immutable runtime configuration shared across the client.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Normalized API base, always ending in `/api/vN`.
    pub api_base_url: String,
    /// Per-request timeout applied by the HTTP transport.
    pub request_timeout: Duration,
    /// Retry policy for progress writes.
    pub write_retry: RetrySettings,
    /// Reconnect policy for the realtime channel.
    pub realtime: RealtimeSettings,
    /// Reading tracker cadence.
    pub reading: ReadingSettings,
    /// How long shutdown waits for in-flight beacons.
    pub beacon_grace: Duration,
    /// Bearer credential picked up from the environment, if any.
    pub token: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(10),
            write_retry: RetrySettings::default(),
            realtime: RealtimeSettings::default(),
            reading: ReadingSettings::default(),
            beacon_grace: Duration::from_secs(2),
            token: None,
        }
    }
}

impl SyncConfig {
    /// Load the configuration from disk and the environment, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded sync configuration");
                    raw.into()
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        if let Some(api_url) = env::var(API_URL_ENV).ok().filter(|v| !v.trim().is_empty()) {
            config.api_base_url = normalize_api_base(&api_url);
        }
        config.token = env::var(TOKEN_ENV).ok().filter(|v| !v.is_empty());
        config
    }

    /// Point the configuration at another API base, normalizing it.
    pub fn with_api_base(mut self, raw: &str) -> Self {
        self.api_base_url = normalize_api_base(raw);
        self
    }

    /// Realtime endpoint derived from the API base (`http→ws`, `https→wss`).
    pub fn realtime_url(&self) -> Result<Url, url::ParseError> {
        let base = &self.api_base_url;
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.clone()
        };
        Url::parse(&format!("{ws_base}{REALTIME_PATH}"))
    }
}

/// Ensure the API base carries a version segment: keep `/api/vN`, complete `/api`, append otherwise.
pub fn normalize_api_base(raw: &str) -> String {
    let cleaned = raw.trim().trim_end_matches('/');
    if cleaned.is_empty() {
        return DEFAULT_API_BASE.to_string();
    }
    if has_version_suffix(cleaned) {
        cleaned.to_string()
    } else if cleaned.ends_with("/api") {
        format!("{cleaned}/v1")
    } else {
        format!("{cleaned}/api/v1")
    }
}

fn has_version_suffix(base: &str) -> bool {
    base.rsplit_once("/api/v").is_some_and(|(_, version)| {
        !version.is_empty() && version.chars().all(|c| c.is_ascii_digit())
    })
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    api_url: Option<String>,
    request_timeout_ms: Option<u64>,
    retry: RawBackoff,
    realtime: RawRealtime,
    reading_flush_interval_ms: Option<u64>,
    estimated_seconds: Option<u64>,
    beacon_grace_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBackoff {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    jitter_ms: Option<u64>,
    max_elapsed_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRealtime {
    auto_reconnect: Option<bool>,
    #[serde(flatten)]
    backoff: RawBackoff,
}

impl RawBackoff {
    fn apply(&self, policy: &BackoffPolicy) -> BackoffPolicy {
        let base = self.base_delay_ms.map(Duration::from_millis).unwrap_or(policy.base);
        let cap = self.max_delay_ms.map(Duration::from_millis).unwrap_or(policy.cap);
        let jitter = self.jitter_ms.map(Duration::from_millis).unwrap_or(policy.jitter);
        BackoffPolicy::new(base, cap).with_jitter(jitter)
    }
}

impl From<RawConfig> for SyncConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = SyncConfig::default();
        let write_retry = RetrySettings {
            max_attempts: raw
                .retry
                .max_attempts
                .unwrap_or(defaults.write_retry.max_attempts)
                .max(1),
            backoff: raw.retry.apply(&defaults.write_retry.backoff),
            max_elapsed: raw.retry.max_elapsed_ms.map(Duration::from_millis),
        };
        let realtime = RealtimeSettings {
            auto_reconnect: raw
                .realtime
                .auto_reconnect
                .unwrap_or(defaults.realtime.auto_reconnect),
            max_reconnect_attempts: raw
                .realtime
                .backoff
                .max_attempts
                .unwrap_or(defaults.realtime.max_reconnect_attempts),
            backoff: raw.realtime.backoff.apply(&defaults.realtime.backoff),
        };
        let reading = ReadingSettings {
            flush_interval: raw
                .reading_flush_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.reading.flush_interval),
            estimated_seconds: raw
                .estimated_seconds
                .unwrap_or(defaults.reading.estimated_seconds),
        };

        Self {
            api_base_url: raw
                .api_url
                .as_deref()
                .map(normalize_api_base)
                .unwrap_or(defaults.api_base_url),
            request_timeout: raw
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            write_retry,
            realtime,
            reading,
            beacon_grace: raw
                .beacon_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.beacon_grace),
            token: None,
        }
    }
}
