//! Engine configuration (layered: defaults > TOML file > env).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{GatekeepError, Result};

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5050";
const DEFAULT_LINE_PREFIX: &str = "data: ";

/// Timing constants and endpoints used by every session.
///
/// All delays are driven through `tokio::time`, so tests can run them on a
/// paused clock.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Base URL of the agent server.
    pub server_url: String,
    /// Prefix stripped from each stream line before JSON parsing.
    pub line_prefix: String,
    /// Coalescing window for block delta rendering.
    pub delta_debounce: Duration,
    /// Wait between a turn's terminal transition and draining the next queued message.
    pub drain_grace: Duration,
    /// Wait before resuming a restored queue on cold start.
    pub resume_settle: Duration,
    /// Delay before a single-question negotiation auto-submits a picked option.
    pub auto_submit_delay: Duration,
    /// Number of health probes per restart check.
    pub restart_poll_attempts: u32,
    /// Interval between restart probes.
    pub restart_poll_interval: Duration,
    /// Quiet period after a lone `error` event before the turn is ended.
    /// `None` keeps the turn running until a terminal event arrives.
    pub error_idle_timeout: Option<Duration>,
    /// Freshness window of the cached model list.
    pub model_cache_ttl: Duration,
    /// Directory for client-local durable state.
    pub state_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            line_prefix: DEFAULT_LINE_PREFIX.to_string(),
            delta_debounce: Duration::from_millis(50),
            drain_grace: Duration::from_millis(1500),
            resume_settle: Duration::from_millis(2000),
            auto_submit_delay: Duration::from_millis(300),
            restart_poll_attempts: 10,
            restart_poll_interval: Duration::from_millis(1000),
            error_idle_timeout: Some(Duration::from_secs(30)),
            model_cache_ttl: Duration::from_secs(60 * 60),
            state_dir: default_state_dir(),
        }
    }
}

/// On-disk shape of the optional TOML config file. Every field is optional;
/// missing fields keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    server_url: Option<String>,
    line_prefix: Option<String>,
    delta_debounce_ms: Option<u64>,
    drain_grace_ms: Option<u64>,
    resume_settle_ms: Option<u64>,
    auto_submit_delay_ms: Option<u64>,
    restart_poll_attempts: Option<u32>,
    restart_poll_interval_ms: Option<u64>,
    /// `0` disables the timeout.
    error_idle_timeout_ms: Option<u64>,
    model_cache_ttl_secs: Option<u64>,
    state_dir: Option<PathBuf>,
}

impl EngineConfig {
    /// Defaults overridden by environment variables (loads `.env` if present).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults overridden by a TOML file, then by environment variables.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        let _ = dotenvy::dotenv();
        config.apply_env()?;
        Ok(config)
    }

    /// Defaults overridden by the given TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(raw)?;
        let mut config = Self::default();
        if let Some(url) = file.server_url {
            config.server_url = url;
        }
        if let Some(prefix) = file.line_prefix {
            config.line_prefix = prefix;
        }
        if let Some(ms) = file.delta_debounce_ms {
            config.delta_debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = file.drain_grace_ms {
            config.drain_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = file.resume_settle_ms {
            config.resume_settle = Duration::from_millis(ms);
        }
        if let Some(ms) = file.auto_submit_delay_ms {
            config.auto_submit_delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = file.restart_poll_attempts {
            config.restart_poll_attempts = attempts;
        }
        if let Some(ms) = file.restart_poll_interval_ms {
            config.restart_poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.error_idle_timeout_ms {
            config.error_idle_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(secs) = file.model_cache_ttl_secs {
            config.model_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(dir) = file.state_dir {
            config.state_dir = dir;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("GATEKEEP_SERVER_URL") {
            self.server_url = url;
        }
        if let Ok(dir) = std::env::var("GATEKEEP_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
        if let Some(ms) = env_millis("GATEKEEP_DRAIN_GRACE_MS")? {
            self.drain_grace = ms;
        }
        if let Some(ms) = env_millis("GATEKEEP_DEBOUNCE_MS")? {
            self.delta_debounce = ms;
        }
        self.validate()
    }

    /// Reject values that would stall or spin the engine.
    pub fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            return Err(GatekeepError::Configuration(
                "server_url must not be empty".into(),
            ));
        }
        if self.restart_poll_attempts == 0 {
            return Err(GatekeepError::Configuration(
                "restart_poll_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn env_millis(var: &str) -> Result<Option<Duration>> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| GatekeepError::Configuration(format!("{var} must be milliseconds, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}

fn default_state_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".gatekeep"))
        .unwrap_or_else(|| PathBuf::from(".gatekeep"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overrides_only_present_fields() {
        let config = EngineConfig::from_toml_str(
            r#"
            server_url = "http://10.0.0.2:9000"
            drain_grace_ms = 250
            error_idle_timeout_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.server_url, "http://10.0.0.2:9000");
        assert_eq!(config.drain_grace, Duration::from_millis(250));
        assert_eq!(config.error_idle_timeout, None);
        assert_eq!(config.delta_debounce, Duration::from_millis(50));
        assert_eq!(config.line_prefix, "data: ");
    }

    #[test]
    fn zero_poll_attempts_is_rejected() {
        let err = EngineConfig::from_toml_str("restart_poll_attempts = 0").unwrap_err();
        assert!(matches!(err, GatekeepError::Configuration(_)));
    }

    #[test]
    fn malformed_toml_surfaces_as_toml_error() {
        let err = EngineConfig::from_toml_str("server_url = ").unwrap_err();
        assert!(matches!(err, GatekeepError::Toml(_)));
    }
}
