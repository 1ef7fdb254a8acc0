use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::admission::DEFAULT_CAPACITY;
use crate::endpoint::HttpOptions;
use crate::retry::BackoffPolicy;

/// Backoff parameters (`[backoff]` section in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay after the first failure, in seconds.
    pub base_delay_secs: f64,
    /// Ceiling on the un-jittered delay, in seconds.
    pub max_delay_secs: f64,
    /// Jitter factor range `[jitter_min, jitter_max)`.
    pub jitter_min: f64,
    pub jitter_max: f64,
    /// Optional cap on attempts per transfer (None = retry until the deadline).
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 60.0,
            max_delay_secs: 3600.0,
            jitter_min: 0.8,
            jitter_max: 1.2,
            max_attempts: None,
        }
    }
}

/// Curl timeouts for the HTTP endpoint (`[http]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// Abort when throughput stays below `low_speed_limit` bytes/s for `low_speed_time_secs`.
    pub low_speed_limit: u32,
    pub low_speed_time_secs: u64,
    /// Hard timeout for one request.
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            low_speed_limit: 1024,
            low_speed_time_secs: 60,
            timeout_secs: 3600,
        }
    }
}

/// Global configuration loaded from `~/.config/xfer/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XferConfig {
    /// Maximum concurrent in-flight transfers (admission capacity).
    pub max_concurrent_transfers: usize,
    /// Optional overall deadline in seconds, measured from manager start.
    #[serde(default)]
    pub deadline_secs: Option<f64>,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for XferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: DEFAULT_CAPACITY,
            deadline_secs: None,
            backoff: BackoffConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl XferConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_transfers == 0 {
            bail!("max_concurrent_transfers must be at least 1");
        }
        let b = &self.backoff;
        if !(b.base_delay_secs.is_finite() && b.base_delay_secs >= 0.0) {
            bail!("backoff.base_delay_secs must be a non-negative number");
        }
        if !(b.max_delay_secs.is_finite() && b.max_delay_secs >= b.base_delay_secs) {
            bail!("backoff.max_delay_secs must be >= base_delay_secs");
        }
        if !(b.jitter_min.is_finite() && b.jitter_min > 0.0) {
            bail!("backoff.jitter_min must be > 0");
        }
        if !(b.jitter_max.is_finite() && b.jitter_max >= b.jitter_min) {
            bail!("backoff.jitter_max must be >= jitter_min");
        }
        if b.max_attempts == Some(0) {
            bail!("backoff.max_attempts must be at least 1 when set");
        }
        if let Some(d) = self.deadline_secs {
            if !(d.is_finite() && d >= 0.0) {
                bail!("deadline_secs must be a non-negative number");
            }
        }
        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_secs_f64(self.backoff.base_delay_secs),
            max_delay: Duration::from_secs_f64(self.backoff.max_delay_secs),
            jitter_min: self.backoff.jitter_min,
            jitter_max: self.backoff.jitter_max,
            max_attempts: self.backoff.max_attempts,
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs_f64)
    }

    pub fn http_options(&self) -> HttpOptions {
        HttpOptions {
            connect_timeout: Duration::from_secs(self.http.connect_timeout_secs),
            low_speed_limit: self.http.low_speed_limit,
            low_speed_time: Duration::from_secs(self.http.low_speed_time_secs),
            timeout: Duration::from_secs(self.http.timeout_secs),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("xfer")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load and validate a config file.
pub fn load_from_path(path: &Path) -> Result<XferConfig> {
    let data = fs::read_to_string(path)?;
    let cfg: XferConfig = toml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<XferConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = XferConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from_path(&path)
}
