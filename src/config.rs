//! Client configuration.
//!
//! Resolution order, later sources winning:
//!
//! 1. Built-in defaults
//! 2. JSON file (explicit path, else `<config dir>/tcpb/config.json` if it exists)
//! 3. Environment: `TCPB_HOST`, `TCPB_PORT`, `TCPB_TRANSCRIPT`
//!
//! Command-line flags are applied on top by the `tcpb` binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::Endpoint;

/// Default TCPB server port.
pub const DEFAULT_PORT: u16 = 11111;

/// Longest `poll.max_wait_secs` accepted (30 days).
pub const MAX_WAIT_SECS: u64 = 30 * 24 * 60 * 60;

/// Client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Connect, send and recv timeout in seconds.
    pub socket_timeout_secs: u64,
    pub poll: PollConfig,
    /// Append-only socket transcript.
    pub transcript: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            socket_timeout_secs: 15,
            poll: PollConfig::default(),
            transcript: None,
        }
    }
}

/// How `compute_job_sync` waits for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// First backoff interval. Must be at least 1 ms.
    pub initial_interval_ms: u64,
    /// Backoff cap. Must not be below `initial_interval_ms`.
    pub max_interval_ms: u64,
    /// Give up after this long. Bounds both submit retries and completion
    /// polling. At most [`MAX_WAIT_SECS`].
    pub max_wait_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 100,
            max_interval_ms: 2000,
            max_wait_secs: 3600,
        }
    }
}

impl PollConfig {
    /// First backoff interval, never shorter than 1 ms.
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms.max(1))
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms).max(self.initial_interval())
    }

    /// Overall deadline, clamped to [`MAX_WAIT_SECS`].
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs.min(MAX_WAIT_SECS))
    }

    /// Interval after `current`: doubled, kept between `initial_interval`
    /// and `max_interval`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .clamp(self.initial_interval(), self.max_interval())
    }
}

impl ClientConfig {
    /// Load configuration from defaults, file and environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => {
                    tracing::info!("Using config file: {}", path.display());
                    Self::from_file(&path)?
                }
                None => Self::default(),
            },
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Apply `TCPB_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("TCPB_HOST") {
            self.host = host;
        }
        if let Ok(port) = std::env::var("TCPB_PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("Invalid TCPB_PORT value: {}", port))?;
        }
        if let Ok(path) = std::env::var("TCPB_TRANSCRIPT") {
            self.transcript = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.socket_timeout_secs == 0 {
            return Err(anyhow!("socket_timeout_secs must be greater than 0"));
        }
        if self.poll.initial_interval_ms == 0 {
            return Err(anyhow!("poll.initial_interval_ms must be greater than 0"));
        }
        if self.poll.max_interval_ms < self.poll.initial_interval_ms {
            return Err(anyhow!(
                "poll.max_interval_ms ({}) must not be below poll.initial_interval_ms ({})",
                self.poll.max_interval_ms,
                self.poll.initial_interval_ms
            ));
        }
        if self.poll.max_wait_secs == 0 || self.poll.max_wait_secs > MAX_WAIT_SECS {
            return Err(anyhow!(
                "poll.max_wait_secs must be between 1 and {}",
                MAX_WAIT_SECS
            ));
        }
        self.endpoint()?;
        Ok(())
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        Endpoint::new(self.host.clone(), self.port).context("Invalid server address")
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }
}

/// `<config dir>/tcpb/config.json`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tcpb").join("config.json"))
}
