//! Manager configuration.
//!
//! All fields have defaults, so an empty TOML document is a valid configuration:
//!
//! ```toml
//! poll_interval_ms = 16      # ~60 Hz
//! slow_cycle_warn_ms = 250   # 0 disables the slow-cycle warning
//! thread_name = "stickpoll-poll"
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Period of the poll loop.
    pub poll_interval_ms: u64,
    /// A poll cycle that takes longer than this is logged as a warning.
    pub slow_cycle_warn_ms: u64,
    /// Name given to the background poll thread.
    pub thread_name: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 16,
            slow_cycle_warn_ms: 250,
            thread_name: "stickpoll-poll".to_string(),
        }
    }
}

impl ManagerConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ManagerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be non-zero".into()));
        }
        if self.thread_name.trim().is_empty() {
            return Err(Error::Config("thread_name must not be empty".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn slow_cycle_threshold(&self) -> Option<Duration> {
        (self.slow_cycle_warn_ms > 0).then(|| Duration::from_millis(self.slow_cycle_warn_ms))
    }
}
