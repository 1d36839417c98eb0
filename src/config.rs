//! Runtime configuration
//!
//! All fields have defaults, so a TOML file only needs the values it changes:
//!
//! ```toml
//! default_buffer_bytes = 65536
//! threading = "per_block"
//!
//! [watchdog]
//! threshold_ms = 2000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::runtime::errors::ConfigError;

/// Which downstream blocks contribute to an output buffer's size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingScope {
    /// Only blocks reading the buffer directly
    Immediate,
    /// Every block reachable downstream over stream edges
    #[default]
    Reachable,
}

/// How blocks are mapped onto worker threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadingMode {
    /// One worker per connected partition
    #[default]
    PerPartition,
    /// One worker per block
    PerBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    /// Report `work()` calls running longer than this
    pub threshold_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Byte budget of a default-sized buffer, before rate adjustments
    pub default_buffer_bytes: usize,
    /// Allocation ceiling for one buffer's backing store
    pub max_buffer_bytes: usize,
    pub sizing_scope: SizingScope,
    pub threading: ThreadingMode,
    /// Longest a worker sleeps before re-polling its blocks
    pub idle_wait_ms: u64,
    pub watchdog: WatchdogConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_buffer_bytes: 32 * 1024,
            max_buffer_bytes: 256 * 1024 * 1024,
            sizing_scope: SizingScope::default(),
            threading: ThreadingMode::default(),
            idle_wait_ms: 10,
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_buffer_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "default_buffer_bytes",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.max_buffer_bytes < self.default_buffer_bytes {
            return Err(ConfigError::Invalid {
                field: "max_buffer_bytes",
                reason: format!(
                    "{} is below default_buffer_bytes ({})",
                    self.max_buffer_bytes, self.default_buffer_bytes
                ),
            });
        }
        if self.idle_wait_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "idle_wait_ms",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.watchdog.enabled && self.watchdog.threshold_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "watchdog.threshold_ms",
                reason: "must be non-zero when the watchdog is enabled".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_default_buffer_bytes(mut self, bytes: usize) -> Self {
        self.default_buffer_bytes = bytes;
        self
    }

    pub fn with_max_buffer_bytes(mut self, bytes: usize) -> Self {
        self.max_buffer_bytes = bytes;
        self
    }

    pub fn with_sizing_scope(mut self, scope: SizingScope) -> Self {
        self.sizing_scope = scope;
        self
    }

    pub fn with_threading(mut self, threading: ThreadingMode) -> Self {
        self.threading = threading;
        self
    }

    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait_ms = (wait.as_millis() as u64).max(1);
        self
    }

    pub fn with_watchdog(mut self, enabled: bool, threshold: Duration) -> Self {
        self.watchdog = WatchdogConfig {
            enabled,
            threshold_ms: threshold.as_millis() as u64,
        };
        self
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn watchdog_threshold(&self) -> Duration {
        Duration::from_millis(self.watchdog.threshold_ms)
    }
}
