//! Daemon configuration.
//!
//! # Example
//!
//! ```toml
//! [network]
//! host = "0.0.0.0"
//! port = 4062
//!
//! [logging]
//! level = "debug"
//!
//! [slic]
//! max_bidirectional_streams = 50
//! idle_timeout_ms = 30000
//!
//! [greeting]
//! max_name_len = 256
//! ```

pub mod global;
pub mod loader;

#[cfg(test)]
mod tests;

pub use global::{LogLevel, LoggingConfig, NetworkConfig, RuntimeConfig};
pub use loader::{load_config, CliArgs, Command};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use slic::SlicConfig;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub network: NetworkConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
    /// Transport settings used by both `serve` and `hello`.
    pub slic: SlicConfig,
    pub greeting: GreetingConfig,
}

/// Greeting service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GreetingConfig {
    /// Longest accepted name in bytes; longer requests are reset.
    ///
    /// **Default:** 1024
    pub max_name_len: usize,

    /// Time allowed for graceful connection shutdown in milliseconds.
    ///
    /// **Default:** 5000
    pub shutdown_timeout_ms: u64,
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            max_name_len: 1024,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl GreetingConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl DaemonConfig {
    /// Validate the entire configuration, collecting every error.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if let Err(e) = self.network.validate() {
            errors.extend(e);
        }
        if let Err(e) = self.runtime.validate() {
            errors.extend(e);
        }
        if let Err(e) = self.slic.validate() {
            errors.push(format!("slic: {}", e));
        }
        if self.greeting.max_name_len == 0 {
            errors.push("greeting.max_name_len must be > 0".to_string());
        }
        if self.greeting.shutdown_timeout_ms == 0 {
            errors.push("greeting.shutdown_timeout_ms must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
