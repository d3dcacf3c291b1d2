//! Daemon-wide settings: network address, runtime and logging.

use serde::{Deserialize, Serialize};

/// Network address configuration.
///
/// `serve` binds to it; `hello` connects to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Host address.
    ///
    /// Examples:
    /// - `"0.0.0.0"` - Bind to all IPv4 interfaces
    /// - `"::"` - Bind to all IPv6 interfaces
    /// - `"127.0.0.1"` - Localhost only (testing)
    ///
    /// **Default:** `"127.0.0.1"`
    pub host: String,

    /// TCP port.
    ///
    /// **Default:** `4062`
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4062,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.host.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!("Invalid host address: {}", self.host));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// `host:port`, bracketing IPv6 hosts.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Tokio runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads. `0` starts one per CPU core.
    pub worker_threads: usize,

    /// Worker threads are named `<thread_name>-<n>`.
    pub thread_name: String,

    /// Worker stack size in KiB.
    pub stack_size_kib: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            thread_name: "slicd-worker".to_string(),
            stack_size_kib: 2048,
        }
    }
}

impl RuntimeConfig {
    /// Worker thread count with `0` resolved to the core count.
    pub fn resolved_worker_threads(&self) -> usize {
        match self.worker_threads {
            0 => num_cpus::get(),
            n => n,
        }
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.worker_threads > 1024 {
            errors.push(format!("worker_threads {} exceeds 1024", self.worker_threads));
        }
        if self.thread_name.is_empty() {
            errors.push("thread_name must not be empty".to_string());
        }
        if self.stack_size_kib < 128 {
            errors.push(format!("stack_size_kib {} is below 128", self.stack_size_kib));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Output settings for the `tracing` subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: LogLevel,

    /// Colored output.
    pub ansi: bool,

    /// Prefix each line with the emitting file and line.
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            ansi: true,
            source_location: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    const ALL: [LogLevel; 5] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        if lower == "warning" {
            return Ok(LogLevel::Warn);
        }
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == lower)
            .ok_or_else(|| format!("unknown log level '{s}'"))
    }
}
