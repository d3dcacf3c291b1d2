//! Configuration loading.
//!
//! Precedence, lowest first:
//! 1. Default values
//! 2. Configuration file (TOML)
//! 3. Environment variables (`SLICD_` prefix, `__` separator)
//! 4. Command-line arguments

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config as ConfigLoader;
use std::path::Path;

use super::DaemonConfig;

/// Command-line interface.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(long, short = 'c', default_value = "slicd.toml", global = true)]
    pub config: String,

    /// Host address (overrides config file)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port (overrides config file)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Log level (overrides config file)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate: bool,

    /// Print default configuration and exit
    #[arg(long)]
    pub print_default_config: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Accept connections and answer every stream with a greeting
    Serve,
    /// Connect, send a name and print the greeting
    Hello {
        /// Name to greet
        #[arg(long, default_value = "world")]
        name: String,
    },
}

/// Parse the command line and load the configuration.
///
/// Handles `--print-default-config` and `--validate` by printing and exiting.
pub fn load_config() -> Result<(DaemonConfig, Command)> {
    let cli = CliArgs::parse();

    if cli.print_default_config {
        print_default_config()?;
        std::process::exit(0);
    }

    let config = resolve(&cli)?;

    if cli.validate {
        println!("✓ Configuration is valid");
        std::process::exit(0);
    }

    Ok((config, cli.command.unwrap_or(Command::Serve)))
}

/// Apply file, environment and CLI layers for `cli`, then validate.
pub fn resolve(cli: &CliArgs) -> Result<DaemonConfig> {
    let mut config = load_config_file(&cli.config)?;
    apply_env_overrides(&mut config)?;
    apply_cli_overrides(&mut config, cli);

    config.validate().map_err(|errors| {
        anyhow::anyhow!("Configuration validation failed:\n{}", errors.join("\n"))
    })?;
    Ok(config)
}

/// Load configuration from a TOML file; a missing file means defaults.
pub fn load_config_file(path: &str) -> Result<DaemonConfig> {
    let path_obj = Path::new(path);

    if !path_obj.exists() {
        tracing::warn!(
            config_path = %path,
            "Configuration file not found, using defaults"
        );
        return Ok(DaemonConfig::default());
    }

    let config_str = std::fs::read_to_string(path_obj)
        .with_context(|| format!("Failed to read config file: {}", path))?;

    toml::from_str(&config_str).with_context(|| format!("Failed to parse TOML config: {}", path))
}

/// Apply environment variable overrides.
///
/// Examples:
/// - `SLICD_NETWORK__HOST=0.0.0.0`
/// - `SLICD_LOGGING__LEVEL=debug`
/// - `SLICD_SLIC__IDLE_TIMEOUT_MS=30000`
fn apply_env_overrides(config: &mut DaemonConfig) -> Result<()> {
    let env_config = ConfigLoader::builder()
        .add_source(
            config::Environment::with_prefix("SLICD")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .context("Failed to load environment variables")?;

    if let Ok(host) = env_config.get_string("network.host") {
        config.network.host = host;
    }
    if let Ok(port) = env_config.get_int("network.port") {
        config.network.port =
            u16::try_from(port).with_context(|| format!("Invalid SLICD port: {}", port))?;
    }
    if let Ok(level) = env_config.get_string("logging.level") {
        if let Ok(parsed_level) = level.parse() {
            config.logging.level = parsed_level;
        }
    }

    let slic = &mut config.slic;
    let numeric: [(&str, &mut u64); 6] = [
        ("slic.max_bidirectional_streams", &mut slic.max_bidirectional_streams),
        ("slic.max_unidirectional_streams", &mut slic.max_unidirectional_streams),
        ("slic.pause_writer_threshold", &mut slic.pause_writer_threshold),
        ("slic.resume_writer_threshold", &mut slic.resume_writer_threshold),
        ("slic.max_stream_frame_size", &mut slic.max_stream_frame_size),
        ("slic.idle_timeout_ms", &mut slic.idle_timeout_ms),
    ];
    for (key, field) in numeric {
        if let Ok(value) = env_config.get_int(key) {
            *field = u64::try_from(value)
                .with_context(|| format!("Invalid value for {}: {}", key, value))?;
        }
    }

    Ok(())
}

fn apply_cli_overrides(config: &mut DaemonConfig, cli: &CliArgs) {
    if let Some(ref host) = cli.host {
        config.network.host = host.clone();
    }

    if let Some(port) = cli.port {
        config.network.port = port;
    }

    if let Some(ref level_str) = cli.log_level {
        if let Ok(level) = level_str.parse() {
            config.logging.level = level;
        } else {
            tracing::warn!(level = %level_str, "Invalid log level specified, ignoring");
        }
    }
}

/// Print the default configuration in TOML format.
fn print_default_config() -> Result<()> {
    let default_config = DaemonConfig::default();
    let toml_str =
        toml::to_string_pretty(&default_config).context("Failed to serialize default config")?;
    println!("{}", toml_str);
    Ok(())
}
