use std::io::Write;

use clap::Parser;

use super::loader::{load_config_file, resolve};
use super::*;

fn cli(args: &[&str]) -> CliArgs {
    CliArgs::parse_from(std::iter::once("slicd").chain(args.iter().copied()))
}

#[test]
fn test_default_config_is_valid() {
    assert!(DaemonConfig::default().validate().is_ok());
}

#[test]
fn test_network_address() {
    let mut network = NetworkConfig::default();
    assert_eq!(network.address(), "127.0.0.1:4062");
    network.host = "::1".to_string();
    assert_eq!(network.address(), "[::1]:4062");
}

#[test]
fn test_invalid_host_rejected() {
    let mut config = DaemonConfig::default();
    config.network.host = "not-an-ip".to_string();
    let errors = config.validate().unwrap_err();
    assert!(errors.iter().any(|e| e.contains("Invalid host address")));
}

#[test]
fn test_invalid_slic_settings_rejected() {
    let mut config = DaemonConfig::default();
    config.slic.resume_writer_threshold = config.slic.pause_writer_threshold + 1;
    let errors = config.validate().unwrap_err();
    assert!(errors.iter().any(|e| e.starts_with("slic:")));
}

#[test]
fn test_runtime_limits() {
    let mut config = RuntimeConfig::default();
    assert!(config.validate().is_ok());
    assert!(config.resolved_worker_threads() > 0);

    config.worker_threads = 2048;
    config.stack_size_kib = 64;
    let errors = config.validate().unwrap_err();
    assert_eq!(errors.len(), 2);
}

#[test]
fn test_log_level_parse() {
    assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
    assert!("loud".parse::<LogLevel>().is_err());
    assert_eq!(LogLevel::Debug.to_string(), "debug");
}

#[test]
fn test_missing_file_uses_defaults() {
    let config = load_config_file("/nonexistent/slicd.toml").unwrap();
    assert_eq!(config.network.port, NetworkConfig::default().port);
}

#[test]
fn test_file_overrides_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[network]\nport = 9000\n\n[slic]\nmax_bidirectional_streams = 7\n\n[greeting]\nmax_name_len = 16"
    )
    .unwrap();

    let config = load_config_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.network.port, 9000);
    assert_eq!(config.network.host, "127.0.0.1");
    assert_eq!(config.slic.max_bidirectional_streams, 7);
    assert_eq!(config.slic.pause_writer_threshold, 64 * 1024);
    assert_eq!(config.greeting.max_name_len, 16);
}

#[test]
fn test_malformed_file_is_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[network\nport = ").unwrap();
    assert!(load_config_file(file.path().to_str().unwrap()).is_err());
}

#[test]
fn test_cli_overrides_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[network]\nport = 9000\n\n[logging]\nlevel = \"warn\"").unwrap();
    let path = file.path().to_str().unwrap().to_string();

    let args = cli(&["--config", path.as_str(), "--port", "9100", "--log-level", "debug", "serve"]);
    assert_eq!(args.command, Some(Command::Serve));
    let config = resolve(&args).unwrap();
    assert_eq!(config.network.port, 9100);
    assert_eq!(config.logging.level, LogLevel::Debug);
}

#[test]
fn test_hello_subcommand() {
    let args = cli(&["hello", "--name", "Ada"]);
    assert_eq!(
        args.command,
        Some(Command::Hello {
            name: "Ada".to_string()
        })
    );
    assert_eq!(cli(&[]).command, None);
}

#[test]
fn test_default_config_round_trips_through_toml() {
    let text = toml::to_string_pretty(&DaemonConfig::default()).unwrap();
    let parsed: DaemonConfig = toml::from_str(&text).unwrap();
    assert_eq!(parsed.slic, SlicConfig::default());
    assert_eq!(parsed.network.port, 4062);
}
