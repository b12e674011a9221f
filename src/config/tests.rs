//! Unit tests for configuration module
//!
//! Tests defaults, TOML overrides, validation and the per-mode required
//! global sets.

use super::*;
use anyhow::Result;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = ClientConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.mode, Mode::Window);
    assert_eq!(config.window.default_width, 1000);
    assert_eq!(config.window.default_height, 1000);
    assert_eq!(config.clipboard.chunk_size, 4096);
    assert_eq!(config.clipboard.mime_types[0], "text/plain;charset=utf-8");
}

#[test]
fn test_configuration_from_file() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("wlpeek.toml");

    let test_config = r#"
mode = "both"

[window]
title = "probe"
fullscreen = false
default_width = 640
default_height = 480

[clipboard]
chunk_size = 1024
require_advertised = false
"#;

    fs::write(&file_path, test_config)?;

    let config = ClientConfig::load(&file_path)?;

    assert_eq!(config.mode, Mode::Both);
    assert_eq!(config.window.title, "probe");
    assert!(!config.window.fullscreen);
    assert_eq!(config.window.default_width, 640);
    // Unspecified keys keep their defaults
    assert_eq!(config.window.min_width, 200);
    assert_eq!(config.clipboard.chunk_size, 1024);
    assert!(!config.clipboard.require_advertised);
    assert_eq!(config.clipboard.max_payload, 1024 * 1024);

    Ok(())
}

#[test]
fn test_empty_file_yields_defaults() -> Result<()> {
    let config = ClientConfig::from_toml("")?;
    assert_eq!(config, ClientConfig::default());
    Ok(())
}

#[test]
fn test_missing_file_reports_path() {
    let err = ClientConfig::load("/nonexistent/wlpeek.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("/nonexistent/wlpeek.toml"));
}

#[test]
fn test_malformed_toml_rejected() {
    let err = ClientConfig::from_toml("[window\ntitle = 3").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_validation_rejects_bad_values() {
    let mut config = ClientConfig::default();
    config.window.default_width = 0;
    assert!(config.validate().is_err());

    let mut config = ClientConfig::default();
    config.clipboard.chunk_size = 0;
    assert!(config.validate().is_err());

    let mut config = ClientConfig::default();
    config.clipboard.max_payload = 16;
    assert!(config.validate().is_err());

    let mut config = ClientConfig::default();
    config.clipboard.mime_types.clear();
    assert!(config.validate().is_err());
}

#[test]
fn test_required_globals_per_mode() {
    use KnownInterface::*;

    assert_eq!(Mode::Window.required_globals(), vec![Compositor, WmBase, Shm]);
    assert_eq!(Mode::Clipboard.required_globals(), vec![Seat, DataControlManager]);
    assert_eq!(
        Mode::Both.required_globals(),
        vec![Compositor, WmBase, Shm, Seat, DataControlManager]
    );
}

#[test]
fn test_configuration_serialization_roundtrip() -> Result<()> {
    let mut original = ClientConfig::default();
    original.mode = Mode::Clipboard;
    original.window.background = 0xFF000000;

    let text = toml::to_string(&original)?;
    let parsed: ClientConfig = toml::from_str(&text)?;
    assert_eq!(parsed, original);

    Ok(())
}
