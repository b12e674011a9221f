//! Configuration management for wlpeek
//!
//! Built-in defaults cover every setting. An optional TOML file can override
//! any subset of them, and command-line flags are applied on top by the
//! binary. Nothing is read from disk unless a path is given explicitly.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::registry::KnownInterface;

/// Which half of the client runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Map a toplevel window and keep it configured
    #[default]
    Window,
    /// Watch the clipboard selection and print it
    Clipboard,
    /// Both at once
    Both,
}

impl Mode {
    pub fn wants_window(self) -> bool {
        matches!(self, Mode::Window | Mode::Both)
    }

    pub fn wants_clipboard(self) -> bool {
        matches!(self, Mode::Clipboard | Mode::Both)
    }

    /// Globals that must be bound after discovery for this mode to start
    pub fn required_globals(self) -> Vec<KnownInterface> {
        let mut required = Vec::new();
        if self.wants_window() {
            required.extend([
                KnownInterface::Compositor,
                KnownInterface::WmBase,
                KnownInterface::Shm,
            ]);
        }
        if self.wants_clipboard() {
            required.extend([KnownInterface::Seat, KnownInterface::DataControlManager]);
        }
        required
    }
}

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub mode: Mode,

    /// Toplevel window settings
    #[serde(default)]
    pub window: WindowConfig,

    /// Clipboard transfer settings
    #[serde(default)]
    pub clipboard: ClipboardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Toplevel title
    pub title: String,

    /// Size used when the compositor leaves the choice to the client
    pub default_width: i32,
    pub default_height: i32,

    /// Minimum size hint
    pub min_width: i32,
    pub min_height: i32,

    /// Request fullscreen on creation
    pub fullscreen: bool,

    /// ARGB8888 fill colour
    pub background: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClipboardConfig {
    /// Mime types to request, most preferred first
    pub mime_types: Vec<String>,

    /// Bytes per read from the transfer pipe
    pub chunk_size: usize,

    /// Larger payloads are truncated
    pub max_payload: usize,

    /// Only request a type the offer actually advertised
    pub require_advertised: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: String::from("wlpeek"),
            default_width: 1000,
            default_height: 1000,
            min_width: 200,
            min_height: 100,
            fullscreen: true,
            background: 0xFFAA00FF,
        }
    }
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            mime_types: vec![
                String::from("text/plain;charset=utf-8"),
                String::from("text/plain"),
                String::from("UTF8_STRING"),
                String::from("TEXT"),
                String::from("STRING"),
            ],
            chunk_size: 4096,
            max_payload: 1024 * 1024,
            require_advertised: true,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let window = &self.window;
        if window.default_width <= 0 || window.default_height <= 0 {
            return Err(ConfigError::Invalid(format!(
                "default size must be positive, got {}x{}",
                window.default_width, window.default_height
            )));
        }
        if window.min_width < 0 || window.min_height < 0 {
            return Err(ConfigError::Invalid("minimum size cannot be negative".into()));
        }

        let clipboard = &self.clipboard;
        if clipboard.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be non-zero".into()));
        }
        if clipboard.max_payload < clipboard.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "max_payload ({}) is smaller than chunk_size ({})",
                clipboard.max_payload, clipboard.chunk_size
            )));
        }
        if clipboard.mime_types.is_empty() {
            return Err(ConfigError::Invalid("mime_types cannot be empty".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
