//! # wlpeek
//!
//! A minimal Wayland client that does one of two things, or both:
//! map a fullscreen toplevel window filled with a solid colour, or watch the
//! clipboard selection through `wlr-data-control` and print each new text
//! selection to stdout.
//!
//! ## Architecture
//!
//! - `registry`: global announcements, version clamping and capability checks
//! - `surface`: the xdg-shell configure handshake as a state machine
//! - `selection`: offer tracking and pipe-based clipboard transfers
//! - `shm`: memfd-backed ARGB8888 buffers
//! - `lifecycle`: the dispatch loop, shutdown signals and staged teardown
//! - `session`: the Wayland connection and the `Dispatch` glue
//! - `config`: defaults, TOML overrides and validation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use wlpeek::{ClientConfig, Session, ShutdownFlag};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut session = Session::connect(ClientConfig::default())?;
//!     session.discover()?;
//!     session.create_window()?;
//!     let exit = session.run(&ShutdownFlag::new());
//!     std::process::exit(exit.exit_code().into())
//! }
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod selection;
pub mod session;
pub mod shm;
pub mod surface;

pub use config::{ClientConfig, Mode};
pub use error::{BufferError, ConfigError, StartupError, TransferError};
pub use lifecycle::{LoopExit, ShutdownFlag};
pub use registry::{GlobalRegistry, KnownInterface};
pub use session::Session;

/// Version information for wlpeek
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
