//! Toplevel surface configure/ack handshake
//!
//! The state machine only decides *what* to send; the requests themselves go
//! through a [`SurfaceBackend`], which the Wayland session implements on top of
//! `wl_surface`/`xdg_surface`/`xdg_toplevel`.
//!
//! # State machine
//!
//! ```text
//! Created ──start──► AwaitingConfigure ──surface configure──► Running
//!                          │                                     │
//!                          └──────── close / alloc failure ──────┴──► Closing
//! ```
//!
//! A `toplevel.configure` only records the proposed size. The matching
//! `xdg_surface.configure` is acked immediately and, the first time only, a
//! buffer is allocated, attached at the origin, fully damaged and committed.

use log::{debug, info, warn};

use crate::config::WindowConfig;
use crate::error::BufferError;

/// Handshake progress for the single toplevel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceState {
    /// Objects exist, nothing committed yet
    Created,
    /// Initial commit sent, waiting for the compositor's first configure
    AwaitingConfigure,
    /// A configure was acked but no buffer is attached
    Configured,
    /// Buffer attached and committed
    Running,
    /// The client is on its way out
    Closing,
}

/// Events delivered to the toplevel objects, already decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    /// `xdg_toplevel.configure`: a size proposal, 0 means client's choice
    ToplevelConfigure {
        width: i32,
        height: i32,
        states: Vec<String>,
    },
    /// `xdg_surface.configure`: must be acked with this serial
    SurfaceConfigure { serial: u32 },
    /// `xdg_toplevel.close`
    Close,
    /// Anything this client deliberately does not act on
    Ignored(&'static str),
}

/// Static toplevel metadata applied before the initial commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToplevelMetadata {
    pub title: String,
    pub min_width: i32,
    pub min_height: i32,
    pub fullscreen: bool,
}

impl From<&WindowConfig> for ToplevelMetadata {
    fn from(config: &WindowConfig) -> Self {
        Self {
            title: config.title.clone(),
            min_width: config.min_width,
            min_height: config.min_height,
            fullscreen: config.fullscreen,
        }
    }
}

/// Requests the handshake issues against the live surface objects.
#[cfg_attr(test, mockall::automock)]
pub trait SurfaceBackend {
    fn set_toplevel_metadata(&mut self, metadata: &ToplevelMetadata);
    fn ack_configure(&mut self, serial: u32);
    fn allocate_buffer(&mut self, width: i32, height: i32) -> Result<(), BufferError>;
    fn attach_buffer(&mut self);
    fn damage(&mut self, x: i32, y: i32, width: i32, height: i32);
    fn commit(&mut self);
}

/// Configure/ack state for one toplevel surface.
#[derive(Debug)]
pub struct SurfaceHandshake {
    state: SurfaceState,
    width: i32,
    height: i32,
    default_size: (i32, i32),
    buffer_attached: bool,
    last_acked: Option<u32>,
}

impl SurfaceHandshake {
    pub fn new(default_width: i32, default_height: i32) -> Self {
        Self {
            state: SurfaceState::Created,
            width: default_width,
            height: default_height,
            default_size: (default_width, default_height),
            buffer_attached: false,
            last_acked: None,
        }
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    /// Dimensions the buffer is (or will be) allocated with
    pub fn size(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    pub fn buffer_attached(&self) -> bool {
        self.buffer_attached
    }

    pub fn last_acked(&self) -> Option<u32> {
        self.last_acked
    }

    pub fn is_closing(&self) -> bool {
        self.state == SurfaceState::Closing
    }

    /// Apply toplevel metadata and make the initial, buffer-less commit.
    pub fn start<B: SurfaceBackend + ?Sized>(&mut self, metadata: &ToplevelMetadata, backend: &mut B) {
        if self.state != SurfaceState::Created {
            warn!("surface handshake already started (state {:?})", self.state);
            return;
        }

        backend.set_toplevel_metadata(metadata);
        backend.commit();
        self.state = SurfaceState::AwaitingConfigure;
        info!("window '{}' committed, waiting for configure", metadata.title);
    }

    /// Drive the handshake with one event.
    ///
    /// A buffer allocation failure moves the machine to `Closing` and is
    /// returned to the caller as fatal.
    pub fn handle<B: SurfaceBackend + ?Sized>(
        &mut self,
        event: SurfaceEvent,
        backend: &mut B,
    ) -> Result<(), BufferError> {
        match event {
            SurfaceEvent::ToplevelConfigure { width, height, states } => {
                if width > 0 && height > 0 {
                    self.width = width;
                    self.height = height;
                } else {
                    (self.width, self.height) = self.default_size;
                }
                info!(
                    "toplevel configured: proposed {}x{}, using {}x{} states={:?}",
                    width, height, self.width, self.height, states
                );
                Ok(())
            }
            SurfaceEvent::SurfaceConfigure { serial } => self.on_surface_configure(serial, backend),
            SurfaceEvent::Close => {
                info!("close requested by compositor");
                self.state = SurfaceState::Closing;
                Ok(())
            }
            SurfaceEvent::Ignored(what) => {
                debug!("ignoring toplevel event: {}", what);
                Ok(())
            }
        }
    }

    /// Move to `Closing` for a reason outside the protocol (shutdown signal).
    pub fn begin_closing(&mut self) {
        self.state = SurfaceState::Closing;
    }

    fn on_surface_configure<B: SurfaceBackend + ?Sized>(
        &mut self,
        serial: u32,
        backend: &mut B,
    ) -> Result<(), BufferError> {
        // The compositor may hold back further events until this is acked.
        backend.ack_configure(serial);
        self.last_acked = Some(serial);
        debug!("surface configure acked, serial {}", serial);

        if self.state == SurfaceState::Closing {
            return Ok(());
        }
        if self.buffer_attached {
            return Ok(());
        }
        self.state = SurfaceState::Configured;

        if let Err(err) = backend.allocate_buffer(self.width, self.height) {
            warn!("buffer allocation for {}x{} failed: {}", self.width, self.height, err);
            self.state = SurfaceState::Closing;
            return Err(err);
        }

        backend.attach_buffer();
        backend.damage(0, 0, self.width, self.height);
        backend.commit();
        self.buffer_attached = true;
        self.state = SurfaceState::Running;
        info!("attached {}x{} buffer to surface", self.width, self.height);

        Ok(())
    }
}
