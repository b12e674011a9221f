//! Global discovery and binding bookkeeping
//!
//! The compositor advertises its capabilities as globals. This module decides,
//! for each announcement, whether the client binds it. The set of interfaces
//! the client understands is closed: anything else comes back as
//! [`Announcement::Unknown`] and is never bound.
//!
//! # Binding rules
//!
//! - First announcement of a known interface wins; later ones are ignored.
//! - The bound version is `min(advertised, supported)`.
//! - `global_remove` is accepted and reported but nothing is invalidated.
//!
//! After discovery the caller checks [`GlobalRegistry::verify`] against the
//! interfaces its mode requires.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;

use crate::error::StartupError;

/// Interfaces this client knows how to bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KnownInterface {
    /// `wl_compositor`, surface factory
    Compositor,
    /// `xdg_wm_base`, toplevel shell (pings the client)
    WmBase,
    /// `wl_shm`, shared-memory pool factory
    Shm,
    /// `wl_seat`, input and selection source
    Seat,
    /// `zwlr_data_control_manager_v1`, privileged clipboard access
    DataControlManager,
}

impl KnownInterface {
    /// Every interface the client can bind, in creation order.
    pub const ALL: [KnownInterface; 5] = [
        KnownInterface::Compositor,
        KnownInterface::WmBase,
        KnownInterface::Shm,
        KnownInterface::Seat,
        KnownInterface::DataControlManager,
    ];

    /// Protocol interface name as announced by the registry
    pub fn name(self) -> &'static str {
        match self {
            KnownInterface::Compositor => "wl_compositor",
            KnownInterface::WmBase => "xdg_wm_base",
            KnownInterface::Shm => "wl_shm",
            KnownInterface::Seat => "wl_seat",
            KnownInterface::DataControlManager => "zwlr_data_control_manager_v1",
        }
    }

    /// Highest version whose requests and events this client handles
    pub fn supported_version(self) -> u32 {
        match self {
            KnownInterface::Compositor => 4,
            KnownInterface::WmBase => 1,
            KnownInterface::Shm => 2,
            KnownInterface::Seat => 5,
            KnownInterface::DataControlManager => 2,
        }
    }

    /// Whether the global sends events of its own once bound.
    pub fn has_event_stream(self) -> bool {
        matches!(self, KnownInterface::WmBase | KnownInterface::Seat)
    }

    /// Look up an announced interface name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|iface| iface.name() == name)
    }
}

impl fmt::Display for KnownInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a single `global` announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    /// Bind `name` as `interface` at `version`
    Bind {
        interface: KnownInterface,
        name: u32,
        version: u32,
    },
    /// Already bound under `first_name`; ignored
    Duplicate {
        interface: KnownInterface,
        first_name: u32,
    },
    /// Not an interface this client uses
    Unknown,
}

/// A global the client has bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundGlobal {
    pub name: u32,
    pub version: u32,
}

/// Tracks which known globals are bound.
#[derive(Debug, Default)]
pub struct GlobalRegistry {
    bound: HashMap<KnownInterface, BoundGlobal>,
    announced: usize,
    removed: usize,
}

impl GlobalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a `wl_registry.global` event.
    ///
    /// Returns [`Announcement::Bind`] at most once per interface. The binding
    /// is recorded immediately, so the caller must perform it.
    pub fn on_global_announced(&mut self, name: u32, interface: &str, version: u32) -> Announcement {
        self.announced += 1;
        debug!("global announced: {} v{} (name {})", interface, version, name);

        let Some(known) = KnownInterface::from_name(interface) else {
            return Announcement::Unknown;
        };

        if let Some(existing) = self.bound.get(&known) {
            warn!(
                "ignoring duplicate {} global (name {}), already bound as name {}",
                known, name, existing.name
            );
            return Announcement::Duplicate {
                interface: known,
                first_name: existing.name,
            };
        }

        let version = version.min(known.supported_version());
        self.bound.insert(known, BoundGlobal { name, version });
        info!("binding {} v{} (name {})", known, version, name);

        Announcement::Bind {
            interface: known,
            name,
            version,
        }
    }

    /// Handle a `wl_registry.global_remove` event.
    ///
    /// Cached handles stay as they are; the removed interface is only reported.
    pub fn on_global_removed(&mut self, name: u32) -> Option<KnownInterface> {
        self.removed += 1;
        let removed = self
            .bound
            .iter()
            .find(|(_, global)| global.name == name)
            .map(|(iface, _)| *iface);

        match removed {
            Some(iface) => warn!("bound global {} (name {}) was removed by the compositor", iface, name),
            None => debug!("global {} removed", name),
        }
        removed
    }

    pub fn is_bound(&self, interface: KnownInterface) -> bool {
        self.bound.contains_key(&interface)
    }

    pub fn bound(&self, interface: KnownInterface) -> Option<BoundGlobal> {
        self.bound.get(&interface).copied()
    }

    /// Number of `global` events seen, bound or not
    pub fn announced_count(&self) -> usize {
        self.announced
    }

    /// Every required interface must be bound; otherwise all missing ones are
    /// reported together, in `required` order.
    pub fn verify(&self, required: &[KnownInterface]) -> Result<(), StartupError> {
        let missing: Vec<KnownInterface> = required
            .iter()
            .copied()
            .filter(|iface| !self.is_bound(*iface))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(StartupError::MissingGlobals(missing))
        }
    }
}


#[cfg(test)]
mod property_tests;
