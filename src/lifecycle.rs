//! Dispatch loop and ordered teardown
//!
//! The loop is single-threaded and cooperative: each iteration blocks in
//! [`EventPump::dispatch`] until a batch of events has been handled, then runs
//! deferred work. Shutdown signals only flip an atomic flag, which is checked at
//! the top of the next iteration; teardown always happens on the loop's thread.

use log::{debug, error, info, trace};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide shutdown request, safe to set from a signal handler thread.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Route SIGINT/SIGTERM to this flag.
    ///
    /// `wake` runs after the flag is set, on the handler thread. It may only
    /// nudge the connection (flush, sync) so a blocked dispatch returns; it must
    /// not destroy protocol objects.
    pub fn install_signal_handler<F>(&self, wake: F) -> Result<(), ctrlc::Error>
    where
        F: Fn() + Send + 'static,
    {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            info!("received shutdown signal");
            flag.request();
            wake();
        })
    }
}

/// Why the dispatch loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// SIGINT/SIGTERM
    Signal,
    /// The compositor asked the toplevel to close
    CloseRequested,
    /// A handler hit an unrecoverable error
    Fatal(String),
    /// Dispatch failed; the connection is unusable
    Transport(String),
}

impl LoopExit {
    pub fn exit_code(&self) -> u8 {
        match self {
            LoopExit::Signal | LoopExit::CloseRequested => 0,
            LoopExit::Fatal(_) | LoopExit::Transport(_) => 1,
        }
    }
}

/// The event source the loop drives.
pub trait EventPump {
    /// Block until at least one batch of events has been dispatched.
    fn dispatch(&mut self) -> Result<usize, String>;

    /// Work deferred until the whole batch has been handled.
    fn after_dispatch(&mut self) {}

    /// A reason to stop, if a handler decided the client should exit.
    fn exit_requested(&self) -> Option<LoopExit>;
}

/// Pump events until a shutdown request, an exit decision or a transport error.
pub fn run_loop<P: EventPump + ?Sized>(pump: &mut P, shutdown: &ShutdownFlag) -> LoopExit {
    let mut iterations: u64 = 0;

    let exit = loop {
        if shutdown.is_requested() {
            break LoopExit::Signal;
        }
        if let Some(exit) = pump.exit_requested() {
            break exit;
        }

        match pump.dispatch() {
            Ok(dispatched) => trace!("dispatched {} events", dispatched),
            Err(err) => {
                error!("dispatch failed: {}", err);
                break LoopExit::Transport(err);
            }
        }
        pump.after_dispatch();
        iterations += 1;
    };

    info!("event loop finished after {} iterations: {:?}", iterations, exit);
    exit
}

/// Teardown stages, innermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TeardownStage {
    /// Offers and the data-control device
    Selection,
    /// Buffer, toplevel role and xdg_surface
    Toplevel,
    /// The wl_surface
    Surface,
    /// Shell, seat and data-control manager
    ShellGlobals,
    /// Shared memory and compositor
    CoreGlobals,
    /// The registry
    Registry,
    /// The connection itself
    Connection,
}

impl TeardownStage {
    pub const ORDER: [TeardownStage; 7] = [
        TeardownStage::Selection,
        TeardownStage::Toplevel,
        TeardownStage::Surface,
        TeardownStage::ShellGlobals,
        TeardownStage::CoreGlobals,
        TeardownStage::Registry,
        TeardownStage::Connection,
    ];
}

/// Something holding protocol objects that must be released in stages.
pub trait Teardown {
    fn release(&mut self, stage: TeardownStage);
}

/// Guards teardown so it happens exactly once.
#[derive(Debug, Default)]
pub struct Lifecycle {
    torn_down: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Release every stage in order. Returns `false` if already done.
    pub fn teardown<T: Teardown + ?Sized>(&mut self, target: &mut T) -> bool {
        if self.torn_down {
            return false;
        }
        self.torn_down = true;

        for stage in TeardownStage::ORDER {
            debug!("teardown: {:?}", stage);
            target.release(stage);
        }
        info!("all protocol objects released");
        true
    }
}
