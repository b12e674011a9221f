//! Wayland session: connection, bound globals and event dispatch
//!
//! [`AppState`] receives every protocol event through `Dispatch` impls and
//! translates them into the typed events of the registry, surface and
//! selection state machines. [`Session`] owns the connection and event queue,
//! drives discovery, creates the window and the data-control device, and
//! releases everything in stages at the end.

use log::{debug, info, warn};
use std::io::{self, Write};
use std::os::fd::BorrowedFd;

use wayland_client::protocol::{
    wl_buffer, wl_callback, wl_compositor, wl_registry, wl_seat, wl_shm, wl_shm_pool, wl_surface,
};
use wayland_client::{
    delegate_noop, event_created_child, Connection, Dispatch, EventQueue, Proxy, QueueHandle,
};
use wayland_protocols::xdg::shell::client::{xdg_surface, xdg_toplevel, xdg_wm_base};
use wayland_protocols_wlr::data_control::v1::client::{
    zwlr_data_control_device_v1::{self, ZwlrDataControlDeviceV1},
    zwlr_data_control_manager_v1::ZwlrDataControlManagerV1,
    zwlr_data_control_offer_v1::{self, ZwlrDataControlOfferV1},
};

use crate::config::ClientConfig;
use crate::error::{BufferError, StartupError};
use crate::lifecycle::{run_loop, EventPump, Lifecycle, LoopExit, ShutdownFlag, Teardown, TeardownStage};
use crate::registry::{Announcement, GlobalRegistry, KnownInterface};
use crate::selection::{SelectionEvent, SelectionOffer, SelectionTransfer, TransferOutcome};
use crate::shm;
use crate::surface::{SurfaceBackend, SurfaceEvent, SurfaceHandshake, ToplevelMetadata};

/// Globals bound during discovery, at most one of each.
#[derive(Debug, Default)]
pub struct BoundGlobals {
    compositor: Option<wl_compositor::WlCompositor>,
    wm_base: Option<xdg_wm_base::XdgWmBase>,
    shm: Option<wl_shm::WlShm>,
    seat: Option<wl_seat::WlSeat>,
    data_control: Option<ZwlrDataControlManagerV1>,
}

impl BoundGlobals {
    fn bind(
        &mut self,
        registry: &wl_registry::WlRegistry,
        interface: KnownInterface,
        name: u32,
        version: u32,
        qh: &QueueHandle<AppState>,
    ) {
        match interface {
            KnownInterface::Compositor => {
                self.compositor =
                    Some(registry.bind::<wl_compositor::WlCompositor, _, _>(name, version, qh, ()));
            }
            KnownInterface::WmBase => {
                self.wm_base =
                    Some(registry.bind::<xdg_wm_base::XdgWmBase, _, _>(name, version, qh, ()));
            }
            KnownInterface::Shm => {
                self.shm = Some(registry.bind::<wl_shm::WlShm, _, _>(name, version, qh, ()));
            }
            KnownInterface::Seat => {
                self.seat = Some(registry.bind::<wl_seat::WlSeat, _, _>(name, version, qh, ()));
            }
            KnownInterface::DataControlManager => {
                self.data_control =
                    Some(registry.bind::<ZwlrDataControlManagerV1, _, _>(name, version, qh, ()));
            }
        }
    }
}

/// The live objects behind the toplevel window.
struct WindowObjects {
    surface: wl_surface::WlSurface,
    xdg_surface: xdg_surface::XdgSurface,
    toplevel: xdg_toplevel::XdgToplevel,
    shm: wl_shm::WlShm,
    qh: QueueHandle<AppState>,
    buffer: Option<wl_buffer::WlBuffer>,
    background: u32,
}

impl SurfaceBackend for WindowObjects {
    fn set_toplevel_metadata(&mut self, metadata: &ToplevelMetadata) {
        self.toplevel.set_title(metadata.title.clone());
        self.toplevel
            .set_min_size(metadata.min_width, metadata.min_height);
        if metadata.fullscreen {
            self.toplevel.set_fullscreen(None);
        }
    }

    fn ack_configure(&mut self, serial: u32) {
        self.xdg_surface.ack_configure(serial);
    }

    fn allocate_buffer(&mut self, width: i32, height: i32) -> Result<(), BufferError> {
        let buffer = shm::create_buffer(&self.shm, &self.qh, width, height, self.background)?;
        if let Some(previous) = self.buffer.replace(buffer) {
            previous.destroy();
        }
        Ok(())
    }

    fn attach_buffer(&mut self) {
        self.surface.attach(self.buffer.as_ref(), 0, 0);
    }

    fn damage(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.surface.damage(x, y, width, height);
    }

    fn commit(&mut self) {
        self.surface.commit();
    }
}

struct Window {
    handshake: SurfaceHandshake,
    objects: WindowObjects,
}

struct Clipboard {
    device: ZwlrDataControlDeviceV1,
    transfer: SelectionTransfer<ZwlrDataControlOfferV1>,
}

impl SelectionOffer for ZwlrDataControlOfferV1 {
    fn receive_into(&self, mime_type: &str, fd: BorrowedFd<'_>) {
        self.receive(mime_type.to_string(), fd);
    }

    fn release(&self) {
        self.destroy();
    }
}

/// State shared by every `Dispatch` impl.
pub struct AppState {
    config: ClientConfig,
    registry: GlobalRegistry,
    globals: BoundGlobals,
    window: Option<Window>,
    clipboard: Option<Clipboard>,
    exit: Option<LoopExit>,
}

impl AppState {
    fn new(config: ClientConfig) -> Self {
        Self {
            config,
            registry: GlobalRegistry::new(),
            globals: BoundGlobals::default(),
            window: None,
            clipboard: None,
            exit: None,
        }
    }

    /// First reason wins
    fn request_exit(&mut self, reason: LoopExit) {
        if self.exit.is_none() {
            self.exit = Some(reason);
        }
    }

    fn handle_surface_event(&mut self, event: SurfaceEvent) {
        let Some(window) = self.window.as_mut() else {
            debug!("surface event without a window: {:?}", event);
            return;
        };

        let result = window.handshake.handle(event, &mut window.objects);
        let closing = window.handshake.is_closing();

        match result {
            Err(err) => self.request_exit(LoopExit::Fatal(format!("failed to create buffer: {}", err))),
            Ok(()) if closing => self.request_exit(LoopExit::CloseRequested),
            Ok(()) => {}
        }
    }

    fn handle_selection_event(&mut self, event: SelectionEvent<ZwlrDataControlOfferV1>) {
        match self.clipboard.as_mut() {
            Some(clipboard) => clipboard.transfer.handle(event),
            None => {
                if let SelectionEvent::DataOffer { offer, .. } = event {
                    offer.destroy();
                }
            }
        }
    }

    pub fn registry(&self) -> &GlobalRegistry {
        &self.registry
    }
}

/// Decode the `states` array of `xdg_toplevel.configure`.
fn decode_toplevel_states(raw: &[u8]) -> Vec<String> {
    raw.chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .map(|value| match xdg_toplevel::State::try_from(value) {
            Ok(state) => format!("{:?}", state),
            Err(()) => format!("unknown({})", value),
        })
        .collect()
}

impl Dispatch<wl_registry::WlRegistry, ()> for AppState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => {
                if let Announcement::Bind {
                    interface,
                    name,
                    version,
                } = state.registry.on_global_announced(name, &interface, version)
                {
                    state.globals.bind(registry, interface, name, version, qh);
                }
            }
            wl_registry::Event::GlobalRemove { name } => {
                state.registry.on_global_removed(name);
            }
            _ => debug!("unhandled wl_registry event"),
        }
    }
}

impl Dispatch<xdg_wm_base::XdgWmBase, ()> for AppState {
    fn event(
        _: &mut Self,
        wm_base: &xdg_wm_base::XdgWmBase,
        event: xdg_wm_base::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            wm_base.pong(serial);
            debug!("answered ping {}", serial);
        }
    }
}

impl Dispatch<xdg_surface::XdgSurface, ()> for AppState {
    fn event(
        state: &mut Self,
        _: &xdg_surface::XdgSurface,
        event: xdg_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            xdg_surface::Event::Configure { serial } => SurfaceEvent::SurfaceConfigure { serial },
            _ => SurfaceEvent::Ignored("xdg_surface"),
        };
        state.handle_surface_event(event);
    }
}

impl Dispatch<xdg_toplevel::XdgToplevel, ()> for AppState {
    fn event(
        state: &mut Self,
        _: &xdg_toplevel::XdgToplevel,
        event: xdg_toplevel::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let event = match event {
            xdg_toplevel::Event::Configure {
                width,
                height,
                states,
            } => SurfaceEvent::ToplevelConfigure {
                width,
                height,
                states: decode_toplevel_states(&states),
            },
            xdg_toplevel::Event::Close => SurfaceEvent::Close,
            _ => SurfaceEvent::Ignored("xdg_toplevel"),
        };
        state.handle_surface_event(event);
    }
}

impl Dispatch<wl_surface::WlSurface, ()> for AppState {
    fn event(
        _: &mut Self,
        _: &wl_surface::WlSurface,
        event: wl_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        debug!("ignoring wl_surface event {:?}", event);
    }
}

impl Dispatch<wl_shm::WlShm, ()> for AppState {
    fn event(
        _: &mut Self,
        _: &wl_shm::WlShm,
        event: wl_shm::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_shm::Event::Format { format } = event {
            debug!("shm format {:?}", format);
        }
    }
}

impl Dispatch<wl_seat::WlSeat, ()> for AppState {
    fn event(
        _: &mut Self,
        _: &wl_seat::WlSeat,
        event: wl_seat::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            wl_seat::Event::Capabilities { capabilities } => {
                debug!("seat capabilities {:?}", capabilities);
            }
            wl_seat::Event::Name { name } => debug!("seat name {}", name),
            _ => {}
        }
    }
}

impl Dispatch<ZwlrDataControlDeviceV1, ()> for AppState {
    fn event(
        state: &mut Self,
        _: &ZwlrDataControlDeviceV1,
        event: zwlr_data_control_device_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        use zwlr_data_control_device_v1::Event;

        let event = match event {
            Event::DataOffer { id } => SelectionEvent::DataOffer {
                id: id.id().protocol_id(),
                offer: id,
            },
            Event::Selection { id } => {
                SelectionEvent::Selection(id.map(|offer| offer.id().protocol_id()))
            }
            Event::PrimarySelection { id } => {
                SelectionEvent::PrimarySelection(id.map(|offer| offer.id().protocol_id()))
            }
            Event::Finished => SelectionEvent::Finished,
            _ => {
                debug!("ignoring data-control device event");
                return;
            }
        };
        state.handle_selection_event(event);
    }

    event_created_child!(AppState, ZwlrDataControlDeviceV1, [
        zwlr_data_control_device_v1::EVT_DATA_OFFER_OPCODE => (ZwlrDataControlOfferV1, ()),
    ]);
}

impl Dispatch<ZwlrDataControlOfferV1, ()> for AppState {
    fn event(
        state: &mut Self,
        offer: &ZwlrDataControlOfferV1,
        event: zwlr_data_control_offer_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let zwlr_data_control_offer_v1::Event::Offer { mime_type } = event {
            state.handle_selection_event(SelectionEvent::MimeType {
                id: offer.id().protocol_id(),
                mime_type,
            });
        }
    }
}

delegate_noop!(AppState: ignore wl_compositor::WlCompositor);
delegate_noop!(AppState: ignore wl_shm_pool::WlShmPool);
delegate_noop!(AppState: ignore wl_buffer::WlBuffer);
delegate_noop!(AppState: ignore wl_callback::WlCallback);
delegate_noop!(AppState: ignore ZwlrDataControlManagerV1);

/// A connected client session.
pub struct Session {
    conn: Connection,
    queue: EventQueue<AppState>,
    qh: QueueHandle<AppState>,
    registry: Option<wl_registry::WlRegistry>,
    state: AppState,
    lifecycle: Lifecycle,
    output: Box<dyn Write>,
}

impl Session {
    /// Connect to `$WAYLAND_DISPLAY` and request the registry.
    pub fn connect(config: ClientConfig) -> Result<Self, StartupError> {
        let conn = Connection::connect_to_env()?;
        info!("connected to Wayland display");

        let queue = conn.new_event_queue();
        let qh = queue.handle();
        let registry = conn.display().get_registry(&qh, ());

        Ok(Self {
            conn,
            queue,
            qh,
            registry: Some(registry),
            state: AppState::new(config),
            lifecycle: Lifecycle::new(),
            output: Box::new(io::stdout()),
        })
    }

    /// Send clipboard payloads somewhere other than stdout.
    pub fn with_output(mut self, output: Box<dyn Write>) -> Self {
        self.output = output;
        self
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Collect globals and check the ones the configured mode needs.
    ///
    /// Two roundtrips: some compositors announce globals in more than one batch.
    pub fn discover(&mut self) -> Result<(), StartupError> {
        self.queue.roundtrip(&mut self.state)?;
        self.queue.roundtrip(&mut self.state)?;
        info!(
            "discovery complete: {} globals announced",
            self.state.registry.announced_count()
        );

        let required = self.state.config.mode.required_globals();
        self.state.registry.verify(&required)
    }

    /// Create the surface and toplevel role and make the initial commit.
    pub fn create_window(&mut self) -> Result<(), StartupError> {
        let globals = &self.state.globals;
        let (Some(compositor), Some(wm_base), Some(shm)) =
            (&globals.compositor, &globals.wm_base, &globals.shm)
        else {
            return Err(StartupError::MissingGlobals(
                [KnownInterface::Compositor, KnownInterface::WmBase, KnownInterface::Shm]
                    .into_iter()
                    .filter(|iface| !self.state.registry.is_bound(*iface))
                    .collect(),
            ));
        };

        let surface = compositor.create_surface(&self.qh, ());
        if !surface.is_alive() {
            return Err(StartupError::ObjectCreation("wl_surface"));
        }
        let xdg_surface = wm_base.get_xdg_surface(&surface, &self.qh, ());
        if !xdg_surface.is_alive() {
            surface.destroy();
            return Err(StartupError::ObjectCreation("xdg_surface"));
        }
        let toplevel = xdg_surface.get_toplevel(&self.qh, ());
        if !toplevel.is_alive() {
            xdg_surface.destroy();
            surface.destroy();
            return Err(StartupError::ObjectCreation("xdg_toplevel"));
        }

        let config = &self.state.config.window;
        let mut window = Window {
            handshake: SurfaceHandshake::new(config.default_width, config.default_height),
            objects: WindowObjects {
                surface,
                xdg_surface,
                toplevel,
                shm: shm.clone(),
                qh: self.qh.clone(),
                buffer: None,
                background: config.background,
            },
        };
        window
            .handshake
            .start(&ToplevelMetadata::from(config), &mut window.objects);

        self.state.window = Some(window);
        Ok(())
    }

    /// Get a data-control device for the seat and start tracking selections.
    pub fn watch_selection(&mut self) -> Result<(), StartupError> {
        let globals = &self.state.globals;
        let (Some(seat), Some(manager)) = (&globals.seat, &globals.data_control) else {
            return Err(StartupError::MissingGlobals(
                [KnownInterface::Seat, KnownInterface::DataControlManager]
                    .into_iter()
                    .filter(|iface| !self.state.registry.is_bound(*iface))
                    .collect(),
            ));
        };

        let device = manager.get_data_device(seat, &self.qh, ());
        if !device.is_alive() {
            return Err(StartupError::ObjectCreation("zwlr_data_control_device_v1"));
        }

        info!("watching clipboard selection");
        self.state.clipboard = Some(Clipboard {
            device,
            transfer: SelectionTransfer::new(self.state.config.clipboard.clone()),
        });
        Ok(())
    }

    /// Closure for the signal handler thread: wakes a blocked dispatch.
    pub fn signal_waker(&self) -> impl Fn() + Send + 'static {
        let conn = self.conn.clone();
        let qh = self.qh.clone();
        move || {
            conn.display().sync(&qh, ());
            let _ = conn.flush();
        }
    }

    /// Run the dispatch loop, then tear everything down.
    pub fn run(&mut self, shutdown: &ShutdownFlag) -> LoopExit {
        info!("entering main loop");
        let exit = run_loop(self, shutdown);
        self.shutdown();
        exit
    }

    /// Release every protocol object, innermost first. Idempotent.
    pub fn shutdown(&mut self) {
        let mut lifecycle = std::mem::take(&mut self.lifecycle);
        lifecycle.teardown(self);
        self.lifecycle = lifecycle;
    }
}

impl EventPump for Session {
    fn dispatch(&mut self) -> Result<usize, String> {
        self.queue
            .blocking_dispatch(&mut self.state)
            .map_err(|err| err.to_string())
    }

    fn after_dispatch(&mut self) {
        if let Some(clipboard) = self.state.clipboard.as_mut() {
            let conn = &self.conn;
            let flush = || conn.flush().map_err(|err| err.to_string());

            match clipboard.transfer.run_pending_transfer(flush, &mut *self.output) {
                Some(Ok(TransferOutcome::Emitted { bytes, .. })) => {
                    debug!("printed {} bytes of clipboard data", bytes)
                }
                Some(Ok(outcome)) => debug!("clipboard transfer: {:?}", outcome),
                // Already logged; the loop carries on
                Some(Err(_)) | None => {}
            }
        }

        if let Err(err) = self.conn.flush() {
            warn!("flush after dispatch failed: {}", err);
        }
    }

    fn exit_requested(&self) -> Option<LoopExit> {
        self.state.exit.clone()
    }
}

impl Teardown for Session {
    fn release(&mut self, stage: TeardownStage) {
        let state = &mut self.state;
        match stage {
            TeardownStage::Selection => {
                if let Some(mut clipboard) = state.clipboard.take() {
                    clipboard.transfer.release_all();
                    clipboard.device.destroy();
                }
            }
            TeardownStage::Toplevel => {
                if let Some(window) = state.window.as_mut() {
                    window.handshake.begin_closing();
                    if let Some(buffer) = window.objects.buffer.take() {
                        buffer.destroy();
                    }
                    window.objects.toplevel.destroy();
                    window.objects.xdg_surface.destroy();
                }
            }
            TeardownStage::Surface => {
                if let Some(window) = state.window.take() {
                    window.objects.surface.destroy();
                }
            }
            TeardownStage::ShellGlobals => {
                if let Some(manager) = state.globals.data_control.take() {
                    manager.destroy();
                }
                if let Some(seat) = state.globals.seat.take() {
                    if seat.version() >= 5 {
                        seat.release();
                    }
                }
                if let Some(wm_base) = state.globals.wm_base.take() {
                    wm_base.destroy();
                }
            }
            TeardownStage::CoreGlobals => {
                if let Some(shm) = state.globals.shm.take() {
                    if shm.version() >= 2 {
                        shm.release();
                    }
                }
                // wl_compositor has no destructor request
                state.globals.compositor.take();
            }
            TeardownStage::Registry => {
                // wl_registry has no destructor request either
                self.registry.take();
            }
            TeardownStage::Connection => {
                if let Err(err) = self.conn.flush() {
                    debug!("final flush failed: {}", err);
                }
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(states: &[u32]) -> Vec<u8> {
        states.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    #[test]
    fn test_decode_toplevel_states() {
        let raw = encode(&[2, 4, 99]);
        assert_eq!(
            decode_toplevel_states(&raw),
            vec!["Fullscreen".to_string(), "Activated".to_string(), "unknown(99)".to_string()]
        );
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut raw = encode(&[1]);
        raw.push(0);
        assert_eq!(decode_toplevel_states(&raw), vec!["Maximized".to_string()]);
    }
}
