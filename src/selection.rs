//! Clipboard selection tracking and data transfer
//!
//! # Protocol Flow
//!
//! 1. `data_offer` introduces a new offer object; its mime types follow as
//!    `offer` events. It is not the selection yet.
//! 2. `selection(offer)` makes it current, releasing whatever was current,
//!    and schedules one transfer. `selection(null)` clears the clipboard.
//! 3. The transfer runs after the dispatch batch: a pipe is created, the write
//!    end is handed to the compositor with `receive`, our copy is closed, the
//!    request is flushed, and the read end is drained until EOF.
//! 4. `finished` releases the current offer; the device is dead afterwards.
//!
//! Only one offer is ever current. [`OfferSlot::replace`] releases the old
//! occupant as part of the swap so it can't be forgotten.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd, FromRawFd, OwnedFd};

use crate::config::ClipboardConfig;
use crate::error::TransferError;

/// Protocol id of an offer object
pub type OfferId = u32;

/// Requests the selection machine issues on an offer object.
pub trait SelectionOffer {
    /// Ask the source to write `mime_type` data into `fd`
    fn receive_into(&self, mime_type: &str, fd: BorrowedFd<'_>);
    /// Destroy the offer object
    fn release(&self);
}

/// Decoded events of the data-control device and its offers.
#[derive(Debug)]
pub enum SelectionEvent<O> {
    /// A new offer object was introduced
    DataOffer { id: OfferId, offer: O },
    /// The offer advertises one more mime type
    MimeType { id: OfferId, mime_type: String },
    /// The clipboard selection changed; `None` means cleared
    Selection(Option<OfferId>),
    /// The primary selection changed; not transferred
    PrimarySelection(Option<OfferId>),
    /// The device is no longer valid
    Finished,
}

/// An offer together with the mime types it has advertised so far.
#[derive(Debug)]
pub struct TrackedOffer<O> {
    pub id: OfferId,
    pub offer: O,
    pub mime_types: Vec<String>,
}

impl<O> TrackedOffer<O> {
    pub fn new(id: OfferId, offer: O) -> Self {
        Self {
            id,
            offer,
            mime_types: Vec::new(),
        }
    }

    pub fn advertises(&self, mime_type: &str) -> bool {
        self.mime_types.iter().any(|m| m == mime_type)
    }
}

/// Single-owner slot for the current selection offer.
#[derive(Debug)]
pub struct OfferSlot<O: SelectionOffer> {
    current: Option<TrackedOffer<O>>,
}

impl<O: SelectionOffer> Default for OfferSlot<O> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<O: SelectionOffer> OfferSlot<O> {
    /// Swap in `next`, releasing the previous occupant first.
    pub fn replace(&mut self, next: Option<TrackedOffer<O>>) {
        if let Some(previous) = self.current.take() {
            debug!("releasing offer {}", previous.id);
            previous.offer.release();
        }
        self.current = next;
    }

    pub fn clear(&mut self) {
        self.replace(None);
    }

    pub fn current(&self) -> Option<&TrackedOffer<O>> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<OfferId> {
        self.current.as_ref().map(|tracked| tracked.id)
    }

    fn current_mut(&mut self) -> Option<&mut TrackedOffer<O>> {
        self.current.as_mut()
    }
}

/// Per-offer lifecycle, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferState {
    /// Known, collecting mime types, not selected
    Announced,
    /// Current selection
    Selected,
    /// Not tracked (released or never seen)
    Gone,
}

/// What a completed transfer produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Payload written to the output, newline-terminated
    Emitted { bytes: usize, truncated: bool },
    /// The source closed the pipe without writing
    Empty,
    /// No acceptable mime type was advertised
    Skipped,
}

/// Bytes read from a transfer pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

/// Selection state for one data-control device.
pub struct SelectionTransfer<O: SelectionOffer> {
    announced: HashMap<OfferId, TrackedOffer<O>>,
    slot: OfferSlot<O>,
    pending: bool,
    finished: bool,
    attempts: usize,
    config: ClipboardConfig,
}

impl<O: SelectionOffer> SelectionTransfer<O> {
    pub fn new(config: ClipboardConfig) -> Self {
        Self {
            announced: HashMap::new(),
            slot: OfferSlot::default(),
            pending: false,
            finished: false,
            attempts: 0,
            config,
        }
    }

    pub fn current(&self) -> Option<&TrackedOffer<O>> {
        self.slot.current()
    }

    pub fn has_pending_transfer(&self) -> bool {
        self.pending
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Transfers started so far, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn offer_state(&self, id: OfferId) -> OfferState {
        if self.slot.current_id() == Some(id) {
            OfferState::Selected
        } else if self.announced.contains_key(&id) {
            OfferState::Announced
        } else {
            OfferState::Gone
        }
    }

    pub fn handle(&mut self, event: SelectionEvent<O>) {
        match event {
            SelectionEvent::DataOffer { id, offer } => {
                debug!("new data offer {}", id);
                if let Some(stale) = self.announced.insert(id, TrackedOffer::new(id, offer)) {
                    stale.offer.release();
                }
            }
            SelectionEvent::MimeType { id, mime_type } => {
                debug!("offer {} advertises {}", id, mime_type);
                if let Some(tracked) = self.announced.get_mut(&id) {
                    tracked.mime_types.push(mime_type);
                } else if let Some(tracked) = self.slot.current_mut().filter(|t| t.id == id) {
                    tracked.mime_types.push(mime_type);
                } else {
                    debug!("mime type for untracked offer {}", id);
                }
            }
            SelectionEvent::Selection(Some(id)) => self.on_selection(id),
            SelectionEvent::Selection(None) => {
                info!("clipboard cleared");
                self.slot.clear();
                self.pending = false;
            }
            SelectionEvent::PrimarySelection(Some(id)) => {
                if let Some(tracked) = self.announced.remove(&id) {
                    debug!("releasing primary selection offer {}", id);
                    tracked.offer.release();
                }
            }
            SelectionEvent::PrimarySelection(None) => {
                debug!("primary selection cleared");
            }
            SelectionEvent::Finished => {
                info!("data device finished, no further offers");
                self.slot.clear();
                self.release_announced();
                self.pending = false;
                self.finished = true;
            }
        }
    }

    fn on_selection(&mut self, id: OfferId) {
        if self.slot.current_id() == Some(id) {
            debug!("offer {} re-selected", id);
            self.pending = true;
            return;
        }

        match self.announced.remove(&id) {
            Some(tracked) => {
                info!("selection changed to offer {} ({:?})", id, tracked.mime_types);
                self.slot.replace(Some(tracked));
                self.pending = true;
            }
            None => {
                warn!("selection names unknown offer {}, treating as cleared", id);
                self.slot.clear();
                self.pending = false;
            }
        }
    }

    /// Pick the mime type to request from the current offer.
    pub fn choose_mime_type(&self) -> Option<&str> {
        let current = self.slot.current()?;
        if !self.config.require_advertised {
            return self.config.mime_types.first().map(String::as_str);
        }
        self.config
            .mime_types
            .iter()
            .map(String::as_str)
            .find(|mime| current.advertises(mime))
    }

    /// Run the transfer scheduled by the last `selection` event, if any.
    ///
    /// `flush` must push the `receive` request to the compositor. The read end
    /// is then drained with a blocking read, which stalls the client if the
    /// source never closes its end.
    pub fn run_pending_transfer<F, W>(
        &mut self,
        flush: F,
        out: &mut W,
    ) -> Option<Result<TransferOutcome, TransferError>>
    where
        F: FnOnce() -> Result<(), String>,
        W: Write + ?Sized,
    {
        if !std::mem::take(&mut self.pending) {
            return None;
        }
        let current = self.slot.current()?;

        let Some(mime_type) = self.choose_mime_type().map(str::to_owned) else {
            info!(
                "offer {} has no acceptable text type ({:?}), skipping",
                current.id, current.mime_types
            );
            return Some(Ok(TransferOutcome::Skipped));
        };

        self.attempts += 1;
        debug!("receiving offer {} as {}", current.id, mime_type);

        let result = receive_via_pipe(
            &current.offer,
            &mime_type,
            flush,
            self.config.chunk_size,
            self.config.max_payload,
        )
        .and_then(|payload| emit(payload, out));

        if let Err(err) = &result {
            warn!("clipboard transfer for offer {} abandoned: {}", current.id, err);
        }
        Some(result)
    }

    /// Release every offer still held. Used at teardown.
    pub fn release_all(&mut self) {
        self.slot.clear();
        self.release_announced();
        self.pending = false;
    }

    fn release_announced(&mut self) {
        for (_, tracked) in self.announced.drain() {
            tracked.offer.release();
        }
    }
}

fn emit<W: Write + ?Sized>(payload: Payload, out: &mut W) -> Result<TransferOutcome, TransferError> {
    if payload.bytes.is_empty() {
        debug!("clipboard transfer returned no data");
        return Ok(TransferOutcome::Empty);
    }
    if payload.truncated {
        warn!("clipboard payload truncated to {} bytes", payload.bytes.len());
    }

    out.write_all(&payload.bytes).map_err(TransferError::Output)?;
    out.write_all(b"\n").map_err(TransferError::Output)?;
    out.flush().map_err(TransferError::Output)?;

    Ok(TransferOutcome::Emitted {
        bytes: payload.bytes.len(),
        truncated: payload.truncated,
    })
}

/// Create a close-on-exec pipe, returning `(read, write)`.
pub fn create_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe2 succeeded, both descriptors are fresh and owned by us.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Receive one payload from `offer` through a private pipe.
pub fn receive_via_pipe<O, F>(
    offer: &O,
    mime_type: &str,
    flush: F,
    chunk_size: usize,
    max_payload: usize,
) -> Result<Payload, TransferError>
where
    O: SelectionOffer + ?Sized,
    F: FnOnce() -> Result<(), String>,
{
    let (read_end, write_end) = create_pipe().map_err(TransferError::Pipe)?;

    offer.receive_into(mime_type, write_end.as_fd());
    // Only the source may hold the write end, or EOF never arrives.
    drop(write_end);

    flush().map_err(TransferError::Flush)?;

    let mut pipe = File::from(read_end);
    read_bounded(&mut pipe, chunk_size, max_payload)
}

/// Read until EOF in `chunk_size` reads, keeping at most `max_payload` bytes.
pub fn read_bounded<R: Read + ?Sized>(
    reader: &mut R,
    chunk_size: usize,
    max_payload: usize,
) -> Result<Payload, TransferError> {
    let mut bytes = Vec::new();
    let mut chunk = vec![0u8; chunk_size.max(1)];

    loop {
        let remaining = max_payload - bytes.len();
        if remaining == 0 {
            let truncated = probe_more(reader)?;
            return Ok(Payload { bytes, truncated });
        }

        let want = remaining.min(chunk.len());
        match reader.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(n) => bytes.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(TransferError::Read(err)),
        }
    }

    Ok(Payload {
        bytes,
        truncated: false,
    })
}

fn probe_more<R: Read + ?Sized>(reader: &mut R) -> Result<bool, TransferError> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(n) => return Ok(n > 0),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(TransferError::Read(err)),
        }
    }
}
