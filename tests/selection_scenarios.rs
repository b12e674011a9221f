// Clipboard selection scenarios for wlpeek
//
// Drives the selection state machine through the public API with fake offers
// that write into the real OS pipe handed to them, so the full receive path
// (pipe, flush, bounded drain, newline-terminated output) is exercised.

use std::cell::RefCell;
use std::fs::File;
use std::io::Write;
use std::os::fd::BorrowedFd;
use std::rc::Rc;

use wlpeek::config::ClipboardConfig;
use wlpeek::selection::{
    OfferId, OfferState, SelectionEvent, SelectionOffer, SelectionTransfer, TransferOutcome,
};
use wlpeek::TransferError;

const UTF8: &str = "text/plain;charset=utf-8";

#[derive(Debug, Default)]
struct Journal {
    received: Vec<OfferId>,
    released: Vec<OfferId>,
}

struct PipeOffer {
    id: OfferId,
    payload: Vec<u8>,
    journal: Rc<RefCell<Journal>>,
}

impl SelectionOffer for PipeOffer {
    fn receive_into(&self, _mime_type: &str, fd: BorrowedFd<'_>) {
        self.journal.borrow_mut().received.push(self.id);
        let mut source = File::from(fd.try_clone_to_owned().unwrap());
        source.write_all(&self.payload).unwrap();
    }

    fn release(&self) {
        self.journal.borrow_mut().released.push(self.id);
    }
}

fn offer(
    transfer: &mut SelectionTransfer<PipeOffer>,
    journal: &Rc<RefCell<Journal>>,
    id: OfferId,
    payload: &[u8],
) {
    transfer.handle(SelectionEvent::DataOffer {
        id,
        offer: PipeOffer {
            id,
            payload: payload.to_vec(),
            journal: Rc::clone(journal),
        },
    });
    transfer.handle(SelectionEvent::MimeType {
        id,
        mime_type: UTF8.to_string(),
    });
}

fn run(transfer: &mut SelectionTransfer<PipeOffer>, out: &mut Vec<u8>) -> Option<TransferOutcome> {
    transfer
        .run_pending_transfer(|| Ok(()), out)
        .map(|result| result.unwrap())
}

#[test]
fn test_superseded_selection_gets_no_transfer() {
    let journal = Rc::new(RefCell::new(Journal::default()));
    let mut transfer = SelectionTransfer::new(ClipboardConfig::default());
    let mut out = Vec::new();

    // Both selections land in the same dispatch batch
    offer(&mut transfer, &journal, 10, b"first");
    transfer.handle(SelectionEvent::Selection(Some(10)));
    offer(&mut transfer, &journal, 11, b"second");
    transfer.handle(SelectionEvent::Selection(Some(11)));

    assert_eq!(journal.borrow().released, vec![10]);
    assert_eq!(transfer.offer_state(10), OfferState::Gone);
    assert_eq!(transfer.offer_state(11), OfferState::Selected);

    let outcome = run(&mut transfer, &mut out);
    assert_eq!(
        outcome,
        Some(TransferOutcome::Emitted {
            bytes: 6,
            truncated: false
        })
    );
    assert_eq!(out, b"second\n");
    assert_eq!(journal.borrow().received, vec![11]);
    assert_eq!(transfer.attempts(), 1);
}

#[test]
fn test_each_selection_change_emits_one_line() {
    let journal = Rc::new(RefCell::new(Journal::default()));
    let mut transfer = SelectionTransfer::new(ClipboardConfig::default());
    let mut out = Vec::new();

    offer(&mut transfer, &journal, 1, b"alpha");
    transfer.handle(SelectionEvent::Selection(Some(1)));
    run(&mut transfer, &mut out);

    offer(&mut transfer, &journal, 2, b"beta gamma");
    transfer.handle(SelectionEvent::Selection(Some(2)));
    run(&mut transfer, &mut out);

    assert_eq!(out, b"alpha\nbeta gamma\n");
    assert_eq!(journal.borrow().released, vec![1]);
}

#[test]
fn test_null_selection_triggers_no_transfer() {
    let journal = Rc::new(RefCell::new(Journal::default()));
    let mut transfer = SelectionTransfer::new(ClipboardConfig::default());
    let mut out = Vec::new();

    offer(&mut transfer, &journal, 5, b"gone soon");
    transfer.handle(SelectionEvent::Selection(Some(5)));
    transfer.handle(SelectionEvent::Selection(None));

    assert!(run(&mut transfer, &mut out).is_none());
    assert!(out.is_empty());
    assert!(transfer.current().is_none());
    assert_eq!(journal.borrow().released, vec![5]);
    assert_eq!(transfer.attempts(), 0);
}

#[test]
fn test_empty_transfer_writes_nothing() {
    let journal = Rc::new(RefCell::new(Journal::default()));
    let mut transfer = SelectionTransfer::new(ClipboardConfig::default());
    let mut out = Vec::new();

    offer(&mut transfer, &journal, 3, b"");
    transfer.handle(SelectionEvent::Selection(Some(3)));

    assert_eq!(run(&mut transfer, &mut out), Some(TransferOutcome::Empty));
    assert!(out.is_empty());
}

#[test]
fn test_payload_larger_than_one_chunk_is_drained() {
    let journal = Rc::new(RefCell::new(Journal::default()));
    let config = ClipboardConfig {
        chunk_size: 16,
        max_payload: 1024,
        ..ClipboardConfig::default()
    };
    let mut transfer = SelectionTransfer::new(config);
    let mut out = Vec::new();

    let payload: Vec<u8> = (0..100u8).map(|i| b'a' + i % 26).collect();
    offer(&mut transfer, &journal, 7, &payload);
    transfer.handle(SelectionEvent::Selection(Some(7)));

    run(&mut transfer, &mut out);
    assert_eq!(&out[..100], &payload[..]);
    assert_eq!(out[100], b'\n');
    assert_eq!(out.len(), 101);
}

#[test]
fn test_oversized_payload_is_truncated() {
    let journal = Rc::new(RefCell::new(Journal::default()));
    let config = ClipboardConfig {
        chunk_size: 8,
        max_payload: 32,
        ..ClipboardConfig::default()
    };
    let mut transfer = SelectionTransfer::new(config);
    let mut out = Vec::new();

    offer(&mut transfer, &journal, 8, &[b'z'; 64]);
    transfer.handle(SelectionEvent::Selection(Some(8)));

    assert_eq!(
        run(&mut transfer, &mut out),
        Some(TransferOutcome::Emitted {
            bytes: 32,
            truncated: true
        })
    );
    assert_eq!(out.len(), 33);
}

#[test]
fn test_failed_flush_abandons_only_that_transfer() {
    let journal = Rc::new(RefCell::new(Journal::default()));
    let mut transfer = SelectionTransfer::new(ClipboardConfig::default());
    let mut out = Vec::new();

    offer(&mut transfer, &journal, 20, b"lost");
    transfer.handle(SelectionEvent::Selection(Some(20)));
    let result = transfer.run_pending_transfer(|| Err("broken pipe".to_string()), &mut out);
    assert!(matches!(result, Some(Err(TransferError::Flush(_)))));
    assert!(out.is_empty());

    offer(&mut transfer, &journal, 21, b"kept");
    transfer.handle(SelectionEvent::Selection(Some(21)));
    run(&mut transfer, &mut out);
    assert_eq!(out, b"kept\n");
}

#[test]
fn test_finished_device_releases_all_offers() {
    let journal = Rc::new(RefCell::new(Journal::default()));
    let mut transfer = SelectionTransfer::new(ClipboardConfig::default());

    offer(&mut transfer, &journal, 30, b"selected");
    transfer.handle(SelectionEvent::Selection(Some(30)));
    offer(&mut transfer, &journal, 31, b"never selected");
    transfer.handle(SelectionEvent::Finished);

    assert!(transfer.is_finished());
    assert!(!transfer.has_pending_transfer());
    let mut released = journal.borrow().released.clone();
    released.sort();
    assert_eq!(released, vec![30, 31]);
}
