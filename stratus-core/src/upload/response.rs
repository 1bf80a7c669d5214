//! Terminal response delivery
//!
//! Every upload stream produces exactly one [`UploadResponse`]. Failures
//! can race in from several worker tasks at once, so delivery goes through
//! a [`TerminalSignal`] that lets only the first send through.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::protocol::UploadResponse;

/// Destination of the terminal response
pub trait ResponseSink: Send + Sync {
    fn deliver(&self, response: UploadResponse);
}

/// Sink backed by a oneshot channel
pub struct OneshotSink {
    sender: Mutex<Option<oneshot::Sender<UploadResponse>>>,
}

impl ResponseSink for OneshotSink {
    fn deliver(&self, response: UploadResponse) {
        if let Some(sender) = self.sender.lock().take() {
            // Receiver gone means the caller stopped waiting
            let _ = sender.send(response);
        }
    }
}

impl ResponseSink for mpsc::UnboundedSender<UploadResponse> {
    fn deliver(&self, response: UploadResponse) {
        let _ = self.send(response);
    }
}

/// Exactly-once guard in front of a [`ResponseSink`]
pub struct TerminalSignal {
    sent: AtomicBool,
    sink: Box<dyn ResponseSink>,
}

impl TerminalSignal {
    pub fn new(sink: impl ResponseSink + 'static) -> Arc<Self> {
        Arc::new(Self {
            sent: AtomicBool::new(false),
            sink: Box::new(sink),
        })
    }

    /// Signal paired with the receiver the response will arrive on
    pub fn oneshot() -> (Arc<Self>, oneshot::Receiver<UploadResponse>) {
        let (tx, rx) = oneshot::channel();
        let signal = Self::new(OneshotSink {
            sender: Mutex::new(Some(tx)),
        });
        (signal, rx)
    }

    /// Deliver `response` unless one was already sent; returns whether it was
    pub fn send(&self, response: UploadResponse) -> bool {
        if self.sent.swap(true, Ordering::AcqRel) {
            debug!("Dropping extra terminal response: {}", response.message);
            return false;
        }
        self.sink.deliver(response);
        true
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }
}
