//! Backend event stream
//!
//! Output chunks and exit notices for every session travel over one
//! unbounded channel. For a given session id, events arrive in the order
//! the process produced them and `Exit` is always the last one.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<BridgeEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<BridgeEvent>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BridgeEvent {
    /// A chunk of process output
    Data { id: String, bytes: Vec<u8> },
    /// The process is gone; fires exactly once per session
    Exit { id: String, code: i32 },
}

impl BridgeEvent {
    pub fn session_id(&self) -> &str {
        match self {
            BridgeEvent::Data { id, .. } | BridgeEvent::Exit { id, .. } => id,
        }
    }
}

/// Channel whose receiving half can be taken exactly once.
pub(crate) struct EventChannel {
    tx: EventSender,
    rx: Mutex<Option<EventReceiver>>,
}

impl EventChannel {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub(crate) fn sender(&self) -> EventSender {
        self.tx.clone()
    }

    pub(crate) fn take(&self) -> Option<EventReceiver> {
        let rx = self.rx.lock().take();
        if rx.is_none() {
            tracing::warn!("Bridge event stream requested twice");
        }
        rx
    }
}
