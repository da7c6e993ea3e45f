//! termdock Process Bridge
//!
//! The boundary between terminal sessions and the OS process layer:
//! - Exactly one PTY-backed process per session
//! - Raw input via `write`, structured command execution via `run_command`
//! - A single ordered stream of output and exit events, handed out once

mod bridge;
mod error;
mod event;
mod marker;
mod pty;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use bridge::{CommandOutcome, ProcessBridge, SessionHandle};
pub use error::BridgeError;
pub use event::{BridgeEvent, EventReceiver, EventSender};
pub use pty::{PtyBridge, PtyConfig};

pub type Result<T> = std::result::Result<T, BridgeError>;
