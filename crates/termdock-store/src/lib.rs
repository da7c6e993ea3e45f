//! termdock Session Store
//!
//! The tab/split tree and navigation state:
//! - Every live session is owned by exactly one tab (as its main session)
//!   or one split
//! - Sessions move Starting -> Running -> Exited; Exited is terminal
//! - Close operations hand back a teardown plan; the store itself does no I/O

mod error;
mod session;
mod snapshot;
mod store;
mod tab;

pub use error::StoreError;
pub use session::{Session, SessionStatus};
pub use snapshot::{SplitView, StoreSnapshot, TabView};
pub use store::{ExitRoute, Owner, SessionStore, Teardown};
pub use tab::{Split, Tab};

pub type Result<T> = std::result::Result<T, StoreError>;
