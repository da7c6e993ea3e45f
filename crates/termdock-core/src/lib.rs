//! termdock Core
//!
//! Coordination layer for terminal sessions. The host UI talks only to
//! [`SessionController`]; it owns the process bridge subscription, the
//! tab/split store and the surface registry.

mod config;
mod controller;
mod error;

pub use config::Config;
pub use controller::SessionController;
pub use error::CoreError;

// Re-export core components
pub use termdock_bridge::{
    BridgeError, BridgeEvent, CommandOutcome, ProcessBridge, PtyBridge, PtyConfig, SessionHandle,
};
pub use termdock_registry::{
    CellMetrics, ContentBounds, GridSize, HostContainer, NativeHandle, SessionRegistry, Surface,
    SurfaceFactory,
};
pub use termdock_store::{
    Session, SessionStatus, SessionStore, Split, StoreError, StoreSnapshot, Tab, TabView,
};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
