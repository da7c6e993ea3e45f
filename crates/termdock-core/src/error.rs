//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Process error: {0}")]
    Bridge(#[from] termdock_bridge::BridgeError),

    #[error("Store error: {0}")]
    Store(#[from] termdock_store::StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session {id} exited with code {code} before it was added")]
    ExitedDuringStartup { id: String, code: i32 },

    #[error("No active session")]
    NoActiveSession,

    #[error("Process event stream already taken")]
    EventsTaken,
}
