//! Store error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Tab not found: {0}")]
    TabNotFound(String),

    #[error("Split {split_id} not found in tab {tab_id}")]
    SplitNotFound { tab_id: String, split_id: String },

    #[error("Session already tracked: {0}")]
    DuplicateSession(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Store integrity violated: {0}")]
    Integrity(String),
}
