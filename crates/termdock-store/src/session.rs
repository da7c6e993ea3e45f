//! Session State Machine
//!
//! ```text
//! Starting
//!   ↓ first output
//! Running
//!   ↓ process exit
//! Exited(code)
//! ```
//! A session that exits before producing output goes straight from
//! Starting to Exited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use termdock_bridge::SessionHandle;

use crate::error::StoreError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "code", rename_all = "lowercase")]
pub enum SessionStatus {
    /// Spawned, no output seen yet
    Starting,
    /// Producing output
    Running,
    /// Process is gone
    Exited(i32),
}

impl SessionStatus {
    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        match (self, target) {
            (SessionStatus::Starting, SessionStatus::Running) => true,
            (SessionStatus::Starting, SessionStatus::Exited(_)) => true,
            (SessionStatus::Running, SessionStatus::Exited(_)) => true,
            // Exited is terminal
            (SessionStatus::Exited(_), _) => false,
            (a, b) if *a == b => true,
            _ => false,
        }
    }

    pub fn is_exited(&self) -> bool {
        matches!(self, SessionStatus::Exited(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Running => "running",
            SessionStatus::Exited(_) => "exited",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Exited(code) => write!(f, "exited({})", code),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Same id the process bridge assigned
    pub id: String,
    pub status: SessionStatus,
    /// OS process id, if known
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn from_handle(handle: &SessionHandle) -> Self {
        Self {
            id: handle.id.clone(),
            status: SessionStatus::Starting,
            pid: handle.pid,
            created_at: handle.created_at,
        }
    }

    pub fn transition_to(&mut self, status: SessionStatus) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }

        tracing::debug!(
            session_id = %self.id,
            from = %self.status,
            to = %status,
            "Session state transition"
        );

        self.status = status;
        Ok(())
    }

    /// Promote to Running on first output; no-op once running or exited.
    pub fn mark_running(&mut self) -> bool {
        if self.status != SessionStatus::Starting {
            return false;
        }
        self.transition_to(SessionStatus::Running).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(SessionStatus::Starting.can_transition_to(SessionStatus::Running));
        assert!(SessionStatus::Starting.can_transition_to(SessionStatus::Exited(1)));
        assert!(SessionStatus::Running.can_transition_to(SessionStatus::Exited(0)));
    }

    #[test]
    fn test_exited_is_terminal() {
        assert!(!SessionStatus::Exited(0).can_transition_to(SessionStatus::Running));
        assert!(!SessionStatus::Exited(0).can_transition_to(SessionStatus::Exited(0)));
        assert!(!SessionStatus::Running.can_transition_to(SessionStatus::Starting));
    }

    #[test]
    fn test_session_lifecycle() {
        let handle = SessionHandle::new(Some(42));
        let mut session = Session::from_handle(&handle);
        assert_eq!(session.status, SessionStatus::Starting);
        assert_eq!(session.pid, Some(42));

        assert!(session.mark_running());
        assert!(!session.mark_running());
        session.transition_to(SessionStatus::Exited(0)).unwrap();
        assert!(session.status.is_exited());
        assert!(session.transition_to(SessionStatus::Running).is_err());
        assert_eq!(session.status.to_string(), "exited(0)");
    }
}
