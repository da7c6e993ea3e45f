//! Tab and split data structures
//!
//! A tab is identified by its main session's id. Splits carry their own
//! id and their own session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::StoreError;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tab {
    /// Equals the main session's id
    pub id: String,
    pub title: String,
    /// Working directory the main session started in
    pub cwd: PathBuf,
    /// Splits in display order
    pub split_ids: Vec<String>,
    /// Focused split; `None` shows the main session
    pub active_split_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tab {
    pub fn new(session_id: String, title: String, cwd: PathBuf) -> Self {
        let now = Utc::now();

        Self {
            id: session_id,
            title,
            cwd,
            split_ids: Vec::new(),
            active_split_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn main_session_id(&self) -> &str {
        &self.id
    }

    pub fn has_split(&self, split_id: &str) -> bool {
        self.split_ids.iter().any(|id| id == split_id)
    }

    /// Append a split and focus it
    pub fn push_split(&mut self, split_id: String) {
        if !self.has_split(&split_id) {
            self.split_ids.push(split_id.clone());
        }
        self.active_split_id = Some(split_id);
        self.updated_at = Utc::now();
    }

    /// Drop a split; focus falls back to the main session if it was active.
    pub fn remove_split(&mut self, split_id: &str) -> bool {
        let before = self.split_ids.len();
        self.split_ids.retain(|id| id != split_id);
        if self.active_split_id.as_deref() == Some(split_id) {
            self.active_split_id = None;
        }
        self.updated_at = Utc::now();
        self.split_ids.len() != before
    }

    /// Point focus at a split, or at the main session with `None`.
    pub fn focus_split(&mut self, split_id: Option<&str>) -> Result<()> {
        if let Some(split_id) = split_id {
            if !self.has_split(split_id) {
                return Err(StoreError::SplitNotFound {
                    tab_id: self.id.clone(),
                    split_id: split_id.to_string(),
                });
            }
        }
        self.active_split_id = split_id.map(str::to_string);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn set_title(&mut self, title: String) {
        self.title = title;
        self.updated_at = Utc::now();
    }

    /// Title with fallback to the working directory
    pub fn display_title(&self) -> String {
        if self.title.trim().is_empty() {
            self.cwd.display().to_string()
        } else {
            self.title.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Split {
    pub id: String,
    /// Owning tab
    pub tab_id: String,
    /// Distinct from the tab's main session
    pub session_id: String,
    pub cwd: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Split {
    pub fn new(tab_id: String, session_id: String, cwd: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tab_id,
            session_id,
            cwd,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab() -> Tab {
        Tab::new("s-main".to_string(), "repo".to_string(), PathBuf::from("/repo"))
    }

    #[test]
    fn test_new_tab() {
        let tab = tab();
        assert_eq!(tab.main_session_id(), "s-main");
        assert!(tab.split_ids.is_empty());
        assert!(tab.active_split_id.is_none());
    }

    #[test]
    fn test_split_focus_and_removal() {
        let mut tab = tab();
        tab.push_split("a".to_string());
        tab.push_split("b".to_string());
        assert_eq!(tab.split_ids, vec!["a", "b"]);
        assert_eq!(tab.active_split_id.as_deref(), Some("b"));

        tab.focus_split(Some("a")).unwrap();
        assert!(tab.remove_split("a"));
        assert_eq!(tab.active_split_id, None);
        assert!(!tab.remove_split("a"));
    }

    #[test]
    fn test_focus_unknown_split_rejected() {
        let mut tab = tab();
        assert!(tab.focus_split(Some("nope")).is_err());
        assert!(tab.focus_split(None).is_ok());
    }

    #[test]
    fn test_display_title_falls_back_to_cwd() {
        let mut tab = tab();
        tab.set_title("  ".to_string());
        assert_eq!(tab.display_title(), "/repo");
    }
}
