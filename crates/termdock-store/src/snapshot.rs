//! Serializable views of the tab tree for the UI layer

use serde::Serialize;

use crate::session::SessionStatus;

#[derive(Debug, Clone, Serialize)]
pub struct SplitView {
    pub id: String,
    pub session_id: String,
    pub status: Option<SessionStatus>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TabView {
    pub id: String,
    pub title: String,
    pub cwd: String,
    pub status: Option<SessionStatus>,
    pub splits: Vec<SplitView>,
    pub active_split_id: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreSnapshot {
    /// Tabs in display order
    pub tabs: Vec<TabView>,
    pub active_tab_id: Option<String>,
    /// Session that input currently goes to
    pub active_session_id: Option<String>,
}
