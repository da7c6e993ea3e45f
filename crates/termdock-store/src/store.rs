//! Session Store
//!
//! In-memory tab/split tree. All mutation happens under one write lock, so
//! every operation is atomic with respect to the others.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use termdock_bridge::SessionHandle;

use crate::error::StoreError;
use crate::session::{Session, SessionStatus};
use crate::snapshot::{SplitView, StoreSnapshot, TabView};
use crate::tab::{Split, Tab};
use crate::Result;

/// Which node of the tree owns a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    /// Main session of a tab
    Tab { tab_id: String },
    Split { tab_id: String, split_id: String },
}

/// Sessions to kill and dispose after a close, splits first and the
/// tab's main session last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Teardown {
    pub tab_id: String,
    pub session_ids: Vec<String>,
}

impl Teardown {
    pub fn len(&self) -> usize {
        self.session_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.session_ids.is_empty()
    }
}

/// Outcome of routing an exit event through the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitRoute {
    /// A tab's main session exited; the whole tab was closed
    Tab(Teardown),
    /// A split's session exited; only that split was closed
    Split(Teardown),
    /// Nobody owns the id (already closed, or never added)
    Unowned,
}

#[derive(Default)]
struct StoreInner {
    tabs: HashMap<String, Tab>,
    splits: HashMap<String, Split>,
    sessions: HashMap<String, Session>,
    /// Tab ids in display order
    tab_order: Vec<String>,
    active_tab_id: Option<String>,
}

impl StoreInner {
    fn track_session(&mut self, handle: &SessionHandle) -> Result<()> {
        if self.sessions.contains_key(&handle.id) {
            return Err(StoreError::DuplicateSession(handle.id.clone()));
        }
        self.sessions
            .insert(handle.id.clone(), Session::from_handle(handle));
        Ok(())
    }

    fn owner_of(&self, session_id: &str) -> Option<Owner> {
        // Main sessions first, then splits
        if self.tabs.contains_key(session_id) {
            return Some(Owner::Tab {
                tab_id: session_id.to_string(),
            });
        }
        self.splits
            .values()
            .find(|split| split.session_id == session_id)
            .map(|split| Owner::Split {
                tab_id: split.tab_id.clone(),
                split_id: split.id.clone(),
            })
    }

    fn remove_split(&mut self, tab_id: &str, split_id: &str) -> Result<String> {
        let tab = self
            .tabs
            .get_mut(tab_id)
            .ok_or_else(|| StoreError::TabNotFound(tab_id.to_string()))?;

        let owned = self
            .splits
            .get(split_id)
            .is_some_and(|split| split.tab_id == tab_id);
        if !owned || !tab.remove_split(split_id) {
            return Err(StoreError::SplitNotFound {
                tab_id: tab_id.to_string(),
                split_id: split_id.to_string(),
            });
        }

        let split = self
            .splits
            .remove(split_id)
            .ok_or_else(|| StoreError::Integrity(format!("split {} vanished", split_id)))?;
        self.sessions.remove(&split.session_id);

        tracing::info!(
            tab_id = %tab_id,
            split_id = %split_id,
            session_id = %split.session_id,
            "Closed split"
        );

        Ok(split.session_id)
    }

    fn remove_tab(&mut self, tab_id: &str) -> Result<Teardown> {
        let split_ids = self
            .tabs
            .get(tab_id)
            .map(|tab| tab.split_ids.clone())
            .ok_or_else(|| StoreError::TabNotFound(tab_id.to_string()))?;

        let mut session_ids = Vec::with_capacity(split_ids.len() + 1);
        for split_id in &split_ids {
            session_ids.push(self.remove_split(tab_id, split_id)?);
        }

        self.tabs.remove(tab_id);
        self.sessions.remove(tab_id);
        session_ids.push(tab_id.to_string());

        let position = self.tab_order.iter().position(|id| id == tab_id);
        self.tab_order.retain(|id| id != tab_id);

        if self.active_tab_id.as_deref() == Some(tab_id) {
            self.active_tab_id = match position {
                Some(index) if index > 0 => self.tab_order.get(index - 1).cloned(),
                _ => self.tab_order.first().cloned(),
            };
        }

        tracing::info!(
            tab_id = %tab_id,
            sessions = session_ids.len(),
            next_active = ?self.active_tab_id,
            "Closed tab"
        );

        Ok(Teardown {
            tab_id: tab_id.to_string(),
            session_ids,
        })
    }

    fn active_session_id(&self) -> Option<String> {
        let tab = self.tabs.get(self.active_tab_id.as_deref()?)?;
        match tab.active_split_id.as_deref() {
            Some(split_id) => self.splits.get(split_id).map(|s| s.session_id.clone()),
            None => Some(tab.id.clone()),
        }
    }
}

pub struct SessionStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
        }
    }

    /// Add a tab for a freshly spawned session and make it active.
    pub fn open_tab(&self, handle: &SessionHandle, cwd: PathBuf, title: String) -> Result<Tab> {
        let mut inner = self.inner.write();
        inner.track_session(handle)?;

        let tab = Tab::new(handle.id.clone(), title, cwd);
        inner.tabs.insert(tab.id.clone(), tab.clone());
        inner.tab_order.push(tab.id.clone());
        inner.active_tab_id = Some(tab.id.clone());

        tracing::info!(tab_id = %tab.id, cwd = %tab.cwd.display(), "Opened tab");

        Ok(tab)
    }

    /// Add a split to `tab_id` for a freshly spawned session and focus it.
    pub fn open_split(&self, tab_id: &str, handle: &SessionHandle, cwd: PathBuf) -> Result<Split> {
        let mut inner = self.inner.write();
        if !inner.tabs.contains_key(tab_id) {
            return Err(StoreError::TabNotFound(tab_id.to_string()));
        }
        inner.track_session(handle)?;

        let split = Split::new(tab_id.to_string(), handle.id.clone(), cwd);
        inner.splits.insert(split.id.clone(), split.clone());
        if let Some(tab) = inner.tabs.get_mut(tab_id) {
            tab.push_split(split.id.clone());
        }

        tracing::info!(
            tab_id = %tab_id,
            split_id = %split.id,
            session_id = %split.session_id,
            "Opened split"
        );

        Ok(split)
    }

    pub fn focus_tab(&self, tab_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.tabs.contains_key(tab_id) {
            return Err(StoreError::TabNotFound(tab_id.to_string()));
        }
        inner.active_tab_id = Some(tab_id.to_string());
        tracing::debug!(tab_id = %tab_id, "Focused tab");
        Ok(())
    }

    /// Focus a split of `tab_id`, or its main session with `None`.
    pub fn focus_split(&self, tab_id: &str, split_id: Option<&str>) -> Result<()> {
        let mut inner = self.inner.write();
        let tab = inner
            .tabs
            .get_mut(tab_id)
            .ok_or_else(|| StoreError::TabNotFound(tab_id.to_string()))?;
        tab.focus_split(split_id)?;
        tracing::debug!(tab_id = %tab_id, split_id = ?split_id, "Focused split");
        Ok(())
    }

    /// Remove a tab and all of its splits.
    pub fn close_tab(&self, tab_id: &str) -> Result<Teardown> {
        self.inner.write().remove_tab(tab_id)
    }

    pub fn close_split(&self, tab_id: &str, split_id: &str) -> Result<Teardown> {
        let session_id = self.inner.write().remove_split(tab_id, split_id)?;
        Ok(Teardown {
            tab_id: tab_id.to_string(),
            session_ids: vec![session_id],
        })
    }

    /// Mark the session exited and close whatever owned it.
    ///
    /// Safe to call for an id that a user close already removed.
    pub fn route_exit(&self, session_id: &str, code: i32) -> ExitRoute {
        let mut inner = self.inner.write();

        if let Some(session) = inner.sessions.get_mut(session_id) {
            if let Err(e) = session.transition_to(SessionStatus::Exited(code)) {
                tracing::warn!(session_id = %session_id, error = %e, "Exit for finished session");
            }
        }

        let routed = match inner.owner_of(session_id) {
            Some(Owner::Tab { tab_id }) => inner.remove_tab(&tab_id).map(ExitRoute::Tab),
            Some(Owner::Split { tab_id, split_id }) => inner
                .remove_split(&tab_id, &split_id)
                .map(|session_id| {
                    ExitRoute::Split(Teardown {
                        tab_id,
                        session_ids: vec![session_id],
                    })
                }),
            None => Ok(ExitRoute::Unowned),
        };

        match routed {
            Ok(route) => {
                tracing::info!(session_id = %session_id, code, "Routed session exit");
                route
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to route exit");
                ExitRoute::Unowned
            }
        }
    }

    /// Promote a session to Running on its first output.
    pub fn mark_running(&self, session_id: &str) -> bool {
        self.inner
            .write()
            .sessions
            .get_mut(session_id)
            .is_some_and(Session::mark_running)
    }

    pub fn owner_of(&self, session_id: &str) -> Option<Owner> {
        self.inner.read().owner_of(session_id)
    }

    pub fn tab(&self, tab_id: &str) -> Result<Tab> {
        self.inner
            .read()
            .tabs
            .get(tab_id)
            .cloned()
            .ok_or_else(|| StoreError::TabNotFound(tab_id.to_string()))
    }

    pub fn split(&self, split_id: &str) -> Option<Split> {
        self.inner.read().splits.get(split_id).cloned()
    }

    /// Tabs in display order
    pub fn tabs(&self) -> Vec<Tab> {
        let inner = self.inner.read();
        inner
            .tab_order
            .iter()
            .filter_map(|id| inner.tabs.get(id).cloned())
            .collect()
    }

    pub fn contains_tab(&self, tab_id: &str) -> bool {
        self.inner.read().tabs.contains_key(tab_id)
    }

    pub fn active_tab_id(&self) -> Option<String> {
        self.inner.read().active_tab_id.clone()
    }

    /// Session that keyboard input currently goes to.
    pub fn active_session_id(&self) -> Option<String> {
        self.inner.read().active_session_id()
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.inner.read().sessions.get(session_id).cloned()
    }

    pub fn rename_tab(&self, tab_id: &str, title: String) -> Result<Tab> {
        let mut inner = self.inner.write();
        let tab = inner
            .tabs
            .get_mut(tab_id)
            .ok_or_else(|| StoreError::TabNotFound(tab_id.to_string()))?;
        tab.set_title(title);
        Ok(tab.clone())
    }

    /// Move a tab to `index` in display order, clamped to the last slot.
    pub fn move_tab(&self, tab_id: &str, index: usize) -> Result<()> {
        let mut inner = self.inner.write();
        let from = inner
            .tab_order
            .iter()
            .position(|id| id == tab_id)
            .ok_or_else(|| StoreError::TabNotFound(tab_id.to_string()))?;

        let id = inner.tab_order.remove(from);
        let to = index.min(inner.tab_order.len());
        inner.tab_order.insert(to, id);

        tracing::debug!(tab_id = %tab_id, from, to, "Moved tab");
        Ok(())
    }

    pub fn tab_count(&self) -> usize {
        self.inner.read().tabs.len()
    }

    pub fn split_count(&self) -> usize {
        self.inner.read().splits.len()
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Verify single ownership of every session and that focus pointers
    /// reference live splits.
    pub fn check_integrity(&self) -> Result<()> {
        let inner = self.inner.read();

        for session_id in inner.sessions.keys() {
            let as_main = inner.tabs.contains_key(session_id) as usize;
            let as_split = inner
                .splits
                .values()
                .filter(|split| &split.session_id == session_id)
                .count();
            if as_main + as_split != 1 {
                return Err(StoreError::Integrity(format!(
                    "session {} has {} owners",
                    session_id,
                    as_main + as_split
                )));
            }
        }

        for tab in inner.tabs.values() {
            if !inner.sessions.contains_key(&tab.id) {
                return Err(StoreError::Integrity(format!(
                    "tab {} has no session record",
                    tab.id
                )));
            }
            if let Some(active) = &tab.active_split_id {
                if !tab.has_split(active) {
                    return Err(StoreError::Integrity(format!(
                        "tab {} focuses missing split {}",
                        tab.id, active
                    )));
                }
            }
            for split_id in &tab.split_ids {
                let owned = inner
                    .splits
                    .get(split_id)
                    .is_some_and(|split| split.tab_id == tab.id);
                if !owned {
                    return Err(StoreError::Integrity(format!(
                        "tab {} lists foreign split {}",
                        tab.id, split_id
                    )));
                }
            }
        }

        if inner.tab_order.len() != inner.tabs.len() {
            return Err(StoreError::Integrity("tab order out of sync".to_string()));
        }

        Ok(())
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read();
        let status_of = |id: &str| inner.sessions.get(id).map(|s| s.status);

        let tabs = inner
            .tab_order
            .iter()
            .filter_map(|id| inner.tabs.get(id))
            .map(|tab| TabView {
                id: tab.id.clone(),
                title: tab.display_title(),
                cwd: tab.cwd.display().to_string(),
                status: status_of(&tab.id),
                splits: tab
                    .split_ids
                    .iter()
                    .filter_map(|id| inner.splits.get(id))
                    .map(|split| SplitView {
                        id: split.id.clone(),
                        session_id: split.session_id.clone(),
                        status: status_of(&split.session_id),
                        is_active: tab.active_split_id.as_deref() == Some(split.id.as_str()),
                    })
                    .collect(),
                active_split_id: tab.active_split_id.clone(),
                is_active: inner.active_tab_id.as_deref() == Some(tab.id.as_str()),
            })
            .collect();

        StoreSnapshot {
            tabs,
            active_tab_id: inner.active_tab_id.clone(),
            active_session_id: inner.active_session_id(),
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SessionStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(store: &SessionStore) -> Tab {
        store
            .open_tab(&SessionHandle::new(None), PathBuf::from("/repo"), "repo".to_string())
            .unwrap()
    }

    fn split(store: &SessionStore, tab_id: &str) -> Split {
        store
            .open_split(tab_id, &SessionHandle::new(None), PathBuf::from("/repo"))
            .unwrap()
    }

    #[test]
    fn test_open_tab() {
        let store = SessionStore::new();
        let tab = open(&store);

        assert_eq!(store.tab_count(), 1);
        assert_eq!(store.split_count(), 0);
        assert_eq!(store.active_tab_id(), Some(tab.id.clone()));
        assert_eq!(store.active_session_id(), Some(tab.id.clone()));
        assert_eq!(
            store.session(&tab.id).map(|s| s.status),
            Some(SessionStatus::Starting)
        );
        store.check_integrity().unwrap();
    }

    #[test]
    fn test_open_split_focuses_it() {
        let store = SessionStore::new();
        let tab = open(&store);
        let split = split(&store, &tab.id);

        let tab = store.tab(&tab.id).unwrap();
        assert_eq!(tab.split_ids, vec![split.id.clone()]);
        assert_eq!(tab.active_split_id, Some(split.id.clone()));
        assert_ne!(split.session_id, tab.id);
        assert_eq!(store.active_session_id(), Some(split.session_id.clone()));
        store.check_integrity().unwrap();
    }

    #[test]
    fn test_open_split_unknown_tab() {
        let store = SessionStore::new();
        let result = store.open_split("missing", &SessionHandle::new(None), PathBuf::from("/"));
        assert!(matches!(result, Err(StoreError::TabNotFound(_))));
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let store = SessionStore::new();
        let handle = SessionHandle::new(None);
        store
            .open_tab(&handle, PathBuf::from("/"), String::new())
            .unwrap();
        let result = store.open_split(&handle.id, &handle, PathBuf::from("/"));
        assert!(matches!(result, Err(StoreError::DuplicateSession(_))));
        store.check_integrity().unwrap();
    }

    #[test]
    fn test_split_exit_resets_focus() {
        let store = SessionStore::new();
        let tab = open(&store);
        let split = split(&store, &tab.id);

        let route = store.route_exit(&split.session_id, 0);
        assert_eq!(
            route,
            ExitRoute::Split(Teardown {
                tab_id: tab.id.clone(),
                session_ids: vec![split.session_id.clone()],
            })
        );

        let tab = store.tab(&tab.id).unwrap();
        assert!(tab.split_ids.is_empty());
        assert_eq!(tab.active_split_id, None);
        assert!(store.session(&split.session_id).is_none());
        store.check_integrity().unwrap();
    }

    #[test]
    fn test_close_tab_tears_down_splits_first() {
        let store = SessionStore::new();
        let tab = open(&store);
        let a = split(&store, &tab.id);
        let b = split(&store, &tab.id);

        let teardown = store.close_tab(&tab.id).unwrap();
        assert_eq!(
            teardown.session_ids,
            vec![a.session_id, b.session_id, tab.id.clone()]
        );
        assert!(store.tab(&tab.id).is_err());
        assert_eq!(store.session_count(), 0);
        assert_eq!(store.split_count(), 0);
        assert_eq!(store.active_tab_id(), None);
    }

    #[test]
    fn test_main_exit_cascades() {
        let store = SessionStore::new();
        let tab = open(&store);
        let split = split(&store, &tab.id);

        match store.route_exit(&tab.id, 2) {
            ExitRoute::Tab(teardown) => {
                assert_eq!(teardown.session_ids, vec![split.session_id, tab.id.clone()]);
            }
            other => panic!("unexpected route {:?}", other),
        }
        assert_eq!(store.tab_count(), 0);
    }

    #[test]
    fn test_route_exit_twice_is_noop() {
        let store = SessionStore::new();
        let tab = open(&store);
        store.close_tab(&tab.id).unwrap();

        assert_eq!(store.route_exit(&tab.id, 0), ExitRoute::Unowned);
        assert_eq!(store.route_exit("never-seen", 0), ExitRoute::Unowned);
    }

    #[test]
    fn test_close_active_selects_previous() {
        let store = SessionStore::new();
        let first = open(&store);
        let second = open(&store);
        let third = open(&store);

        store.focus_tab(&second.id).unwrap();
        store.close_tab(&second.id).unwrap();
        assert_eq!(store.active_tab_id(), Some(first.id.clone()));

        store.close_tab(&first.id).unwrap();
        assert_eq!(store.active_tab_id(), Some(third.id.clone()));

        store.close_tab(&third.id).unwrap();
        assert_eq!(store.active_tab_id(), None);
    }

    #[test]
    fn test_close_inactive_keeps_focus() {
        let store = SessionStore::new();
        let first = open(&store);
        let second = open(&store);

        store.close_tab(&first.id).unwrap();
        assert_eq!(store.active_tab_id(), Some(second.id));
    }

    #[test]
    fn test_close_split_wrong_tab() {
        let store = SessionStore::new();
        let a = open(&store);
        let b = open(&store);
        let split = split(&store, &a.id);

        assert!(matches!(
            store.close_split(&b.id, &split.id),
            Err(StoreError::SplitNotFound { .. })
        ));
        assert_eq!(store.split_count(), 1);
    }

    #[test]
    fn test_focus_split_and_back() {
        let store = SessionStore::new();
        let tab = open(&store);
        let split = split(&store, &tab.id);

        store.focus_split(&tab.id, None).unwrap();
        assert_eq!(store.active_session_id(), Some(tab.id.clone()));

        store.focus_split(&tab.id, Some(&split.id)).unwrap();
        assert_eq!(store.active_session_id(), Some(split.session_id));

        assert!(store.focus_split(&tab.id, Some("nope")).is_err());
    }

    #[test]
    fn test_owner_of() {
        let store = SessionStore::new();
        let tab = open(&store);
        let split = split(&store, &tab.id);

        assert_eq!(
            store.owner_of(&tab.id),
            Some(Owner::Tab {
                tab_id: tab.id.clone()
            })
        );
        assert_eq!(
            store.owner_of(&split.session_id),
            Some(Owner::Split {
                tab_id: tab.id.clone(),
                split_id: split.id.clone()
            })
        );
        assert_eq!(store.owner_of("other"), None);
    }

    #[test]
    fn test_mark_running() {
        let store = SessionStore::new();
        let tab = open(&store);

        assert!(store.mark_running(&tab.id));
        assert!(!store.mark_running(&tab.id));
        assert!(!store.mark_running("missing"));
        assert_eq!(
            store.session(&tab.id).map(|s| s.status),
            Some(SessionStatus::Running)
        );
    }

    #[test]
    fn test_move_and_rename() {
        let store = SessionStore::new();
        let a = open(&store);
        let b = open(&store);
        let c = open(&store);

        store.move_tab(&c.id, 0).unwrap();
        store.move_tab(&a.id, 99).unwrap();
        let order: Vec<String> = store.tabs().into_iter().map(|t| t.id).collect();
        assert_eq!(order, vec![c.id.clone(), b.id.clone(), a.id.clone()]);

        let renamed = store.rename_tab(&b.id, "build".to_string()).unwrap();
        assert_eq!(renamed.title, "build");
        assert!(store.move_tab("missing", 0).is_err());
    }

    #[test]
    fn test_snapshot_serializes() {
        let store = SessionStore::new();
        let tab = open(&store);
        let split = split(&store, &tab.id);
        store.mark_running(&split.session_id);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.tabs.len(), 1);
        assert!(snapshot.tabs[0].is_active);
        assert!(snapshot.tabs[0].splits[0].is_active);
        assert_eq!(snapshot.active_session_id, Some(split.session_id.clone()));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["tabs"][0]["splits"][0]["status"]["state"], "running");
        assert_eq!(json["tabs"][0]["status"]["state"], "starting");
    }

    #[test]
    fn test_clone_shares_state() {
        let store = SessionStore::new();
        let other = store.clone();
        open(&store);
        assert_eq!(other.tab_count(), 1);
    }
}
