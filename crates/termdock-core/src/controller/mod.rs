//! Session Controller
//!
//! The only entry point for the host UI. Owns the single subscription to
//! the bridge's event stream and dispatches it by session id.
//!
//! Flow for creation: UI action -> bridge `create` -> store -> registry.
//! Flow for events: bridge -> registry (data) or store + registry (exit).

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use termdock_bridge::{
    BridgeError, BridgeEvent, CommandOutcome, EventReceiver, ProcessBridge, PtyBridge,
    SessionHandle,
};
use termdock_registry::{GridSize, HostContainer, SessionRegistry, SurfaceFactory};
use termdock_store::{ExitRoute, SessionStore, Split, StoreError, StoreSnapshot, Tab};

use crate::config::Config;
use crate::error::CoreError;
use crate::Result;


/// One logical creation action. At most one of each may be in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CreationKey {
    Tab,
    Split(String),
}

/// Holds a creation key until dropped.
struct InflightGuard {
    keys: Arc<Mutex<HashSet<CreationKey>>>,
    key: CreationKey,
}

impl InflightGuard {
    fn acquire(keys: &Arc<Mutex<HashSet<CreationKey>>>, key: CreationKey) -> Option<Self> {
        if !keys.lock().insert(key.clone()) {
            return None;
        }
        Some(Self {
            keys: Arc::clone(keys),
            key,
        })
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}

/// Events for a session whose `create()` has not returned yet.
#[derive(Default)]
struct Orphan {
    bytes: Vec<u8>,
    exit: Option<i32>,
}

#[derive(Default)]
struct EventTracker {
    /// Torn down on purpose; their late output and exit are dropped
    retired: HashSet<String>,
    orphans: HashMap<String, Orphan>,
}

impl EventTracker {
    /// Forget a session nobody will admit and drop its future events.
    fn abandon(&mut self, id: &str) {
        let orphan = self.orphans.remove(id).unwrap_or_default();
        if orphan.exit.is_none() {
            self.retired.insert(id.to_string());
        }
    }
}

type SharedTracker = Arc<Mutex<EventTracker>>;

/// Receiving end of a spawn running on its own task.
///
/// Dropped before the handle is taken, it kills whatever the spawn produced.
struct PendingSpawn {
    rx: oneshot::Receiver<termdock_bridge::Result<SessionHandle>>,
    bridge: Arc<dyn ProcessBridge>,
    tracker: SharedTracker,
}

impl PendingSpawn {
    fn start(
        bridge: &Arc<dyn ProcessBridge>,
        tracker: &SharedTracker,
        cwd: PathBuf,
        title: String,
    ) -> Self {
        let (tx, rx) = oneshot::channel();
        let task_bridge = Arc::clone(bridge);
        let task_tracker = Arc::clone(tracker);
        tokio::spawn(async move {
            let created = task_bridge.create(&cwd, &title).await;
            if let Err(Ok(handle)) = tx.send(created) {
                task_tracker.lock().abandon(&handle.id);
                tracing::info!(session_id = %handle.id, "Creation abandoned, killing session");
                task_bridge.kill(&handle.id).await;
            }
        });
        Self {
            rx,
            bridge: Arc::clone(bridge),
            tracker: Arc::clone(tracker),
        }
    }

    async fn wait(&mut self) -> Result<SessionHandle> {
        let created = (&mut self.rx)
            .await
            .map_err(|_| BridgeError::Spawn("spawn task ended without a result".to_string()))?;
        Ok(created?)
    }
}

impl Drop for PendingSpawn {
    fn drop(&mut self) {
        // A closed receiver makes a later send fail, so the task cleans up;
        // a handle that already arrived is cleaned up here.
        self.rx.close();
        let Ok(Ok(handle)) = self.rx.try_recv() else {
            return;
        };
        self.tracker.lock().abandon(&handle.id);
        tracing::info!(session_id = %handle.id, "Creation abandoned, killing session");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let bridge = Arc::clone(&self.bridge);
            runtime.spawn(async move { bridge.kill(&handle.id).await });
        }
    }
}

enum Admission<T> {
    Added(T),
    Exited(i32),
    /// The owner went away while the spawn was pending
    Unwanted(StoreError),
}

pub struct SessionController {
    config: Config,
    bridge: Arc<dyn ProcessBridge>,
    factory: Arc<dyn SurfaceFactory>,
    store: SessionStore,
    registry: SessionRegistry,
    inflight: Arc<Mutex<HashSet<CreationKey>>>,
    tracker: SharedTracker,
    events: Mutex<Option<EventReceiver>>,
}

impl SessionController {
    /// Build a controller over `bridge`, taking its event stream.
    pub fn new(
        config: Config,
        bridge: Arc<dyn ProcessBridge>,
        factory: Arc<dyn SurfaceFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let events = bridge.take_events().ok_or(CoreError::EventsTaken)?;
        let registry = SessionRegistry::new(config.cell_metrics(), config.pending_output_limit)
            .with_scrollback(config.scrollback_lines);

        tracing::info!("Session controller initialized");

        Ok(Self {
            config,
            bridge,
            factory,
            store: SessionStore::new(),
            registry,
            inflight: Arc::new(Mutex::new(HashSet::new())),
            tracker: Arc::new(Mutex::new(EventTracker::default())),
            events: Mutex::new(Some(events)),
        })
    }

    /// Controller backed by real PTY processes.
    pub fn with_pty(config: Config, factory: Arc<dyn SurfaceFactory>) -> Result<Self> {
        let bridge = Arc::new(PtyBridge::new(config.pty_config()));
        Self::new(config, bridge, factory)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    // === Creation ===

    /// Spawn a shell in `cwd` and add it as a new active tab.
    ///
    /// Returns `Ok(None)` when another new-tab request is still in flight.
    pub async fn create_tab(&self, cwd: impl AsRef<Path>) -> Result<Option<Tab>> {
        let Some(_guard) = InflightGuard::acquire(&self.inflight, CreationKey::Tab) else {
            tracing::debug!("New tab already in flight, request ignored");
            return Ok(None);
        };

        let cwd = cwd.as_ref().to_path_buf();
        let title = title_for(&cwd);
        let handle = self.spawn_session(cwd.clone(), title.clone()).await?;

        self.admit(handle, |store, handle| store.open_tab(handle, cwd, title))
            .await
    }

    /// Spawn a shell in `cwd` and add it as a focused split of `tab_id`.
    ///
    /// Returns `Ok(None)` when a split for this tab is already in flight,
    /// or when the tab was closed before the spawn finished.
    pub async fn create_split(&self, tab_id: &str, cwd: impl AsRef<Path>) -> Result<Option<Split>> {
        let key = CreationKey::Split(tab_id.to_string());
        let Some(_guard) = InflightGuard::acquire(&self.inflight, key) else {
            tracing::debug!(tab_id = %tab_id, "Split already in flight, request ignored");
            return Ok(None);
        };

        let tab = self.store.tab(tab_id)?;
        let cwd = cwd.as_ref().to_path_buf();
        let handle = self.spawn_session(cwd.clone(), tab.display_title()).await?;

        self.admit(handle, |store, handle| store.open_split(tab_id, handle, cwd))
            .await
    }

    /// Create a process on a controller-owned task.
    async fn spawn_session(&self, cwd: PathBuf, title: String) -> Result<SessionHandle> {
        let mut pending = PendingSpawn::start(&self.bridge, &self.tracker, cwd, title);
        pending.wait().await
    }

    /// Attach a freshly spawned session to the tree.
    ///
    /// Store insertion and registry registration happen under the tracker
    /// lock so no event for the id can slip between them.
    async fn admit<T>(
        &self,
        handle: SessionHandle,
        insert: impl FnOnce(&SessionStore, &SessionHandle) -> termdock_store::Result<T>,
    ) -> Result<Option<T>> {
        let id = handle.id.clone();
        let (admission, replayed) = {
            let mut tracker = self.tracker.lock();
            let early = tracker.orphans.remove(&id).unwrap_or_default();

            if let Some(code) = early.exit {
                (Admission::Exited(code), false)
            } else {
                match insert(&self.store, &handle) {
                    Ok(node) => {
                        self.registry.register(&id);
                        let replayed = !early.bytes.is_empty();
                        if replayed {
                            self.registry.feed(&id, &early.bytes);
                        }
                        (Admission::Added(node), replayed)
                    }
                    Err(e) => {
                        tracker.retired.insert(id.clone());
                        (Admission::Unwanted(e), false)
                    }
                }
            }
        };

        match admission {
            Admission::Added(node) => {
                if replayed {
                    self.store.mark_running(&id);
                }
                Ok(Some(node))
            }
            Admission::Exited(code) => {
                tracing::warn!(session_id = %id, code, "Session exited during startup");
                Err(CoreError::ExitedDuringStartup { id, code })
            }
            Admission::Unwanted(StoreError::TabNotFound(tab_id)) => {
                tracing::info!(
                    session_id = %id,
                    tab_id = %tab_id,
                    "Owner closed while spawn was pending, killing session"
                );
                self.bridge.kill(&id).await;
                Ok(None)
            }
            Admission::Unwanted(e) => {
                self.bridge.kill(&id).await;
                Err(e.into())
            }
        }
    }

    // === Teardown ===

    /// Close a tab, its splits first. Returns false if the tab is unknown.
    pub async fn close_tab(&self, tab_id: &str) -> bool {
        match self.store.close_tab(tab_id) {
            Ok(plan) => {
                self.teardown(&plan.session_ids).await;
                true
            }
            Err(e) => {
                tracing::warn!(tab_id = %tab_id, error = %e, "Close tab ignored");
                false
            }
        }
    }

    pub async fn close_split(&self, tab_id: &str, split_id: &str) -> bool {
        match self.store.close_split(tab_id, split_id) {
            Ok(plan) => {
                self.teardown(&plan.session_ids).await;
                true
            }
            Err(e) => {
                tracing::warn!(tab_id = %tab_id, split_id = %split_id, error = %e, "Close split ignored");
                false
            }
        }
    }

    /// Kill live sessions and dispose their surfaces.
    async fn teardown(&self, session_ids: &[String]) {
        {
            let mut tracker = self.tracker.lock();
            tracker.retired.extend(session_ids.iter().cloned());
        }
        for id in session_ids {
            self.bridge.kill(id).await;
            self.registry.remove(id);
        }
    }

    // === Input ===

    /// Forward raw keystrokes to the active session.
    pub async fn write_active(&self, bytes: &[u8]) -> bool {
        let Some(id) = self.store.active_session_id() else {
            tracing::debug!("Input with no active session dropped");
            return false;
        };
        match self.bridge.write(&id, bytes).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "Write failed");
                false
            }
        }
    }

    /// Run `command` in the active session and wait for its exit status.
    pub async fn run_command_active(&self, command: &str) -> Result<CommandOutcome> {
        let id = self
            .store
            .active_session_id()
            .ok_or(CoreError::NoActiveSession)?;
        tracing::debug!(session_id = %id, command = %command, "Running command");
        Ok(self.bridge.run_command(&id, command).await?)
    }

    // === Display ===

    /// Display a session in `container`, building its surface on first use.
    pub async fn show(&self, session_id: &str, container: Arc<dyn HostContainer>) -> bool {
        if !self
            .registry
            .bind_surface(session_id, self.factory.as_ref(), self.config.default_grid())
        {
            return false;
        }
        if !self.registry.show(session_id, container) {
            return false;
        }
        if let Some(size) = self.registry.grid_size(session_id) {
            self.bridge.resize(session_id, size.cols, size.rows).await;
        }
        true
    }

    pub fn hide(&self, session_id: &str) -> bool {
        self.registry.hide(session_id)
    }

    /// Resize a session's emulator and process to `size`.
    pub async fn resize(&self, session_id: &str, size: GridSize) -> bool {
        if !self.registry.resize_surface(session_id, size) {
            return false;
        }
        self.bridge.resize(session_id, size.cols, size.rows).await;
        true
    }

    // === Navigation ===

    pub fn focus_tab(&self, tab_id: &str) -> bool {
        match self.store.focus_tab(tab_id) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(tab_id = %tab_id, error = %e, "Focus tab ignored");
                false
            }
        }
    }

    pub fn focus_split(&self, tab_id: &str, split_id: Option<&str>) -> bool {
        match self.store.focus_split(tab_id, split_id) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(tab_id = %tab_id, error = %e, "Focus split ignored");
                false
            }
        }
    }

    pub fn rename_tab(&self, tab_id: &str, title: String) -> Result<Tab> {
        Ok(self.store.rename_tab(tab_id, title)?)
    }

    pub fn move_tab(&self, tab_id: &str, index: usize) -> Result<()> {
        Ok(self.store.move_tab(tab_id, index)?)
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    pub fn snapshot_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.store.snapshot())?)
    }

    // === Events ===

    /// Drive the event loop until the bridge's stream closes.
    pub async fn run(&self) -> Result<()> {
        let mut events = self.events.lock().take().ok_or(CoreError::EventsTaken)?;
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        tracing::info!("Process event stream closed");
        Ok(())
    }

    /// Handle every queued event, including ones raised while handling.
    /// Returns how many were handled.
    pub async fn dispatch_pending(&self) -> usize {
        let mut handled = 0;
        loop {
            let batch: Vec<BridgeEvent> = {
                let mut slot = self.events.lock();
                let Some(events) = slot.as_mut() else {
                    return handled;
                };
                std::iter::from_fn(|| events.try_recv().ok()).collect()
            };
            if batch.is_empty() {
                return handled;
            }
            handled += batch.len();
            for event in batch {
                self.handle_event(event).await;
            }
        }
    }

    pub async fn handle_event(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Data { id, bytes } => self.on_data(&id, &bytes),
            BridgeEvent::Exit { id, code } => self.on_exit(&id, code).await,
        }
    }

    fn on_data(&self, id: &str, bytes: &[u8]) {
        {
            let mut tracker = self.tracker.lock();
            if tracker.retired.contains(id) {
                return;
            }
            if !self.registry.feed(id, bytes) {
                let limit = self.config.pending_output_limit;
                let orphan = tracker.orphans.entry(id.to_string()).or_default();
                orphan.bytes.extend_from_slice(bytes);
                if orphan.bytes.len() > limit {
                    let overflow = orphan.bytes.len() - limit;
                    orphan.bytes.drain(..overflow);
                }
                return;
            }
        }
        self.store.mark_running(id);
    }

    async fn on_exit(&self, id: &str, code: i32) {
        {
            let mut tracker = self.tracker.lock();
            if tracker.retired.remove(id) {
                tracing::debug!(session_id = %id, code, "Exit for retired session");
                return;
            }
            if !self.registry.contains(id) {
                tracing::debug!(session_id = %id, code, "Exit before session was added");
                tracker.orphans.entry(id.to_string()).or_default().exit = Some(code);
                return;
            }
        }

        self.registry.mark_exited(id, code);
        let route = self.store.route_exit(id, code);
        tracing::info!(session_id = %id, code, "Session exited");

        let survivors: Vec<String> = match route {
            ExitRoute::Tab(plan) => plan.session_ids.into_iter().filter(|s| s != id).collect(),
            ExitRoute::Split(_) | ExitRoute::Unowned => Vec::new(),
        };
        if !survivors.is_empty() {
            tracing::info!(session_id = %id, splits = survivors.len(), "Cascading close to splits");
            self.teardown(&survivors).await;
        }

        self.dispose_exited(id);
    }

    fn dispose_exited(&self, id: &str) {
        if self.config.exit_linger_ms == 0 {
            self.registry.remove(id);
            return;
        }

        let registry = self.registry.clone();
        let id = id.to_string();
        let linger = Duration::from_millis(self.config.exit_linger_ms);
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            registry.remove(&id);
        });
    }
}

/// Tab title derived from the working directory name.
fn title_for(cwd: &Path) -> String {
    cwd.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| cwd.display().to_string())
}
