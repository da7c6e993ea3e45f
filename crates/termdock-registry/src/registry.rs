//! Session Registry
//!
//! Tracks one entry per session id. An entry starts without a surface and
//! buffers output until the first display binds one; from then on the
//! surface moves between host containers and an off-screen holding area
//! until the session is removed.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::host::{CellMetrics, GridSize, HostContainer};
use crate::surface::{Surface, SurfaceFactory};

const DEFAULT_PENDING_LIMIT: usize = 64 * 1024;
const DEFAULT_SCROLLBACK: usize = 1000;

enum Mount {
    /// Off-screen: never shown, or parked after being hidden
    Hidden,
    Shown(Arc<dyn HostContainer>),
}

struct Entry {
    surface: Option<Surface>,
    /// Output received before a surface was bound
    pending: Vec<u8>,
    mount: Mount,
    exit_code: Option<i32>,
}

impl Entry {
    fn new() -> Self {
        Self {
            surface: None,
            pending: Vec::new(),
            mount: Mount::Hidden,
            exit_code: None,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<String, Entry>,
    /// container label -> session id shown in it
    occupants: HashMap<String, String>,
}

impl RegistryInner {
    /// Move a shown surface into the holding area.
    fn park(&mut self, id: &str) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        if !matches!(entry.mount, Mount::Shown(_)) {
            return;
        }
        if let Mount::Shown(container) = std::mem::replace(&mut entry.mount, Mount::Hidden) {
            if let Some(surface) = entry.surface.as_ref() {
                container.release(surface.handle());
            }
            if self.occupants.get(container.label()).map(String::as_str) == Some(id) {
                self.occupants.remove(container.label());
            }
            tracing::debug!(session_id = %id, container = %container.label(), "Surface parked");
        }
    }
}

pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    cells: CellMetrics,
    pending_limit: usize,
    scrollback: usize,
}

impl SessionRegistry {
    pub fn new(cells: CellMetrics, pending_limit: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
            cells,
            pending_limit,
            scrollback: DEFAULT_SCROLLBACK,
        }
    }

    /// Lines of history each surface built from now on keeps.
    pub fn with_scrollback(mut self, lines: usize) -> Self {
        self.scrollback = lines;
        self
    }

    /// Create an empty entry for `id`. Returns false if one already exists.
    pub fn register(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        if inner.entries.contains_key(id) {
            return false;
        }
        inner.entries.insert(id.to_string(), Entry::new());
        tracing::debug!(session_id = %id, "Registered session");
        true
    }

    /// Build the surface for `id` unless it already has one.
    ///
    /// The factory runs at most once per session; buffered output is
    /// replayed into the new emulator.
    pub fn bind_surface(&self, id: &str, factory: &dyn SurfaceFactory, size: GridSize) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.entries.get_mut(id) else {
            tracing::warn!(session_id = %id, "Bind for unknown session ignored");
            return false;
        };
        if entry.surface.is_some() {
            return true;
        }

        let mut surface = factory.build(id, size, self.scrollback);
        if !entry.pending.is_empty() {
            surface.feed(&entry.pending);
            entry.pending = Vec::new();
        }
        tracing::info!(
            session_id = %id,
            handle = %surface.handle().label(),
            cols = size.cols,
            rows = size.rows,
            "Bound surface"
        );
        entry.surface = Some(surface);
        true
    }

    /// Move the surface of `id` into `container` and fit it to the bounds.
    ///
    /// A session already shown in `container` is parked first. Returns false
    /// when `id` is unknown or has no surface yet.
    pub fn show(&self, id: &str, container: Arc<dyn HostContainer>) -> bool {
        let mut inner = self.inner.write();
        match inner.entries.get(id) {
            None => {
                tracing::warn!(session_id = %id, "Show for unknown session ignored");
                return false;
            }
            Some(entry) if entry.surface.is_none() => {
                tracing::warn!(session_id = %id, "Show before surface was bound ignored");
                return false;
            }
            Some(_) => {}
        }

        let label = container.label().to_string();
        if let Some(other) = inner.occupants.get(&label).cloned() {
            if other != id {
                inner.park(&other);
            }
        }

        let size = self.cells.fit(container.bounds());
        let RegistryInner {
            entries,
            occupants,
        } = &mut *inner;
        let Some(entry) = entries.get_mut(id) else {
            return false;
        };
        let Some(surface) = entry.surface.as_mut() else {
            return false;
        };

        let already_here = matches!(&entry.mount, Mount::Shown(current) if current.label() == label);
        if !already_here {
            if let Mount::Shown(previous) = &entry.mount {
                previous.release(surface.handle());
                occupants.remove(previous.label());
            }
            container.adopt(surface.handle());
            occupants.insert(label.clone(), id.to_string());
            entry.mount = Mount::Shown(container);
        }

        if surface.fit(size) {
            tracing::debug!(session_id = %id, cols = size.cols, rows = size.rows, "Surface refit");
        }
        tracing::debug!(session_id = %id, container = %label, "Surface shown");
        true
    }

    /// Park the surface off-screen. It keeps consuming output.
    pub fn hide(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        if !inner.entries.contains_key(id) {
            tracing::warn!(session_id = %id, "Hide for unknown session ignored");
            return false;
        }
        inner.park(id);
        true
    }

    /// Route process output to the session's emulator (or its buffer).
    pub fn feed(&self, id: &str, bytes: &[u8]) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.entries.get_mut(id) else {
            return false;
        };

        match entry.surface.as_mut() {
            Some(surface) => surface.feed(bytes),
            None => {
                entry.pending.extend_from_slice(bytes);
                if entry.pending.len() > self.pending_limit {
                    let overflow = entry.pending.len() - self.pending_limit;
                    entry.pending.drain(..overflow);
                }
            }
        }
        true
    }

    /// Print the final exit status into the session's screen.
    pub fn mark_exited(&self, id: &str, code: i32) -> bool {
        let banner = format!("\r\n[process exited with code {}]\r\n", code);
        if !self.feed(id, banner.as_bytes()) {
            tracing::warn!(session_id = %id, code, "Exit for unknown surface ignored");
            return false;
        }
        if let Some(entry) = self.inner.write().entries.get_mut(id) {
            entry.exit_code = Some(code);
        }
        true
    }

    pub fn resize_surface(&self, id: &str, size: GridSize) -> bool {
        let mut inner = self.inner.write();
        match inner.entries.get_mut(id).and_then(|e| e.surface.as_mut()) {
            Some(surface) => {
                surface.fit(size);
                true
            }
            None => {
                tracing::warn!(session_id = %id, "Resize for unbound session ignored");
                false
            }
        }
    }

    /// Dispose the emulator and destroy the native handle.
    ///
    /// Call only once the session's process is known to be gone.
    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        inner.park(id);
        let Some(entry) = inner.entries.remove(id) else {
            tracing::warn!(session_id = %id, "Remove for unknown session ignored");
            return false;
        };
        drop(inner);

        let had_surface = entry.surface.is_some();
        if let Some(surface) = entry.surface {
            surface.dispose();
        }
        tracing::info!(session_id = %id, had_surface, "Removed session surface");
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().entries.contains_key(id)
    }

    pub fn is_bound(&self, id: &str) -> bool {
        self.inner
            .read()
            .entries
            .get(id)
            .is_some_and(|e| e.surface.is_some())
    }

    /// Label of the container currently showing `id`
    pub fn container_of(&self, id: &str) -> Option<String> {
        match &self.inner.read().entries.get(id)?.mount {
            Mount::Shown(container) => Some(container.label().to_string()),
            Mount::Hidden => None,
        }
    }

    /// Session currently shown in the container labelled `label`
    pub fn occupant_of(&self, label: &str) -> Option<String> {
        self.inner.read().occupants.get(label).cloned()
    }

    pub fn grid_size(&self, id: &str) -> Option<GridSize> {
        self.inner
            .read()
            .entries
            .get(id)?
            .surface
            .as_ref()
            .map(Surface::grid_size)
    }

    pub fn screen_text(&self, id: &str) -> Option<String> {
        self.inner
            .read()
            .entries
            .get(id)?
            .surface
            .as_ref()
            .map(Surface::screen_text)
    }

    pub fn scrollback_text(&self, id: &str) -> Option<String> {
        self.inner
            .write()
            .entries
            .get_mut(id)?
            .surface
            .as_mut()
            .map(Surface::scrollback_text)
    }

    /// Bytes buffered for a session that has no surface yet
    pub fn pending_len(&self, id: &str) -> Option<usize> {
        self.inner.read().entries.get(id).map(|e| e.pending.len())
    }

    pub fn exit_code(&self, id: &str) -> Option<i32> {
        self.inner.read().entries.get(id)?.exit_code
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(CellMetrics::default(), DEFAULT_PENDING_LIMIT)
    }
}

impl Clone for SessionRegistry {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            cells: self.cells,
            pending_limit: self.pending_limit,
            scrollback: self.scrollback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ContentBounds;
    use crate::testing::{CountingFactory, RecordingContainer};

    fn registry() -> SessionRegistry {
        SessionRegistry::new(
            CellMetrics {
                width: 10.0,
                height: 20.0,
            },
            16,
        )
    }

    fn grid() -> GridSize {
        GridSize::new(40, 10)
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = registry();
        assert!(registry.register("s1"));
        assert!(!registry.register("s1"));
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_bound("s1"));
    }

    #[test]
    fn test_show_unknown_or_unbound_returns_false() {
        let registry = registry();
        let pane = RecordingContainer::new("pane", ContentBounds::new(400.0, 200.0));

        assert!(!registry.show("ghost", pane.clone()));
        registry.register("s1");
        assert!(!registry.show("s1", pane.clone()));
        assert!(pane.children().is_empty());
    }

    #[test]
    fn test_surface_built_once() {
        let registry = registry();
        let factory = CountingFactory::new();
        registry.register("s1");

        assert!(registry.bind_surface("s1", &factory, grid()));
        assert!(registry.bind_surface("s1", &factory, grid()));
        assert_eq!(factory.built(), 1);
        assert!(!registry.bind_surface("ghost", &factory, grid()));
    }

    #[test]
    fn test_output_before_bind_is_replayed() {
        let registry = registry();
        let factory = CountingFactory::new();
        registry.register("s1");

        assert!(registry.feed("s1", b"$ ready"));
        assert_eq!(registry.pending_len("s1"), Some(7));
        registry.bind_surface("s1", &factory, grid());

        assert_eq!(registry.pending_len("s1"), Some(0));
        assert!(registry.screen_text("s1").unwrap().starts_with("$ ready"));
    }

    #[test]
    fn test_pending_output_is_capped() {
        let registry = registry();
        registry.register("s1");
        registry.feed("s1", b"0123456789");
        registry.feed("s1", b"abcdefghij");
        assert_eq!(registry.pending_len("s1"), Some(16));
    }

    #[test]
    fn test_show_moves_between_containers() {
        let registry = registry();
        let factory = CountingFactory::new();
        let left = RecordingContainer::new("left", ContentBounds::new(400.0, 200.0));
        let right = RecordingContainer::new("right", ContentBounds::new(400.0, 200.0));
        registry.register("s1");
        registry.bind_surface("s1", &factory, grid());

        assert!(registry.show("s1", left.clone()));
        assert_eq!(left.children(), vec!["surface-s1".to_string()]);

        assert!(registry.show("s1", right.clone()));
        assert!(left.children().is_empty());
        assert_eq!(right.children(), vec!["surface-s1".to_string()]);
        assert_eq!(registry.container_of("s1").as_deref(), Some("right"));
        assert_eq!(registry.occupant_of("left"), None);
        assert_eq!(factory.built(), 1);
    }

    #[test]
    fn test_round_trip_keeps_content() {
        let registry = registry();
        let factory = CountingFactory::new();
        let a = RecordingContainer::new("a", ContentBounds::new(400.0, 200.0));
        let b = RecordingContainer::new("b", ContentBounds::new(400.0, 200.0));
        registry.register("s1");
        registry.bind_surface("s1", &factory, grid());
        for i in 0..30 {
            registry.feed("s1", format!("row {}\r\n", i).as_bytes());
        }

        registry.show("s1", a.clone());
        let screen = registry.screen_text("s1").unwrap();
        let history = registry.scrollback_text("s1").unwrap();

        registry.show("s1", b.clone());
        registry.show("s1", a.clone());

        assert_eq!(registry.screen_text("s1").unwrap(), screen);
        assert_eq!(registry.scrollback_text("s1").unwrap(), history);
        assert!(history.contains("row 0"));
        assert_eq!(a.children(), vec!["surface-s1".to_string()]);
        assert!(b.children().is_empty());
    }

    #[test]
    fn test_scrollback_limit_reaches_surface() {
        let registry = registry().with_scrollback(2);
        let factory = CountingFactory::new();
        registry.register("s1");
        registry.bind_surface("s1", &factory, GridSize::new(40, 3));
        for i in 0..20 {
            registry.feed("s1", format!("row {:02}\r\n", i).as_bytes());
        }

        let history = registry.scrollback_text("s1").unwrap();
        assert!(!history.contains("row 00"));
        assert!(!history.contains("row 15"));
        assert!(history.contains("row 16"));
        assert!(history.contains("row 19"));
        // Clones share the limit.
        assert_eq!(registry.clone().scrollback, 2);
    }

    #[test]
    fn test_one_occupant_per_container() {
        let registry = registry();
        let factory = CountingFactory::new();
        let pane = RecordingContainer::new("pane", ContentBounds::new(400.0, 200.0));
        for id in ["s1", "s2"] {
            registry.register(id);
            registry.bind_surface(id, &factory, grid());
        }

        registry.show("s1", pane.clone());
        registry.show("s2", pane.clone());

        assert_eq!(pane.children(), vec!["surface-s2".to_string()]);
        assert_eq!(registry.occupant_of("pane").as_deref(), Some("s2"));
        assert_eq!(registry.container_of("s1"), None);
    }

    #[test]
    fn test_show_fits_to_bounds() {
        let registry = registry();
        let factory = CountingFactory::new();
        let pane = RecordingContainer::new("pane", ContentBounds::new(800.0, 480.0));
        registry.register("s1");
        registry.bind_surface("s1", &factory, grid());

        registry.show("s1", pane.clone());
        assert_eq!(registry.grid_size("s1"), Some(GridSize::new(80, 24)));

        pane.set_bounds(ContentBounds::new(1000.0, 600.0));
        registry.show("s1", pane.clone());
        assert_eq!(registry.grid_size("s1"), Some(GridSize::new(100, 30)));
        assert_eq!(pane.children().len(), 1);
    }

    #[test]
    fn test_hidden_surface_keeps_consuming_output() {
        let registry = registry();
        let factory = CountingFactory::new();
        let pane = RecordingContainer::new("pane", ContentBounds::new(400.0, 200.0));
        registry.register("s1");
        registry.bind_surface("s1", &factory, grid());
        registry.show("s1", pane.clone());

        assert!(registry.hide("s1"));
        assert!(pane.children().is_empty());
        assert!(registry.feed("s1", b"background work"));
        assert!(registry.screen_text("s1").unwrap().contains("background work"));
        assert!(!registry.hide("ghost"));
    }

    #[test]
    fn test_remove_disposes_exactly_once() {
        let registry = registry();
        let factory = CountingFactory::new();
        let pane = RecordingContainer::new("pane", ContentBounds::new(400.0, 200.0));
        registry.register("s1");
        registry.bind_surface("s1", &factory, grid());
        registry.show("s1", pane.clone());

        assert!(registry.remove("s1"));
        assert!(!registry.remove("s1"));
        assert_eq!(factory.destroyed(), 1);
        assert!(pane.children().is_empty());
        assert_eq!(registry.occupant_of("pane"), None);
        assert!(!registry.feed("s1", b"late"));
    }

    #[test]
    fn test_mark_exited_prints_banner() {
        let registry = registry();
        let factory = CountingFactory::new();
        registry.register("s1");
        registry.bind_surface("s1", &factory, grid());

        assert!(registry.mark_exited("s1", 2));
        assert_eq!(registry.exit_code("s1"), Some(2));
        assert!(registry
            .screen_text("s1")
            .unwrap()
            .contains("[process exited with code 2]"));
        assert!(!registry.mark_exited("ghost", 0));
    }
}
