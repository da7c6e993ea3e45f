//! Recording host containers and handles for tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::host::{ContentBounds, GridSize, HostContainer, NativeHandle};
use crate::surface::Surface;

/// Native handle that counts how often it was destroyed.
pub struct CountingHandle {
    label: String,
    destroyed: Arc<AtomicUsize>,
}

impl CountingHandle {
    pub fn new(label: &str) -> (Self, Arc<AtomicUsize>) {
        let destroyed = Arc::new(AtomicUsize::new(0));
        (
            Self {
                label: label.to_string(),
                destroyed: Arc::clone(&destroyed),
            },
            destroyed,
        )
    }
}

impl NativeHandle for CountingHandle {
    fn label(&self) -> &str {
        &self.label
    }

    fn destroy(&mut self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory whose surfaces all report destruction into one shared counter.
#[derive(Default)]
pub struct CountingFactory {
    built: AtomicUsize,
    destroyed: Arc<AtomicUsize>,
}

impl CountingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl crate::surface::SurfaceFactory for CountingFactory {
    fn build(&self, session_id: &str, size: GridSize, scrollback: usize) -> Surface {
        self.built.fetch_add(1, Ordering::SeqCst);
        let handle = CountingHandle {
            label: format!("surface-{}", session_id),
            destroyed: Arc::clone(&self.destroyed),
        };
        Surface::new(Box::new(handle), size, scrollback)
    }
}

/// Container that records which handles it currently holds.
pub struct RecordingContainer {
    label: String,
    bounds: Mutex<ContentBounds>,
    children: Mutex<Vec<String>>,
}

impl RecordingContainer {
    pub fn new(label: &str, bounds: ContentBounds) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            bounds: Mutex::new(bounds),
            children: Mutex::new(Vec::new()),
        })
    }

    pub fn set_bounds(&self, bounds: ContentBounds) {
        *self.bounds.lock() = bounds;
    }

    /// Labels of the handles currently parented here
    pub fn children(&self) -> Vec<String> {
        self.children.lock().clone()
    }
}

impl HostContainer for RecordingContainer {
    fn label(&self) -> &str {
        &self.label
    }

    fn bounds(&self) -> ContentBounds {
        *self.bounds.lock()
    }

    fn adopt(&self, handle: &dyn NativeHandle) {
        self.children.lock().push(handle.label().to_string());
    }

    fn release(&self, handle: &dyn NativeHandle) {
        self.children.lock().retain(|label| label != handle.label());
    }
}
