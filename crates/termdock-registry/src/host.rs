//! Host container seam
//!
//! A host container is any UI surface that can adopt a foreign rendering
//! handle as a child and report its pixel bounds.

use serde::{Deserialize, Serialize};

/// Pixel bounds of a container's content area
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContentBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ContentBounds {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }
}

/// Terminal grid in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub cols: u16,
    pub rows: u16,
}

impl GridSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
        }
    }
}

/// Pixel size of one character cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellMetrics {
    pub width: f64,
    pub height: f64,
}

impl CellMetrics {
    /// How many whole cells fit in `bounds`, never less than 1×1.
    pub fn fit(&self, bounds: ContentBounds) -> GridSize {
        let cols = cells_along(bounds.width, self.width);
        let rows = cells_along(bounds.height, self.height);
        GridSize::new(cols, rows)
    }
}

impl Default for CellMetrics {
    fn default() -> Self {
        Self {
            width: 8.0,
            height: 16.0,
        }
    }
}

fn cells_along(pixels: f64, cell: f64) -> u16 {
    if !(pixels.is_finite() && cell.is_finite()) || cell <= 0.0 || pixels <= 0.0 {
        return 1;
    }
    (pixels / cell).floor().clamp(1.0, u16::MAX as f64) as u16
}

/// Platform display handle backing a surface.
pub trait NativeHandle: Send + Sync {
    fn label(&self) -> &str;

    /// Release the native resources. Called exactly once, on removal.
    fn destroy(&mut self);
}

/// A UI container that can display one surface at a time.
///
/// Implementations must not call back into the registry from these methods.
pub trait HostContainer: Send + Sync {
    /// Stable identity of the container
    fn label(&self) -> &str;

    fn bounds(&self) -> ContentBounds;

    /// Reparent `handle` into this container.
    fn adopt(&self, handle: &dyn NativeHandle);

    /// Detach `handle` from this container without destroying it.
    fn release(&self, handle: &dyn NativeHandle);
}
