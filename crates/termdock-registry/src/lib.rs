//! termdock Session Registry
//!
//! Owns the rendering surface of every session so that scrollback, cursor
//! and parsed screen survive whichever host container happens to display
//! them. Showing a surface moves it; it is never copied or rebuilt.

mod host;
mod registry;
mod surface;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use host::{CellMetrics, ContentBounds, GridSize, HostContainer, NativeHandle};
pub use registry::SessionRegistry;
pub use surface::{Surface, SurfaceFactory};
