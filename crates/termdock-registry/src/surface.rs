//! Persistent rendering surface
//!
//! A surface pairs the terminal emulator (screen, cursor, scrollback) with
//! the native handle a host container displays. It is built once per
//! session and lives until the session is removed.

use vt100::Parser;

use crate::host::{GridSize, NativeHandle};

pub struct Surface {
    emulator: Parser,
    handle: Box<dyn NativeHandle>,
}

impl Surface {
    pub fn new(handle: Box<dyn NativeHandle>, size: GridSize, scrollback: usize) -> Self {
        let size = GridSize::new(size.cols, size.rows);
        Self {
            emulator: Parser::new(size.rows, size.cols, scrollback),
            handle,
        }
    }

    pub fn handle(&self) -> &dyn NativeHandle {
        self.handle.as_ref()
    }

    pub fn grid_size(&self) -> GridSize {
        let (rows, cols) = self.emulator.screen().size();
        GridSize { cols, rows }
    }

    /// Visible screen contents as plain text
    pub fn screen_text(&self) -> String {
        self.emulator.screen().contents()
    }

    /// Scrollback plus screen, oldest line first
    pub fn scrollback_text(&mut self) -> String {
        let current = self.emulator.screen().scrollback();
        let rows = self.grid_size().rows as usize;

        self.emulator.screen_mut().set_scrollback(usize::MAX);
        let mut offset = self.emulator.screen().scrollback();
        let mut lines: Vec<String> = Vec::new();

        // A view scrolled back by `offset` starts at history line `depth - offset`.
        while offset > 0 {
            self.emulator.screen_mut().set_scrollback(offset);
            let take = offset.min(rows);
            let page = self.emulator.screen().contents();
            lines.extend(page.lines().take(take).map(str::to_string));
            offset -= take;
        }
        self.emulator.screen_mut().set_scrollback(0);
        lines.extend(self.emulator.screen().contents().lines().map(str::to_string));

        self.emulator.screen_mut().set_scrollback(current);
        lines.join("\n")
    }

    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.emulator.process(bytes);
    }

    /// Resize the emulator grid; returns true when the size changed.
    pub(crate) fn fit(&mut self, size: GridSize) -> bool {
        if size == self.grid_size() {
            return false;
        }
        self.emulator.screen_mut().set_size(size.rows, size.cols);
        true
    }

    pub(crate) fn dispose(mut self) {
        self.handle.destroy();
    }
}

/// Builds the surface for a session on its first display.
pub trait SurfaceFactory: Send + Sync {
    fn build(&self, session_id: &str, size: GridSize, scrollback: usize) -> Surface;
}

impl<F> SurfaceFactory for F
where
    F: Fn(&str, GridSize, usize) -> Surface + Send + Sync,
{
    fn build(&self, session_id: &str, size: GridSize, scrollback: usize) -> Surface {
        self(session_id, size, scrollback)
    }
}
