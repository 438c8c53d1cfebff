//! Terminal emulation: grid buffer, escape-sequence parsing and repaint
//! planning.

pub mod buffer;
pub mod render;
pub mod vt;

use parking_lot::Mutex;
use tokio::sync::Notify;

use render::RowPaint;
use vt::TerminalScreen;

pub const DEFAULT_COLS: usize = 80;
pub const DEFAULT_ROWS: usize = 24;
pub const DEFAULT_SCROLLBACK: usize = 1000;

/// Shared handle to one terminal screen. Writers feed bytes or status
/// lines; a display loop waits for redraw wakeups and pulls paint lists.
pub struct Screen {
    inner: Mutex<TerminalScreen>,
    redraw: Notify,
}

impl Screen {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self {
            inner: Mutex::new(TerminalScreen::new(cols, rows, DEFAULT_SCROLLBACK)),
            redraw: Notify::new(),
        }
    }

    /// Feed decoded remote output through the parser.
    pub fn feed(&self, text: &str) {
        self.inner.lock().feed(text);
        self.redraw.notify_one();
    }

    /// Append one status line (connection progress, prompts, warnings).
    pub fn push_line(&self, text: &str) {
        self.inner.lock().output_line(text);
        self.redraw.notify_one();
    }

    pub fn resize(&self, cols: usize, rows: usize) {
        self.inner.lock().buffer_mut().resize(cols, rows);
        self.redraw.notify_one();
    }

    pub fn size(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.buffer().cols(), inner.buffer().rows())
    }

    /// Build the paint list for everything dirty and clear the flags.
    pub fn repaint(&self) -> Vec<RowPaint> {
        render::repaint(self.inner.lock().buffer_mut())
    }

    /// Wait until something changed since the last repaint.
    pub async fn redraw_requested(&self) {
        self.redraw.notified().await;
    }

    /// Run a closure against the underlying screen state.
    pub fn with<R>(&self, f: impl FnOnce(&TerminalScreen) -> R) -> R {
        f(&self.inner.lock())
    }
}

impl Default for Screen {
    fn default() -> Self {
        Self::new(DEFAULT_COLS, DEFAULT_ROWS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_line_is_visible_in_paint_list() {
        let screen = Screen::new(40, 5);
        screen.repaint();
        screen.push_line("Connecting to host...");
        let paints = screen.repaint();
        assert!(!paints.is_empty());
        let text: String = paints
            .iter()
            .flat_map(|p| p.runs.iter().map(|r| r.text.clone()))
            .collect();
        assert!(text.contains("Connecting to host..."));
    }

    #[tokio::test]
    async fn feed_wakes_redraw_waiter() {
        use std::sync::Arc;
        let screen = Arc::new(Screen::new(20, 4));
        let waiter = {
            let screen = screen.clone();
            tokio::spawn(async move {
                screen.redraw_requested().await;
            })
        };
        tokio::task::yield_now().await;
        screen.feed("hello");
        waiter.await.unwrap();
    }
}
