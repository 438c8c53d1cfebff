//! Character grid with per-cell attributes, scrollback and dirty tracking.

use std::collections::VecDeque;

/// Cell attribute bits. Colors are packed above the style flags; a packed
/// color value of zero means "default", otherwise it is the palette index
/// plus one.
pub const ATTR_BOLD: u32 = 0x01;
pub const ATTR_UNDERLINE: u32 = 0x02;
pub const ATTR_INVERT: u32 = 0x04;
pub const ATTR_LOW: u32 = 0x08;
pub const ATTR_INVISIBLE: u32 = 0x10;

pub const COLOR_FG_MASK: u32 = 0x1e0;
pub const COLOR_FG_SHIFT: u32 = 5;
pub const COLOR_BG_MASK: u32 = 0x1e00;
pub const COLOR_BG_SHIFT: u32 = 9;

/// Standard palette indices for the default colors.
pub const COLOR_FG_STD: usize = 7;
pub const COLOR_BG_STD: usize = 0;

/// Pack a foreground palette index into an attribute word.
pub fn with_fg(attr: u32, color: Option<usize>) -> u32 {
    let packed = color.map(|c| (c as u32 + 1) << COLOR_FG_SHIFT).unwrap_or(0);
    (attr & !COLOR_FG_MASK) | (packed & COLOR_FG_MASK)
}

/// Pack a background palette index into an attribute word.
pub fn with_bg(attr: u32, color: Option<usize>) -> u32 {
    let packed = color.map(|c| (c as u32 + 1) << COLOR_BG_SHIFT).unwrap_or(0);
    (attr & !COLOR_BG_MASK) | (packed & COLOR_BG_MASK)
}

/// Foreground palette index, or `None` for the default color.
pub fn fg_index(attr: u32) -> Option<usize> {
    match (attr & COLOR_FG_MASK) >> COLOR_FG_SHIFT {
        0 => None,
        n => Some(n as usize - 1),
    }
}

/// Background palette index, or `None` for the default color.
pub fn bg_index(attr: u32) -> Option<usize> {
    match (attr & COLOR_BG_MASK) >> COLOR_BG_SHIFT {
        0 => None,
        n => Some(n as usize - 1),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub attr: u32,
}

impl Default for Cell {
    fn default() -> Self {
        Self { ch: ' ', attr: 0 }
    }
}

/// The visible grid plus scrollback. Rows whose contents changed since the
/// last repaint are flagged dirty so the renderer can skip the rest.
pub struct TerminalBuffer {
    cols: usize,
    rows: usize,
    grid: Vec<Vec<Cell>>,
    scrollback: VecDeque<Vec<Cell>>,
    scrollback_max: usize,
    cursor_row: usize,
    cursor_col: usize,
    dirty: Vec<bool>,
    all_dirty: bool,
}

impl TerminalBuffer {
    pub fn new(cols: usize, rows: usize, scrollback_max: usize) -> Self {
        Self {
            cols,
            rows,
            grid: vec![vec![Cell::default(); cols]; rows],
            scrollback: VecDeque::new(),
            scrollback_max,
            cursor_row: 0,
            cursor_col: 0,
            dirty: vec![true; rows],
            all_dirty: true,
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_row, self.cursor_col)
    }

    pub fn row(&self, row: usize) -> &[Cell] {
        &self.grid[row]
    }

    pub fn scrollback_len(&self) -> usize {
        self.scrollback.len()
    }

    pub fn scrollback_row(&self, idx: usize) -> &[Cell] {
        &self.scrollback[idx]
    }

    pub fn is_dirty(&self, row: usize) -> bool {
        self.all_dirty || self.dirty[row]
    }

    pub fn all_dirty(&self) -> bool {
        self.all_dirty
    }

    pub fn mark_all_dirty(&mut self) {
        self.all_dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.all_dirty = false;
        for d in &mut self.dirty {
            *d = false;
        }
    }

    /// Write one character at the cursor and advance, wrapping and
    /// scrolling as needed.
    pub fn put_char(&mut self, ch: char, attr: u32) {
        if self.cursor_col >= self.cols {
            self.carriage_return();
            self.line_feed();
        }
        self.grid[self.cursor_row][self.cursor_col] = Cell { ch, attr };
        self.dirty[self.cursor_row] = true;
        self.cursor_col += 1;
    }

    pub fn carriage_return(&mut self) {
        self.cursor_col = 0;
    }

    pub fn line_feed(&mut self) {
        if self.cursor_row + 1 >= self.rows {
            self.scroll_up();
        } else {
            self.cursor_row += 1;
        }
    }

    pub fn backspace(&mut self) {
        self.cursor_col = self.cursor_col.saturating_sub(1);
    }

    /// Advance to the next tab stop (every 8 columns).
    pub fn tab(&mut self) {
        let next = (self.cursor_col / 8 + 1) * 8;
        self.cursor_col = next.min(self.cols.saturating_sub(1));
    }

    pub fn set_cursor(&mut self, row: usize, col: usize) {
        self.cursor_row = row.min(self.rows.saturating_sub(1));
        self.cursor_col = col.min(self.cols.saturating_sub(1));
    }

    pub fn move_cursor(&mut self, d_row: isize, d_col: isize) {
        let row = self.cursor_row as isize + d_row;
        let col = self.cursor_col as isize + d_col;
        self.set_cursor(row.max(0) as usize, col.max(0) as usize);
    }

    /// Push the top row into scrollback and shift everything up.
    pub fn scroll_up(&mut self) {
        let top = std::mem::replace(&mut self.grid[0], Vec::new());
        self.scrollback.push_back(top);
        while self.scrollback.len() > self.scrollback_max {
            self.scrollback.pop_front();
        }
        self.grid.remove(0);
        self.grid.push(vec![Cell::default(); self.cols]);
        self.all_dirty = true;
    }

    /// Erase part of the cursor row. Mode 0 erases to end of line, 1 to
    /// start of line, 2 the whole line.
    pub fn erase_line(&mut self, mode: u16) {
        let row = self.cursor_row;
        let range = match mode {
            0 => self.cursor_col..self.cols,
            1 => 0..(self.cursor_col + 1).min(self.cols),
            _ => 0..self.cols,
        };
        for col in range {
            self.grid[row][col] = Cell::default();
        }
        self.dirty[row] = true;
    }

    /// Erase part of the screen. Mode 0 erases from the cursor down, 1 from
    /// the cursor up, 2 everything.
    pub fn erase_screen(&mut self, mode: u16) {
        match mode {
            0 => {
                self.erase_line(0);
                for row in (self.cursor_row + 1)..self.rows {
                    self.grid[row] = vec![Cell::default(); self.cols];
                }
            }
            1 => {
                self.erase_line(1);
                for row in 0..self.cursor_row {
                    self.grid[row] = vec![Cell::default(); self.cols];
                }
            }
            _ => {
                for row in 0..self.rows {
                    self.grid[row] = vec![Cell::default(); self.cols];
                }
            }
        }
        self.all_dirty = true;
    }

    /// Resize the visible grid, padding or truncating rows. Scrollback is
    /// kept as-is.
    pub fn resize(&mut self, cols: usize, rows: usize) {
        if cols == self.cols && rows == self.rows {
            return;
        }
        for row in &mut self.grid {
            row.resize(cols, Cell::default());
        }
        if rows < self.rows {
            // Drop rows from the top into scrollback so the prompt stays
            // visible at the bottom.
            while self.grid.len() > rows {
                let top = self.grid.remove(0);
                self.scrollback.push_back(top);
                while self.scrollback.len() > self.scrollback_max {
                    self.scrollback.pop_front();
                }
            }
        } else {
            while self.grid.len() < rows {
                self.grid.push(vec![Cell::default(); cols]);
            }
        }
        self.cols = cols;
        self.rows = rows;
        self.dirty = vec![true; rows];
        self.cursor_row = self.cursor_row.min(rows.saturating_sub(1));
        self.cursor_col = self.cursor_col.min(cols.saturating_sub(1));
        self.all_dirty = true;
    }

    /// Write a whole status line into the buffer, starting at column zero
    /// and ending with a newline. Used for connection progress messages.
    pub fn output_line(&mut self, text: &str, attr: u32) {
        if self.cursor_col > 0 {
            self.carriage_return();
            self.line_feed();
        }
        for ch in text.chars() {
            match ch {
                '\n' => {
                    self.carriage_return();
                    self.line_feed();
                }
                '\r' => self.carriage_return(),
                _ => self.put_char(ch, attr),
            }
        }
        self.carriage_return();
        self.line_feed();
    }

    #[cfg(test)]
    pub fn row_text(&self, row: usize) -> String {
        self.grid[row]
            .iter()
            .map(|c| c.ch)
            .collect::<String>()
            .trim_end()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_packing_round_trips() {
        let attr = with_fg(with_bg(ATTR_BOLD, Some(4)), Some(7));
        assert_eq!(fg_index(attr), Some(7));
        assert_eq!(bg_index(attr), Some(4));
        assert_ne!(attr & ATTR_BOLD, 0);

        let cleared = with_fg(attr, None);
        assert_eq!(fg_index(cleared), None);
        assert_eq!(bg_index(cleared), Some(4));
    }

    #[test]
    fn put_char_wraps_at_line_end() {
        let mut buf = TerminalBuffer::new(4, 3, 10);
        for ch in "abcdef".chars() {
            buf.put_char(ch, 0);
        }
        assert_eq!(buf.row_text(0), "abcd");
        assert_eq!(buf.row_text(1), "ef");
        assert_eq!(buf.cursor(), (1, 2));
    }

    #[test]
    fn scroll_pushes_top_row_into_scrollback() {
        let mut buf = TerminalBuffer::new(10, 2, 5);
        buf.output_line("first", 0);
        buf.output_line("second", 0);
        buf.output_line("third", 0);
        assert_eq!(buf.scrollback_len(), 2);
        let oldest: String = buf.scrollback_row(0).iter().map(|c| c.ch).collect();
        assert_eq!(oldest.trim_end(), "first");
    }

    #[test]
    fn scrollback_is_capped() {
        let mut buf = TerminalBuffer::new(10, 2, 3);
        for i in 0..10 {
            buf.output_line(&format!("line {i}"), 0);
        }
        assert_eq!(buf.scrollback_len(), 3);
    }

    #[test]
    fn erase_to_end_of_line() {
        let mut buf = TerminalBuffer::new(6, 2, 0);
        for ch in "abcdef".chars() {
            buf.put_char(ch, 0);
        }
        buf.set_cursor(0, 3);
        buf.erase_line(0);
        assert_eq!(buf.row_text(0), "abc");
    }

    #[test]
    fn resize_preserves_bottom_rows() {
        let mut buf = TerminalBuffer::new(10, 4, 10);
        buf.output_line("one", 0);
        buf.output_line("two", 0);
        buf.resize(10, 2);
        assert_eq!(buf.rows(), 2);
        assert_eq!(buf.scrollback_len(), 2);
        assert!(buf.all_dirty());
    }

    #[test]
    fn output_line_starts_on_fresh_row() {
        let mut buf = TerminalBuffer::new(40, 5, 10);
        buf.put_char('$', 0);
        buf.output_line("Connecting to example.org...", 0);
        assert_eq!(buf.row_text(0), "$");
        assert_eq!(buf.row_text(1), "Connecting to example.org...");
        assert_eq!(buf.cursor(), (2, 0));
    }
}
