//! Paint-list generation from the dirty parts of the grid.
//!
//! Adjacent cells with identical style collapse into one run so a frontend
//! issues one draw call per run instead of one per cell.

use super::buffer::{bg_index, fg_index, TerminalBuffer, ATTR_BOLD, ATTR_INVERT, ATTR_LOW,
    ATTR_UNDERLINE, COLOR_BG_STD, COLOR_FG_STD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Scale each component to 80% for the unfocused/low-intensity variant.
    pub fn darken(self) -> Self {
        Self {
            r: (self.r as f32 * 0.8) as u8,
            g: (self.g as f32 * 0.8) as u8,
            b: (self.b as f32 * 0.8) as u8,
        }
    }
}

/// The eight-color palette.
pub const PALETTE: [Rgb; 8] = [
    Rgb::new(0x00, 0x00, 0x00), // black
    Rgb::new(0xff, 0x00, 0x00), // red
    Rgb::new(0x00, 0xff, 0x00), // green
    Rgb::new(0xff, 0xff, 0x00), // yellow
    Rgb::new(0x00, 0x00, 0xff), // blue
    Rgb::new(0xff, 0x00, 0xff), // magenta
    Rgb::new(0x00, 0xff, 0xff), // cyan
    Rgb::new(0xff, 0xff, 0xff), // white
];

/// Fallback foreground when text would otherwise be black on black.
pub const GRAY: Rgb = Rgb::new(0x88, 0x88, 0x88);

/// One styled stretch of text within a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub col: usize,
    pub text: String,
    pub fg: Rgb,
    pub bg: Rgb,
    pub bold: bool,
    pub underline: bool,
}

/// All runs for one repainted row.
#[derive(Debug, Clone)]
pub struct RowPaint {
    pub row: usize,
    pub runs: Vec<Run>,
}

fn resolve(attr: u32) -> (Rgb, Rgb, bool, bool) {
    let mut fg = PALETTE[fg_index(attr).unwrap_or(COLOR_FG_STD)];
    let mut bg = PALETTE[bg_index(attr).unwrap_or(COLOR_BG_STD)].darken();

    if attr & ATTR_LOW != 0 {
        fg = fg.darken();
    }
    if attr & ATTR_INVERT != 0 {
        std::mem::swap(&mut fg, &mut bg);
    }
    if fg == Rgb::new(0, 0, 0) && fg == bg {
        fg = GRAY;
    }

    let bold = attr & ATTR_BOLD != 0;
    let underline = attr & ATTR_UNDERLINE != 0;
    (fg, bg, bold, underline)
}

/// Build the paint list for every dirty row, then clear the dirty flags.
pub fn repaint(buffer: &mut TerminalBuffer) -> Vec<RowPaint> {
    let mut paints = Vec::new();

    for row in 0..buffer.rows() {
        if !buffer.is_dirty(row) {
            continue;
        }

        let cells = buffer.row(row);
        let mut runs: Vec<Run> = Vec::new();
        let mut current: Option<(Run, u32)> = None;

        for (col, cell) in cells.iter().enumerate() {
            match &mut current {
                Some((run, attr)) if *attr == cell.attr => {
                    run.text.push(cell.ch);
                }
                _ => {
                    if let Some((run, _)) = current.take() {
                        runs.push(run);
                    }
                    let (fg, bg, bold, underline) = resolve(cell.attr);
                    current = Some((
                        Run {
                            col,
                            text: cell.ch.to_string(),
                            fg,
                            bg,
                            bold,
                            underline,
                        },
                        cell.attr,
                    ));
                }
            }
        }
        if let Some((run, _)) = current {
            runs.push(run);
        }

        paints.push(RowPaint { row, runs });
    }

    buffer.clear_dirty();
    paints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::buffer::{with_bg, with_fg, ATTR_INVERT};

    #[test]
    fn identical_cells_coalesce_into_one_run() {
        let mut buf = TerminalBuffer::new(8, 2, 0);
        for ch in "aaaa".chars() {
            buf.put_char(ch, 0);
        }
        let paints = repaint(&mut buf);
        let first = paints.iter().find(|p| p.row == 0).unwrap();
        // Text and trailing blanks share attributes, so one run covers
        // the whole row.
        assert_eq!(first.runs.len(), 1);
        assert_eq!(first.runs[0].text, "aaaa    ");
    }

    #[test]
    fn attribute_change_splits_runs() {
        let mut buf = TerminalBuffer::new(4, 1, 0);
        buf.put_char('a', 0);
        buf.put_char('b', with_fg(0, Some(1)));
        buf.put_char('c', with_fg(0, Some(1)));
        buf.put_char('d', 0);
        let paints = repaint(&mut buf);
        assert_eq!(paints[0].runs.len(), 3);
        assert_eq!(paints[0].runs[1].text, "bc");
        assert_eq!(paints[0].runs[1].col, 1);
        assert_eq!(paints[0].runs[1].fg, PALETTE[1]);
    }

    #[test]
    fn clean_rows_are_skipped_after_repaint() {
        let mut buf = TerminalBuffer::new(4, 3, 0);
        buf.put_char('x', 0);
        repaint(&mut buf);

        buf.set_cursor(2, 0);
        buf.put_char('y', 0);
        let paints = repaint(&mut buf);
        assert_eq!(paints.len(), 1);
        assert_eq!(paints[0].row, 2);
    }

    #[test]
    fn invert_swaps_colors() {
        let mut buf = TerminalBuffer::new(2, 1, 0);
        let attr = with_fg(with_bg(ATTR_INVERT, Some(4)), Some(7));
        buf.put_char('x', attr);
        let paints = repaint(&mut buf);
        let run = &paints[0].runs[0];
        assert_eq!(run.bg, PALETTE[7]);
        assert_eq!(run.fg, PALETTE[4].darken());
    }

    #[test]
    fn black_on_black_becomes_gray() {
        let mut buf = TerminalBuffer::new(2, 1, 0);
        let attr = with_fg(with_bg(0, Some(0)), Some(0));
        buf.put_char('x', attr);
        let paints = repaint(&mut buf);
        assert_eq!(paints[0].runs[0].fg, GRAY);
    }
}
