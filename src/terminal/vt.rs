//! Escape-sequence interpretation on top of the character grid.

use vte::{Params, Parser, Perform};

use super::buffer::{
    with_bg, with_fg, TerminalBuffer, ATTR_BOLD, ATTR_INVERT, ATTR_INVISIBLE, ATTR_LOW,
    ATTR_UNDERLINE,
};

/// A terminal screen: a vte parser feeding cell updates into the buffer.
pub struct TerminalScreen {
    parser: Parser,
    performer: Performer,
}

struct Performer {
    buffer: TerminalBuffer,
    attr: u32,
}

impl TerminalScreen {
    pub fn new(cols: usize, rows: usize, scrollback_max: usize) -> Self {
        Self {
            parser: Parser::new(),
            performer: Performer {
                buffer: TerminalBuffer::new(cols, rows, scrollback_max),
                attr: 0,
            },
        }
    }

    /// Feed decoded output through the escape-sequence parser.
    pub fn feed(&mut self, text: &str) {
        self.parser.advance(&mut self.performer, text.as_bytes());
    }

    pub fn buffer(&self) -> &TerminalBuffer {
        &self.performer.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut TerminalBuffer {
        &mut self.performer.buffer
    }

    /// Write a status line directly, bypassing the parser.
    pub fn output_line(&mut self, text: &str) {
        self.performer.buffer.output_line(text, self.performer.attr);
    }
}

impl Perform for Performer {
    fn print(&mut self, c: char) {
        self.buffer.put_char(c, self.attr);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.buffer.line_feed(),
            b'\r' => self.buffer.carriage_return(),
            b'\t' => self.buffer.tab(),
            b'\x08' => self.buffer.backspace(),
            _ => {}
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _c: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}

    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], ignore: bool, c: char) {
        if ignore {
            return;
        }
        let args: Vec<u16> = params.iter().map(|p| p[0]).collect();
        let first = args.first().copied().unwrap_or(0);

        match c {
            'A' => self.buffer.move_cursor(-(first.max(1) as isize), 0),
            'B' => self.buffer.move_cursor(first.max(1) as isize, 0),
            'C' => self.buffer.move_cursor(0, first.max(1) as isize),
            'D' => self.buffer.move_cursor(0, -(first.max(1) as isize)),
            'H' | 'f' => {
                let row = first.max(1) as usize - 1;
                let col = args.get(1).copied().unwrap_or(0).max(1) as usize - 1;
                self.buffer.set_cursor(row, col);
            }
            'J' => self.buffer.erase_screen(first),
            'K' => self.buffer.erase_line(first),
            'm' => self.sgr(&args),
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}

impl Performer {
    fn sgr(&mut self, args: &[u16]) {
        if args.is_empty() {
            self.attr = 0;
            return;
        }
        for &arg in args {
            match arg {
                0 => self.attr = 0,
                1 => self.attr |= ATTR_BOLD,
                2 => self.attr |= ATTR_LOW,
                4 => self.attr |= ATTR_UNDERLINE,
                7 => self.attr |= ATTR_INVERT,
                8 => self.attr |= ATTR_INVISIBLE,
                22 => self.attr &= !(ATTR_BOLD | ATTR_LOW),
                24 => self.attr &= !ATTR_UNDERLINE,
                27 => self.attr &= !ATTR_INVERT,
                28 => self.attr &= !ATTR_INVISIBLE,
                30..=37 => self.attr = with_fg(self.attr, Some((arg - 30) as usize)),
                39 => self.attr = with_fg(self.attr, None),
                40..=47 => self.attr = with_bg(self.attr, Some((arg - 40) as usize)),
                49 => self.attr = with_bg(self.attr, None),
                _ => {}
            }
        }
    }
}
