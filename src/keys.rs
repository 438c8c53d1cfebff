//! Keystroke encoding for the remote shell.
//!
//! Modifier keys latch: pressing the control latch arms it for exactly the
//! next character, matching soft keyboards without chording.

/// A logical key press from the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Char(char),
    Enter,
    Backspace,
    Tab,
    Escape,
    Up,
    Down,
    Left,
    Right,
    /// Function key, 1 through 10.
    F(u8),
    FontLarger,
    FontSmaller,
    CtrlLatch,
    AltLatch,
}

/// What a keystroke turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInput {
    /// Bytes to write to the remote shell.
    Bytes(Vec<u8>),
    /// Adjust the font size by this many steps.
    FontDelta(i32),
    /// Consumed locally (e.g. arming a latch).
    None,
}

/// One-shot modifier state, consumed by the next character key.
#[derive(Debug, Default)]
pub struct ModifierLatch {
    ctrl: bool,
    alt: bool,
}

impl ModifierLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ctrl_armed(&self) -> bool {
        self.ctrl
    }

    pub fn alt_armed(&self) -> bool {
        self.alt
    }

    fn take(&mut self) -> (bool, bool) {
        (
            std::mem::take(&mut self.ctrl),
            std::mem::take(&mut self.alt),
        )
    }

    /// Encode one key press, consuming any armed modifiers.
    pub fn encode(&mut self, key: KeyCode) -> KeyInput {
        match key {
            KeyCode::CtrlLatch => {
                self.ctrl = !self.ctrl;
                KeyInput::None
            }
            KeyCode::AltLatch => {
                self.alt = !self.alt;
                KeyInput::None
            }
            KeyCode::FontLarger => {
                self.take();
                KeyInput::FontDelta(1)
            }
            KeyCode::FontSmaller => {
                self.take();
                KeyInput::FontDelta(-1)
            }
            KeyCode::Char(c) => {
                let (ctrl, alt) = self.take();
                let mut bytes = Vec::new();
                if alt {
                    bytes.push(0x1b);
                }
                match control_byte(c) {
                    Some(b) if ctrl => bytes.push(b),
                    _ => {
                        let mut utf8 = [0u8; 4];
                        bytes.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
                    }
                }
                KeyInput::Bytes(bytes)
            }
            KeyCode::Enter => self.simple(b"\r"),
            KeyCode::Backspace => self.simple(&[0x08]),
            KeyCode::Tab => self.simple(b"\t"),
            KeyCode::Escape => self.simple(&[0x1b]),
            KeyCode::Up => self.simple(b"\x1b[A"),
            KeyCode::Down => self.simple(b"\x1b[B"),
            KeyCode::Right => self.simple(b"\x1b[C"),
            KeyCode::Left => self.simple(b"\x1b[D"),
            KeyCode::F(n) => {
                self.take();
                KeyInput::Bytes(function_key(n))
            }
        }
    }

    fn simple(&mut self, bytes: &[u8]) -> KeyInput {
        self.take();
        KeyInput::Bytes(bytes.to_vec())
    }
}

/// Map a character to its control code: letters to 0x01..0x1a, the
/// punctuation block `@` through `_` down by 0x40, space to NUL.
/// Characters with no control counterpart map to `None`.
fn control_byte(c: char) -> Option<u8> {
    match c {
        'a'..='z' => Some(c as u8 - 0x60),
        '@'..='_' => Some(c as u8 - 0x40),
        ' ' => Some(0x00),
        '?' => Some(0x7f),
        _ => None,
    }
}

fn function_key(n: u8) -> Vec<u8> {
    match n {
        1 => b"\x1bOP".to_vec(),
        2 => b"\x1bOQ".to_vec(),
        3 => b"\x1bOR".to_vec(),
        4 => b"\x1bOS".to_vec(),
        5 => b"\x1b[15~".to_vec(),
        6 => b"\x1b[17~".to_vec(),
        7 => b"\x1b[18~".to_vec(),
        8 => b"\x1b[19~".to_vec(),
        9 => b"\x1b[20~".to_vec(),
        _ => b"\x1b[21~".to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_characters_pass_through() {
        let mut latch = ModifierLatch::new();
        assert_eq!(latch.encode(KeyCode::Char('x')), KeyInput::Bytes(b"x".to_vec()));
        assert_eq!(latch.encode(KeyCode::Enter), KeyInput::Bytes(b"\r".to_vec()));
    }

    #[test]
    fn ctrl_latch_applies_to_next_key_only() {
        let mut latch = ModifierLatch::new();
        assert_eq!(latch.encode(KeyCode::CtrlLatch), KeyInput::None);
        assert!(latch.ctrl_armed());
        assert_eq!(latch.encode(KeyCode::Char('c')), KeyInput::Bytes(vec![0x03]));
        assert!(!latch.ctrl_armed());
        assert_eq!(latch.encode(KeyCode::Char('c')), KeyInput::Bytes(b"c".to_vec()));
    }

    #[test]
    fn ctrl_latch_toggles_off_when_pressed_twice() {
        let mut latch = ModifierLatch::new();
        latch.encode(KeyCode::CtrlLatch);
        latch.encode(KeyCode::CtrlLatch);
        assert!(!latch.ctrl_armed());
    }

    #[test]
    fn alt_prefixes_escape() {
        let mut latch = ModifierLatch::new();
        latch.encode(KeyCode::AltLatch);
        assert_eq!(
            latch.encode(KeyCode::Char('f')),
            KeyInput::Bytes(vec![0x1b, b'f'])
        );
    }

    #[test]
    fn ctrl_with_unmappable_char_sends_it_unmodified() {
        let mut latch = ModifierLatch::new();
        latch.encode(KeyCode::CtrlLatch);
        assert_eq!(
            latch.encode(KeyCode::Char('é')),
            KeyInput::Bytes("é".as_bytes().to_vec())
        );
    }

    #[test]
    fn control_punctuation_block() {
        let mut latch = ModifierLatch::new();
        latch.encode(KeyCode::CtrlLatch);
        assert_eq!(latch.encode(KeyCode::Char('[')), KeyInput::Bytes(vec![0x1b]));
    }

    #[test]
    fn arrows_emit_csi_sequences() {
        let mut latch = ModifierLatch::new();
        assert_eq!(
            latch.encode(KeyCode::Up),
            KeyInput::Bytes(b"\x1b[A".to_vec())
        );
        assert_eq!(
            latch.encode(KeyCode::Left),
            KeyInput::Bytes(b"\x1b[D".to_vec())
        );
    }

    #[test]
    fn font_keys_do_not_reach_the_shell() {
        let mut latch = ModifierLatch::new();
        assert_eq!(latch.encode(KeyCode::FontLarger), KeyInput::FontDelta(1));
        assert_eq!(latch.encode(KeyCode::FontSmaller), KeyInput::FontDelta(-1));
    }

    #[test]
    fn function_keys() {
        let mut latch = ModifierLatch::new();
        assert_eq!(
            latch.encode(KeyCode::F(1)),
            KeyInput::Bytes(b"\x1bOP".to_vec())
        );
        assert_eq!(
            latch.encode(KeyCode::F(5)),
            KeyInput::Bytes(b"\x1b[15~".to_vec())
        );
    }
}
