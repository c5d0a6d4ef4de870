//! Keystroke sources for the password prompt.
//!
//! Keys are reduced to a numeric code: printable characters map to their
//! Unicode scalar value, control combinations to their ASCII control code.

use std::collections::VecDeque;
use std::io;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// Ctrl-C.
pub const KEY_INTERRUPT: u32 = 3;
/// ASCII backspace (Ctrl-H).
pub const KEY_BACKSPACE: u32 = 8;
/// Carriage return.
pub const KEY_ENTER: u32 = 13;
/// ASCII DEL, sent by most terminals for the backspace key.
pub const KEY_DELETE: u32 = 127;

/// Largest code treated as a control character.
pub const LAST_CONTROL_CODE: u32 = 31;

/// A source of single keystrokes.
pub trait KeySource {
    /// Blocks until the next keystroke and returns its code.
    ///
    /// # Errors
    /// Returns error if the underlying input cannot be read.
    fn next_key(&mut self) -> io::Result<u32>;
}

/// Reads keystrokes from the controlling terminal through crossterm.
///
/// Only meaningful while the terminal is in raw mode.
#[derive(Debug, Default)]
pub struct TerminalKeys;

impl KeySource for TerminalKeys {
    fn next_key(&mut self) -> io::Result<u32> {
        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Release {
                    continue;
                }
                return Ok(key_code(&key));
            }
        }
    }
}

/// Maps a crossterm key event to a keystroke code.
///
/// Navigation and function keys map to `0`, which the prompt ignores.
#[must_use]
pub fn key_code(key: &KeyEvent) -> u32 {
    match key.code {
        KeyCode::Enter => KEY_ENTER,
        KeyCode::Backspace | KeyCode::Delete => KEY_DELETE,
        KeyCode::Tab => 9,
        KeyCode::Esc => 27,
        KeyCode::Char(c) if key.modifiers.contains(KeyModifiers::CONTROL) => {
            u32::from(c) & 0x1f
        }
        KeyCode::Char(c) => u32::from(c),
        _ => 0,
    }
}

/// Replays a fixed sequence of keystrokes.
///
/// Used to drive the prompt without a terminal. Returns
/// `UnexpectedEof` once the script is exhausted.
#[derive(Debug, Default)]
pub struct ScriptedKeys {
    keys: VecDeque<u32>,
    reads: usize,
}

impl ScriptedKeys {
    /// Creates a source from raw key codes.
    #[must_use]
    pub fn new(keys: impl IntoIterator<Item = u32>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            reads: 0,
        }
    }

    /// Creates a source that types `text` and then presses Enter.
    #[must_use]
    pub fn typed_line(text: &str) -> Self {
        Self::new(text.chars().map(u32::from).chain([KEY_ENTER]))
    }

    /// Number of keys consumed so far.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl KeySource for ScriptedKeys {
    fn next_key(&mut self) -> io::Result<u32> {
        let key = self
            .keys
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "key script exhausted"))?;
        self.reads += 1;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn test_key_code_printable() {
        assert_eq!(key_code(&press(KeyCode::Char('a'), KeyModifiers::NONE)), 97);
        assert_eq!(key_code(&press(KeyCode::Char('A'), KeyModifiers::SHIFT)), 65);
        assert_eq!(key_code(&press(KeyCode::Char('é'), KeyModifiers::NONE)), 233);
    }

    #[test]
    fn test_key_code_control() {
        assert_eq!(
            key_code(&press(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            KEY_INTERRUPT
        );
        assert_eq!(
            key_code(&press(KeyCode::Char('h'), KeyModifiers::CONTROL)),
            KEY_BACKSPACE
        );
        assert_eq!(key_code(&press(KeyCode::Enter, KeyModifiers::NONE)), KEY_ENTER);
        assert_eq!(
            key_code(&press(KeyCode::Backspace, KeyModifiers::NONE)),
            KEY_DELETE
        );
        assert_eq!(key_code(&press(KeyCode::Left, KeyModifiers::NONE)), 0);
    }

    #[test]
    fn test_scripted_keys_exhaustion() {
        let mut keys = ScriptedKeys::new([120]);
        assert_eq!(keys.next_key().unwrap(), 120);
        assert_eq!(keys.reads(), 1);

        let err = keys.next_key().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_typed_line_ends_with_enter() {
        let mut keys = ScriptedKeys::typed_line("ok");
        assert_eq!(keys.next_key().unwrap(), u32::from('o'));
        assert_eq!(keys.next_key().unwrap(), u32::from('k'));
        assert_eq!(keys.next_key().unwrap(), KEY_ENTER);
    }
}
