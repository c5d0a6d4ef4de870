//! Integration tests for the masked password prompt.
//!
//! The prompt is driven through scripted keystrokes and an in-memory
//! terminal mode, so no real terminal is needed.

use connkit::prompt::{
    HiddenLineReader, KEY_BACKSPACE, KEY_DELETE, KEY_ENTER, KEY_INTERRUPT, MemoryMode,
    PromptError, PromptIo, ScriptedKeys, read_masked_password_with,
};
use connkit::{Error, ErrorKind};
use pretty_assertions::assert_eq;

/// Fallback returning a fixed answer and counting its calls.
struct CannedFallback {
    answer: &'static str,
    calls: usize,
}

impl CannedFallback {
    fn new(answer: &'static str) -> Self {
        Self { answer, calls: 0 }
    }
}

impl HiddenLineReader for CannedFallback {
    fn read_hidden_line(&mut self, _prompt: &str) -> Result<String, PromptError> {
        self.calls += 1;
        Ok(self.answer.to_string())
    }
}

struct Harness {
    keys: ScriptedKeys,
    fallback: CannedFallback,
    display: Vec<u8>,
    mode: MemoryMode,
}

impl Harness {
    fn new(keys: ScriptedKeys) -> Self {
        Self {
            keys,
            fallback: CannedFallback::new("from-fallback"),
            display: Vec::new(),
            mode: MemoryMode::new(false),
        }
    }

    fn read(&mut self, mask: &str, interactive: bool) -> Result<String, PromptError> {
        read_masked_password_with(
            "Password: ",
            mask,
            PromptIo {
                keys: &mut self.keys,
                fallback: &mut self.fallback,
                display: &mut self.display,
                mode: &mut self.mode,
                interactive,
            },
        )
    }

    fn display(&self) -> String {
        String::from_utf8_lossy(&self.display).into_owned()
    }
}

// ============================================================================
// Keystroke Loop
// ============================================================================

#[test]
fn test_backspace_removes_last_character() {
    let keys = ScriptedKeys::new([
        u32::from('a'),
        u32::from('b'),
        KEY_DELETE,
        u32::from('c'),
        KEY_ENTER,
    ]);
    let mut harness = Harness::new(keys);

    let secret = harness.read("*", true).unwrap();

    assert_eq!(secret, "ac");
    assert_eq!(harness.display(), "Password: **\x08 \x08*\r\n");
    assert!(!harness.mode.raw());
    assert_eq!(harness.fallback.calls, 0);
}

#[test]
fn test_backspace_on_empty_buffer_writes_nothing() {
    let keys = ScriptedKeys::new([KEY_BACKSPACE, KEY_BACKSPACE, u32::from('x'), KEY_ENTER]);
    let mut harness = Harness::new(keys);

    assert_eq!(harness.read("#", true).unwrap(), "x");
    assert_eq!(harness.display(), "Password: #\r\n");
}

#[test]
fn test_control_codes_are_ignored() {
    let keys = ScriptedKeys::new([9, 27, 0, u32::from('k'), KEY_ENTER]);
    let mut harness = Harness::new(keys);

    assert_eq!(harness.read("*", true).unwrap(), "k");
}

#[test]
fn test_unicode_mask_and_input() {
    let mut harness = Harness::new(ScriptedKeys::typed_line("päss"));

    assert_eq!(harness.read("•", true).unwrap(), "päss");
    assert_eq!(harness.display(), "Password: ••••\r\n");
}

// ============================================================================
// Fallback Selection
// ============================================================================

#[test]
fn test_empty_mask_uses_fallback_without_raw_mode() {
    let mut harness = Harness::new(ScriptedKeys::typed_line("ignored"));

    assert_eq!(harness.read("", true).unwrap(), "from-fallback");
    assert_eq!(harness.fallback.calls, 1);
    assert_eq!(harness.keys.reads(), 0);
    assert_eq!(harness.mode.transitions(), 0);
}

#[test]
fn test_non_interactive_uses_fallback() {
    let mut harness = Harness::new(ScriptedKeys::typed_line("ignored"));

    assert_eq!(harness.read("*", false).unwrap(), "from-fallback");
    assert_eq!(harness.keys.reads(), 0);
    assert!(harness.display.is_empty());
}

// ============================================================================
// Failure Paths
// ============================================================================

#[test]
fn test_invalid_mask_touches_nothing() {
    let mut harness = Harness::new(ScriptedKeys::typed_line("secret"));

    let err = harness.read("**", true).unwrap_err();

    assert!(matches!(err, PromptError::InvalidMask(_)));
    assert_eq!(harness.mode.transitions(), 0);
    assert_eq!(harness.keys.reads(), 0);
    assert!(harness.display.is_empty());
    assert_eq!(Error::from(err).kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_interrupt_restores_terminal_mode() {
    let keys = ScriptedKeys::new([u32::from('a'), KEY_INTERRUPT, u32::from('b')]);
    let mut harness = Harness::new(keys);

    let err = harness.read("*", true).unwrap_err();

    assert!(matches!(err, PromptError::Interrupted));
    assert_eq!(err.to_string(), "CTRL ^C received, closing...");
    assert!(!harness.mode.raw());
    assert_eq!(harness.mode.transitions(), 2);
    assert_eq!(harness.keys.reads(), 2);
}

#[test]
fn test_exhausted_input_is_io_error_and_restores_mode() {
    let mut harness = Harness::new(ScriptedKeys::new([u32::from('a')]));

    let err = harness.read("*", true).unwrap_err();

    assert!(matches!(err, PromptError::Io(_)));
    assert!(!harness.mode.raw());
}

#[test]
fn test_raw_mode_left_enabled_when_already_raw() {
    let mut harness = Harness::new(ScriptedKeys::typed_line("pw"));
    harness.mode = MemoryMode::new(true);

    assert_eq!(harness.read("*", true).unwrap(), "pw");
    assert!(harness.mode.raw());
    assert_eq!(harness.mode.transitions(), 0);
}
