//! Masked interactive password prompt.
//!
//! Reads a secret one keystroke at a time from a raw-mode terminal,
//! echoing a mask glyph per character. When stdin is not a terminal, or
//! no mask is requested, a non-echoing line reader is used instead.
//!
//! # Example
//!
//! ```no_run
//! let secret = connkit::prompt::read_masked_password("Password: ", "*")?;
//! # Ok::<(), connkit::prompt::PromptError>(())
//! ```

mod guard;
mod keys;

pub use guard::{CrosstermMode, MemoryMode, RawModeGuard, TerminalMode};
pub use keys::{
    KEY_BACKSPACE, KEY_DELETE, KEY_ENTER, KEY_INTERRUPT, KeySource, ScriptedKeys, TerminalKeys,
    key_code,
};

use std::io::{self, BufRead, Write};

use thiserror::Error;
use tracing::debug;

use keys::LAST_CONTROL_CODE;

/// Byte sequence that erases one glyph left of the cursor.
const ERASE_GLYPH: &[u8] = b"\x08 \x08";

/// Exit status used when the prompt is interrupted.
pub const INTERRUPT_EXIT_CODE: i32 = 130;

/// Errors raised by the password prompt.
#[derive(Debug, Error)]
pub enum PromptError {
    /// The mask was longer than one character.
    #[error("mask argument must be a zero- or one-character string, got {0:?}")]
    InvalidMask(String),

    /// Ctrl-C was pressed while reading.
    #[error("CTRL ^C received, closing...")]
    Interrupted,

    /// Terminal I/O failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<PromptError> for crate::Error {
    fn from(e: PromptError) -> Self {
        match e {
            PromptError::InvalidMask(_) => Self::InvalidInput(e.to_string()),
            PromptError::Interrupted => Self::Interrupted,
            PromptError::Io(io_err) => Self::Io(io_err),
        }
    }
}

/// Outcome of feeding one keystroke to a [`MaskedInput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Keep reading.
    Continue,
    /// Enter was pressed.
    Finished,
    /// Ctrl-C was pressed.
    Interrupted,
}

/// Password-entry buffer.
///
/// Holds only the characters typed; the mask glyph is written to the
/// display and never stored. With no mask the display is left untouched.
#[derive(Debug)]
pub struct MaskedInput {
    buffer: Vec<char>,
    mask: Option<char>,
}

impl MaskedInput {
    /// Creates an empty buffer that displays `mask` per character.
    #[must_use]
    pub fn new(mask: char) -> Self {
        Self {
            buffer: Vec::new(),
            mask: Some(mask),
        }
    }

    /// Creates an empty buffer that displays nothing.
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            buffer: Vec::new(),
            mask: None,
        }
    }

    /// Number of characters entered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been entered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Applies one keystroke, updating the buffer and the display.
    ///
    /// # Errors
    /// Returns error if writing to the display fails.
    pub fn apply(&mut self, key: u32, display: &mut dyn Write) -> io::Result<KeyOutcome> {
        match key {
            KEY_ENTER => {
                if self.mask.is_some() {
                    display.write_all(b"\r\n")?;
                    display.flush()?;
                }
                return Ok(KeyOutcome::Finished);
            }
            KEY_INTERRUPT => return Ok(KeyOutcome::Interrupted),
            KEY_BACKSPACE | KEY_DELETE => {
                if self.buffer.pop().is_some() && self.mask.is_some() {
                    display.write_all(ERASE_GLYPH)?;
                    display.flush()?;
                }
            }
            0..=LAST_CONTROL_CODE => {}
            _ => {
                // Codes outside the scalar range cannot be typed; treat as control.
                let Some(c) = char::from_u32(key) else {
                    return Ok(KeyOutcome::Continue);
                };
                self.buffer.push(c);
                if let Some(mask) = self.mask {
                    let mut glyph = [0u8; 4];
                    display.write_all(mask.encode_utf8(&mut glyph).as_bytes())?;
                    display.flush()?;
                }
            }
        }
        Ok(KeyOutcome::Continue)
    }

    /// Consumes the buffer and returns the secret.
    #[must_use]
    pub fn into_secret(self) -> String {
        self.buffer.into_iter().collect()
    }
}

/// Reads a line without echoing it.
pub trait HiddenLineReader {
    /// Displays `prompt` and returns the line typed, without its newline.
    ///
    /// # Errors
    /// Returns error if input cannot be read or the read is interrupted.
    fn read_hidden_line(&mut self, prompt: &str) -> Result<String, PromptError>;
}

/// Default fallback reader bound to the process's stdin.
///
/// On a terminal the line is read in raw mode without any display. On a
/// pipe or file the prompt goes to stderr and one line is read from stdin.
#[derive(Debug, Default)]
pub struct StdinFallback;

impl HiddenLineReader for StdinFallback {
    fn read_hidden_line(&mut self, prompt: &str) -> Result<String, PromptError> {
        if atty::is(atty::Stream::Stdin) {
            let mut stdout = io::stdout();
            stdout.write_all(prompt.as_bytes())?;
            stdout.flush()?;

            let mut mode = CrosstermMode;
            let mut keys = TerminalKeys;
            let secret = {
                let _guard = RawModeGuard::acquire(&mut mode)?;
                read_until_enter(MaskedInput::hidden(), &mut keys, &mut stdout)?
            };
            stdout.write_all(b"\n")?;
            stdout.flush()?;
            return Ok(secret);
        }

        let mut stderr = io::stderr();
        stderr.write_all(prompt.as_bytes())?;
        stderr.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(strip_line_ending(&line).to_string())
    }
}

/// Removes one trailing `\n` or `\r\n`.
fn strip_line_ending(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}

/// The collaborators a prompt reads from and writes to.
pub struct PromptIo<'a> {
    /// Keystroke source for the masked loop.
    pub keys: &'a mut dyn KeySource,
    /// Reader used when masking is not possible or not requested.
    pub fallback: &'a mut dyn HiddenLineReader,
    /// Display for the prompt and mask glyphs.
    pub display: &'a mut dyn Write,
    /// Terminal mode switched to raw for the duration of the loop.
    pub mode: &'a mut dyn TerminalMode,
    /// Whether stdin is an interactive terminal.
    pub interactive: bool,
}

/// Validates a mask argument, returning the glyph if one was given.
///
/// # Errors
/// Returns [`PromptError::InvalidMask`] for masks of two or more characters.
pub fn parse_mask(mask: &str) -> Result<Option<char>, PromptError> {
    let mut chars = mask.chars();
    match (chars.next(), chars.next()) {
        (None, _) => Ok(None),
        (Some(c), None) => Ok(Some(c)),
        _ => Err(PromptError::InvalidMask(mask.to_string())),
    }
}

fn read_until_enter(
    mut input: MaskedInput,
    keys: &mut dyn KeySource,
    display: &mut dyn Write,
) -> Result<String, PromptError> {
    loop {
        let key = keys.next_key()?;
        match input.apply(key, display)? {
            KeyOutcome::Continue => {}
            KeyOutcome::Finished => return Ok(input.into_secret()),
            KeyOutcome::Interrupted => return Err(PromptError::Interrupted),
        }
    }
}

/// Reads a password using explicit collaborators.
///
/// # Errors
/// Returns [`PromptError::InvalidMask`] before touching the terminal if
/// `mask` is longer than one character, [`PromptError::Interrupted`] on
/// Ctrl-C, or an I/O error. The terminal mode is restored in every case.
pub fn read_masked_password_with(
    prompt: &str,
    mask: &str,
    io: PromptIo<'_>,
) -> Result<String, PromptError> {
    let mask = parse_mask(mask)?;

    let mask = match mask {
        Some(mask) if io.interactive => mask,
        _ => {
            debug!(
                "Using hidden line fallback (interactive={}, masked={})",
                io.interactive,
                mask.is_some()
            );
            return io.fallback.read_hidden_line(prompt);
        }
    };

    io.display.write_all(prompt.as_bytes())?;
    io.display.flush()?;

    let _guard = RawModeGuard::acquire(io.mode)?;
    let result = read_until_enter(MaskedInput::new(mask), io.keys, io.display);
    if matches!(result, Err(PromptError::Interrupted)) {
        debug!("Password entry interrupted");
    }
    result
}

/// Reads a password from the terminal, echoing `mask` per character.
///
/// `mask` must be empty or a single character. An empty mask, or a
/// non-interactive stdin, uses [`StdinFallback`].
///
/// # Errors
/// See [`read_masked_password_with`].
pub fn read_masked_password(prompt: &str, mask: &str) -> Result<String, PromptError> {
    let mut keys = TerminalKeys;
    let mut fallback = StdinFallback;
    let mut stdout = io::stdout();
    let mut mode = CrosstermMode;

    read_masked_password_with(
        prompt,
        mask,
        PromptIo {
            keys: &mut keys,
            fallback: &mut fallback,
            display: &mut stdout,
            mode: &mut mode,
            interactive: atty::is(atty::Stream::Stdin),
        },
    )
}

/// Like [`read_masked_password`], but terminates the process on Ctrl-C.
///
/// The terminal mode is restored before exiting with status 130. The exit
/// skips destructors, so callers holding a [`crate::LoggingContext`] should
/// use [`read_masked_password`] and shut logging down themselves.
///
/// # Errors
/// Returns every error except [`PromptError::Interrupted`].
pub fn read_masked_password_or_exit(prompt: &str, mask: &str) -> Result<String, PromptError> {
    match read_masked_password(prompt, mask) {
        Err(PromptError::Interrupted) => {
            eprintln!("\n{}", PromptError::Interrupted);
            std::process::exit(INTERRUPT_EXIT_CODE);
        }
        other => other,
    }
}
