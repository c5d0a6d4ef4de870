//! Scoped raw-mode acquisition.

use std::io;

use crossterm::terminal;

/// Read and write access to the terminal's raw-mode flag.
pub trait TerminalMode {
    /// Returns true if raw mode is currently enabled.
    ///
    /// # Errors
    /// Returns error if the terminal state cannot be queried.
    fn is_raw(&self) -> io::Result<bool>;

    /// Enables or disables raw mode.
    ///
    /// # Errors
    /// Returns error if the terminal state cannot be changed.
    fn set_raw(&mut self, raw: bool) -> io::Result<()>;
}

/// The process's controlling terminal, through crossterm.
#[derive(Debug, Default)]
pub struct CrosstermMode;

impl TerminalMode for CrosstermMode {
    fn is_raw(&self) -> io::Result<bool> {
        terminal::is_raw_mode_enabled()
    }

    fn set_raw(&mut self, raw: bool) -> io::Result<()> {
        if raw {
            terminal::enable_raw_mode()
        } else {
            terminal::disable_raw_mode()
        }
    }
}

/// Holds the terminal in raw mode until dropped.
///
/// The mode observed at acquisition is restored on drop, including
/// during unwinding. A terminal that was already raw stays raw.
pub struct RawModeGuard<'a> {
    mode: &'a mut dyn TerminalMode,
    was_raw: bool,
}

impl<'a> RawModeGuard<'a> {
    /// Switches the terminal to raw mode.
    ///
    /// # Errors
    /// Returns error if the mode cannot be queried or changed. The
    /// terminal is left untouched in that case.
    pub fn acquire(mode: &'a mut dyn TerminalMode) -> io::Result<Self> {
        let was_raw = mode.is_raw()?;
        if !was_raw {
            mode.set_raw(true)?;
        }
        tracing::trace!("Raw mode acquired (previously raw: {})", was_raw);
        Ok(Self { mode, was_raw })
    }
}

impl Drop for RawModeGuard<'_> {
    fn drop(&mut self) {
        if !self.was_raw {
            if let Err(e) = self.mode.set_raw(false) {
                tracing::warn!("Failed to restore terminal mode: {}", e);
            }
        }
        tracing::trace!("Raw mode released");
    }
}

/// In-memory terminal mode, for tests.
#[derive(Debug, Default)]
pub struct MemoryMode {
    raw: bool,
    transitions: usize,
}

impl MemoryMode {
    /// Creates a mode that starts raw or cooked.
    #[must_use]
    pub fn new(raw: bool) -> Self {
        Self {
            raw,
            transitions: 0,
        }
    }

    /// Number of times the mode was changed.
    #[must_use]
    pub fn transitions(&self) -> usize {
        self.transitions
    }

    /// Current flag value.
    #[must_use]
    pub fn raw(&self) -> bool {
        self.raw
    }
}

impl TerminalMode for MemoryMode {
    fn is_raw(&self) -> io::Result<bool> {
        Ok(self.raw)
    }

    fn set_raw(&mut self, raw: bool) -> io::Result<()> {
        self.raw = raw;
        self.transitions += 1;
        Ok(())
    }
}
