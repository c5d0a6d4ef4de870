//! Logging context for connkit.
//!
//! Each program writes one size-rotated log file named
//! `<progname>_<YYYYMMDD>.log` plus a console stream on stderr, each with
//! its own minimum level. The context is built explicitly by the caller
//! and flushed by [`LoggingContext::shutdown`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Default file log level.
pub const DEFAULT_FILE_LEVEL: &str = "debug";

/// Default console log level.
pub const DEFAULT_CONSOLE_LEVEL: &str = "warn";

/// Rotate every 1 GB.
pub const DEFAULT_MAX_BYTES: u64 = 1_000_000_000;

/// Rotated files kept next to the active one.
pub const DEFAULT_BACKUPS: u32 = 2;

/// Timestamp format for both streams.
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Whether logging is enabled at all.
    pub enabled: bool,
    /// Directory holding the log files.
    pub dir: PathBuf,
    /// Minimum level written to the file (trace, debug, info, warn, error).
    pub file_level: String,
    /// Minimum level written to stderr.
    pub console_level: String,
    /// Size threshold that triggers rotation.
    pub max_bytes: u64,
    /// Number of rotated files to keep; 0 disables rotation.
    pub backups: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("logs"),
            file_level: DEFAULT_FILE_LEVEL.to_string(),
            console_level: DEFAULT_CONSOLE_LEVEL.to_string(),
            max_bytes: DEFAULT_MAX_BYTES,
            backups: DEFAULT_BACKUPS,
        }
    }
}

impl LogConfig {
    /// Normalizes a level name, falling back to `default` for unknown input.
    #[must_use]
    pub fn parse_level(value: &str, default: &str) -> String {
        match value.to_lowercase().as_str() {
            "trace" => "trace".to_string(),
            "debug" => "debug".to_string(),
            "info" => "info".to_string(),
            "warn" | "warning" => "warn".to_string(),
            "error" | "critical" => "error".to_string(),
            "off" | "none" | "disabled" => "off".to_string(),
            _ => default.to_string(),
        }
    }
}

/// Returns the file name for `progname` on the given date.
#[must_use]
pub fn log_file_name(progname: &str, date: chrono::NaiveDate) -> String {
    format!("{}_{}.log", progname, date.format("%Y%m%d"))
}

/// A file writer that rotates by size.
///
/// When a write would push the active file past `max_bytes`, the file is
/// renamed to `<name>.1`, older backups shift up by one, and the oldest
/// beyond `backups` is deleted.
#[derive(Debug)]
pub struct RotatingFileWriter {
    path: PathBuf,
    file: File,
    written: u64,
    max_bytes: u64,
    backups: u32,
}

impl RotatingFileWriter {
    /// Opens `path` for appending.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened.
    pub fn open(path: &Path, max_bytes: u64, backups: u32) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written,
            max_bytes,
            backups,
        })
    }

    /// Path of the active file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn should_rotate(&self, incoming: usize) -> bool {
        self.backups > 0
            && self.max_bytes > 0
            && self.written > 0
            && self.written + incoming as u64 > self.max_bytes
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let oldest = self.backup_path(self.backups);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.backups).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))?;

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.should_rotate(buf.len()) {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Builds the stderr layer. `RUST_LOG` overrides the configured level.
fn console_layer<S>(level: &str) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt::layer()
        .with_writer(io::stderr)
        .with_timer(ChronoLocal::new(DATE_FORMAT.to_string()))
        .with_target(false)
        .with_filter(filter)
}

/// Installed logging state.
///
/// Keeps the background writer alive; dropping it, or calling
/// [`LoggingContext::shutdown`], flushes buffered records to disk.
#[derive(Debug)]
pub struct LoggingContext {
    log_path: Option<PathBuf>,
    guard: Option<WorkerGuard>,
}

impl LoggingContext {
    /// Installs the global subscriber for `progname`.
    ///
    /// With `enabled = false` only the console stream is installed.
    ///
    /// # Errors
    /// Returns error if the log directory or file cannot be created, or a
    /// subscriber is already installed. Nothing is installed in that case;
    /// see [`LoggingContext::console_only`].
    pub fn init(progname: &str, config: &LogConfig) -> io::Result<Self> {
        if !config.enabled {
            return Ok(Self::console_only(config));
        }

        fs::create_dir_all(&config.dir)?;
        let log_path = config
            .dir
            .join(log_file_name(progname, chrono::Local::now().date_naive()));
        let writer = RotatingFileWriter::open(&log_path, config.max_bytes, config.backups)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(writer);

        let file_level = LogConfig::parse_level(&config.file_level, DEFAULT_FILE_LEVEL);
        let console_level = LogConfig::parse_level(&config.console_level, DEFAULT_CONSOLE_LEVEL);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_timer(ChronoLocal::new(DATE_FORMAT.to_string()))
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(EnvFilter::new(&file_level));

        tracing_subscriber::registry()
            .with(file_layer)
            .with(console_layer(&console_level))
            .try_init()
            .map_err(io::Error::other)?;

        tracing::info!("{} logging initialized", progname);
        tracing::debug!("Log file: {}", log_path.display());
        tracing::debug!(
            "File level: {}, console level: {}, rotate at {} bytes, {} backups",
            file_level,
            console_level,
            config.max_bytes,
            config.backups
        );

        Ok(Self {
            log_path: Some(log_path),
            guard: Some(guard),
        })
    }

    /// Installs only the console stream, for when no log file is wanted or
    /// the file cannot be opened.
    ///
    /// An already installed subscriber is left in place.
    #[must_use]
    pub fn console_only(config: &LogConfig) -> Self {
        let console_level = LogConfig::parse_level(&config.console_level, DEFAULT_CONSOLE_LEVEL);
        if tracing_subscriber::registry()
            .with(console_layer(&console_level))
            .try_init()
            .is_ok()
        {
            tracing::debug!("Console logging only, level {}", console_level);
        }
        Self::disabled()
    }

    /// A context that logs nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            log_path: None,
            guard: None,
        }
    }

    /// Path of the active log file, if file logging is on.
    #[must_use]
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Flushes pending records and stops the background writer.
    pub fn shutdown(mut self) {
        if let Some(guard) = self.guard.take() {
            tracing::debug!("Shutting down logging");
            drop(guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.file_level, DEFAULT_FILE_LEVEL);
        assert_eq!(config.console_level, DEFAULT_CONSOLE_LEVEL);
        assert_eq!(config.max_bytes, DEFAULT_MAX_BYTES);
        assert_eq!(config.backups, DEFAULT_BACKUPS);
        assert!(config.enabled);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(LogConfig::parse_level("DEBUG", "info"), "debug");
        assert_eq!(LogConfig::parse_level("warning", "info"), "warn");
        assert_eq!(LogConfig::parse_level("critical", "info"), "error");
        assert_eq!(LogConfig::parse_level("off", "info"), "off");
        assert_eq!(LogConfig::parse_level("loud", "info"), "info");
    }

    #[test]
    fn test_log_file_name() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(log_file_name("ldap_conn", date), "ldap_conn_20240307.log");
    }

    #[test]
    fn test_rotation_shifts_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let mut writer = RotatingFileWriter::open(&path, 10, 2).unwrap();

        writer.write_all(b"first-1234\n").unwrap();
        writer.write_all(b"second-123\n").unwrap();
        writer.write_all(b"third-1234\n").unwrap();
        writer.write_all(b"fourth-123\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "fourth-123\n");
        assert_eq!(
            fs::read_to_string(dir.path().join("app.log.1")).unwrap(),
            "third-1234\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("app.log.2")).unwrap(),
            "second-123\n"
        );
        assert!(!dir.path().join("app.log.3").exists());
    }

    #[test]
    fn test_no_rotation_without_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let mut writer = RotatingFileWriter::open(&path, 4, 0).unwrap();

        writer.write_all(b"abcdef").unwrap();
        writer.write_all(b"ghij").unwrap();
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "abcdefghij");
        assert!(!dir.path().join("app.log.1").exists());
    }

    #[test]
    fn test_reopen_counts_existing_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "123456789").unwrap();

        let mut writer = RotatingFileWriter::open(&path, 10, 1).unwrap();
        writer.write_all(b"xy").unwrap();
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "xy");
        assert_eq!(
            fs::read_to_string(dir.path().join("app.log.1")).unwrap(),
            "123456789"
        );
    }

    #[test]
    fn test_unwritable_dir_keeps_console_stream() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let config = LogConfig {
            dir: blocker.join("logs"),
            ..LogConfig::default()
        };

        assert!(LoggingContext::init("app", &config).is_err());
        assert!(!tracing::dispatcher::has_been_set());

        let ctx = LoggingContext::console_only(&config);
        assert!(ctx.log_path().is_none());
        assert!(tracing::dispatcher::has_been_set());
        ctx.shutdown();
    }

    #[test]
    fn test_disabled_context() {
        let ctx = LoggingContext::disabled();
        assert!(ctx.log_path().is_none());
        ctx.shutdown();
    }
}
