//! connkit
//!
//! Thin connection managers for LDAP, MySQL, PostgreSQL, OpenShift,
//! SFTP and an embedded JSON document store, plus a masked password prompt
//! and an age-based cleanup sweep.
//!
//! # Architecture
//!
//! - **Clients**: one wrapper per vendor library, translating its errors
//!   into [`Error`] and logging each operation
//! - **Prompt**: raw-mode keystroke loop behind a scoped terminal guard
//! - **Cleanup**: removal of directory children past a retention window
//! - **Logging**: rotating file and console streams with separate levels
//!
//! # Usage
//!
//! ```no_run
//! use connkit::cleanup;
//!
//! let report = cleanup::cleanup(30, std::path::Path::new("logs"))?;
//! println!("removed {} entries", report.removed);
//! # Ok::<(), std::io::Error>(())
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::struct_excessive_bools)]

pub mod cleanup;
pub mod clients;
pub mod config;
pub mod display;
pub mod error;
pub mod logging;
pub mod net;
pub mod prompt;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export main types
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use logging::{LogConfig, LoggingContext};
pub use prompt::{PromptError, read_masked_password, read_masked_password_or_exit};
