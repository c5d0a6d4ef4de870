//! SFTP client for file transfer.
//!
//! Wraps an ssh2 session with the SFTP subsystem. Host keys are accepted
//! without verification.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use ssh2::{ErrorCode, Session, Sftp};
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::net;

/// SFTP status code for a missing file.
const SFTP_NO_SUCH_FILE: i32 = 2;

/// SFTP status code for a permission failure.
const SFTP_PERMISSION_DENIED: i32 = 3;

/// Connection settings for an SFTP server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SftpSettings {
    /// Host name or IP address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Password, or key passphrase when a key is configured.
    pub password: Option<String>,
    /// Private key used instead of password authentication.
    pub private_key_path: Option<PathBuf>,
    /// Authenticate through the running SSH agent when no key is set.
    pub use_agent: bool,
    /// Connect and I/O timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SftpSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 2222,
            username: "user".to_string(),
            password: None,
            private_key_path: None,
            use_agent: false,
            timeout_secs: 30,
        }
    }
}

impl SftpSettings {
    /// True when login can only succeed with a password.
    #[must_use]
    pub fn needs_password(&self) -> bool {
        self.password.is_none() && self.private_key_path.is_none() && !self.use_agent
    }
}

/// An entry in a remote directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDirEntry {
    /// File or directory name.
    pub name: String,
    /// True if this is a directory.
    pub is_directory: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
}

/// Maps an ssh2 error from a file operation.
fn file_error(action: &str, path: &str, e: &ssh2::Error) -> Error {
    let message = format!("{} {}: {}", action, path, e);
    match e.code() {
        ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => Error::NotFound(message),
        ErrorCode::SFTP(SFTP_PERMISSION_DENIED) => Error::PermissionDenied(message),
        _ => Error::Operation(message),
    }
}

/// Sorts directories first, then by case-insensitive name.
fn sort_entries(entries: &mut [RemoteDirEntry]) {
    entries.sort_by(|a, b| match (a.is_directory, b.is_directory) {
        (true, false) => std::cmp::Ordering::Less,
        (false, true) => std::cmp::Ordering::Greater,
        _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
    });
}

/// An authenticated SFTP session.
pub struct SftpClient {
    session: Session,
    sftp: Sftp,
    host: String,
}

impl SftpClient {
    /// Connects and authenticates.
    ///
    /// Checks DNS, port reachability and the key file first.
    ///
    /// # Errors
    /// Returns [`Error::Connection`] for network or handshake failures,
    /// [`Error::InvalidInput`] for a missing key file and
    /// [`Error::Authentication`] when credentials are refused.
    pub fn login(settings: &SftpSettings) -> Result<Self> {
        if settings.host.is_empty() || settings.username.is_empty() {
            return Err(Error::InvalidInput(
                "host and username must not be empty".to_string(),
            ));
        }

        info!("Connecting to the host: {}", settings.host);
        net::check_connection(&settings.host, settings.port)?;
        if let Some(ref key_path) = settings.private_key_path {
            net::check_key_path(key_path)?;
        }

        let timeout = Duration::from_secs(settings.timeout_secs);
        let tcp = net::connect_tcp(&settings.host, settings.port, timeout)?;
        let _ = tcp.set_read_timeout(Some(timeout));
        let _ = tcp.set_write_timeout(Some(timeout));

        let mut session = Session::new().map_err(|e| {
            error!("Unable to create SSH session: {}", e);
            Error::Connection(e.to_string())
        })?;
        session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| {
            error!("SSH2 protocol negotiation failed: {}", e);
            Error::Connection(format!("SSH handshake failed: {}", e))
        })?;

        Self::authenticate(&mut session, settings)?;

        let sftp = session.sftp().map_err(|e| {
            error!("SFTP subsystem unavailable: {}", e);
            Error::Connection(format!("SFTP init failed: {}", e))
        })?;

        info!("SFTP connection successful to the host: {}", settings.host);
        Ok(Self {
            session,
            sftp,
            host: settings.host.clone(),
        })
    }

    /// Authenticates with key, password, or agent, in that order.
    fn authenticate(session: &mut Session, settings: &SftpSettings) -> Result<()> {
        if let Some(ref key_path) = settings.private_key_path {
            debug!("Using key-based authentication for {}", settings.host);
            session
                .userauth_pubkey_file(
                    &settings.username,
                    None,
                    key_path,
                    settings.password.as_deref(),
                )
                .map_err(|e| {
                    error!("SFTP authentication failed: {}", e);
                    Error::Authentication(e.to_string())
                })?;
        } else if let Some(ref password) = settings.password {
            debug!("Using password authentication for {}", settings.host);
            session
                .userauth_password(&settings.username, password)
                .map_err(|e| {
                    error!("SFTP authentication failed: {}", e);
                    Error::Authentication(e.to_string())
                })?;
        } else {
            debug!("Using SSH agent authentication for {}", settings.host);
            session.userauth_agent(&settings.username).map_err(|e| {
                error!("SFTP agent authentication failed: {}", e);
                Error::Authentication(e.to_string())
            })?;
        }

        if session.authenticated() {
            Ok(())
        } else {
            Err(Error::Authentication(
                "No valid authentication method".to_string(),
            ))
        }
    }

    /// Uploads a local file, returning the bytes written.
    ///
    /// # Errors
    /// Returns error if the local file cannot be read or the remote file
    /// cannot be written.
    pub fn copy_file(&self, source: &Path, destination: &str) -> Result<u64> {
        let mut local = File::open(source).map_err(|e| {
            error!("Error exporting file {}: {}", source.display(), e);
            Error::Io(e)
        })?;
        let mut remote = self
            .sftp
            .create(Path::new(destination))
            .map_err(|e| file_error("Cannot create", destination, &e))?;

        let written = io::copy(&mut local, &mut remote).map_err(|e| {
            error!("Error exporting file: {}", e);
            Error::Operation(format!("Cannot write {}: {}", destination, e))
        })?;

        info!(
            "File exported from {} to {}",
            source.display(),
            destination
        );
        Ok(written)
    }

    /// Lists a remote directory, directories first.
    ///
    /// # Errors
    /// Returns error if the directory cannot be read.
    pub fn list_files(&self, remote_path: &str) -> Result<Vec<RemoteDirEntry>> {
        let entries = self
            .sftp
            .readdir(Path::new(remote_path))
            .map_err(|e| file_error("Cannot read directory", remote_path, &e))?;

        let mut result: Vec<RemoteDirEntry> = entries
            .into_iter()
            .map(|(path, stat)| RemoteDirEntry {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                is_directory: stat.is_dir(),
                size: stat.size.unwrap_or(0),
            })
            .collect();
        sort_entries(&mut result);

        info!(
            "Files in remote directory {}: {:?}",
            remote_path,
            result.iter().map(|e| e.name.as_str()).collect::<Vec<_>>()
        );
        Ok(result)
    }

    /// Deletes a remote file.
    ///
    /// # Errors
    /// Returns error if the file cannot be removed.
    pub fn delete_file(&self, remote_path: &str) -> Result<()> {
        self.sftp
            .unlink(Path::new(remote_path))
            .map_err(|e| file_error("Cannot delete", remote_path, &e))?;
        info!("File deleted: {}", remote_path);
        Ok(())
    }

    /// Returns true while the session is authenticated.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.authenticated()
    }

    /// Closes the session.
    pub fn logout(self) {
        if let Err(e) = self
            .session
            .disconnect(None, "connkit logout", None)
        {
            debug!("Disconnect from {} reported: {}", self.host, e);
        }
        info!("SFTP connection to {} closed.", self.host);
    }
}
