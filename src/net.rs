//! Pre-flight reachability checks.
//!
//! Run before opening a session so that an unreachable host or a missing
//! key file is reported plainly instead of as a handshake failure.

use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// TCP probe timeout in milliseconds.
const CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Resolves `host` to its socket addresses on `port`.
///
/// IP literals are returned without a DNS lookup.
///
/// # Errors
/// Returns [`Error::Connection`] if the name does not resolve.
pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    debug!("Hostname supplied, DNS will be checked...");
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| {
            error!("DNS resolution failed for host: {}", host);
            Error::Connection(format!("DNS resolution failed for {}: {}", host, e))
        })?
        .collect();

    if addrs.is_empty() {
        error!("DNS resolution returned no address for host: {}", host);
        return Err(Error::Connection(format!("no address for {}", host)));
    }
    debug!("DNS resolved host {} as {:?}", host, addrs);
    Ok(addrs)
}

/// Opens a TCP connection to the first reachable address.
///
/// # Errors
/// Returns [`Error::Connection`] if no address accepts the connection.
pub fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let mut last_error = None;
    for addr in resolve(host, port)? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                debug!("Host and port reachable: {}", addr);
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }

    error!("Host or port not reachable: {}:{}", host, port);
    Err(Error::Connection(match last_error {
        Some(e) => format!("{}:{} not reachable: {}", host, port, e),
        None => format!("{}:{} not reachable", host, port),
    }))
}

/// Checks that `host` resolves and accepts TCP connections on `port`.
///
/// # Errors
/// Returns [`Error::Connection`] on DNS or connect failure.
pub fn check_connection(host: &str, port: u16) -> Result<()> {
    info!("Checking host and port connectivity...");
    connect_tcp(host, port, Duration::from_millis(CONNECT_TIMEOUT_MS)).map(|_| ())
}

/// Checks that a private key file exists.
///
/// # Errors
/// Returns [`Error::InvalidInput`] if the path is missing or not a file.
pub fn check_key_path(path: &Path) -> Result<()> {
    info!("Checking private key path...");
    if path.is_file() {
        return Ok(());
    }
    error!("Private key path not found: {}", path.display());
    Err(Error::InvalidInput(format!(
        "private key not found: {}",
        path.display()
    )))
}
