//! Configuration for connkit.
//!
//! Settings are read from a TOML file with one table per component. Every
//! field has a default, so a partial file or no file at all is valid.

use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::clients::{
    DocStoreSettings, LdapSettings, MySqlSettings, OcpSettings, PostgresSettings, SftpSettings,
};
use crate::error::Result;
use crate::logging::LogConfig;

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "connkit.toml";

/// Environment variable overriding the config path.
pub const CONFIG_ENV_VAR: &str = "CONNKIT_CONFIG";

/// Default config file content with every setting documented.
const DEFAULT_CONFIG: &str = r#"# connkit configuration file
# ==========================
# Every key is optional. Passwords left unset are prompted for.

[logging]
# enabled = true
# dir = "logs"
# file_level = "debug"        # trace, debug, info, warn, error
# console_level = "warn"
# max_bytes = 1000000000      # rotate after ~1 GB
# backups = 2                 # rotated files to keep, 0 disables rotation

[cleanup]
# retention_days = 30
# base_dir = "."
# paths = ["logs"]

[ldap]
# uri = "ldap://localhost:390"
# base_dn = "dc=your-domain,dc=it"
# user_base_dn = "ou=People,dc=your-domain,dc=it"
# bind_dn = "cn=Admin Group"
# timeout_secs = 10
# verify_tls = true

[mysql]
# host = "localhost"
# port = 3306
# user = "user"
# database = "db"
# ssl_ca = "/path/to/db_certs/ca.pem"
# accept_invalid_certs = false
# autocommit = false

[postgres]
# host = "localhost"
# port = 5432
# user = "postgres"
# database = "postgres"

[ocp]
# api_url = "https://api.okd.clustername.local:6443"
# namespace = "default"
# verify_ssl = false
# ssl_ca_cert = "./ocp.pem"
# api_version = "v1"
# kind = "Pod"
# auth = { method = "service_account" }
# auth = { method = "kube_config", path = "~/.kube/config" }
# auth = { method = "password", username = "developer" }

[sftp]
# host = "localhost"
# port = 2222
# username = "user"
# private_key_path = "~/.ssh/id_rsa"
# password = "key passphrase"  # with a key, only needed for encrypted keys
# use_agent = false            # log in through the SSH agent instead
# timeout_secs = 30

[docstore]
# path = "app_db.json"
# table = "queries"
"#;

/// Age-based cleanup settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    /// Files older than this many days are removed.
    pub retention_days: u64,
    /// Directory the swept paths are relative to.
    pub base_dir: PathBuf,
    /// Directories swept after each demo.
    pub paths: Vec<String>,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            retention_days: 30,
            base_dir: PathBuf::from("."),
            paths: vec!["logs".to_string()],
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LogConfig,
    pub cleanup: CleanupSettings,
    pub ldap: LdapSettings,
    pub mysql: MySqlSettings,
    pub postgres: PostgresSettings,
    pub ocp: OcpSettings,
    pub sftp: SftpSettings,
    pub docstore: DocStoreSettings,
    /// File the configuration was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Config {
    /// Returns the home-directory config path (`~/.connkit.toml`).
    #[must_use]
    pub fn home_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".connkit.toml")
    }

    /// Picks the config file: the CLI path, then `CONNKIT_CONFIG`, then
    /// `./connkit.toml`, then `~/.connkit.toml`.
    ///
    /// The first two are returned even if missing so that [`Config::load`]
    /// falls back to defaults for them.
    #[must_use]
    pub fn resolve_path(cli: Option<&Path>) -> PathBuf {
        if let Some(path) = cli {
            return path.to_path_buf();
        }
        if let Some(path) = env::var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return local;
        }
        let home = Self::home_config_path();
        if home.exists() {
            return home;
        }
        local
    }

    /// Loads configuration from `path`, using defaults if it does not exist.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let mut config = Self::parse(&content)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parses TOML content.
    ///
    /// # Errors
    /// Returns error if the content is not valid TOML for this schema.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Writes the documented default config to `path` unless it exists.
    ///
    /// Returns true if a file was written.
    ///
    /// # Errors
    /// Returns error if the file cannot be created.
    pub fn write_default(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_CONFIG.as_bytes())?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::OcpAuth;
    use crate::ErrorKind;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cleanup.retention_days, 30);
        assert_eq!(config.cleanup.paths, vec!["logs".to_string()]);
        assert_eq!(config.mysql.port, 3306);
        assert_eq!(config.ldap.uri, "ldap://localhost:390");
        assert_eq!(config.ocp.auth, OcpAuth::ServiceAccount);
        assert_eq!(config.logging.backups, 2);
    }

    #[test]
    fn test_partial_override() {
        let config = Config::parse(
            r#"
            [mysql]
            host = "db.internal"

            [ocp]
            namespace = "batch"
            auth = { method = "kube_config", path = "/tmp/kubeconfig" }
            "#,
        )
        .unwrap();

        assert_eq!(config.mysql.host, "db.internal");
        assert_eq!(config.mysql.port, 3306);
        assert_eq!(config.ocp.namespace, "batch");
        assert_eq!(
            config.ocp.auth,
            OcpAuth::KubeConfig {
                path: PathBuf::from("/tmp/kubeconfig")
            }
        );
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::parse("[mysql]\nport = \"not a number\"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert!(config.source.is_none());
        assert_eq!(config.sftp.port, 2222);
    }

    #[test]
    fn test_default_template_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connkit.toml");

        assert!(Config::write_default(&path).unwrap());
        assert!(!Config::write_default(&path).unwrap());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
        assert_eq!(config.docstore.table, "queries");
    }

    #[test]
    fn test_resolve_cli_path_wins() {
        let path = Path::new("/etc/connkit/custom.toml");
        assert_eq!(Config::resolve_path(Some(path)), path);
    }
}
