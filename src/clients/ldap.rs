//! LDAP directory client.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

/// invalidCredentials
const RC_INVALID_CREDENTIALS: u32 = 49;
/// insufficientAccessRights
const RC_INSUFFICIENT_ACCESS: u32 = 50;
/// noSuchObject
const RC_NO_SUCH_OBJECT: u32 = 32;
/// entryAlreadyExists
const RC_ALREADY_EXISTS: u32 = 68;

/// LDAP connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LdapSettings {
    /// Server URI, `ldap://` or `ldaps://`.
    pub uri: String,
    /// Base DN for general searches.
    pub base_dn: String,
    /// Base DN holding user entries.
    pub user_base_dn: String,
    /// DN to bind as. Anonymous when unset.
    pub bind_dn: Option<String>,
    /// Bind password. Prompted for when a bind DN is set and this is not.
    pub password: Option<String>,
    /// Connect timeout in seconds.
    pub timeout_secs: u64,
    /// Verify the server certificate on `ldaps://`.
    pub verify_tls: bool,
}

impl Default for LdapSettings {
    fn default() -> Self {
        Self {
            uri: "ldap://localhost:390".to_string(),
            base_dn: "dc=your-domain,dc=it".to_string(),
            user_base_dn: "ou=People,dc=your-domain,dc=it".to_string(),
            bind_dn: Some("cn=Admin Group".to_string()),
            password: None,
            timeout_secs: 10,
            verify_tls: true,
        }
    }
}

/// Kind of attribute modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyEvent {
    Add,
    Delete,
    Replace,
}

impl ModifyEvent {
    /// Parses `ADD`, `DELETE` or `REPLACE`, ignoring case.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for any other name.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "ADD" => Ok(Self::Add),
            "DELETE" => Ok(Self::Delete),
            "REPLACE" => Ok(Self::Replace),
            other => Err(Error::InvalidInput(format!(
                "event type can be only ADD, DELETE or REPLACE, got {:?}",
                other
            ))),
        }
    }

    fn into_mod<'a>(self, attr: &'a str, value: &'a str) -> Mod<&'a str> {
        let values = HashSet::from([value]);
        match self {
            Self::Add => Mod::Add(attr, values),
            Self::Delete => Mod::Delete(attr, values),
            Self::Replace => Mod::Replace(attr, values),
        }
    }
}

impl FromStr for ModifyEvent {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ModifyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "ADD"),
            Self::Delete => write!(f, "DELETE"),
            Self::Replace => write!(f, "REPLACE"),
        }
    }
}

/// A search result entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapEntry {
    pub dn: String,
    pub attrs: BTreeMap<String, Vec<String>>,
}

impl LdapEntry {
    /// Attribute rows in name order, suitable for [`crate::display::print_table`].
    pub fn rows(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl From<SearchEntry> for LdapEntry {
    fn from(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attrs: entry.attrs.into_iter().collect(),
        }
    }
}

/// Maps an LDAP result code to an error.
fn error_for_code(rc: u32, message: String) -> Error {
    match rc {
        RC_INVALID_CREDENTIALS => Error::Authentication(message),
        RC_INSUFFICIENT_ACCESS => Error::PermissionDenied(message),
        RC_NO_SUCH_OBJECT => Error::NotFound(message),
        RC_ALREADY_EXISTS => Error::Conflict(message),
        _ => Error::Operation(message),
    }
}

fn map_ldap_error(action: &str, e: LdapError) -> Error {
    match e {
        LdapError::LdapResult { result } => {
            let message = format!("{}: rc={} {}", action, result.rc, result.text);
            error_for_code(result.rc, message)
        }
        LdapError::FilterParsing => Error::InvalidInput(format!("{}: invalid filter", action)),
        LdapError::UrlParsing { source } => {
            Error::InvalidInput(format!("{}: invalid URI: {}", action, source))
        }
        other => Error::Connection(format!("{}: {}", action, other)),
    }
}

/// A bound LDAP session.
pub struct LdapClient {
    ldap: Ldap,
    uri: String,
}

impl LdapClient {
    /// Opens a connection and binds when a bind DN is configured.
    ///
    /// # Errors
    /// Returns [`Error::Authentication`] when the bind is refused and
    /// [`Error::Connection`] when the server cannot be reached.
    pub async fn connect(settings: &LdapSettings) -> Result<Self> {
        info!("Connecting to the LDAP Server...");
        debug!("Connecting with {}", settings.uri);

        let conn_settings = LdapConnSettings::new()
            .set_conn_timeout(Duration::from_secs(settings.timeout_secs))
            .set_no_tls_verify(!settings.verify_tls);
        let (conn, mut ldap) = LdapConnAsync::with_settings(conn_settings, &settings.uri)
            .await
            .map_err(|e| {
                let err = map_ldap_error("LDAP connection failed", e);
                error!("{}", err);
                err
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!("LDAP connection driver stopped: {}", e);
            }
        });

        if let Some(ref bind_dn) = settings.bind_dn {
            warn!("*** Connecting as Admin ***");
            debug!("Binding with {}, password=**censored**", bind_dn);
            let password = settings.password.as_deref().unwrap_or_default();
            ldap.simple_bind(bind_dn, password)
                .await
                .and_then(|r| r.success())
                .map_err(|e| {
                    let err = map_ldap_error("bind", e);
                    if err.is_auth_failure() {
                        error!("User or password is wrong for {}", bind_dn);
                    } else {
                        error!("LDAP bind failed: {}", err);
                    }
                    err
                })?;
        }

        info!("Connected to the LDAP successfully!");
        Ok(Self {
            ldap,
            uri: settings.uri.clone(),
        })
    }

    /// Searches the subtree under `base_dn`.
    ///
    /// When `escape` is set, filter metacharacters in `filter` are escaped
    /// before sending.
    ///
    /// # Errors
    /// Returns error if the search fails on the server.
    pub async fn search(
        &mut self,
        base_dn: &str,
        filter: &str,
        attributes: &[&str],
        escape: bool,
    ) -> Result<Vec<LdapEntry>> {
        debug!("Wildchar will be escaped ? {}", escape);
        let filter = if escape {
            let escaped = ldap3::ldap_escape(filter).into_owned();
            debug!("Char escaped in search value: {}", escaped);
            escaped
        } else {
            filter.to_string()
        };

        info!("Searching {}", filter);
        debug!(
            "Searching {} on {} with attributes to retrieve {:?}",
            filter, base_dn, attributes
        );
        let (entries, _) = self
            .ldap
            .search(base_dn, Scope::Subtree, &filter, attributes)
            .await
            .and_then(|r| r.success())
            .map_err(|e| {
                let err = map_ldap_error("search", e);
                error!("Problem while searching: {}", err);
                err
            })?;

        debug!("Search completed successfully!");
        Ok(entries
            .into_iter()
            .map(|e| LdapEntry::from(SearchEntry::construct(e)))
            .collect())
    }

    /// Applies one attribute modification to `dn`.
    ///
    /// # Errors
    /// Returns [`Error::PermissionDenied`] when the bound identity lacks
    /// write access, or another error if the server rejects the change.
    pub async fn modify(
        &mut self,
        dn: &str,
        attr: &str,
        value: &str,
        event: ModifyEvent,
    ) -> Result<()> {
        debug!(
            "object to modify: {}, event type: {}, attr name: {}, attr value: {}",
            dn, event, attr, value
        );
        info!("Modifying record on ldap with dn: {}", dn);
        self.ldap
            .modify(dn, vec![event.into_mod(attr, value)])
            .await
            .and_then(|r| r.success())
            .map_err(|e| {
                let err = map_ldap_error("modify", e);
                if err.kind() == crate::ErrorKind::PermissionDenied {
                    error!("Insufficient access modifying {}, admin rights required", dn);
                } else {
                    error!("Problem while modifying record: {}", err);
                }
                err
            })?;
        warn!("Modifying record completed successfully!");
        Ok(())
    }

    /// Renames `dn` to `new_rdn`, optionally under a new parent.
    ///
    /// # Errors
    /// Returns error if the server rejects the move.
    pub async fn move_to_new_rdn(
        &mut self,
        dn: &str,
        new_rdn: &str,
        new_superior: Option<&str>,
        delete_old: bool,
    ) -> Result<()> {
        info!(
            "Moving {}, from {} to the branch {:?}",
            new_rdn, dn, new_superior
        );
        self.ldap
            .modifydn(dn, new_rdn, delete_old, new_superior)
            .await
            .and_then(|r| r.success())
            .map_err(|e| {
                let err = map_ldap_error("modify DN", e);
                error!("Failed to move: {}", err);
                err
            })?;
        warn!("Record moved into new branch successfully!");
        Ok(())
    }

    /// Unbinds and closes the connection.
    ///
    /// # Errors
    /// Returns error if the unbind request cannot be sent.
    pub async fn close(mut self) -> Result<()> {
        debug!("Closing the connection to {}...", self.uri);
        self.ldap
            .unbind()
            .await
            .map_err(|e| map_ldap_error("unbind", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_modify_event_parse() {
        assert_eq!(ModifyEvent::parse("ADD").unwrap(), ModifyEvent::Add);
        assert_eq!(ModifyEvent::parse("delete").unwrap(), ModifyEvent::Delete);
        assert_eq!("Replace".parse::<ModifyEvent>().unwrap(), ModifyEvent::Replace);

        let err = ModifyEvent::parse("UPSERT").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_modify_event_display_round_trips() {
        for event in [ModifyEvent::Add, ModifyEvent::Delete, ModifyEvent::Replace] {
            assert_eq!(ModifyEvent::parse(&event.to_string()).unwrap(), event);
        }
    }

    #[test]
    fn test_into_mod() {
        match ModifyEvent::Add.into_mod("cn", "Aladin") {
            Mod::Add(attr, values) => {
                assert_eq!(attr, "cn");
                assert!(values.contains("Aladin"));
            }
            _ => panic!("expected Mod::Add"),
        }
    }

    #[test]
    fn test_error_for_code() {
        assert_eq!(
            error_for_code(49, String::new()).kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            error_for_code(50, String::new()).kind(),
            ErrorKind::PermissionDenied
        );
        assert_eq!(error_for_code(32, String::new()).kind(), ErrorKind::NotFound);
        assert_eq!(error_for_code(68, String::new()).kind(), ErrorKind::Conflict);
        assert_eq!(error_for_code(1, String::new()).kind(), ErrorKind::Operation);
    }

    #[test]
    fn test_entry_rows_sorted() {
        let mut attrs = BTreeMap::new();
        attrs.insert("mail".to_string(), vec!["a@example.com".to_string()]);
        attrs.insert("cn".to_string(), vec!["Aladin".to_string()]);
        let entry = LdapEntry {
            dn: "uid=aladin-29,ou=People".to_string(),
            attrs,
        };

        let keys: Vec<&str> = entry.rows().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["cn", "mail"]);
    }

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(ldap3::ldap_escape("a*b(c)"), "a\\2ab\\28c\\29");
    }
}
