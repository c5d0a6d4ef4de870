//! Connection wrappers around vendor client libraries.
//!
//! Each wrapper adds logging and error translation to a handful of
//! pass-through operations. Nothing here speaks a wire protocol itself.

pub mod docstore;
pub mod ldap;
pub mod mysql;
pub mod ocp;
pub mod postgres;
pub mod sftp;

pub use docstore::{DocId, DocStore, DocStoreSettings, Document};
pub use ldap::{LdapClient, LdapEntry, LdapSettings, ModifyEvent};
pub use mysql::{MySqlClient, MySqlSettings, PatternSearch, SearchType};
pub use ocp::{CronJobCreation, ObjectSummary, OcpAuth, OcpClient, OcpSettings, PodCreation};
pub use postgres::{PostgresClient, PostgresSettings};
pub use sftp::{RemoteDirEntry, SftpClient, SftpSettings};

/// A result row rendered as text, `None` for SQL `NULL`.
pub type SqlRow = Vec<Option<String>>;
