//! MySQL database client.
//!
//! Sessions are opened with autocommit off unless configured otherwise, so
//! writes stay pending until [`MySqlClient::commit`] or a committing close.

use std::path::PathBuf;

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Params, Row, SslOpts, Value};
use serde::Deserialize;
use tracing::{debug, error, info};

use super::SqlRow;
use crate::error::{Error, Result};

/// ER_DBACCESS_DENIED_ERROR
const ER_DBACCESS_DENIED: u16 = 1044;
/// ER_ACCESS_DENIED_ERROR
const ER_ACCESS_DENIED: u16 = 1045;
/// ER_TABLEACCESS_DENIED_ERROR
const ER_TABLEACCESS_DENIED: u16 = 1142;
/// ER_NO_SUCH_TABLE
const ER_NO_SUCH_TABLE: u16 = 1146;
/// ER_DUP_ENTRY
const ER_DUP_ENTRY: u16 = 1062;

/// MySQL connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MySqlSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Prompted for when unset.
    pub password: Option<String>,
    pub database: String,
    /// CA bundle enabling TLS.
    pub ssl_ca: Option<PathBuf>,
    /// Skip server certificate validation.
    pub accept_invalid_certs: bool,
    pub autocommit: bool,
}

impl Default for MySqlSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "user".to_string(),
            password: None,
            database: "db".to_string(),
            ssl_ca: None,
            accept_invalid_certs: false,
            autocommit: false,
        }
    }
}

/// How [`PatternSearch`] compares the column to the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchType {
    /// Case-insensitive `LIKE`.
    Like,
    /// Membership in a comma-separated list.
    In,
    /// Case-insensitive equality.
    Exact,
}

impl SearchType {
    /// Parses `like` or `in`; any other name selects [`SearchType::Exact`].
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "like" => Self::Like,
            "in" => Self::In,
            _ => Self::Exact,
        }
    }
}

/// Builds a `SELECT *` filtered on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSearch {
    table: String,
    column: String,
}

/// Checks a table or column name before it is spliced into SQL.
fn check_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid SQL identifier: {:?}", name)))
    }
}

/// Splits `'Italy', 'France'` into its unquoted items.
fn split_values(pattern: &str) -> Vec<String> {
    pattern
        .split(',')
        .map(|item| item.trim().trim_matches(|c| c == '\'' || c == '"').to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

impl PatternSearch {
    /// Creates a search over `table.column`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if either name is not a plain identifier.
    pub fn new(table: &str, column: &str) -> Result<Self> {
        check_identifier(table)?;
        check_identifier(column)?;
        Ok(Self {
            table: table.to_string(),
            column: column.to_string(),
        })
    }

    /// Returns the statement and its positional parameters.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for an `In` search without values.
    pub fn build(&self, pattern: &str, search_type: SearchType) -> Result<(String, Vec<String>)> {
        let base = format!("select * from {} where", self.table);
        match search_type {
            SearchType::Like => Ok((
                format!("{} lower({}) like lower(?)", base, self.column),
                vec![pattern.to_string()],
            )),
            SearchType::In => {
                let values = split_values(pattern);
                if values.is_empty() {
                    return Err(Error::InvalidInput(
                        "an IN search needs at least one value".to_string(),
                    ));
                }
                let placeholders = vec!["?"; values.len()].join(",");
                Ok((
                    format!("{} {} in ({})", base, self.column, placeholders),
                    values,
                ))
            }
            SearchType::Exact => Ok((
                format!("{} lower({}) = lower(?)", base, self.column),
                vec![pattern.to_string()],
            )),
        }
    }
}

/// Renders a MySQL value as text, `None` for `NULL`.
#[must_use]
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Int(i) => Some(i.to_string()),
        Value::UInt(u) => Some(u.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Double(d) => Some(d.to_string()),
        Value::Date(y, mo, d, h, mi, s, us) => Some(if *us > 0 {
            format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
                y, mo, d, h, mi, s, us
            )
        } else {
            format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, mo, d, h, mi, s)
        }),
        Value::Time(negative, days, h, mi, s, us) => {
            let sign = if *negative { "-" } else { "" };
            let hours = u32::from(*h) + days * 24;
            Some(if *us > 0 {
                format!("{}{:02}:{:02}:{:02}.{:06}", sign, hours, mi, s, us)
            } else {
                format!("{}{:02}:{:02}:{:02}", sign, hours, mi, s)
            })
        }
    }
}

fn row_to_text(row: &Row) -> SqlRow {
    (0..row.len())
        .map(|i| row.as_ref(i).and_then(value_to_text))
        .collect()
}

fn to_params(params: &[String]) -> Params {
    if params.is_empty() {
        Params::Empty
    } else {
        Params::Positional(params.iter().map(|p| Value::from(p.as_str())).collect())
    }
}

fn map_mysql_error(e: mysql_async::Error) -> Error {
    match e {
        mysql_async::Error::Server(ref server) => {
            let message = format!("({}) {}", server.code, server.message);
            match server.code {
                ER_ACCESS_DENIED => Error::Authentication(message),
                ER_DBACCESS_DENIED | ER_TABLEACCESS_DENIED => Error::PermissionDenied(message),
                ER_NO_SUCH_TABLE => Error::NotFound(message),
                ER_DUP_ENTRY => Error::Conflict(message),
                _ => Error::Operation(message),
            }
        }
        mysql_async::Error::Io(e) => Error::Connection(e.to_string()),
        mysql_async::Error::Url(e) => Error::InvalidInput(e.to_string()),
        other => Error::Operation(other.to_string()),
    }
}

/// An open MySQL session.
pub struct MySqlClient {
    conn: Conn,
}

impl MySqlClient {
    /// Connects with the given settings.
    ///
    /// # Errors
    /// Returns [`Error::Authentication`] for refused credentials and
    /// [`Error::Connection`] when the server cannot be reached.
    pub async fn connect(settings: &MySqlSettings) -> Result<Self> {
        info!("Connecting to the Database...");
        debug!(
            "Connecting to {}:{}/{} as {}",
            settings.host, settings.port, settings.database, settings.user
        );

        let ssl_opts = settings.ssl_ca.as_ref().map(|ca| {
            SslOpts::default()
                .with_root_certs(vec![ca.clone().into()])
                .with_danger_accept_invalid_certs(settings.accept_invalid_certs)
        });
        let opts = OptsBuilder::default()
            .ip_or_hostname(settings.host.clone())
            .tcp_port(settings.port)
            .user(Some(settings.user.clone()))
            .pass(settings.password.clone())
            .db_name(Some(settings.database.clone()))
            .ssl_opts(ssl_opts);

        let mut conn = Conn::new(opts).await.map_err(|e| {
            let err = map_mysql_error(e);
            error!("Database connection failed: {}", err);
            err
        })?;

        if !settings.autocommit {
            conn.query_drop("SET autocommit=0")
                .await
                .map_err(map_mysql_error)?;
        }

        info!("Connected to the Database successfully!");
        Ok(Self { conn })
    }

    /// Executes a statement and returns the number of affected rows.
    ///
    /// # Errors
    /// Returns error if the statement fails.
    pub async fn execute(&mut self, sql: &str, params: &[String]) -> Result<u64> {
        info!("Executing the Query...");
        debug!("Query Statement: {}, params: {:?}", sql, params);
        self.conn
            .exec_drop(sql, to_params(params))
            .await
            .map_err(|e| {
                let err = map_mysql_error(e);
                error!("Query execution failed: {}", err);
                err
            })?;
        info!("Query executed successfully!");
        Ok(self.conn.affected_rows())
    }

    /// Runs a query and returns every row.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub async fn query(&mut self, sql: &str, params: &[String]) -> Result<Vec<SqlRow>> {
        info!("Executing the Query...");
        debug!("Query Statement: {}, params: {:?}", sql, params);
        let rows: Vec<Row> = self.conn.exec(sql, to_params(params)).await.map_err(|e| {
            let err = map_mysql_error(e);
            error!("Query execution failed: {}", err);
            err
        })?;
        debug!("Fetched {} rows", rows.len());
        Ok(rows.iter().map(row_to_text).collect())
    }

    /// Runs a query and returns only the first row.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub async fn query_first(&mut self, sql: &str, params: &[String]) -> Result<Option<SqlRow>> {
        debug!("Fetching only one row: {}", sql);
        let row: Option<Row> = self
            .conn
            .exec_first(sql, to_params(params))
            .await
            .map_err(|e| {
                let err = map_mysql_error(e);
                error!("Query execution failed: {}", err);
                err
            })?;
        Ok(row.as_ref().map(row_to_text))
    }

    /// Runs a [`PatternSearch`].
    ///
    /// # Errors
    /// Returns error if the pattern is invalid or the query fails.
    pub async fn search_by_pattern(
        &mut self,
        search: &PatternSearch,
        pattern: &str,
        search_type: SearchType,
    ) -> Result<Vec<SqlRow>> {
        let (sql, params) = search.build(pattern, search_type)?;
        self.query(&sql, &params).await
    }

    /// Commits the open transaction.
    ///
    /// # Errors
    /// Returns error if the commit fails.
    pub async fn commit(&mut self) -> Result<()> {
        debug!("Committing transaction");
        self.conn.query_drop("COMMIT").await.map_err(map_mysql_error)
    }

    /// Rolls back the open transaction.
    ///
    /// # Errors
    /// Returns error if the rollback fails.
    pub async fn rollback(&mut self) -> Result<()> {
        debug!("Rolling back transaction");
        self.conn.query_drop("ROLLBACK").await.map_err(map_mysql_error)
    }

    /// Optionally commits, then disconnects.
    ///
    /// # Errors
    /// Returns error if the commit or disconnect fails.
    pub async fn close(mut self, commit: bool) -> Result<()> {
        debug!("Closing the connection");
        if commit {
            self.commit().await?;
        }
        self.conn.disconnect().await.map_err(map_mysql_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use pretty_assertions::assert_eq;

    fn users() -> PatternSearch {
        PatternSearch::new("db.users", "country").unwrap()
    }

    #[test]
    fn test_like_search() {
        let (sql, params) = users().build("%ita%", SearchType::Like).unwrap();
        assert_eq!(sql, "select * from db.users where lower(country) like lower(?)");
        assert_eq!(params, vec!["%ita%".to_string()]);
    }

    #[test]
    fn test_in_search_one_placeholder_per_value() {
        let (sql, params) = users().build("'Italy', 'France'", SearchType::In).unwrap();
        assert_eq!(sql, "select * from db.users where country in (?,?)");
        assert_eq!(params, vec!["Italy".to_string(), "France".to_string()]);
    }

    #[test]
    fn test_in_search_without_values() {
        let err = users().build(" , ", SearchType::In).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_exact_is_default_search() {
        assert_eq!(SearchType::parse("like"), SearchType::Like);
        assert_eq!(SearchType::parse("IN"), SearchType::In);
        assert_eq!(SearchType::parse("anything"), SearchType::Exact);

        let (sql, _) = users().build("Italy", SearchType::Exact).unwrap();
        assert_eq!(sql, "select * from db.users where lower(country) = lower(?)");
    }

    #[test]
    fn test_identifier_rejected() {
        let err = PatternSearch::new("users; drop table x", "country").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&Value::NULL), None);
        assert_eq!(value_to_text(&Value::Int(-3)), Some("-3".to_string()));
        assert_eq!(
            value_to_text(&Value::Bytes(b"Italy".to_vec())),
            Some("Italy".to_string())
        );
        assert_eq!(
            value_to_text(&Value::Date(2024, 1, 5, 9, 3, 0, 0)),
            Some("2024-01-05 09:03:00".to_string())
        );
        assert_eq!(
            value_to_text(&Value::Time(true, 1, 2, 0, 5, 0)),
            Some("-26:00:05".to_string())
        );
    }

    #[test]
    fn test_params_empty() {
        assert!(matches!(to_params(&[]), Params::Empty));
        assert!(matches!(to_params(&["a".to_string()]), Params::Positional(ref v) if v.len() == 1));
    }
}
