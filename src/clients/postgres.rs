//! PostgreSQL database client.

use serde::Deserialize;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::{debug, error, info, warn};

use super::SqlRow;
use crate::error::{Error, Result};

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Prompted for when unset.
    pub password: Option<String>,
    pub database: String,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            database: "postgres".to_string(),
        }
    }
}

fn map_pg_error(e: &tokio_postgres::Error) -> Error {
    let message = e.to_string();
    match e.code() {
        Some(code)
            if *code == SqlState::INVALID_PASSWORD
                || *code == SqlState::INVALID_AUTHORIZATION_SPECIFICATION =>
        {
            Error::Authentication(message)
        }
        Some(code) if *code == SqlState::INSUFFICIENT_PRIVILEGE => Error::PermissionDenied(message),
        Some(code) if *code == SqlState::UNDEFINED_TABLE => Error::NotFound(message),
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => Error::Conflict(message),
        Some(_) => Error::Operation(message),
        None if e.is_closed() => Error::NotConnected,
        None => Error::Connection(message),
    }
}

/// Collects the data rows of a simple-query response.
fn collect_rows(messages: Vec<SimpleQueryMessage>) -> Vec<SqlRow> {
    messages
        .into_iter()
        .filter_map(|message| match message {
            SimpleQueryMessage::Row(row) => Some(
                (0..row.len())
                    .map(|i| row.get(i).map(str::to_string))
                    .collect(),
            ),
            _ => None,
        })
        .collect()
}

/// An open PostgreSQL session.
pub struct PostgresClient {
    client: Client,
    connection: tokio::task::JoinHandle<()>,
}

impl PostgresClient {
    /// Connects and spawns the connection driver on the runtime.
    ///
    /// # Errors
    /// Returns [`Error::Authentication`] for refused credentials and
    /// [`Error::Connection`] when the server cannot be reached.
    pub async fn connect(settings: &PostgresSettings) -> Result<Self> {
        info!("Trying to connect to Database...");
        let mut config = tokio_postgres::Config::new();
        config
            .host(&settings.host)
            .port(settings.port)
            .user(&settings.user)
            .dbname(&settings.database);
        if let Some(ref password) = settings.password {
            config.password(password);
        }

        let (client, connection) = config.connect(NoTls).await.map_err(|e| {
            let err = map_pg_error(&e);
            error!("Database connection failed: {}", err);
            err
        })?;
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("PostgreSQL connection closed: {}", e);
            }
        });

        info!("Connected to the Database successfully!");
        Ok(Self { client, connection })
    }

    /// Executes a statement and returns the number of affected rows.
    ///
    /// On failure the open transaction is rolled back so the session stays
    /// usable.
    ///
    /// # Errors
    /// Returns the statement error.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        info!("Executing the Query: '{}'", sql);
        match self.client.execute(sql, &[]).await {
            Ok(rows) => {
                info!("Query executed successfully!");
                Ok(rows)
            }
            Err(e) => {
                let err = map_pg_error(&e);
                error!("Query execution failed: {}", err);
                if let Err(rollback_err) = self.rollback().await {
                    warn!("Rollback after failed query also failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    /// Runs a query and returns its rows as text.
    ///
    /// # Errors
    /// Returns error if the query fails.
    pub async fn query(&self, sql: &str) -> Result<Vec<SqlRow>> {
        debug!("Fetching all rows: {}", sql);
        let messages = self.client.simple_query(sql).await.map_err(|e| {
            let err = map_pg_error(&e);
            error!("Problem while operating with DB: {}", err);
            err
        })?;
        Ok(collect_rows(messages))
    }

    /// Resets the transaction state.
    ///
    /// # Errors
    /// Returns error if the rollback cannot be sent.
    pub async fn rollback(&self) -> Result<()> {
        debug!("Resetting the connection transaction");
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| map_pg_error(&e))
    }

    /// Closes the session and waits for the driver to finish.
    pub async fn close(self) {
        debug!("Closing the connection...");
        drop(self.client);
        if let Err(e) = self.connection.await {
            warn!("PostgreSQL connection task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_rows_skips_command_complete() {
        let messages = vec![SimpleQueryMessage::CommandComplete(0)];
        assert!(collect_rows(messages).is_empty());
    }

    #[test]
    fn test_settings_default() {
        let settings = PostgresSettings::default();
        assert_eq!(settings.port, 5432);
        assert!(settings.password.is_none());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let settings = PostgresSettings {
            host: "127.0.0.1".to_string(),
            port,
            password: Some("secret".to_string()),
            ..PostgresSettings::default()
        };
        let err = PostgresClient::connect(&settings).await.err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::Connection);
    }
}
