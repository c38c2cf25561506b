//! # SQL Server connection
//!
//! [`MssqlExecutor`] implements [`SqlExecutor`] on top of tiberius. Every call
//! opens its own TDS connection, runs one batch and closes the connection, so
//! a broken connection never outlives the statement that saw it.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tiberius::{error::Error as TdsError, Client, Config, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, instrument};

use super::executor::SqlExecutor;
use crate::error::{ListenerError, Result};

type TdsClient = Client<Compat<TcpStream>>;

/// tiberius-backed executor bound to one ADO connection string
#[derive(Clone)]
pub struct MssqlExecutor {
    config: Config,
}

impl std::fmt::Debug for MssqlExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlExecutor")
            .field("addr", &self.config.get_addr())
            .finish()
    }
}

impl MssqlExecutor {
    /// Parse an ADO-style connection string such as
    /// `server=tcp:localhost,1433;user=sa;password=...;TrustServerCertificate=true`
    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        let config = Config::from_ado_string(connection_string)
            .map_err(|e| ListenerError::config(format!("Invalid connection string: {e}")))?;
        Ok(Self { config })
    }

    async fn connect(&self) -> Result<TdsClient> {
        let tcp = TcpStream::connect(self.config.get_addr()).await?;
        tcp.set_nodelay(true)?;

        match Client::connect(self.config.clone(), tcp.compat_write()).await {
            Ok(client) => Ok(client),
            // Azure SQL may redirect the login to another node
            Err(TdsError::Routing { host, port }) => {
                debug!(host = %host, port = port, "Following SQL Server routing redirect");
                let mut config = self.config.clone();
                config.host(&host);
                config.port(port);

                let tcp = TcpStream::connect(config.get_addr()).await?;
                tcp.set_nodelay(true)?;
                Ok(Client::connect(config, tcp.compat_write()).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Connect, run the batch, collect every result set and close
    async fn run_batch(&self, sql: &str) -> Result<Vec<Vec<Row>>> {
        let mut client = self.connect().await?;
        let results = client.simple_query(sql).await?.into_results().await?;
        client.close().await?;
        Ok(results)
    }

    async fn run_with_timeout(&self, sql: &str, timeout: Duration) -> Result<Vec<Vec<Row>>> {
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.run_batch(sql)).await;

        match outcome {
            Ok(result) => {
                debug!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    success = result.is_ok(),
                    "SQL batch finished"
                );
                result
            }
            Err(_) => Err(ListenerError::execution(format!(
                "Statement did not complete within {} ms",
                timeout.as_millis()
            ))),
        }
    }
}

/// Rows of the last result set that has any
fn last_rows(results: Vec<Vec<Row>>) -> Vec<Row> {
    results
        .into_iter()
        .rev()
        .find(|rows| !rows.is_empty())
        .unwrap_or_default()
}

fn first_column_text(row: &Row) -> Result<Option<String>> {
    Ok(row.try_get::<&str, usize>(0)?.map(str::to_string))
}

#[async_trait]
impl SqlExecutor for MssqlExecutor {
    #[instrument(skip(self, sql), fields(sql_len = sql.len()))]
    async fn execute(&self, sql: &str, timeout: Duration) -> Result<()> {
        self.run_with_timeout(sql, timeout).await.map(|_| ())
    }

    #[instrument(skip(self, sql), fields(sql_len = sql.len()))]
    async fn query_scalar_text(&self, sql: &str, timeout: Duration) -> Result<Option<String>> {
        let rows = last_rows(self.run_with_timeout(sql, timeout).await?);
        match rows.first() {
            Some(row) => first_column_text(row),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, sql), fields(sql_len = sql.len()))]
    async fn query_column_text(&self, sql: &str, timeout: Duration) -> Result<Vec<String>> {
        let rows = last_rows(self.run_with_timeout(sql, timeout).await?);
        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(value) = first_column_text(row)? {
                values.push(value);
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_connection_string() {
        let executor = MssqlExecutor::from_connection_string(
            "server=tcp:localhost,1433;user=sa;password=secret;TrustServerCertificate=true",
        )
        .expect("valid connection string");

        assert_eq!(executor.config.get_addr(), "localhost:1433");
        assert!(!format!("{executor:?}").contains("secret"));
    }
}
