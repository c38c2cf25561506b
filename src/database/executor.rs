//! # SQL Executor
//!
//! The seam between listener logic and the database driver. Everything the
//! listener and the administrative helpers send to SQL Server goes through
//! [`SqlExecutor`], so the lifecycle can be exercised against an in-memory
//! implementation in tests.
//!
//! Implementations bind their connection target at construction. Each call is
//! independent: correctness never depends on two calls sharing a connection.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Executes T-SQL batches against one connection target
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a batch for its side effects
    ///
    /// Fails with [`ListenerError::Execution`](crate::error::ListenerError::Execution)
    /// when the batch errors or does not complete within `timeout`.
    async fn execute(&self, sql: &str, timeout: Duration) -> Result<()>;

    /// Run a batch and return the first column of the first row of its last
    /// result set, if any
    ///
    /// A `NULL` value and an empty result set both yield `None`.
    async fn query_scalar_text(&self, sql: &str, timeout: Duration) -> Result<Option<String>>;

    /// Run a batch and return the first column of every row of its last
    /// result set, skipping `NULL`s
    async fn query_column_text(&self, sql: &str, timeout: Duration) -> Result<Vec<String>>;
}
