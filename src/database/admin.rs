//! # Administrative helpers
//!
//! Operational tooling that sits outside the receive loop: discovering which
//! listener identities have objects installed in a database, and forcibly
//! removing every listener procedure after hosts died without stopping their
//! listeners.

use std::time::{Duration, Instant};
use tracing::{debug, instrument};

use super::executor::SqlExecutor;
use crate::error::Result;
use crate::logging::log_database_operation;
use crate::scripts::{forced_cleanup_script, list_identities_query};

/// Identities whose service name starts with `prefix` in `database`
///
/// Names whose remainder is not an integer are skipped. The result is sorted.
#[instrument(skip(executor, timeout))]
pub async fn list_active_identities(
    executor: &dyn SqlExecutor,
    database: &str,
    prefix: &str,
    timeout: Duration,
) -> Result<Vec<i32>> {
    let sql = list_identities_query(database, prefix)?;
    let suffixes = executor.query_column_text(&sql, timeout).await?;

    let mut identities: Vec<i32> = suffixes
        .iter()
        .filter_map(|suffix| match suffix.trim().parse::<i32>() {
            Ok(identity) => Some(identity),
            Err(_) => {
                debug!(suffix = %suffix, "Skipping service with non-numeric suffix");
                None
            }
        })
        .collect();
    identities.sort_unstable();

    Ok(identities)
}

/// Execute and drop every procedure matching `uninstall_prefix`, then drop
/// every procedure matching `install_prefix`
#[instrument(skip(executor, timeout))]
pub async fn clean_database(
    executor: &dyn SqlExecutor,
    database: &str,
    uninstall_prefix: &str,
    install_prefix: &str,
    timeout: Duration,
) -> Result<()> {
    let sql = forced_cleanup_script(database, uninstall_prefix, install_prefix)?;
    let started = Instant::now();
    let result = executor.execute(&sql, timeout).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match &result {
        Ok(()) => log_database_operation(
            "clean_database",
            Some(database),
            "completed",
            Some(duration_ms),
            None,
        ),
        Err(e) => log_database_operation(
            "clean_database",
            Some(database),
            "failed",
            Some(duration_ms),
            Some(&e.to_string()),
        ),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{INSTALL_PROCEDURE_PREFIX, SERVICE_PREFIX, UNINSTALL_PROCEDURE_PREFIX};
    use crate::error::ListenerError;
    use crate::test_helpers::ScriptedExecutor;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_list_active_identities_parses_and_sorts() {
        let executor = ScriptedExecutor::new();
        executor.set_column_values(vec![
            "12".to_string(),
            "3".to_string(),
            "ORDERS".to_string(),
            " 7 ".to_string(),
        ]);

        let identities = list_active_identities(&executor, "TEST_DB", SERVICE_PREFIX, TIMEOUT)
            .await
            .unwrap();

        assert_eq!(identities, vec![3, 7, 12]);
        let statements = executor.statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("LIKE 'LISTENER[_]SERVICE[_]%'"));
    }

    #[tokio::test]
    async fn test_list_active_identities_empty() {
        let executor = ScriptedExecutor::new();
        let identities = list_active_identities(&executor, "TEST_DB", SERVICE_PREFIX, TIMEOUT)
            .await
            .unwrap();
        assert!(identities.is_empty());
    }

    #[tokio::test]
    async fn test_clean_database_runs_cleanup_script() {
        let executor = ScriptedExecutor::new();
        clean_database(
            &executor,
            "TEST_DB",
            UNINSTALL_PROCEDURE_PREFIX,
            INSTALL_PROCEDURE_PREFIX,
            TIMEOUT,
        )
        .await
        .unwrap();

        let statements = executor.statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("LIKE 'SP[_]UNINSTALL[_]LISTENER[_]%'"));
    }

    #[tokio::test]
    async fn test_clean_database_propagates_execution_errors() {
        let executor = ScriptedExecutor::new();
        executor.fail_statements_containing("DEALLOCATE procedures");

        let err = clean_database(
            &executor,
            "TEST_DB",
            UNINSTALL_PROCEDURE_PREFIX,
            INSTALL_PROCEDURE_PREFIX,
            TIMEOUT,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ListenerError::Execution { .. }));
    }
}
