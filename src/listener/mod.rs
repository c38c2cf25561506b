//! # Change Listener
//!
//! [`ChangeListener`] ties the pieces together: it installs the Service Broker
//! objects for its configuration, runs a background loop that polls the queue,
//! and hands every received message to a [`ChangeEventHandler`].
//!
//! ## Lifecycle
//!
//! - `start()` in automatic mode claims the identity, tears down whatever a
//!   previous run left behind, installs fresh objects and spawns the receive
//!   loop. In manual mode it only spawns the loop.
//! - `stop()` cancels the loop and waits for it to exit, then in automatic
//!   mode runs the uninstall procedure and gives the identity back.
//! - Both may be called any number of times, in any order.
//!
//! ```rust,no_run
//! use mssql_notify::config::ListenerConfig;
//! use mssql_notify::events::EventData;
//! use mssql_notify::listener::{CallbackHandler, ChangeListener};
//!
//! # async fn example() -> mssql_notify::Result<()> {
//! let config = ListenerConfig::new(
//!     "server=tcp:localhost,1433;user=sa;password=secret;TrustServerCertificate=true",
//!     "TEST_DB",
//!     "ORDERS",
//! );
//! let handler = CallbackHandler::<EventData<serde_json::Value>>::new(|event| {
//!     println!("{:?}: {}", event.data.kind(), event.message);
//! });
//!
//! let listener = ChangeListener::connect(config, handler)?;
//! listener.start().await?;
//! // ...
//! listener.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod handler;
mod receive_loop;
pub mod state;

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::config::ListenerConfig;
use crate::database::SqlExecutor;
use crate::error::{ListenerError, Result};
use crate::events::Payload;
use crate::logging::{log_database_operation, log_listener_operation};
use crate::registry::IdentityRegistry;
use crate::scripts::ScriptSynthesizer;

pub use handler::{CallbackHandler, ChangeEventHandler};
use receive_loop::{ReceiveLoop, ReceiveTask};
pub use state::{ListenerState, ListenerStats};

/// Listener delivering raw message text
pub type RawChangeListener = ChangeListener<String>;

/// Listens for changes on one table and delivers them to a handler
pub struct ChangeListener<T: Payload> {
    config: Arc<ListenerConfig>,
    executor: Arc<dyn SqlExecutor>,
    registry: IdentityRegistry,
    handler: Arc<dyn ChangeEventHandler<T>>,
    state: Arc<RwLock<ListenerState>>,
    stats: Arc<RwLock<ListenerStats>>,
    task: tokio::sync::Mutex<Option<ReceiveTask>>,
    holds_identity: AtomicBool,
}

impl<T: Payload> std::fmt::Debug for ChangeListener<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeListener")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("holds_identity", &self.holds_identity.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<T: Payload> ChangeListener<T> {
    /// Create a listener over an executor, using the process-wide registry
    pub fn new<H>(config: ListenerConfig, executor: Arc<dyn SqlExecutor>, handler: H) -> Result<Self>
    where
        H: ChangeEventHandler<T> + 'static,
    {
        config.validate()?;

        Ok(Self {
            config: Arc::new(config),
            executor,
            registry: IdentityRegistry::global(),
            handler: Arc::new(handler),
            state: Arc::new(RwLock::new(ListenerState::Idle)),
            stats: Arc::new(RwLock::new(ListenerStats::default())),
            task: tokio::sync::Mutex::new(None),
            holds_identity: AtomicBool::new(false),
        })
    }

    /// Create a listener talking to SQL Server through the configured
    /// connection string
    #[cfg(feature = "mssql")]
    pub fn connect<H>(config: ListenerConfig, handler: H) -> Result<Self>
    where
        H: ChangeEventHandler<T> + 'static,
    {
        let executor =
            crate::database::MssqlExecutor::from_connection_string(&config.connection_string)?;
        Self::new(config, Arc::new(executor), handler)
    }

    /// Use `registry` instead of the process-wide one
    pub fn with_registry(mut self, registry: IdentityRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn identity(&self) -> i32 {
        self.config.identity
    }

    pub fn state(&self) -> ListenerState {
        *self.state.read()
    }

    /// True only while the receive loop is polling
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Get listener statistics
    pub fn stats(&self) -> ListenerStats {
        self.stats.read().clone()
    }

    /// Install (automatic mode) and start the receive loop
    ///
    /// Returns once the loop is spawned. Fails with
    /// [`ListenerError::DuplicateListener`] when another listener in this
    /// process holds the identity and with [`ListenerError::Installation`]
    /// when a DDL step fails; the identity is released in that case.
    #[instrument(skip(self), fields(identity = self.config.identity, table = %self.config.table_name))]
    pub async fn start(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        let automatic = !self.config.manual_configuration;

        if automatic && !self.holds_identity.load(Ordering::SeqCst) {
            self.registry.try_acquire(self.config.identity)?;
            self.holds_identity.store(true, Ordering::SeqCst);
        }

        if let Some(previous) = task.take() {
            info!("Stopping previous receive loop before restart");
            previous.shutdown().await;
        }

        let scripts = ScriptSynthesizer::new(&self.config);
        let poll_sql = match scripts.poll_query(self.config.poll_wait_ms()) {
            Ok(sql) => sql,
            Err(e) => {
                self.release_identity();
                return Err(e);
            }
        };

        if automatic {
            *self.state.write() = ListenerState::Installing;
            if let Err(e) = self.install(&scripts).await {
                self.release_identity();
                *self.state.write() = ListenerState::Idle;
                log_listener_operation(
                    "start",
                    self.config.identity,
                    &self.config.table_name,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }

        *task = Some(
            ReceiveLoop {
                executor: Arc::clone(&self.executor),
                handler: Arc::clone(&self.handler),
                state: Arc::clone(&self.state),
                stats: Arc::clone(&self.stats),
                poll_sql,
                command_timeout: self.config.command_timeout(),
                identity: self.config.identity,
            }
            .spawn(),
        );

        log_listener_operation(
            "start",
            self.config.identity,
            &self.config.table_name,
            "started",
            Some(if automatic { "automatic" } else { "manual" }),
        );
        Ok(())
    }

    /// Stop the receive loop and, in automatic mode, uninstall
    ///
    /// Waits until the loop has exited, so no event is delivered after this
    /// returns. The identity held by this listener is released even when the
    /// uninstall fails.
    #[instrument(skip(self), fields(identity = self.config.identity, table = %self.config.table_name))]
    pub async fn stop(&self) -> Result<()> {
        let mut task = self.task.lock().await;

        if let Some(running) = task.take() {
            running.shutdown().await;
        }

        if self.config.manual_configuration {
            *self.state.write() = ListenerState::Idle;
            return Ok(());
        }

        if !self.holds_identity.load(Ordering::SeqCst)
            && self.registry.is_active(self.config.identity)
        {
            warn!("Identity is held by another listener; leaving its objects installed");
            *self.state.write() = ListenerState::Idle;
            return Ok(());
        }

        *self.state.write() = ListenerState::Stopping;
        let scripts = ScriptSynthesizer::new(&self.config);
        let result = match scripts.execute_uninstall() {
            Ok(sql) => self.run_phase("execute_uninstall_procedure", &sql).await,
            Err(e) => Err(e),
        };

        self.release_identity();
        *self.state.write() = ListenerState::Idle;

        log_listener_operation(
            "stop",
            self.config.identity,
            &self.config.table_name,
            if result.is_ok() { "stopped" } else { "failed" },
            result.as_ref().err().map(|e| e.to_string()).as_deref(),
        );
        result
    }

    /// Teardown of stale objects, then a fresh install
    async fn install(&self, scripts: &ScriptSynthesizer<'_>) -> Result<()> {
        self.run_phase("teardown", &scripts.execute_uninstall()?).await?;
        self.run_phase("create_install_procedure", &scripts.install_procedure()?)
            .await?;
        self.run_phase(
            "create_uninstall_procedure",
            &scripts.uninstall_procedure()?,
        )
        .await?;
        self.run_phase("execute_install_procedure", &scripts.execute_install()?)
            .await
    }

    async fn run_phase(&self, phase: &str, sql: &str) -> Result<()> {
        let started = Instant::now();
        let result = self
            .executor
            .execute(sql, self.config.command_timeout())
            .await
            .map_err(|e| ListenerError::installation(phase, e));
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => log_database_operation(
                phase,
                Some(&self.config.database_name),
                "completed",
                Some(duration_ms),
                None,
            ),
            Err(e) => log_database_operation(
                phase,
                Some(&self.config.database_name),
                "failed",
                Some(duration_ms),
                Some(&e.to_string()),
            ),
        }
        result
    }

    fn release_identity(&self) {
        if self.holds_identity.swap(false, Ordering::SeqCst) {
            self.registry.release(self.config.identity);
        }
    }
}

impl<T: Payload> Drop for ChangeListener<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel();
        }
        self.release_identity();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedExecutor;

    fn listener(executor: &ScriptedExecutor, config: ListenerConfig) -> RawChangeListener {
        ChangeListener::new(
            config,
            Arc::new(executor.clone()),
            CallbackHandler::<String>::new(|_| {}),
        )
        .unwrap()
        .with_registry(IdentityRegistry::new())
    }

    fn config() -> ListenerConfig {
        ListenerConfig::new("server=tcp:localhost,1433", "TEST_DB", "TEST_TABLE")
            .with_command_timeout_ms(200)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let executor = ScriptedExecutor::new();
        let result = ChangeListener::<String>::new(
            config().with_identity(-3),
            Arc::new(executor),
            CallbackHandler::<String>::new(|_| {}),
        );
        assert!(matches!(result, Err(ListenerError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_install_sequence_order() {
        let executor = ScriptedExecutor::new();
        let listener = listener(&executor, config());

        listener.start().await.unwrap();
        listener.stop().await.unwrap();

        let executed = executor.executed();
        assert!(executed[0].contains("EXEC [dbo].[SP_UNINSTALL_LISTENER_1]"));
        assert!(executed[1].contains("PROCEDURE [dbo].[SP_INSTALL_LISTENER_1]"));
        assert!(executed[2].contains("PROCEDURE [dbo].[SP_UNINSTALL_LISTENER_1]"));
        assert!(executed[3].contains("EXEC [dbo].[SP_INSTALL_LISTENER_1]"));
        assert!(executed
            .last()
            .unwrap()
            .contains("EXEC [dbo].[SP_UNINSTALL_LISTENER_1]"));
    }

    #[tokio::test]
    async fn test_failed_install_releases_identity() {
        let executor = ScriptedExecutor::new();
        executor.fail_statements_containing("EXEC [dbo].[SP_INSTALL_LISTENER_1]");
        let registry = IdentityRegistry::new();
        let listener = listener(&executor, config()).with_registry(registry.clone());

        let err = listener.start().await.unwrap_err();
        match err {
            ListenerError::Installation { phase, .. } => {
                assert_eq!(phase, "execute_install_procedure")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!registry.is_active(1));
        assert_eq!(listener.state(), ListenerState::Idle);
    }

    #[tokio::test]
    async fn test_drop_releases_identity() {
        let executor = ScriptedExecutor::new();
        let registry = IdentityRegistry::new();
        {
            let listener = listener(&executor, config()).with_registry(registry.clone());
            listener.start().await.unwrap();
            assert!(registry.is_active(1));
        }
        assert!(!registry.is_active(1));
    }
}
