#![allow(clippy::doc_markdown)] // Allow technical terms like SQL Server, Service Broker in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # mssql-notify
//!
//! Near-real-time change notifications for SQL Server tables.
//!
//! ## Overview
//!
//! A listener installs a row-level trigger on the watched table. Every
//! statement that changes rows sends one JSON message describing the change
//! (`event_type`, `inserted`, `deleted`) through a Service Broker dialog to a
//! queue owned by the listener. A background loop waits on that queue with
//! `WAITFOR (RECEIVE ...)` and hands each message to a subscriber.
//!
//! ## Module Organization
//!
//! - [`config`] - Listener configuration, naming policy and loading
//! - [`scripts`] - T-SQL generation for install, uninstall and polling
//! - [`database`] - The [`SqlExecutor`] seam, the tiberius executor and admin helpers
//! - [`registry`] - Process-wide identity registry
//! - [`events`] - Payload decoding and change events
//! - [`listener`] - Listener lifecycle and receive loop
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mssql_notify::{CallbackHandler, EventData, ListenerConfig, NotificationTypes, ChangeListener};
//!
//! # async fn example() -> mssql_notify::Result<()> {
//! mssql_notify::logging::init_structured_logging();
//!
//! let config = ListenerConfig::new(
//!     "server=tcp:localhost,1433;user=sa;password=secret;TrustServerCertificate=true",
//!     "TEST_DB",
//!     "ORDERS",
//! )
//! .with_listener_type(NotificationTypes::INSERT | NotificationTypes::UPDATE)
//! .with_identity(7);
//!
//! let handler = CallbackHandler::<EventData<serde_json::Value>>::new(|event| {
//!     for row in event.data.inserted_rows() {
//!         println!("{}: {row}", event.data.event_type);
//!     }
//! })
//! .on_stopped(|| eprintln!("listener stopped"));
//!
//! let listener = ChangeListener::connect(config, handler)?;
//! listener.start().await?;
//! tokio::signal::ctrl_c().await?;
//! listener.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # All tests; SQL Server suites need MSSQL_NOTIFY_TEST_CONNECTION
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod listener;
pub mod logging;
pub mod registry;
pub mod scripts;
pub mod test_helpers;

pub use config::{load_listener_config, ChangeKind, ListenerConfig, NotificationTypes};
#[cfg(feature = "mssql")]
pub use database::MssqlExecutor;
pub use database::{clean_database, list_active_identities, SqlExecutor};
pub use error::{ListenerError, Result};
pub use events::{ChangeEvent, EventData, Json, Payload};
pub use listener::{
    CallbackHandler, ChangeEventHandler, ChangeListener, ListenerState, ListenerStats,
    RawChangeListener,
};
pub use registry::IdentityRegistry;
pub use scripts::{
    render_install_procedure, render_poll_query, render_uninstall_procedure, ScriptSynthesizer,
};
