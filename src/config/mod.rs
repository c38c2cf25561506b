//! # Listener configuration
//!
//! [`ListenerConfig`] describes one subscription: where the database is, which
//! table to watch, which kinds of change fire the trigger, and how the Service
//! Broker objects backing the subscription are named.
//!
//! In automatic mode every object name left unset is derived from the
//! listener identity (`LISTENER_QUEUE_1`, `TR_LISTENER_1`, ...), so listeners
//! with different identities never collide inside one database. In manual mode
//! the caller owns the queue; only the queue name and queue schema are used.
//!
//! ```rust
//! use mssql_notify::config::{ListenerConfig, NotificationTypes};
//!
//! let config = ListenerConfig::new(
//!     "server=tcp:localhost,1433;user=sa;password=secret;TrustServerCertificate=true",
//!     "TEST_DB",
//!     "TEST_TABLE",
//! )
//! .with_listener_type(NotificationTypes::INSERT | NotificationTypes::DELETE)
//! .with_identity(3);
//!
//! assert_eq!(config.queue_name(), "LISTENER_QUEUE_3");
//! assert_eq!(config.trigger_name(), "TR_LISTENER_3");
//! assert_eq!(config.poll_wait_ms(), 30_000);
//! assert!(config.validate().is_ok());
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::time::Duration;

use crate::error::{ListenerError, Result};

pub use loader::load_listener_config;

/// Prefix of derived queue names
pub const QUEUE_PREFIX: &str = "LISTENER_QUEUE_";
/// Prefix of derived service names
pub const SERVICE_PREFIX: &str = "LISTENER_SERVICE_";
/// Prefix of derived trigger names
pub const TRIGGER_PREFIX: &str = "TR_LISTENER_";
/// Prefix of derived install procedure names
pub const INSTALL_PROCEDURE_PREFIX: &str = "SP_INSTALL_LISTENER_";
/// Prefix of derived uninstall procedure names
pub const UNINSTALL_PROCEDURE_PREFIX: &str = "SP_UNINSTALL_LISTENER_";

pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_SCHEMA: &str = "dbo";
pub const DEFAULT_IDENTITY: i32 = 1;

/// One kind of row change a trigger can fire on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// All kinds, in trigger clause order
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete];

    /// Value carried in the `event_type` field of notification messages
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }

    /// Keyword used in the `FOR ...` clause of a trigger
    pub fn trigger_keyword(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }

    fn bit(&self) -> u8 {
        match self {
            ChangeKind::Insert => NotificationTypes::INSERT.0,
            ChangeKind::Update => NotificationTypes::UPDATE.0,
            ChangeKind::Delete => NotificationTypes::DELETE.0,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChangeKind {
    type Err = ListenerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(ChangeKind::Insert),
            "update" => Ok(ChangeKind::Update),
            "delete" => Ok(ChangeKind::Delete),
            other => Err(ListenerError::config(format!(
                "Unknown notification type: {other}"
            ))),
        }
    }
}

/// Set of change kinds a listener subscribes to
///
/// Bits are independent; an empty set is allowed in configuration and is
/// treated as `INSERT` when the trigger is rendered.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ChangeKind>", into = "Vec<ChangeKind>")]
pub struct NotificationTypes(u8);

impl NotificationTypes {
    pub const NONE: NotificationTypes = NotificationTypes(0);
    pub const INSERT: NotificationTypes = NotificationTypes(1 << 1);
    pub const UPDATE: NotificationTypes = NotificationTypes(1 << 2);
    pub const DELETE: NotificationTypes = NotificationTypes(1 << 3);
    pub const ALL: NotificationTypes = NotificationTypes((1 << 1) | (1 << 2) | (1 << 3));

    /// Raw bit representation
    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 & Self::ALL.0 == 0
    }

    pub fn contains(&self, kind: ChangeKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Kinds present in the set, in trigger clause order
    pub fn kinds(&self) -> Vec<ChangeKind> {
        ChangeKind::ALL
            .into_iter()
            .filter(|kind| self.contains(*kind))
            .collect()
    }
}

impl BitOr for NotificationTypes {
    type Output = NotificationTypes;

    fn bitor(self, rhs: Self) -> Self::Output {
        NotificationTypes(self.0 | rhs.0)
    }
}

impl BitOrAssign for NotificationTypes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<ChangeKind> for NotificationTypes {
    fn from(kind: ChangeKind) -> Self {
        NotificationTypes(kind.bit())
    }
}

impl From<Vec<ChangeKind>> for NotificationTypes {
    fn from(kinds: Vec<ChangeKind>) -> Self {
        kinds
            .into_iter()
            .fold(NotificationTypes::NONE, |acc, kind| acc | kind.into())
    }
}

impl From<NotificationTypes> for Vec<ChangeKind> {
    fn from(types: NotificationTypes) -> Self {
        types.kinds()
    }
}

impl fmt::Debug for NotificationTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.kinds()).finish()
    }
}

/// Configuration for a single change listener
///
/// Defaults follow the documented surface: 60 s command timeout, automatic
/// mode, all notification kinds, identity 1, broker auto-enable off and
/// `dbo` for both the table schema and the queue schema.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerConfig {
    /// ADO-style connection string used for every statement
    pub connection_string: String,

    /// Database holding the watched table
    pub database_name: String,

    /// Schema of the watched table (also hosts the trigger and procedures)
    #[serde(default = "default_schema")]
    pub schema_name: String,

    /// Watched table
    pub table_name: String,

    /// Command timeout in milliseconds; the receive wait is half of it
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// When true the caller manages queue/service/trigger; only polling happens
    #[serde(default)]
    pub manual_configuration: bool,

    /// Schema hosting the queue
    #[serde(default = "default_schema")]
    pub queue_schema_name: String,

    #[serde(default)]
    pub queue_name: Option<String>,

    /// Change kinds that fire the trigger
    #[serde(default = "default_listener_type")]
    pub listener_type: NotificationTypes,

    /// Deduplication key for automatic mode and suffix of derived names
    #[serde(default = "default_identity")]
    pub identity: i32,

    /// Enable Service Broker on the database during install when it is off
    #[serde(default)]
    pub auto_enable_broker: bool,

    #[serde(default)]
    pub service_name: Option<String>,

    #[serde(default)]
    pub trigger_name: Option<String>,

    #[serde(default)]
    pub install_procedure_name: Option<String>,

    #[serde(default)]
    pub uninstall_procedure_name: Option<String>,
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

fn default_command_timeout_ms() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_MS
}

fn default_listener_type() -> NotificationTypes {
    NotificationTypes::ALL
}

fn default_identity() -> i32 {
    DEFAULT_IDENTITY
}

impl fmt::Debug for ListenerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerConfig")
            .field("connection_string", &"[MASKED]")
            .field("database_name", &self.database_name)
            .field("schema_name", &self.schema_name)
            .field("table_name", &self.table_name)
            .field("command_timeout_ms", &self.command_timeout_ms)
            .field("manual_configuration", &self.manual_configuration)
            .field("queue_schema_name", &self.queue_schema_name)
            .field("queue_name", &self.queue_name())
            .field("listener_type", &self.listener_type)
            .field("identity", &self.identity)
            .field("auto_enable_broker", &self.auto_enable_broker)
            .finish_non_exhaustive()
    }
}

impl ListenerConfig {
    /// Create a configuration with defaults for everything but the target
    pub fn new<C, D, T>(connection_string: C, database_name: D, table_name: T) -> Self
    where
        C: Into<String>,
        D: Into<String>,
        T: Into<String>,
    {
        Self {
            connection_string: connection_string.into(),
            database_name: database_name.into(),
            schema_name: default_schema(),
            table_name: table_name.into(),
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            manual_configuration: false,
            queue_schema_name: default_schema(),
            queue_name: None,
            listener_type: NotificationTypes::ALL,
            identity: DEFAULT_IDENTITY,
            auto_enable_broker: false,
            service_name: None,
            trigger_name: None,
            install_procedure_name: None,
            uninstall_procedure_name: None,
        }
    }

    pub fn with_schema<S: Into<String>>(mut self, schema: S) -> Self {
        self.schema_name = schema.into();
        self
    }

    pub fn with_command_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.command_timeout_ms = timeout_ms;
        self
    }

    /// Switch between manual (caller-managed objects) and automatic mode
    pub fn with_manual_configuration(mut self, manual: bool) -> Self {
        self.manual_configuration = manual;
        self
    }

    pub fn with_queue_schema<S: Into<String>>(mut self, schema: S) -> Self {
        self.queue_schema_name = schema.into();
        self
    }

    pub fn with_queue_name<S: Into<String>>(mut self, name: S) -> Self {
        self.queue_name = Some(name.into());
        self
    }

    pub fn with_listener_type(mut self, types: NotificationTypes) -> Self {
        self.listener_type = types;
        self
    }

    pub fn with_identity(mut self, identity: i32) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_auto_enable_broker(mut self, enabled: bool) -> Self {
        self.auto_enable_broker = enabled;
        self
    }

    pub fn with_service_name<S: Into<String>>(mut self, name: S) -> Self {
        self.service_name = Some(name.into());
        self
    }

    pub fn with_trigger_name<S: Into<String>>(mut self, name: S) -> Self {
        self.trigger_name = Some(name.into());
        self
    }

    pub fn with_install_procedure_name<S: Into<String>>(mut self, name: S) -> Self {
        self.install_procedure_name = Some(name.into());
        self
    }

    pub fn with_uninstall_procedure_name<S: Into<String>>(mut self, name: S) -> Self {
        self.uninstall_procedure_name = Some(name.into());
        self
    }

    pub fn queue_name(&self) -> String {
        self.resolve(self.queue_name.as_deref(), QUEUE_PREFIX)
    }

    pub fn service_name(&self) -> String {
        self.resolve(self.service_name.as_deref(), SERVICE_PREFIX)
    }

    pub fn trigger_name(&self) -> String {
        self.resolve(self.trigger_name.as_deref(), TRIGGER_PREFIX)
    }

    pub fn install_procedure_name(&self) -> String {
        self.resolve(
            self.install_procedure_name.as_deref(),
            INSTALL_PROCEDURE_PREFIX,
        )
    }

    pub fn uninstall_procedure_name(&self) -> String {
        self.resolve(
            self.uninstall_procedure_name.as_deref(),
            UNINSTALL_PROCEDURE_PREFIX,
        )
    }

    /// Timeout applied to every statement sent to the database
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Upper bound of a single `WAITFOR (RECEIVE ...)` in milliseconds
    pub fn poll_wait_ms(&self) -> u64 {
        self.command_timeout_ms / 2
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("connection_string", &self.connection_string),
            ("database_name", &self.database_name),
            ("schema_name", &self.schema_name),
            ("table_name", &self.table_name),
            ("queue_schema_name", &self.queue_schema_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ListenerError::config(format!("{field} must not be empty")));
            }
        }

        let overrides = [
            ("queue_name", &self.queue_name),
            ("service_name", &self.service_name),
            ("trigger_name", &self.trigger_name),
            ("install_procedure_name", &self.install_procedure_name),
            ("uninstall_procedure_name", &self.uninstall_procedure_name),
        ];
        for (field, value) in overrides {
            if matches!(value, Some(name) if name.len() > 128) {
                return Err(ListenerError::config(format!(
                    "{field} exceeds the 128 character identifier limit"
                )));
            }
        }

        if self.identity < 0 {
            return Err(ListenerError::config(format!(
                "identity must be non-negative, got {}",
                self.identity
            )));
        }

        if self.command_timeout_ms < 2 || self.command_timeout_ms > i32::MAX as u64 {
            return Err(ListenerError::config(format!(
                "command_timeout_ms must be between 2 and {}, got {}",
                i32::MAX,
                self.command_timeout_ms
            )));
        }

        Ok(())
    }

    fn resolve(&self, explicit: Option<&str>, prefix: &str) -> String {
        match explicit {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{prefix}{}", self.identity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ListenerConfig {
        ListenerConfig::new("server=tcp:localhost,1433", "TEST_DB", "TEST_TABLE")
    }

    #[test]
    fn test_default_config() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.schema_name, "dbo");
        assert_eq!(config.queue_schema_name, "dbo");
        assert_eq!(config.command_timeout_ms, 60_000);
        assert_eq!(config.identity, 1);
        assert_eq!(config.listener_type, NotificationTypes::ALL);
        assert!(!config.manual_configuration);
        assert!(!config.auto_enable_broker);
    }

    #[test]
    fn test_derived_names() {
        let config = config().with_identity(42);

        assert_eq!(config.queue_name(), "LISTENER_QUEUE_42");
        assert_eq!(config.service_name(), "LISTENER_SERVICE_42");
        assert_eq!(config.trigger_name(), "TR_LISTENER_42");
        assert_eq!(config.install_procedure_name(), "SP_INSTALL_LISTENER_42");
        assert_eq!(
            config.uninstall_procedure_name(),
            "SP_UNINSTALL_LISTENER_42"
        );
    }

    #[test]
    fn test_explicit_names_win_over_derived() {
        let config = config()
            .with_queue_name("ORDERS_QUEUE")
            .with_service_name("ORDERS_SERVICE")
            .with_trigger_name("TR_ORDERS");

        assert_eq!(config.queue_name(), "ORDERS_QUEUE");
        assert_eq!(config.service_name(), "ORDERS_SERVICE");
        assert_eq!(config.trigger_name(), "TR_ORDERS");
        // Unset names keep deriving from identity
        assert_eq!(config.install_procedure_name(), "SP_INSTALL_LISTENER_1");
    }

    #[test]
    fn test_empty_override_falls_back_to_derived() {
        let config = config().with_queue_name("");
        assert_eq!(config.queue_name(), "LISTENER_QUEUE_1");
    }

    #[test]
    fn test_distinct_identities_never_collide() {
        let a = config().with_identity(1);
        let b = config().with_identity(2);

        assert_ne!(a.queue_name(), b.queue_name());
        assert_ne!(a.service_name(), b.service_name());
        assert_ne!(a.trigger_name(), b.trigger_name());
        assert_ne!(a.install_procedure_name(), b.install_procedure_name());
        assert_ne!(a.uninstall_procedure_name(), b.uninstall_procedure_name());
    }

    #[test]
    fn test_poll_wait_is_half_the_command_timeout() {
        let config = config().with_command_timeout_ms(10_001);
        assert_eq!(config.poll_wait_ms(), 5_000);
        assert_eq!(config.command_timeout(), Duration::from_millis(10_001));
    }

    #[test]
    fn test_validation() {
        assert!(config().with_identity(-1).validate().is_err());
        assert!(config().with_command_timeout_ms(1).validate().is_err());
        assert!(config()
            .with_command_timeout_ms(i32::MAX as u64 + 1)
            .validate()
            .is_err());
        assert!(config().with_schema(" ").validate().is_err());
        assert!(config()
            .with_trigger_name("T".repeat(129))
            .validate()
            .is_err());

        let mut missing_table = config();
        missing_table.table_name.clear();
        assert!(missing_table.validate().is_err());
    }

    #[test]
    fn test_notification_types() {
        let types = NotificationTypes::INSERT | NotificationTypes::DELETE;
        assert!(types.contains(ChangeKind::Insert));
        assert!(!types.contains(ChangeKind::Update));
        assert!(types.contains(ChangeKind::Delete));
        assert_eq!(types.kinds(), vec![ChangeKind::Insert, ChangeKind::Delete]);
        assert_eq!(types.bits(), 0b1010);

        assert!(NotificationTypes::NONE.is_empty());
        assert!(NotificationTypes::default().is_empty());
        assert_eq!(NotificationTypes::ALL.kinds().len(), 3);
    }

    #[test]
    fn test_notification_types_serde() {
        let types = NotificationTypes::UPDATE | NotificationTypes::INSERT;
        let json = serde_json::to_string(&types).unwrap();
        assert_eq!(json, r#"["insert","update"]"#);

        let parsed: NotificationTypes = serde_json::from_str(r#"["delete"]"#).unwrap();
        assert_eq!(parsed, NotificationTypes::DELETE);
    }

    #[test]
    fn test_change_kind_parsing() {
        assert_eq!(" Update ".parse::<ChangeKind>().unwrap(), ChangeKind::Update);
        assert!("upsert".parse::<ChangeKind>().is_err());
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: ListenerConfig = serde_json::from_str(
            r#"{
                "connection_string": "server=tcp:db,1433",
                "database_name": "APP",
                "table_name": "ORDERS"
            }"#,
        )
        .unwrap();

        assert_eq!(config, ListenerConfig::new("server=tcp:db,1433", "APP", "ORDERS"));
    }

    #[test]
    fn test_debug_masks_connection_string() {
        let config = ListenerConfig::new("server=db;password=hunter2", "APP", "ORDERS");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[MASKED]"));
    }
}
