//! # Script synthesis
//!
//! Renders the T-SQL that installs, uninstalls and polls a listener's
//! Service Broker objects. Rendering is pure: nothing here touches a database.
//!
//! The install script creates a stored procedure whose body is itself run
//! through `EXEC ('...')`, and the trigger DDL inside that body is run through
//! one more `EXEC (''...'')`. Each fragment is rendered with plain quoting and
//! then lifted to its nesting level with [`EscapeLevel::apply`].
//!
//! ```rust
//! use mssql_notify::config::{ListenerConfig, NotificationTypes};
//! use mssql_notify::scripts::ScriptSynthesizer;
//!
//! let config = ListenerConfig::new("server=tcp:localhost,1433", "TEST_DB", "ORDERS")
//!     .with_listener_type(NotificationTypes::NONE);
//! let scripts = ScriptSynthesizer::new(&config);
//!
//! let install = scripts.install_procedure().unwrap();
//! assert!(install.contains("FOR INSERT"));
//! assert!(install.contains("CREATE OR ALTER PROCEDURE [dbo].[SP_INSTALL_LISTENER_1]"));
//! ```

pub mod escape;
pub mod templates;

use crate::config::{ListenerConfig, NotificationTypes};
use crate::error::Result;

pub use escape::EscapeLevel;
use escape::{bracket, escape_like, escape_literal, object_literal, qualified};
use templates::{
    CHECK_TRIGGER, CREATE_CONVERSATION_OBJECTS, CREATE_INSTALL_PROCEDURE,
    CREATE_TRIGGER, CREATE_UNINSTALL_PROCEDURE, DROP_CONVERSATION_OBJECTS, DROP_TRIGGER,
    ENABLE_BROKER, EXECUTE_PROCEDURE, FORCED_CLEANUP, LIST_IDENTITIES, PERMISSIONS_INFO,
    RECEIVE_EVENT,
};

/// Renders every script a listener needs from its configuration
#[derive(Debug, Clone, Copy)]
pub struct ScriptSynthesizer<'a> {
    config: &'a ListenerConfig,
}

impl<'a> ScriptSynthesizer<'a> {
    pub fn new(config: &'a ListenerConfig) -> Self {
        Self { config }
    }

    /// Script creating the install procedure when it does not exist yet
    ///
    /// The procedure optionally enables Service Broker, creates the queue and
    /// the service when missing, and creates the trigger unless one with the
    /// same name already exists.
    pub fn install_procedure(&self) -> Result<String> {
        let cfg = self.config;
        let procedure = qualified(&cfg.schema_name, &cfg.install_procedure_name());

        let enable_broker = if cfg.auto_enable_broker {
            EscapeLevel::DynamicExec.apply(&self.enable_broker()?)
        } else {
            String::new()
        };
        let conversation_objects =
            EscapeLevel::DynamicExec.apply(&self.create_conversation_objects()?);
        let check_trigger = EscapeLevel::DynamicExec.apply(&CHECK_TRIGGER.render(&[(
            "trigger_object",
            &object_literal(&cfg.schema_name, &cfg.trigger_name()),
        )])?);
        let create_trigger = EscapeLevel::NestedDynamicExec.apply(&self.create_trigger()?);

        CREATE_INSTALL_PROCEDURE.render(&[
            ("database", &bracket(&cfg.database_name)),
            ("permissions_info", &PERMISSIONS_INFO.render(&[])?),
            (
                "procedure_object",
                &object_literal(&cfg.schema_name, &cfg.install_procedure_name()),
            ),
            ("procedure", &EscapeLevel::DynamicExec.apply(&procedure)),
            ("enable_broker", &enable_broker),
            ("create_conversation_objects", &conversation_objects),
            ("check_trigger", &check_trigger),
            ("create_trigger", &create_trigger),
        ])
    }

    /// Script creating the uninstall procedure when it does not exist yet
    ///
    /// The procedure drops the trigger, ends lingering conversations, drops
    /// the service, the queue and the install procedure, and finally itself.
    pub fn uninstall_procedure(&self) -> Result<String> {
        let cfg = self.config;
        let procedure = qualified(&cfg.schema_name, &cfg.uninstall_procedure_name());
        let install_procedure = cfg.install_procedure_name();

        let drop_trigger = EscapeLevel::DynamicExec.apply(&DROP_TRIGGER.render(&[
            (
                "trigger_object",
                &object_literal(&cfg.schema_name, &cfg.trigger_name()),
            ),
            ("trigger", &qualified(&cfg.schema_name, &cfg.trigger_name())),
        ])?);
        let drop_conversation_objects =
            EscapeLevel::DynamicExec.apply(&DROP_CONVERSATION_OBJECTS.render(&[
                ("service_name_literal", &escape_literal(&cfg.service_name())),
                ("service", &bracket(&cfg.service_name())),
                (
                    "queue_object",
                    &object_literal(&cfg.queue_schema_name, &cfg.queue_name()),
                ),
                ("queue", &qualified(&cfg.queue_schema_name, &cfg.queue_name())),
            ])?);

        CREATE_UNINSTALL_PROCEDURE.render(&[
            ("database", &bracket(&cfg.database_name)),
            ("permissions_info", &PERMISSIONS_INFO.render(&[])?),
            (
                "procedure_object",
                &object_literal(&cfg.schema_name, &cfg.uninstall_procedure_name()),
            ),
            ("procedure", &EscapeLevel::DynamicExec.apply(&procedure)),
            ("drop_trigger", &drop_trigger),
            ("drop_conversation_objects", &drop_conversation_objects),
            (
                "install_procedure_object",
                &EscapeLevel::DynamicExec
                    .apply(&object_literal(&cfg.schema_name, &install_procedure)),
            ),
            (
                "install_procedure",
                &EscapeLevel::DynamicExec
                    .apply(&qualified(&cfg.schema_name, &install_procedure)),
            ),
        ])
    }

    /// Statement waiting up to `timeout_ms` for one message on the queue
    pub fn poll_query(&self, timeout_ms: u64) -> Result<String> {
        let cfg = self.config;
        RECEIVE_EVENT.render(&[
            ("database", &bracket(&cfg.database_name)),
            ("queue", &qualified(&cfg.queue_schema_name, &cfg.queue_name())),
            ("timeout_ms", &timeout_ms.to_string()),
        ])
    }

    /// Executes the install procedure if it exists
    pub fn execute_install(&self) -> Result<String> {
        self.execute_procedure(&self.config.install_procedure_name())
    }

    /// Executes the uninstall procedure if it exists
    pub fn execute_uninstall(&self) -> Result<String> {
        self.execute_procedure(&self.config.uninstall_procedure_name())
    }

    /// Event list of the trigger's `FOR` clause
    pub fn trigger_events(&self) -> String {
        trigger_event_clause(self.config.listener_type)
    }

    fn execute_procedure(&self, name: &str) -> Result<String> {
        let schema = &self.config.schema_name;
        EXECUTE_PROCEDURE.render(&[
            ("database", &bracket(&self.config.database_name)),
            ("procedure_object", &object_literal(schema, name)),
            ("procedure", &qualified(schema, name)),
        ])
    }

    fn enable_broker(&self) -> Result<String> {
        ENABLE_BROKER.render(&[
            ("database_literal", &escape_literal(&self.config.database_name)),
            ("database", &bracket(&self.config.database_name)),
        ])
    }

    fn create_conversation_objects(&self) -> Result<String> {
        let cfg = self.config;
        // RAISERROR treats % in its message as a format marker
        let label = bracket(&cfg.database_name).replace('%', "%%");

        CREATE_CONVERSATION_OBJECTS.render(&[
            ("database_literal", &escape_literal(&cfg.database_name)),
            ("database_label", &escape_literal(&label)),
            (
                "queue_object",
                &object_literal(&cfg.queue_schema_name, &cfg.queue_name()),
            ),
            ("queue", &qualified(&cfg.queue_schema_name, &cfg.queue_name())),
            ("service_name_literal", &escape_literal(&cfg.service_name())),
            ("service", &bracket(&cfg.service_name())),
        ])
    }

    fn create_trigger(&self) -> Result<String> {
        let cfg = self.config;
        CREATE_TRIGGER.render(&[
            ("trigger", &qualified(&cfg.schema_name, &cfg.trigger_name())),
            ("table", &qualified(&cfg.schema_name, &cfg.table_name)),
            ("events", &self.trigger_events()),
            ("service_name_literal", &escape_literal(&cfg.service_name())),
            ("service", &bracket(&cfg.service_name())),
        ])
    }
}

pub fn render_install_procedure(config: &ListenerConfig) -> Result<String> {
    ScriptSynthesizer::new(config).install_procedure()
}

pub fn render_uninstall_procedure(config: &ListenerConfig) -> Result<String> {
    ScriptSynthesizer::new(config).uninstall_procedure()
}

pub fn render_poll_query(config: &ListenerConfig, timeout_ms: u64) -> Result<String> {
    ScriptSynthesizer::new(config).poll_query(timeout_ms)
}

/// `FOR` clause event list; an empty set falls back to `INSERT`
pub fn trigger_event_clause(types: NotificationTypes) -> String {
    let kinds = types.kinds();
    if kinds.is_empty() {
        return "INSERT".to_string();
    }
    kinds
        .iter()
        .map(|kind| kind.trigger_keyword())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Query returning the suffix of every service whose name starts with `prefix`
pub fn list_identities_query(database: &str, prefix: &str) -> Result<String> {
    LIST_IDENTITIES.render(&[
        ("database", &bracket(database)),
        ("prefix_literal", &escape_literal(prefix)),
        ("prefix_pattern", &escape_like(prefix)),
    ])
}

/// Script executing and dropping every uninstall procedure matching
/// `uninstall_prefix`, then dropping every procedure matching `install_prefix`
pub fn forced_cleanup_script(
    database: &str,
    uninstall_prefix: &str,
    install_prefix: &str,
) -> Result<String> {
    FORCED_CLEANUP.render(&[
        ("database", &bracket(database)),
        ("database_literal", &escape_literal(database)),
        ("uninstall_pattern", &escape_like(uninstall_prefix)),
        ("install_pattern", &escape_like(install_prefix)),
    ])
}
