//! Configuration Loader
//!
//! Layers an optional configuration file under environment variables and
//! produces a validated [`ListenerConfig`]. The file format follows its
//! extension (`.toml`, `.yaml`, `.json`, ...). Environment variables use the
//! `MSSQL_NOTIFY__` prefix with `__` between path segments, for example
//! `MSSQL_NOTIFY__TABLE_NAME=ORDERS` or
//! `MSSQL_NOTIFY__LISTENER_TYPE=insert,delete`.

use ::config::{Config, Environment, File};
use std::path::Path;
use tracing::debug;

use super::ListenerConfig;
use crate::error::Result;

/// Environment variable prefix for listener settings
pub const ENV_PREFIX: &str = "MSSQL_NOTIFY";

/// Load a listener configuration from an optional file plus the environment
pub fn load_listener_config(path: Option<&Path>) -> Result<ListenerConfig> {
    load_with_env_prefix(path, ENV_PREFIX)
}

pub(crate) fn load_with_env_prefix(path: Option<&Path>, prefix: &str) -> Result<ListenerConfig> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        debug!(path = %path.display(), "Loading listener configuration file");
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(prefix)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("listener_type")
            .try_parsing(true),
    );

    let config: ListenerConfig = builder.build()?.try_deserialize()?;
    config.validate()?;

    debug!(
        database = %config.database_name,
        table = %config.table_name,
        identity = config.identity,
        manual = config.manual_configuration,
        "Listener configuration loaded"
    );

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationTypes;
    use std::io::Write;

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn test_load_from_toml_file() {
        let file = write_toml(
            r#"
connection_string = "server=tcp:localhost,1433;user=sa;password=secret"
database_name = "TEST_DB"
table_name = "TEST_TABLE"
identity = 5
listener_type = ["insert", "update"]
auto_enable_broker = true
"#,
        );

        let config = load_with_env_prefix(Some(file.path()), "MSSQL_NOTIFY_TEST_FILE_ONLY")
            .expect("config should load");

        assert_eq!(config.database_name, "TEST_DB");
        assert_eq!(config.identity, 5);
        assert_eq!(
            config.listener_type,
            NotificationTypes::INSERT | NotificationTypes::UPDATE
        );
        assert!(config.auto_enable_broker);
        assert_eq!(config.schema_name, "dbo");
        assert_eq!(config.queue_name(), "LISTENER_QUEUE_5");
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_toml(
            r#"
connection_string = "server=tcp:localhost,1433"
database_name = "TEST_DB"
table_name = "TEST_TABLE"
"#,
        );

        std::env::set_var("MSSQL_NOTIFY_TEST_ENV__TABLE_NAME", "ORDERS");
        std::env::set_var("MSSQL_NOTIFY_TEST_ENV__IDENTITY", "9");
        std::env::set_var("MSSQL_NOTIFY_TEST_ENV__LISTENER_TYPE", "delete");

        let result = load_with_env_prefix(Some(file.path()), "MSSQL_NOTIFY_TEST_ENV");

        std::env::remove_var("MSSQL_NOTIFY_TEST_ENV__TABLE_NAME");
        std::env::remove_var("MSSQL_NOTIFY_TEST_ENV__IDENTITY");
        std::env::remove_var("MSSQL_NOTIFY_TEST_ENV__LISTENER_TYPE");

        let config = result.expect("config should load");
        assert_eq!(config.table_name, "ORDERS");
        assert_eq!(config.identity, 9);
        assert_eq!(config.listener_type, NotificationTypes::DELETE);
    }

    #[test]
    fn test_missing_required_field_is_configuration_error() {
        let file = write_toml(r#"database_name = "TEST_DB""#);

        let err = load_with_env_prefix(Some(file.path()), "MSSQL_NOTIFY_TEST_MISSING")
            .expect_err("table and connection are required");
        assert!(matches!(
            err,
            crate::error::ListenerError::Configuration { .. }
        ));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let file = write_toml(
            r#"
connection_string = "server=tcp:localhost,1433"
database_name = "TEST_DB"
table_name = "TEST_TABLE"
command_timeout_ms = 1
"#,
        );

        assert!(load_with_env_prefix(Some(file.path()), "MSSQL_NOTIFY_TEST_INVALID").is_err());
    }
}
