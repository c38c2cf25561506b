//! T-SQL script templates with named slots
//!
//! Slots are written as `{slot_name}` (lowercase letters and underscores).
//! Values are substituted verbatim in a single pass, so callers pass values
//! already quoted and escaped for the slot's position and nesting level.

use crate::error::{ListenerError, Result};

/// A named T-SQL template
#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub name: &'static str,
    pub text: &'static str,
}

impl Template {
    const fn new(name: &'static str, text: &'static str) -> Self {
        Self { name, text }
    }

    /// Substitute every slot; fails on a missing or unused parameter
    pub fn render(&self, params: &[(&str, &str)]) -> Result<String> {
        let mut output = String::with_capacity(self.text.len() + 256);
        let mut used = vec![false; params.len()];
        let mut rest = self.text;

        while let Some(open) = rest.find('{') {
            output.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let slot = after
                .find('}')
                .map(|close| &after[..close])
                .filter(|name| is_slot_name(name));

            match slot {
                Some(name) => {
                    let index = params
                        .iter()
                        .position(|(key, _)| *key == name)
                        .ok_or_else(|| {
                            ListenerError::config(format!(
                                "Template {} has no value for slot {{{}}}",
                                self.name, name
                            ))
                        })?;
                    used[index] = true;
                    output.push_str(params[index].1);
                    rest = &after[name.len() + 1..];
                }
                None => {
                    output.push('{');
                    rest = after;
                }
            }
        }
        output.push_str(rest);

        if let Some(index) = used.iter().position(|was_used| !was_used) {
            return Err(ListenerError::config(format!(
                "Template {} does not use parameter {}",
                self.name, params[index].0
            )));
        }

        Ok(output)
    }
}

fn is_slot_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_lowercase() || c == '_')
}

/// Informational banner printed by the install and uninstall scripts
pub const PERMISSIONS_INFO: Template = Template::new(
    "permissions_info",
    r#"DECLARE @msg NVARCHAR(MAX)
DECLARE @crlf NCHAR(1)
SET @crlf = NCHAR(10)
SET @msg = 'Current user must have following permissions: '
SET @msg = @msg + '[CREATE PROCEDURE, CREATE SERVICE, CREATE QUEUE, SUBSCRIBE QUERY NOTIFICATIONS, CONTROL, REFERENCES] '
SET @msg = @msg + 'that are required to start query notifications. '
SET @msg = @msg + 'Grant described permissions with following script: ' + @crlf
SET @msg = @msg + 'GRANT CREATE PROCEDURE TO [<username>];' + @crlf
SET @msg = @msg + 'GRANT CREATE SERVICE TO [<username>];' + @crlf
SET @msg = @msg + 'GRANT CREATE QUEUE TO [<username>];' + @crlf
SET @msg = @msg + 'GRANT REFERENCES ON CONTRACT::[DEFAULT] TO [<username>];' + @crlf
SET @msg = @msg + 'GRANT SUBSCRIBE QUERY NOTIFICATIONS TO [<username>];' + @crlf
SET @msg = @msg + 'GRANT CONTROL ON SCHEMA::[<schemaname>] TO [<username>];'
PRINT @msg
"#,
);

/// Enables Service Broker when it is off for the database
pub const ENABLE_BROKER: Template = Template::new(
    "enable_broker",
    r#"IF EXISTS (SELECT * FROM sys.databases WHERE name = '{database_literal}' AND is_broker_enabled = 0)
    BEGIN
        -- Setup Service Broker
        ALTER DATABASE {database} SET SINGLE_USER WITH ROLLBACK IMMEDIATE
        ALTER DATABASE {database} SET ENABLE_BROKER;
        ALTER DATABASE {database} SET MULTI_USER WITH ROLLBACK IMMEDIATE
        /* FOR SQL Express */
        ALTER AUTHORIZATION ON DATABASE::{database} TO [sa]
    END
"#,
);

/// Creates the queue and the service bound to it when missing
pub const CREATE_CONVERSATION_OBJECTS: Template = Template::new(
    "create_conversation_objects",
    r#"IF (EXISTS (SELECT * FROM sys.databases WHERE name = '{database_literal}' AND is_broker_enabled = 0))
    BEGIN
        RAISERROR ('ServiceBroker is disabled for database {database_label}', 16, 1)
    END
    -- Create a queue which will hold the tracked information
    IF (OBJECT_ID ('{queue_object}', 'SQ') IS NULL)
        CREATE QUEUE {queue}
    -- Create a service on which tracked information will be sent
    IF (NOT EXISTS (SELECT * FROM sys.services WHERE name = '{service_name_literal}'))
        CREATE SERVICE {service} ON QUEUE {queue} ([DEFAULT])
"#,
);

/// Ends lingering conversations, then drops the service and the queue
pub const DROP_CONVERSATION_OBJECTS: Template = Template::new(
    "drop_conversation_objects",
    r#"DECLARE @serviceId INT
    SELECT @serviceId = service_id FROM sys.services WHERE sys.services.name = '{service_name_literal}'
    DECLARE @ConversationHandle UNIQUEIDENTIFIER
    DECLARE Conversations CURSOR FOR
        SELECT CEP.conversation_handle
            FROM sys.conversation_endpoints CEP
            WHERE CEP.service_id = @serviceId AND ([state] != 'CD' OR [lifetime] > GETDATE() + 1)
    OPEN Conversations;
    FETCH NEXT FROM Conversations INTO @ConversationHandle;
    WHILE (@@FETCH_STATUS = 0)
    BEGIN
        END CONVERSATION @ConversationHandle WITH CLEANUP;
        FETCH NEXT FROM Conversations INTO @ConversationHandle;
    END
    CLOSE Conversations;
    DEALLOCATE Conversations;
    -- Dropping service and queue.
    IF (@serviceId IS NOT NULL)
        DROP SERVICE {service};
    IF (OBJECT_ID ('{queue_object}', 'SQ') IS NOT NULL)
        DROP QUEUE {queue};
"#,
);

/// Leaves the install procedure early when the trigger already exists
pub const CHECK_TRIGGER: Template = Template::new(
    "check_trigger",
    r#"IF (OBJECT_ID ('{trigger_object}', 'TR') IS NOT NULL) RETURN;"#,
);

/// Row-level trigger that sends one JSON message per statement
pub const CREATE_TRIGGER: Template = Template::new(
    "create_trigger",
    r#"CREATE OR ALTER TRIGGER {trigger}
    ON {table}
    FOR {events}
AS
BEGIN
    SET NOCOUNT ON;

    IF (EXISTS (SELECT * FROM sys.services WHERE name = '{service_name_literal}'))
    BEGIN
        DECLARE @message NVARCHAR(MAX)

        IF (EXISTS (SELECT * FROM inserted))
        BEGIN
            IF (EXISTS (SELECT * FROM deleted))
            BEGIN
                SET @message = (
                    SELECT
                    'update' AS [event_type],
                    (SELECT * FROM inserted FOR JSON PATH) AS [inserted],
                    (SELECT * FROM deleted FOR JSON PATH) AS [deleted]
                    FOR JSON PATH, WITHOUT_ARRAY_WRAPPER
                );
            END
            ELSE BEGIN
                SET @message = (
                    SELECT
                    'insert' AS [event_type],
                    (SELECT * FROM inserted FOR JSON PATH) AS [inserted],
                    NULL AS [deleted]
                    FOR JSON PATH, WITHOUT_ARRAY_WRAPPER
                );
            END
        END
        ELSE IF (EXISTS (SELECT * FROM deleted))
        BEGIN
            SET @message = (
                SELECT
                'delete' AS [event_type],
                NULL AS [inserted],
                (SELECT * FROM deleted FOR JSON PATH) AS [deleted]
                FOR JSON PATH, WITHOUT_ARRAY_WRAPPER
            );
        END

        IF (@message IS NULL) RETURN;

        --Sending a Request Message to the Target
        DECLARE @conversationHandle UNIQUEIDENTIFIER;
        BEGIN DIALOG @conversationHandle
            FROM SERVICE {service} TO SERVICE '{service_name_literal}' ON CONTRACT [DEFAULT]
            WITH ENCRYPTION = OFF, LIFETIME = 60;
        SEND ON CONVERSATION @conversationHandle MESSAGE TYPE [DEFAULT] (@message);
        END CONVERSATION @conversationHandle;
    END
END
"#,
);

/// Drops the notification trigger if present
pub const DROP_TRIGGER: Template = Template::new(
    "drop_trigger",
    r#"IF (OBJECT_ID ('{trigger_object}', 'TR') IS NOT NULL) DROP TRIGGER {trigger};"#,
);

/// Creates the install procedure unless one with that name exists
pub const CREATE_INSTALL_PROCEDURE: Template = Template::new(
    "create_install_procedure",
    r#"USE {database}
{permissions_info}
IF (OBJECT_ID ('{procedure_object}', 'P') IS NULL)
BEGIN
    EXEC ('CREATE OR ALTER PROCEDURE {procedure}
AS
BEGIN
    -- Service Broker configuration statement.
    {enable_broker}
    {create_conversation_objects}
    -- Trigger check statement.
    {check_trigger}
    -- Trigger configuration statement.
    EXEC (''{create_trigger}'')
END')
END
"#,
);

/// Creates the uninstall procedure unless one with that name exists
pub const CREATE_UNINSTALL_PROCEDURE: Template = Template::new(
    "create_uninstall_procedure",
    r#"USE {database}
{permissions_info}
IF (OBJECT_ID ('{procedure_object}', 'P') IS NULL)
BEGIN
    EXEC ('CREATE OR ALTER PROCEDURE {procedure}
AS
BEGIN
    -- Notification Trigger drop statement.
    {drop_trigger}
    -- Service Broker uninstall statement.
    {drop_conversation_objects}
    IF (OBJECT_ID (''{install_procedure_object}'', ''P'') IS NOT NULL)
        DROP PROCEDURE {install_procedure}

    DROP PROCEDURE {procedure}
END')
END
"#,
);

/// Executes a procedure when it exists
pub const EXECUTE_PROCEDURE: Template = Template::new(
    "execute_procedure",
    r#"USE {database}
IF (OBJECT_ID ('{procedure_object}', 'P') IS NOT NULL)
    EXEC {procedure}
"#,
);

/// Waits for one queue message, ends its conversation and returns the body
pub const RECEIVE_EVENT: Template = Template::new(
    "receive_event",
    r#"DECLARE @conversationHandle UNIQUEIDENTIFIER
DECLARE @message VARBINARY(MAX)
USE {database}
WAITFOR (
    RECEIVE TOP(1) @conversationHandle=conversation_handle, @message=message_body FROM {queue}
), TIMEOUT {timeout_ms};
BEGIN TRY
    END CONVERSATION @conversationHandle;
END TRY
BEGIN CATCH
END CATCH
SELECT CAST(@message AS NVARCHAR(MAX))
"#,
);

/// Lists name suffixes of services that start with a prefix
pub const LIST_IDENTITIES: Template = Template::new(
    "list_identities",
    r#"USE {database}
SELECT REPLACE(name, '{prefix_literal}', '')
    FROM sys.services
    WHERE [name] LIKE '{prefix_pattern}%';
"#,
);

/// Runs and drops every uninstall procedure, then drops every install procedure
pub const FORCED_CLEANUP: Template = Template::new(
    "forced_cleanup",
    r#"USE {database}
DECLARE @DB_NAME NVARCHAR(128)
SET @DB_NAME = '{database_literal}'
DECLARE @PROC_NAME NVARCHAR(300)

DECLARE procedures CURSOR FOR
    SELECT QUOTENAME(sys.schemas.name) + '.' + QUOTENAME(sys.objects.name)
        FROM sys.objects
            INNER JOIN sys.schemas ON sys.objects.schema_id = sys.schemas.schema_id
        WHERE sys.objects.[type] = 'P' AND sys.objects.[name] LIKE '{uninstall_pattern}%'
OPEN procedures;
FETCH NEXT FROM procedures INTO @PROC_NAME
WHILE (@@FETCH_STATUS = 0)
BEGIN
    EXEC ('USE ' + QUOTENAME(@DB_NAME) + ' EXEC ' + @PROC_NAME + ' IF (OBJECT_ID (''' + @PROC_NAME + ''', ''P'') IS NOT NULL) DROP PROCEDURE ' + @PROC_NAME)
    FETCH NEXT FROM procedures INTO @PROC_NAME
END
CLOSE procedures;
DEALLOCATE procedures;

DECLARE procedures CURSOR FOR
    SELECT QUOTENAME(sys.schemas.name) + '.' + QUOTENAME(sys.objects.name)
        FROM sys.objects
            INNER JOIN sys.schemas ON sys.objects.schema_id = sys.schemas.schema_id
        WHERE sys.objects.[type] = 'P' AND sys.objects.[name] LIKE '{install_pattern}%'
OPEN procedures;
FETCH NEXT FROM procedures INTO @PROC_NAME
WHILE (@@FETCH_STATUS = 0)
BEGIN
    EXEC ('USE ' + QUOTENAME(@DB_NAME) + ' DROP PROCEDURE ' + @PROC_NAME)
    FETCH NEXT FROM procedures INTO @PROC_NAME
END
CLOSE procedures;
DEALLOCATE procedures;
"#,
);

#[cfg(test)]
mod tests {
    use super::*;

    const GREETING: Template = Template::new("greeting", "SELECT '{name}' AS {column}");

    #[test]
    fn test_render_substitutes_slots() {
        let sql = GREETING
            .render(&[("name", "world"), ("column", "[greeting]")])
            .unwrap();
        assert_eq!(sql, "SELECT 'world' AS [greeting]");
    }

    #[test]
    fn test_render_does_not_resubstitute_values() {
        let sql = GREETING
            .render(&[("name", "{column}"), ("column", "c")])
            .unwrap();
        assert_eq!(sql, "SELECT '{column}' AS c");
    }

    #[test]
    fn test_missing_slot_value_is_an_error() {
        let err = GREETING.render(&[("name", "world")]).unwrap_err();
        assert!(err.to_string().contains("{column}"));
    }

    #[test]
    fn test_unused_parameter_is_an_error() {
        let err = GREETING
            .render(&[("name", "a"), ("column", "b"), ("extra", "c")])
            .unwrap_err();
        assert!(err.to_string().contains("extra"));
    }

    #[test]
    fn test_non_slot_braces_are_kept() {
        let template = Template::new("braces", "SELECT '{ Not A Slot }', '{}', {x}");
        let sql = template.render(&[("x", "1")]).unwrap();
        assert_eq!(sql, "SELECT '{ Not A Slot }', '{}', 1");
    }

    #[test]
    fn test_permissions_info_has_no_slots() {
        let sql = PERMISSIONS_INFO.render(&[]).unwrap();
        assert!(sql.contains("GRANT CREATE QUEUE TO [<username>];"));
        assert!(sql.ends_with("PRINT @msg\n"));
    }
}
