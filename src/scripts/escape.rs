//! T-SQL quoting and escaping helpers
//!
//! Generated scripts nest SQL text inside string literals that are run with
//! `EXEC ('...')`. Every nesting level doubles single quotes once more, so a
//! fragment is always rendered for its own level first and then lifted with
//! [`EscapeLevel::apply`].

/// Nesting depth of a fragment inside dynamic `EXEC ('...')` literals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeLevel {
    /// Executed directly as part of the batch
    Direct,
    /// Body of the procedure created through `EXEC ('CREATE PROCEDURE ...')`
    DynamicExec,
    /// Statement run through `EXEC (''...'')` inside that procedure body
    NestedDynamicExec,
}

impl EscapeLevel {
    /// Number of quote-doubling passes this level needs
    pub fn depth(&self) -> u32 {
        match self {
            EscapeLevel::Direct => 0,
            EscapeLevel::DynamicExec => 1,
            EscapeLevel::NestedDynamicExec => 2,
        }
    }

    /// Lift SQL text rendered for the batch level to this nesting level
    pub fn apply(&self, sql: &str) -> String {
        (0..self.depth()).fold(sql.to_string(), |text, _| escape_literal(&text))
    }
}

/// Escape text for use inside a single-quoted T-SQL string literal
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Inverse of [`escape_literal`]
pub fn unescape_literal(value: &str) -> String {
    value.replace("''", "'")
}

/// Quote an identifier with brackets, doubling any closing bracket
pub fn bracket(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Bracketed two-part name such as `[dbo].[ORDERS]`
pub fn qualified(schema: &str, name: &str) -> String {
    format!("{}.{}", bracket(schema), bracket(name))
}

/// Two-part name as the body of a string literal, for `OBJECT_ID('...')`
pub fn object_literal(schema: &str, name: &str) -> String {
    escape_literal(&qualified(schema, name))
}

/// Escape a prefix for a `LIKE 'prefix%'` pattern inside a string literal
///
/// `_`, `%` and `[` are wildcards in T-SQL patterns and are wrapped in
/// brackets so they match literally.
pub fn escape_like(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 8);
    for ch in prefix.chars() {
        match ch {
            '_' | '%' | '[' => {
                pattern.push('[');
                pattern.push(ch);
                pattern.push(']');
            }
            _ => pattern.push(ch),
        }
    }
    escape_literal(&pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("O'Brien"), "O''Brien");
        assert_eq!(escape_literal("no quotes"), "no quotes");
    }

    #[test]
    fn test_levels() {
        let sql = "WHERE name = 'x'";
        assert_eq!(EscapeLevel::Direct.apply(sql), sql);
        assert_eq!(EscapeLevel::DynamicExec.apply(sql), "WHERE name = ''x''");
        assert_eq!(
            EscapeLevel::NestedDynamicExec.apply(sql),
            "WHERE name = ''''x''''"
        );
    }

    #[test]
    fn test_bracket_doubles_closing_bracket() {
        assert_eq!(bracket("ORDERS"), "[ORDERS]");
        assert_eq!(bracket("odd]name"), "[odd]]name]");
        assert_eq!(qualified("dbo", "ORDERS"), "[dbo].[ORDERS]");
    }

    #[test]
    fn test_object_literal_escapes_quotes() {
        assert_eq!(object_literal("dbo", "it's"), "[dbo].[it''s]");
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("LISTENER_SERVICE_"), "LISTENER[_]SERVICE[_]");
        assert_eq!(escape_like("50%"), "50[%]");
        assert_eq!(escape_like("a[b"), "a[[]b");
        assert_eq!(escape_like("o'k"), "o''k");
    }

    proptest! {
        #[test]
        fn prop_unescape_inverts_escape(value in ".*") {
            prop_assert_eq!(unescape_literal(&escape_literal(&value)), value);
        }

        #[test]
        fn prop_nested_level_is_two_single_levels(value in ".*") {
            prop_assert_eq!(
                EscapeLevel::NestedDynamicExec.apply(&value),
                EscapeLevel::DynamicExec.apply(&EscapeLevel::DynamicExec.apply(&value))
            );
        }

        #[test]
        fn prop_escaped_literal_has_no_lone_quote(value in ".*") {
            let escaped = escape_literal(&value);
            let quotes = escaped.matches('\'').count();
            prop_assert_eq!(quotes % 2, 0);
            prop_assert!(!escaped.replace("''", "").contains('\''));
        }
    }
}
