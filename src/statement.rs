//! Parameterized statements.
//!
//! Templates use two placeholder kinds: `??` takes an identifier (table or
//! column name) which is quoted for the target dialect, and `?` takes a value
//! which is bound by the driver. Names and data therefore never reach the SQL
//! text unescaped.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// SQL flavour of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    MySql,
    Sqlite,
}

impl Dialect {
    /// Quote an identifier. Dotted names are quoted per segment.
    pub fn quote_identifier(&self, identifier: &str) -> String {
        let quote = match self {
            Dialect::MySql => '`',
            Dialect::Sqlite => '"',
        };
        identifier
            .split('.')
            .map(|segment| {
                let escaped = segment.replace(quote, &format!("{quote}{quote}"));
                format!("{quote}{escaped}{quote}")
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Integer(i64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

/// One positional parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Identifier(String),
    Value(SqlValue),
}

/// Whether the statement produces a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Query,
    Execute,
}

/// A statement template plus its positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    params: Vec<Param>,
    kind: StatementKind,
}

impl Statement {
    /// A statement that returns rows.
    pub fn query(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            kind: StatementKind::Query,
        }
    }

    /// A statement that only reports affected rows.
    pub fn execute(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            kind: StatementKind::Execute,
        }
    }

    /// Append an identifier parameter.
    pub fn ident(mut self, identifier: impl Into<String>) -> Self {
        self.params.push(Param::Identifier(identifier.into()));
        self
    }

    /// Append a value parameter.
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(Param::Value(value.into()));
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Expand identifiers into the SQL text and collect the values to bind.
    ///
    /// Fails if a placeholder is matched with the wrong parameter kind or
    /// the counts differ.
    pub fn render(&self, dialect: Dialect) -> Result<(String, Vec<SqlValue>)> {
        let mut sql = String::with_capacity(self.sql.len() + 16);
        let mut values = Vec::new();
        let mut params = self.params.iter();
        let mut chars = self.sql.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '?' {
                sql.push(c);
                continue;
            }
            if chars.peek() == Some(&'?') {
                chars.next();
                match params.next() {
                    Some(Param::Identifier(name)) => sql.push_str(&dialect.quote_identifier(name)),
                    Some(Param::Value(_)) => {
                        return Err(StoreError::Statement(
                            "value supplied for an identifier placeholder".to_string(),
                        ))
                    }
                    None => return Err(self.count_mismatch()),
                }
            } else {
                match params.next() {
                    Some(Param::Value(value)) => {
                        sql.push('?');
                        values.push(value.clone());
                    }
                    Some(Param::Identifier(_)) => {
                        return Err(StoreError::Statement(
                            "identifier supplied for a value placeholder".to_string(),
                        ))
                    }
                    None => return Err(self.count_mismatch()),
                }
            }
        }

        if params.next().is_some() {
            return Err(self.count_mismatch());
        }
        Ok((sql, values))
    }

    fn count_mismatch(&self) -> StoreError {
        StoreError::Statement(format!(
            "placeholder count does not match {} parameter(s) in: {}",
            self.params.len(),
            self.sql
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(Dialect::MySql.quote_identifier("sessions"), "`sessions`");
        assert_eq!(Dialect::Sqlite.quote_identifier("sessions"), "\"sessions\"");
        assert_eq!(Dialect::MySql.quote_identifier("web.sessions"), "`web`.`sessions`");
    }

    #[test]
    fn test_quote_identifier_escapes_quotes() {
        assert_eq!(Dialect::MySql.quote_identifier("a`b"), "`a``b`");
        assert_eq!(Dialect::Sqlite.quote_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_render_mixed_placeholders() {
        let statement = Statement::query("SELECT ?? AS data FROM ?? WHERE ?? = ?")
            .ident("payload")
            .ident("sessions")
            .ident("sid")
            .bind("abc");

        let (sql, values) = statement.render(Dialect::MySql).unwrap();
        assert_eq!(sql, "SELECT `payload` AS data FROM `sessions` WHERE `sid` = ?");
        assert_eq!(values, vec![SqlValue::Text("abc".to_string())]);

        let (sql, _) = statement.render(Dialect::Sqlite).unwrap();
        assert_eq!(sql, "SELECT \"payload\" AS data FROM \"sessions\" WHERE \"sid\" = ?");
    }

    #[test]
    fn test_render_injection_stays_quoted() {
        let (sql, values) = Statement::execute("DELETE FROM ?? WHERE ?? = ?")
            .ident("sessions`; DROP TABLE users; --")
            .ident("session_id")
            .bind("x' OR '1'='1")
            .render(Dialect::MySql)
            .unwrap();

        assert_eq!(
            sql,
            "DELETE FROM `sessions``; DROP TABLE users; --` WHERE `session_id` = ?"
        );
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_render_kind_mismatch() {
        let err = Statement::query("SELECT * FROM ??")
            .bind(1i64)
            .render(Dialect::Sqlite)
            .unwrap_err();
        assert!(matches!(err, StoreError::Statement(_)));

        let err = Statement::query("SELECT * FROM t WHERE x = ?")
            .ident("x")
            .render(Dialect::Sqlite)
            .unwrap_err();
        assert!(matches!(err, StoreError::Statement(_)));
    }

    #[test]
    fn test_render_count_mismatch() {
        let err = Statement::query("SELECT * FROM ?? WHERE ?? = ?")
            .ident("t")
            .render(Dialect::Sqlite)
            .unwrap_err();
        assert!(matches!(err, StoreError::Statement(_)));

        let err = Statement::query("DELETE FROM ??")
            .ident("t")
            .bind(1i64)
            .render(Dialect::Sqlite)
            .unwrap_err();
        assert!(matches!(err, StoreError::Statement(_)));
    }
}
