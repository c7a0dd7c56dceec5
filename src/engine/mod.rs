//! Embedded SQL engine abstraction
//!
//! The coordinator treats the database as a capability: run SQL, get back
//! column names and rows. Backends implement the [`Engine`] trait and are
//! chosen by connection string:
//!
//! - `sqlite://memory` (default, feature `sqlite`)
//! - `duckdb://memory` (feature `duckdb`)
//!
//! Only in-memory databases are supported; nothing survives a restart.
//!
//! # Example
//!
//! ```rust,ignore
//! use tabdb::engine::{self, Engine};
//!
//! let mut engine = engine::from_connection_string("sqlite://memory")?;
//! engine.replace_table("people", &["id".into()], &[vec![Some("1".into())]])?;
//! let result = engine.execute_sql("SELECT COUNT(*) AS c FROM people")?;
//! ```

use serde_json::Value;

use crate::protocol::{ColumnSchema, Row};
use crate::{Result, TabdbError};

#[cfg(feature = "duckdb")]
pub mod duckdb;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "duckdb")]
pub use self::duckdb::DuckDbEngine;
#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteEngine;

/// Rows and column names returned by a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// A text-valued row ready for insertion; `None` is stored as NULL.
pub type TextRow = Vec<Option<String>>;

/// An embedded SQL database owned by exactly one coordinator.
pub trait Engine: Send {
    /// Backend name, for logs and the health endpoint
    fn name(&self) -> &'static str;

    /// Execute arbitrary SQL and return the rows it produced
    ///
    /// # Errors
    ///
    /// Returns `TabdbError::EngineError` carrying the backend's own message
    /// when the statement fails.
    fn execute_sql(&self, sql: &str) -> Result<ResultSet>;

    /// Create (or replace) a table of `TEXT` columns and fill it with `rows`
    ///
    /// All-or-nothing: on failure the previous table of that name, if any,
    /// is left untouched and no rows are inserted.
    fn replace_table(&mut self, name: &str, columns: &[String], rows: &[TextRow]) -> Result<()>;

    /// Column catalog of a table, in declaration order
    fn table_schema(&self, name: &str) -> Result<Vec<ColumnSchema>> {
        let result = self.execute_sql(&format!("PRAGMA table_info({})", quote_literal(name)))?;
        if result.rows.is_empty() {
            return Err(TabdbError::EngineError(format!("no such table: {}", name)));
        }

        Ok(result
            .rows
            .iter()
            .map(|row| ColumnSchema {
                ordinal_position: row.get("cid").and_then(Value::as_i64).unwrap_or_default(),
                name: row
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                declared_type: row
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                nullable: !row.get("notnull").map(json_flag).unwrap_or(false),
                is_primary_key: row.get("pk").map(json_flag).unwrap_or(false),
            })
            .collect())
    }

    /// Number of rows currently in a table
    fn row_count(&self, name: &str) -> Result<u64> {
        let result = self.execute_sql(&format!(
            "SELECT COUNT(*) AS row_count FROM {}",
            quote_identifier(name)
        ))?;
        result
            .rows
            .first()
            .and_then(|row| row.get("row_count"))
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                TabdbError::EngineError(format!("could not count rows of table {}", name))
            })
    }

    /// Up to `limit` rows of a table, in storage order
    fn sample(&self, name: &str, limit: usize) -> Result<Vec<Row>> {
        let result = self.execute_sql(&format!(
            "SELECT * FROM {} LIMIT {}",
            quote_identifier(name),
            limit
        ))?;
        Ok(result.rows)
    }
}

/// Open an engine from a connection string such as `sqlite://memory`.
pub fn from_connection_string(uri: &str) -> Result<Box<dyn Engine>> {
    let (scheme, target) = uri.split_once("://").ok_or_else(|| {
        TabdbError::EngineError(format!(
            "Invalid engine connection string '{}' (expected scheme://memory)",
            uri
        ))
    })?;

    if !matches!(target, "memory" | ":memory:" | "") {
        return Err(TabdbError::EngineError(format!(
            "Only in-memory databases are supported, got '{}'",
            uri
        )));
    }

    match scheme {
        #[cfg(feature = "sqlite")]
        "sqlite" => Ok(Box::new(SqliteEngine::open_in_memory()?)),
        #[cfg(feature = "duckdb")]
        "duckdb" => Ok(Box::new(DuckDbEngine::open_in_memory()?)),
        other => Err(TabdbError::EngineError(format!(
            "Unsupported engine '{}' (compiled engines: {})",
            other,
            compiled_engines().join(", ")
        ))),
    }
}

/// Engines compiled into this build
pub fn compiled_engines() -> Vec<&'static str> {
    let mut engines = Vec::new();

    #[cfg(feature = "sqlite")]
    engines.push("sqlite");

    #[cfg(feature = "duckdb")]
    engines.push("duckdb");

    engines
}

/// Quote a name as an SQL identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a value as an SQL string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `CREATE TABLE` statement declaring every column as `TEXT`.
pub(crate) fn create_table_sql(name: &str, columns: &[String]) -> String {
    let columns: Vec<String> = columns
        .iter()
        .map(|c| format!("{} TEXT", quote_identifier(c)))
        .collect();
    format!(
        "CREATE TABLE {} ({})",
        quote_identifier(name),
        columns.join(", ")
    )
}

/// Parameterized `INSERT` for a table with `width` columns.
pub(crate) fn insert_sql(name: &str, width: usize) -> String {
    let placeholders = vec!["?"; width].join(", ");
    format!(
        "INSERT INTO {} VALUES ({})",
        quote_identifier(name),
        placeholders
    )
}

/// Catalog flags are integers in SQLite and booleans in DuckDB.
fn json_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().map(|n| n != 0).unwrap_or(false),
        Value::String(s) => matches!(s.as_str(), "1" | "true" | "TRUE"),
        _ => false,
    }
}

/// A JSON number for a float, or null for NaN and infinities.
pub(crate) fn float_to_json(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
