//! SQLite engine backed by `rusqlite`

use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Batch, Connection, Statement};
use serde_json::Value;

use super::{create_table_sql, float_to_json, insert_sql, quote_identifier, Engine, ResultSet, TextRow};
use crate::protocol::Row;
use crate::{Result, TabdbError};

fn engine_err(e: rusqlite::Error) -> TabdbError {
    TabdbError::EngineError(e.to_string())
}

pub struct SqliteEngine {
    conn: Connection,
}

impl SqliteEngine {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            TabdbError::EngineError(format!("Failed to open in-memory SQLite database: {}", e))
        })?;
        Ok(Self { conn })
    }
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Number(v.into()),
        ValueRef::Real(v) => float_to_json(v),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

fn read_statement(stmt: &mut Statement<'_>) -> Result<ResultSet> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = Vec::new();

    let mut cursor = stmt.query([]).map_err(engine_err)?;
    while let Some(row) = cursor.next().map_err(engine_err)? {
        let mut obj = Row::new();
        for (idx, name) in columns.iter().enumerate() {
            obj.insert(name.clone(), value_to_json(row.get_ref(idx).map_err(engine_err)?));
        }
        rows.push(obj);
    }

    Ok(ResultSet { columns, rows })
}

impl Engine for SqliteEngine {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    /// Runs every statement in `sql`; the rows of the first statement that
    /// returns columns are reported.
    fn execute_sql(&self, sql: &str) -> Result<ResultSet> {
        let mut batch = Batch::new(&self.conn, sql);
        let mut result: Option<ResultSet> = None;

        while let Some(mut stmt) = batch.next().map_err(engine_err)? {
            let rows = read_statement(&mut stmt)?;
            if result.is_none() && !rows.columns.is_empty() {
                result = Some(rows);
            }
        }

        Ok(result.unwrap_or_default())
    }

    fn replace_table(&mut self, name: &str, columns: &[String], rows: &[TextRow]) -> Result<()> {
        // A savepoint nests inside a transaction a client may have left open.
        let tx = self.conn.savepoint().map_err(engine_err)?;

        tx.execute(&format!("DROP TABLE IF EXISTS {}", quote_identifier(name)), [])
            .map_err(engine_err)?;
        tx.execute(&create_table_sql(name, columns), [])
            .map_err(engine_err)?;
        {
            let mut insert = tx.prepare(&insert_sql(name, columns.len())).map_err(engine_err)?;
            for row in rows {
                insert
                    .execute(params_from_iter(row.iter()))
                    .map_err(engine_err)?;
            }
        }

        // Dropping an uncommitted savepoint rolls it back.
        tx.commit().map_err(engine_err)
    }
}
