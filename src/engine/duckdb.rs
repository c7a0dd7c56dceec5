//! DuckDB engine, enabled with the `duckdb` feature

use duckdb::types::Value as DuckValue;
use duckdb::{params_from_iter, Connection};
use serde_json::Value;

use super::{create_table_sql, float_to_json, insert_sql, quote_identifier, Engine, ResultSet, TextRow};
use crate::protocol::Row;
use crate::{Result, TabdbError};

fn engine_err(e: duckdb::Error) -> TabdbError {
    TabdbError::EngineError(e.to_string())
}

pub struct DuckDbEngine {
    conn: Connection,
}

impl DuckDbEngine {
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            TabdbError::EngineError(format!("Failed to open in-memory DuckDB database: {}", e))
        })?;
        Ok(Self { conn })
    }
}

fn value_to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(v) => Value::Number(v.into()),
        DuckValue::SmallInt(v) => Value::Number(v.into()),
        DuckValue::Int(v) => Value::Number(v.into()),
        DuckValue::BigInt(v) => Value::Number(v.into()),
        DuckValue::HugeInt(v) => match i64::try_from(v) {
            Ok(v) => Value::Number(v.into()),
            Err(_) => Value::String(v.to_string()),
        },
        DuckValue::UTinyInt(v) => Value::Number(v.into()),
        DuckValue::USmallInt(v) => Value::Number(v.into()),
        DuckValue::UInt(v) => Value::Number(v.into()),
        DuckValue::UBigInt(v) => Value::Number(v.into()),
        DuckValue::Float(v) => float_to_json(v as f64),
        DuckValue::Double(v) => float_to_json(v),
        DuckValue::Text(s) => Value::String(s),
        DuckValue::Blob(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        other => {
            tracing::debug!("Converting unsupported DuckDB value to string: {:?}", other);
            Value::String(format!("{:?}", other))
        }
    }
}

impl Engine for DuckDbEngine {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn execute_sql(&self, sql: &str) -> Result<ResultSet> {
        let mut stmt = self.conn.prepare(sql).map_err(engine_err)?;
        let mut cursor = stmt.query([]).map_err(engine_err)?;
        // DuckDB only knows the result shape once the statement has run.
        let columns: Vec<String> = cursor
            .as_ref()
            .map(|stmt| stmt.column_names())
            .unwrap_or_default();

        let mut rows = Vec::new();
        while let Some(row) = cursor.next().map_err(engine_err)? {
            let mut obj = Row::new();
            for (idx, name) in columns.iter().enumerate() {
                let value: DuckValue = row.get(idx).map_err(engine_err)?;
                obj.insert(name.clone(), value_to_json(value));
            }
            rows.push(obj);
        }

        Ok(ResultSet { columns, rows })
    }

    fn replace_table(&mut self, name: &str, columns: &[String], rows: &[TextRow]) -> Result<()> {
        let tx = self.conn.transaction().map_err(engine_err)?;

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

        tx.commit().map_err(engine_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duckdb_round_trip() {
        let mut engine = DuckDbEngine::open_in_memory().unwrap();
        engine
            .replace_table(
                "people",
                &["id".to_string(), "name".to_string()],
                &[
                    vec![Some("1".to_string()), Some("Alice".to_string())],
                    vec![Some("2".to_string()), None],
                ],
            )
            .unwrap();

        assert_eq!(engine.row_count("people").unwrap(), 2);

        let schema = engine.table_schema("people").unwrap();
        assert_eq!(schema[1].name, "name");
        assert_eq!(schema[1].declared_type, "VARCHAR");

        let result = engine
            .execute_sql("SELECT name FROM people ORDER BY id")
            .unwrap();
        assert_eq!(result.rows[0]["name"], "Alice");
        assert!(result.rows[1]["name"].is_null());
    }
}
