//! CSV ingestion pipeline
//!
//! Turns an uploaded file into a table:
//!
//! 1. Decode and tokenize the text ([`parse`])
//! 2. Create or replace the table with every column declared `TEXT`, and
//!    insert all rows in one transaction
//! 3. Read the catalog, row count and a small sample back from the engine,
//!    so the descriptor reflects what was actually stored
//!
//! Display type guesses ([`inference`]) ride along in the descriptor but
//! are never used to create the table.

pub mod inference;
pub mod parse;

use tracing::{debug, info};

use crate::engine::Engine;
use crate::protocol::{Position, TableDescriptor};
use crate::{Result, TabdbError};

pub use inference::infer_display_types;
pub use parse::{parse_csv, ParsedCsv};

/// Rows included in a table descriptor's preview sample.
pub const SAMPLE_ROWS: usize = 5;

/// Everything needed to import one file.
#[derive(Debug, Clone)]
pub struct ImportRequest<'a> {
    pub bytes: &'a [u8],
    pub table_name: &'a str,
    /// Single delimiter character; empty to detect
    pub separator: &'a str,
    pub has_headers: bool,
    pub position: Position,
}

/// Import delimited text as a table, replacing any table of the same name.
///
/// # Errors
///
/// - `TabdbError::InvalidCommand` for an empty table name
/// - `TabdbError::ParseError` for unreadable input
/// - `TabdbError::EngineError` when the engine rejects the table or rows;
///   nothing is changed in that case
pub fn import_csv(engine: &mut dyn Engine, request: ImportRequest<'_>) -> Result<TableDescriptor> {
    let table_name = request.table_name;
    if table_name.trim().is_empty() {
        return Err(TabdbError::InvalidCommand(
            "desiredTableName must not be empty".to_string(),
        ));
    }

    info!(
        "Importing {} bytes into table '{}'",
        request.bytes.len(),
        table_name
    );

    let parsed = parse_csv(request.bytes, request.separator, request.has_headers)?;
    debug!(
        rows = parsed.rows.len(),
        columns = parsed.headers.len(),
        "parsed CSV for '{}'",
        table_name
    );

    let inferred_types = infer_display_types(&parsed.headers, &parsed.rows);

    engine.replace_table(table_name, &parsed.headers, &parsed.rows)?;

    let schema = engine.table_schema(table_name)?;
    let row_count = engine.row_count(table_name)?;
    let sample = engine.sample(table_name, SAMPLE_ROWS)?;

    info!(
        "Created table '{}' with {} rows and {} columns",
        table_name,
        row_count,
        schema.len()
    );

    Ok(TableDescriptor {
        table_name: table_name.to_string(),
        schema,
        row_count,
        sample,
        position: request.position,
        inferred_types,
        warnings: parsed.warnings,
    })
}

/// Table name derived from a file name: extension removed, characters
/// outside `[A-Za-z0-9_]` replaced with `_`, prefixed with `table_` when it
/// does not start with a letter, lowercased.
pub fn table_name_from_file(file_name: &str) -> String {
    let stem = match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => file_name,
    };

    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        name = format!("table_{}", name);
    }
    name.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SqliteEngine;
    use proptest::prelude::*;
    use serde_json::json;

    fn request<'a>(bytes: &'a [u8], table_name: &'a str) -> ImportRequest<'a> {
        ImportRequest {
            bytes,
            table_name,
            separator: ",",
            has_headers: true,
            position: Position::default(),
        }
    }

    #[test]
    fn test_import_people() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        let table = import_csv(&mut engine, request(b"id,name\n1,Alice\n2,Bob\n", "people")).unwrap();

        assert_eq!(table.table_name, "people");
        let names: Vec<&str> = table.schema.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert!(table.schema.iter().all(|c| c.declared_type == "TEXT"));
        assert_eq!(table.row_count, 2);
        assert_eq!(
            serde_json::to_value(&table.sample).unwrap(),
            json!([{"id": "1", "name": "Alice"}, {"id": "2", "name": "Bob"}])
        );
        assert_eq!(table.inferred_types["id"], "INTEGER");
        assert_eq!(table.position, Position { x: 100.0, y: 100.0 });
    }

    #[test]
    fn test_sample_is_capped() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        let csv: String = std::iter::once("n\n".to_string())
            .chain((0..20).map(|i| format!("{}\n", i)))
            .collect();
        let table = import_csv(&mut engine, request(csv.as_bytes(), "numbers")).unwrap();

        assert_eq!(table.row_count, 20);
        assert_eq!(table.sample.len(), SAMPLE_ROWS);
    }

    #[test]
    fn test_reimport_replaces() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        import_csv(&mut engine, request(b"a\n1\n2\n3\n", "t")).unwrap();
        let table = import_csv(&mut engine, request(b"b,c\nx,y\n", "t")).unwrap();

        assert_eq!(table.row_count, 1);
        assert_eq!(engine.row_count("t").unwrap(), 1);
        assert_eq!(table.schema.len(), 2);
    }

    #[test]
    fn test_reserved_word_names_are_quoted() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        let table = import_csv(&mut engine, request(b"select,from\n1,2\n", "order")).unwrap();
        assert_eq!(table.schema[0].name, "select");
        assert_eq!(table.row_count, 1);
    }

    #[test]
    fn test_parse_failure_leaves_engine_untouched() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        import_csv(&mut engine, request(b"a\n1\n", "t")).unwrap();

        let err = import_csv(&mut engine, request(b"a\n", "t")).unwrap_err();
        assert!(matches!(err, TabdbError::ParseError(_)));
        assert_eq!(engine.row_count("t").unwrap(), 1);
    }

    #[test]
    fn test_empty_table_name_is_rejected() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        assert!(matches!(
            import_csv(&mut engine, request(b"a\n1\n", "  ")),
            Err(TabdbError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_duplicate_headers_survive_import() {
        let mut engine = SqliteEngine::open_in_memory().unwrap();
        let table = import_csv(&mut engine, request(b"x,x\n1,2\n", "dups")).unwrap();
        let names: Vec<&str> = table.schema.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["x", "x_2"]);
        assert_eq!(table.sample[0]["x_2"], "2");
        assert_eq!(table.warnings.len(), 1);
    }

    #[test]
    fn test_table_name_from_file() {
        assert_eq!(table_name_from_file("Sales Report.csv"), "sales_report");
        assert_eq!(table_name_from_file("2024-data.tsv"), "table_2024_data");
        assert_eq!(table_name_from_file("people"), "people");
        assert_eq!(table_name_from_file(".hidden"), "table__hidden");
        assert_eq!(table_name_from_file("export."), "export");
    }

    proptest! {
        #[test]
        fn prop_row_count_matches_input(
            rows in prop::collection::vec(
                prop::collection::vec("[a-z0-9 ]{0,8}", 3),
                1..40,
            ),
            delimiter in prop::sample::select(vec![",", ";", "\t", "|"]),
        ) {
            let mut csv = ["a", "b", "c"].join(delimiter);
            csv.push('\n');
            for row in &rows {
                // Keep every line non-blank so it counts as a data row.
                let fields: Vec<String> = row.iter().map(|f| format!("v{}", f)).collect();
                csv.push_str(&fields.join(delimiter));
                csv.push('\n');
            }

            let mut engine = SqliteEngine::open_in_memory().unwrap();
            let table = import_csv(&mut engine, ImportRequest {
                bytes: csv.as_bytes(),
                table_name: "prop",
                separator: delimiter,
                has_headers: true,
                position: Position::default(),
            }).unwrap();

            prop_assert_eq!(table.row_count, rows.len() as u64);
            prop_assert_eq!(engine.row_count("prop").unwrap(), rows.len() as u64);
        }
    }
}
