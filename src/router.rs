//! Command admission and dispatch
//!
//! This is the single place where internal failures become protocol-visible
//! events. Admission runs on the socket task as soon as a message arrives
//! (envelope parsing and the readiness check); dispatch runs on the engine
//! worker and always yields exactly one event per command.

use tracing::{info, warn};

use crate::engine::Engine;
use crate::ingest::{self, ImportRequest};
use crate::lifecycle::{EngineLifecycle, EngineState};
use crate::protocol::{
    ColumnSchema, Command, Event, ExecuteQuery, GetTableInfo, ImportFile, RawCommand,
};
use crate::{Result, TabdbError};

/// Check an inbound message before it is queued for the engine.
///
/// Returns the command to run, or the error event to broadcast instead.
pub fn admit(text: &str, state: EngineState) -> std::result::Result<Command, Event> {
    let raw = RawCommand::from_json(text).map_err(|e| {
        warn!("Rejected malformed message: {}", e);
        Event::error(None, &e)
    })?;
    let request_id = raw.request_id();

    if state != EngineState::Ready {
        warn!(
            command = %raw.command,
            state = ?state,
            "Command received but database not ready yet"
        );
        return Err(Event::error(request_id, &TabdbError::NotReady));
    }

    raw.into_command().map_err(|e| {
        warn!("Rejected command: {}", e);
        Event::error(request_id, &e)
    })
}

/// Runs admitted commands against the engine.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    /// Maximum rows included in a query result (0 = unlimited)
    sql_max_rows: usize,
}

impl CommandRouter {
    pub fn new(sql_max_rows: usize) -> Self {
        Self { sql_max_rows }
    }

    /// Run one command to completion and describe the outcome.
    pub fn dispatch(&self, lifecycle: &mut EngineLifecycle, command: Command) -> Event {
        info!(
            command = command.kind(),
            request_id = command.request_id(),
            "Processing command"
        );

        match command {
            Command::ImportFile(import) => self.handle_import(lifecycle, import),
            Command::ExecuteQuery(query) => self.handle_query(lifecycle, query),
            Command::GetTableInfo(info) => self.handle_table_info(lifecycle, info),
        }
    }

    fn handle_import(&self, lifecycle: &mut EngineLifecycle, import: ImportFile) -> Event {
        let ImportFile {
            request_id,
            file_buffer,
            desired_table_name,
            separator,
            has_headers,
            position,
        } = import;

        let engine = match lifecycle.engine_mut() {
            Ok(engine) => engine,
            Err(e) => return Event::error(Some(request_id), &e),
        };

        let bytes = file_buffer.into_bytes();
        let result = ingest::import_csv(
            engine,
            ImportRequest {
                bytes: &bytes,
                table_name: &desired_table_name,
                separator: &separator,
                has_headers,
                position,
            },
        );

        match result {
            Ok(table) => Event::TableCreated {
                request_id,
                node: table.into(),
            },
            Err(e) => {
                warn!("Error importing file for table '{}': {}", desired_table_name, e);
                Event::ImportError {
                    request_id,
                    error: e.to_string(),
                }
            }
        }
    }

    fn handle_query(&self, lifecycle: &EngineLifecycle, query: ExecuteQuery) -> Event {
        let ExecuteQuery { request_id, query } = query;

        let engine = match lifecycle.engine() {
            Ok(engine) => engine,
            Err(e) => return Event::error(Some(request_id), &e),
        };

        info!("Executing SQL: {} chars", query.len());
        match engine.execute_sql(&query) {
            Ok(result) => {
                let row_count = result.rows.len();
                let mut data = result.rows;
                let truncated = self.sql_max_rows > 0 && row_count > self.sql_max_rows;
                if truncated {
                    info!(
                        "Truncating SQL results from {} to {} rows",
                        row_count, self.sql_max_rows
                    );
                    data.truncate(self.sql_max_rows);
                }

                Event::QueryResult {
                    request_id,
                    query,
                    data,
                    columns: result.columns,
                    row_count,
                    truncated,
                }
            }
            Err(e) => Event::QueryError {
                request_id,
                query,
                error: e.to_string(),
            },
        }
    }

    fn handle_table_info(&self, lifecycle: &EngineLifecycle, info: GetTableInfo) -> Event {
        let GetTableInfo {
            request_id,
            table_name,
        } = info;

        let engine = match lifecycle.engine() {
            Ok(engine) => engine,
            Err(e) => return Event::error(Some(request_id), &e),
        };

        match describe(engine, &table_name) {
            Ok((schema, row_count)) => Event::TableInfo {
                request_id,
                table_name,
                schema,
                row_count,
            },
            Err(e) => Event::TableInfoError {
                request_id,
                table_name,
                error: e.to_string(),
            },
        }
    }
}

fn describe(engine: &dyn Engine, table_name: &str) -> Result<(Vec<ColumnSchema>, u64)> {
    let schema = engine.table_schema(table_name)?;
    let row_count = engine.row_count(table_name)?;
    Ok((schema, row_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::engine;
    use crate::session::SessionRegistry;
    use serde_json::{json, Value};

    fn ready_lifecycle() -> EngineLifecycle {
        let broadcaster = Broadcaster::new(SessionRegistry::new(8));
        let (mut lifecycle, _rx) = EngineLifecycle::new();
        lifecycle.initialize(
            Box::new(|| engine::from_connection_string("sqlite://memory")),
            &broadcaster,
        );
        lifecycle
    }

    fn run(router: &CommandRouter, lifecycle: &mut EngineLifecycle, text: &str) -> Value {
        let command = admit(text, lifecycle.current_state()).unwrap();
        let event = router.dispatch(lifecycle, command);
        serde_json::from_str(&event.to_json()).unwrap()
    }

    const IMPORT_PEOPLE: &str = r#"{"command":"IMPORT_FILE","payload":{"requestId":"imp-1","fileBuffer":"id,name\n1,Alice\n2,Bob\n","desiredTableName":"people","separator":",","hasHeaders":true}}"#;

    #[test]
    fn test_admit_rejects_when_not_ready() {
        let event = admit(IMPORT_PEOPLE, EngineState::Initializing).unwrap_err();
        assert_eq!(event.name(), "ERROR");
        assert_eq!(event.request_id(), Some("imp-1"));
    }

    #[test]
    fn test_admit_unknown_command() {
        let event = admit(
            r#"{"command":"VACUUM","payload":{"requestId":"v"}}"#,
            EngineState::Ready,
        )
        .unwrap_err();
        let Event::GenericError { request_id, error } = event else {
            panic!("expected generic error");
        };
        assert_eq!(request_id.as_deref(), Some("v"));
        assert!(error.contains("VACUUM"));
    }

    #[test]
    fn test_admit_malformed_json() {
        let event = admit("{oops", EngineState::Ready).unwrap_err();
        assert_eq!(event.name(), "ERROR");
        assert_eq!(event.request_id(), None);
    }

    #[test]
    fn test_import_then_query() {
        let router = CommandRouter::new(10_000);
        let mut lifecycle = ready_lifecycle();

        let created = run(&router, &mut lifecycle, IMPORT_PEOPLE);
        assert_eq!(created["event"], "NODE_CREATED");
        assert_eq!(created["payload"]["requestId"], "imp-1");
        assert_eq!(created["payload"]["node"]["data"]["rowCount"], 2);

        let result = run(
            &router,
            &mut lifecycle,
            r#"{"command":"EXECUTE_QUERY","payload":{"requestId":"q-1","query":"SELECT COUNT(*) AS c FROM people"}}"#,
        );
        assert_eq!(result["event"], "QUERY_RESULT");
        assert_eq!(result["payload"]["requestId"], "q-1");
        assert_eq!(result["payload"]["data"], json!([{"c": 2}]));
        assert_eq!(result["payload"]["query"], "SELECT COUNT(*) AS c FROM people");
    }

    #[test]
    fn test_import_error_is_correlated() {
        let router = CommandRouter::new(10_000);
        let mut lifecycle = ready_lifecycle();

        let event = run(
            &router,
            &mut lifecycle,
            r#"{"command":"IMPORT_FILE","payload":{"requestId":"bad","fileBuffer":"","desiredTableName":"t"}}"#,
        );
        assert_eq!(event["event"], "IMPORT_ERROR");
        assert_eq!(event["payload"]["requestId"], "bad");
        assert!(event["payload"]["error"].as_str().unwrap().contains("CSV"));
    }

    #[test]
    fn test_query_error_is_verbatim() {
        let router = CommandRouter::new(10_000);
        let mut lifecycle = ready_lifecycle();

        let event = run(
            &router,
            &mut lifecycle,
            r#"{"command":"EXECUTE_QUERY","payload":{"requestId":"q","query":"SELECT * FROM missing"}}"#,
        );
        assert_eq!(event["event"], "QUERY_ERROR");
        assert_eq!(event["payload"]["requestId"], "q");
        assert!(event["payload"]["error"]
            .as_str()
            .unwrap()
            .contains("no such table: missing"));
    }

    #[test]
    fn test_query_truncation() {
        let router = CommandRouter::new(1);
        let mut lifecycle = ready_lifecycle();
        run(&router, &mut lifecycle, IMPORT_PEOPLE);

        let event = run(
            &router,
            &mut lifecycle,
            r#"{"command":"EXECUTE_QUERY","payload":{"requestId":"q","query":"SELECT * FROM people ORDER BY id"}}"#,
        );
        assert_eq!(event["payload"]["data"].as_array().unwrap().len(), 1);
        assert_eq!(event["payload"]["rowCount"], 2);
        assert_eq!(event["payload"]["truncated"], true);
        assert_eq!(event["payload"]["columns"], json!(["id", "name"]));
    }

    #[test]
    fn test_table_info() {
        let router = CommandRouter::new(10_000);
        let mut lifecycle = ready_lifecycle();
        run(&router, &mut lifecycle, IMPORT_PEOPLE);

        let event = run(
            &router,
            &mut lifecycle,
            r#"{"command":"GET_TABLE_INFO","payload":{"requestId":"i","tableName":"people"}}"#,
        );
        assert_eq!(event["event"], "TABLE_INFO");
        assert_eq!(event["payload"]["tableName"], "people");
        assert_eq!(event["payload"]["rowCount"], 2);
        assert_eq!(event["payload"]["schema"][1]["name"], "name");
    }

    #[test]
    fn test_table_info_for_missing_table() {
        let router = CommandRouter::new(10_000);
        let mut lifecycle = ready_lifecycle();

        let event = run(
            &router,
            &mut lifecycle,
            r#"{"command":"GET_TABLE_INFO","payload":{"requestId":"i","tableName":"ghost"}}"#,
        );
        assert_eq!(event["event"], "TABLE_INFO_ERROR");
        assert_eq!(event["payload"]["requestId"], "i");
        assert_eq!(event["payload"]["tableName"], "ghost");
        assert!(!event["payload"]["error"].as_str().unwrap().is_empty());
    }
}
