//! Wire format between browser tabs and the coordinator
//!
//! Clients send commands shaped as `{"command": ..., "payload": {...}}` and
//! receive events shaped as `{"event": ..., "payload": {...}}`. Every command
//! payload carries a client-generated `requestId` that is echoed unchanged in
//! the resulting event, since events are broadcast to every tab and the
//! originating tab has to pick its own reply out of the stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Result, TabdbError};

/// A result or sample row, keyed by column name in column order.
pub type Row = serde_json::Map<String, Value>;

// ============================================================================
// Shared Types
// ============================================================================

/// Canvas coordinate where the client wants the table node placed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Default for Position {
    fn default() -> Self {
        Self { x: 100.0, y: 100.0 }
    }
}

/// One column as reported by the engine catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub ordinal_position: i64,
    pub name: String,
    pub declared_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
}

/// Authoritative metadata snapshot of one imported table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub table_name: String,
    pub schema: Vec<ColumnSchema>,
    pub row_count: u64,
    pub sample: Vec<Row>,
    pub position: Position,
    /// Display-only type guesses, never used to create the table
    pub inferred_types: serde_json::Map<String, Value>,
    /// Non-fatal problems noticed while parsing the input
    pub warnings: Vec<String>,
}

/// `NODE_CREATED.payload.node`: a table descriptor in the shape the canvas renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub position: Position,
    pub data: TableNodeData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableNodeData {
    pub schema: Vec<ColumnSchema>,
    pub row_count: u64,
    pub sample: Vec<Row>,
    pub inferred_types: serde_json::Map<String, Value>,
    pub warnings: Vec<String>,
}

impl From<TableDescriptor> for TableNode {
    fn from(table: TableDescriptor) -> Self {
        TableNode {
            id: table.table_name,
            node_type: "table".to_string(),
            position: table.position,
            data: TableNodeData {
                schema: table.schema,
                row_count: table.row_count,
                sample: table.sample,
                inferred_types: table.inferred_types,
                warnings: table.warnings,
            },
        }
    }
}

// ============================================================================
// Commands (client -> coordinator)
// ============================================================================

/// Raw bytes of an uploaded file.
///
/// Accepted either as an array of byte values or as a plain string holding
/// the file text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FileBuffer {
    Bytes(Vec<u8>),
    Text(String),
}

impl FileBuffer {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            FileBuffer::Bytes(bytes) => bytes,
            FileBuffer::Text(text) => text.into_bytes(),
        }
    }
}

fn default_separator() -> String {
    ",".to_string()
}

fn default_has_headers() -> bool {
    true
}

/// Payload of `IMPORT_FILE`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportFile {
    pub request_id: String,
    pub file_buffer: FileBuffer,
    pub desired_table_name: String,
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default = "default_has_headers")]
    pub has_headers: bool,
    #[serde(default)]
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteQuery {
    pub request_id: String,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTableInfo {
    pub request_id: String,
    pub table_name: String,
}

/// A fully validated inbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ImportFile(ImportFile),
    ExecuteQuery(ExecuteQuery),
    GetTableInfo(GetTableInfo),
}

impl Command {
    /// Wire name of the command kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::ImportFile(_) => "IMPORT_FILE",
            Command::ExecuteQuery(_) => "EXECUTE_QUERY",
            Command::GetTableInfo(_) => "GET_TABLE_INFO",
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Command::ImportFile(c) => &c.request_id,
            Command::ExecuteQuery(c) => &c.request_id,
            Command::GetTableInfo(c) => &c.request_id,
        }
    }
}

/// Envelope as received, before the payload is checked against the kind.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCommand {
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

impl RawCommand {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TabdbError::InvalidCommand(e.to_string()))
    }

    /// The correlation token, when the payload carries a string `requestId`.
    pub fn request_id(&self) -> Option<String> {
        self.payload
            .get("requestId")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Check the payload against the command kind.
    pub fn into_command(self) -> Result<Command> {
        fn payload<T: serde::de::DeserializeOwned>(kind: &str, value: Value) -> Result<T> {
            serde_json::from_value(value)
                .map_err(|e| TabdbError::InvalidCommand(format!("{} payload: {}", kind, e)))
        }

        match self.command.as_str() {
            "IMPORT_FILE" => Ok(Command::ImportFile(payload(&self.command, self.payload)?)),
            "EXECUTE_QUERY" => Ok(Command::ExecuteQuery(payload(&self.command, self.payload)?)),
            "GET_TABLE_INFO" => Ok(Command::GetTableInfo(payload(&self.command, self.payload)?)),
            _ => Err(TabdbError::UnknownCommand(self.command)),
        }
    }
}

// ============================================================================
// Events (coordinator -> every client)
// ============================================================================

/// Outbound notification, broadcast to every connected session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum Event {
    #[serde(rename = "DB_INITIALIZED")]
    EngineReady { tables: Vec<String> },

    #[serde(rename = "DB_INIT_ERROR")]
    EngineInitError { error: String },

    #[serde(rename = "NODE_CREATED", rename_all = "camelCase")]
    TableCreated { request_id: String, node: TableNode },

    #[serde(rename = "IMPORT_ERROR", rename_all = "camelCase")]
    ImportError { request_id: String, error: String },

    #[serde(rename = "QUERY_RESULT", rename_all = "camelCase")]
    QueryResult {
        request_id: String,
        query: String,
        data: Vec<Row>,
        columns: Vec<String>,
        row_count: usize,
        truncated: bool,
    },

    #[serde(rename = "QUERY_ERROR", rename_all = "camelCase")]
    QueryError {
        request_id: String,
        query: String,
        error: String,
    },

    #[serde(rename = "TABLE_INFO", rename_all = "camelCase")]
    TableInfo {
        request_id: String,
        table_name: String,
        schema: Vec<ColumnSchema>,
        row_count: u64,
    },

    #[serde(rename = "TABLE_INFO_ERROR", rename_all = "camelCase")]
    TableInfoError {
        request_id: String,
        table_name: String,
        error: String,
    },

    #[serde(rename = "ERROR", rename_all = "camelCase")]
    GenericError {
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        error: String,
    },
}

impl Event {
    /// Wire name of the event kind.
    pub fn name(&self) -> &'static str {
        match self {
            Event::EngineReady { .. } => "DB_INITIALIZED",
            Event::EngineInitError { .. } => "DB_INIT_ERROR",
            Event::TableCreated { .. } => "NODE_CREATED",
            Event::ImportError { .. } => "IMPORT_ERROR",
            Event::QueryResult { .. } => "QUERY_RESULT",
            Event::QueryError { .. } => "QUERY_ERROR",
            Event::TableInfo { .. } => "TABLE_INFO",
            Event::TableInfoError { .. } => "TABLE_INFO_ERROR",
            Event::GenericError { .. } => "ERROR",
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            Event::EngineReady { .. } | Event::EngineInitError { .. } => None,
            Event::TableCreated { request_id, .. }
            | Event::ImportError { request_id, .. }
            | Event::QueryResult { request_id, .. }
            | Event::QueryError { request_id, .. }
            | Event::TableInfo { request_id, .. }
            | Event::TableInfoError { request_id, .. } => Some(request_id),
            Event::GenericError { request_id, .. } => request_id.as_deref(),
        }
    }

    /// A generic error correlated to `request_id`.
    pub fn error(request_id: Option<String>, err: &TabdbError) -> Self {
        Event::GenericError {
            request_id,
            error: err.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        // Every field is a string, number, bool or JSON value; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"event":"ERROR","payload":{{"error":"failed to serialize event: {}"}}}}"#,
                e
            )
        })
    }
}
