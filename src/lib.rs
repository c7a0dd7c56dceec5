/*!
# tabdb

One in-memory SQL database shared by many browser tabs.

A single coordinator process owns the database engine. Tabs connect over
WebSocket, send commands (import a CSV file, run a query, describe a table),
and every outcome is broadcast as an event to *all* connected tabs so that
each of them converges on the same view of the data.

## Layout

- [`session`] - registry of connected client channels
- [`broadcast`] - fan-out of events to every registered session
- [`engine`] - the embedded SQL engine behind the [`Engine`](engine::Engine) trait
- [`lifecycle`] - engine readiness state machine
- [`ingest`] - CSV to table pipeline
- [`router`] - command dispatch and error conversion
- [`coordinator`] - the worker thread that serializes all engine access
- [`protocol`] - wire format of commands and events

## Example

```rust,ignore
use tabdb::{Coordinator, CoordinatorConfig};

let coordinator = Coordinator::start(CoordinatorConfig::default())?;
let (session, mut events) = coordinator.connect();
coordinator.submit(&session, r#"{"command":"EXECUTE_QUERY","payload":{"requestId":"1","query":"SELECT 1"}}"#);
```
*/

pub mod broadcast;
pub mod coordinator;
pub mod engine;
pub mod ingest;
pub mod lifecycle;
pub mod protocol;
pub mod router;
pub mod session;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use lifecycle::EngineState;
pub use protocol::{Command, Event};
pub use session::SessionId;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Errors raised inside the coordinator.
///
/// Every variant except [`TabdbError::ChannelError`] is turned into a
/// broadcast event by the router.
#[derive(Debug, thiserror::Error)]
pub enum TabdbError {
    #[error("Database not ready yet. Please wait for initialization to complete.")]
    NotReady,

    #[error("CSV parse error: {0}")]
    ParseError(String),

    #[error("{0}")]
    EngineError(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Command queue is full ({0} pending commands), try again later")]
    QueueFull(usize),

    #[error("Channel error: {0}")]
    ChannelError(String),
}

pub type Result<T> = std::result::Result<T, TabdbError>;
