/*!
tabdb coordinator server

Serves one shared in-memory database to every connected browser tab over
WebSocket. Each tab sends commands as JSON text frames and receives every
event the database produces, its own replies and everyone else's.

## Usage

```bash
tabdb-server --host 127.0.0.1 --port 3335
```

## Endpoints

- `GET /ws` - WebSocket: commands in, events out
- `GET /api/v1/health` - Engine state, session and queue counts
- `GET /api/v1/version` - Version information
*/

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::header,
    response::{Json, Response},
    routing::get,
    Router,
};
use clap::Parser;
use serde::Serialize;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tabdb::coordinator::{
    DEFAULT_QUEUE_DEPTH, DEFAULT_SESSION_BUFFER, DEFAULT_SQL_MAX_ROWS,
};
use tabdb::{Coordinator, CoordinatorConfig, EngineState, VERSION};

/// CLI arguments for the coordinator server
#[derive(Parser)]
#[command(name = "tabdb-server")]
#[command(about = "Shared in-memory database for browser tabs")]
#[command(version = VERSION)]
struct Cli {
    /// Host address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind to
    #[arg(long, default_value = "3335")]
    port: u16,

    /// CORS allowed origins (comma-separated)
    #[arg(long, default_value = "*")]
    cors_origin: String,

    /// Engine connection string (sqlite://memory, duckdb://memory)
    #[arg(long, default_value = "sqlite://memory")]
    engine: String,

    /// Commands that may wait for the engine before new ones are rejected
    #[arg(long, default_value_t = DEFAULT_QUEUE_DEPTH)]
    queue_depth: usize,

    /// Events buffered per tab before a slow tab is disconnected
    #[arg(long, default_value_t = DEFAULT_SESSION_BUFFER)]
    session_buffer: usize,

    /// Maximum rows returned per query (0 = unlimited)
    #[arg(long, default_value_t = DEFAULT_SQL_MAX_ROWS)]
    sql_max_rows: usize,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    coordinator: Coordinator,
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: String,
    engine: String,
    state: EngineState,
    sessions: usize,
    pending_commands: usize,
}

/// Version response
#[derive(Debug, Serialize)]
struct VersionResponse {
    version: String,
    features: Vec<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /ws - One browser tab
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.coordinator))
}

async fn handle_socket(mut socket: WebSocket, coordinator: Coordinator) {
    let (session, mut events) = coordinator.connect();

    loop {
        tokio::select! {
            frame = events.recv() => match frame {
                Some(frame) => {
                    if socket.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
                // Dropped by the registry: the tab stopped keeping up.
                None => {
                    warn!(session = %session, "Session evicted, closing socket");
                    break;
                }
            },
            message = socket.recv() => match message {
                Some(Ok(Message::Text(text))) => coordinator.submit(&session, &text),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => coordinator.submit(&session, text),
                    Err(_) => warn!(session = %session, "Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(session = %session, "WebSocket error: {}", e);
                    break;
                }
            },
        }
    }

    coordinator.disconnect(&session);
}

/// GET /api/v1/health - Health check
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let coordinator = &state.coordinator;
    let engine_state = coordinator.state();
    let status = match engine_state {
        EngineState::Ready => "healthy",
        EngineState::Uninitialized | EngineState::Initializing => "starting",
        EngineState::Failed => "unhealthy",
    };

    Json(HealthResponse {
        status,
        version: VERSION.to_string(),
        engine: coordinator.engine().to_string(),
        state: engine_state,
        sessions: coordinator.session_count(),
        pending_commands: coordinator.pending_commands(),
    })
}

/// GET /api/v1/version - Version information
async fn version_handler() -> Json<VersionResponse> {
    let mut features = Vec::new();

    #[cfg(feature = "sqlite")]
    features.push("sqlite".to_string());

    #[cfg(feature = "duckdb")]
    features.push("duckdb".to_string());

    Json(VersionResponse {
        version: VERSION.to_string(),
        features,
    })
}

/// GET / - Root
async fn root_handler() -> &'static str {
    "tabdb coordinator - connect a WebSocket to /ws, see /api/v1/health for status"
}

fn build_router(coordinator: Coordinator) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/ws", get(ws_handler))
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/version", get(version_handler))
        .with_state(AppState { coordinator })
}

fn cors_layer(cors_origin: &str) -> CorsLayer {
    if cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(vec![header::CONTENT_TYPE])
    } else {
        let origins: Vec<_> = cors_origin
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(vec![header::CONTENT_TYPE])
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabdb=info,tabdb_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let coordinator = Coordinator::start(CoordinatorConfig {
        engine: cli.engine.clone(),
        queue_depth: cli.queue_depth,
        session_buffer: cli.session_buffer,
        sql_max_rows: cli.sql_max_rows,
    })?;

    let app = build_router(coordinator)
        .layer(cors_layer(&cli.cors_origin))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;

    info!("Starting tabdb coordinator on {}", addr);
    info!("  GET  /ws             - WebSocket (commands in, events out)");
    info!("  GET  /api/v1/health  - Health check");
    info!("  GET  /api/v1/version - Version info");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
