//! The coordinator: one engine, many sessions
//!
//! A dedicated worker thread owns the engine lifecycle (and through it the
//! engine). Sessions never touch the engine; their commands are admitted on
//! the caller's task, then queued on a bounded channel that the worker
//! drains in arrival order, one command at a time. Each outcome is
//! broadcast to every session.
//!
//! Session registration and disconnection only touch the registry, so they
//! are never held up by a long-running import.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::broadcast::Broadcaster;
use crate::engine;
use crate::lifecycle::{EngineFactory, EngineLifecycle, EngineState};
use crate::protocol::{Command, Event};
use crate::router::{self, CommandRouter};
use crate::session::{Frame, SessionId, SessionRegistry};
use crate::{Result, TabdbError};

/// Default cap on commands waiting for the engine.
pub const DEFAULT_QUEUE_DEPTH: usize = 100;

/// Default capacity of each session's outbound channel.
pub const DEFAULT_SESSION_BUFFER: usize = 256;

/// Default cap on rows returned by a query (0 = unlimited).
pub const DEFAULT_SQL_MAX_ROWS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Engine connection string, e.g. `sqlite://memory`
    pub engine: String,
    /// Commands that may wait for the engine before new ones are rejected
    pub queue_depth: usize,
    /// Events that may wait for a slow session before it is dropped
    pub session_buffer: usize,
    /// Maximum rows per query result (0 = unlimited)
    pub sql_max_rows: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            engine: "sqlite://memory".to_string(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            session_buffer: DEFAULT_SESSION_BUFFER,
            sql_max_rows: DEFAULT_SQL_MAX_ROWS,
        }
    }
}

/// Cheaply cloneable handle to the running coordinator.
#[derive(Clone)]
pub struct Coordinator {
    broadcaster: Arc<Broadcaster>,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<EngineState>,
    engine: Arc<str>,
}

impl Coordinator {
    /// Start the engine worker using the configured connection string.
    pub fn start(config: CoordinatorConfig) -> Result<Self> {
        let uri = config.engine.clone();
        Self::start_with(config, Box::new(move || engine::from_connection_string(&uri)))
    }

    /// Start the engine worker with a custom engine constructor.
    pub fn start_with(config: CoordinatorConfig, factory: EngineFactory) -> Result<Self> {
        let broadcaster = Arc::new(Broadcaster::new(SessionRegistry::new(config.session_buffer)));
        let (lifecycle, state) = EngineLifecycle::new();
        let (commands, queue) = mpsc::channel(config.queue_depth.max(1));
        let router = CommandRouter::new(config.sql_max_rows);

        let worker_broadcaster = Arc::clone(&broadcaster);
        std::thread::Builder::new()
            .name("tabdb-engine".to_string())
            .spawn(move || run_worker(lifecycle, factory, router, queue, worker_broadcaster))
            .map_err(|e| {
                TabdbError::EngineError(format!("Failed to start engine worker: {}", e))
            })?;

        info!(
            engine = %config.engine,
            queue_depth = config.queue_depth,
            "Coordinator started"
        );

        Ok(Self {
            broadcaster,
            commands,
            state,
            engine: Arc::from(config.engine.as_str()),
        })
    }

    /// Register a session. If the engine has already settled, the session's
    /// channel starts with the matching lifecycle event.
    pub fn connect(&self) -> (SessionId, mpsc::Receiver<Frame>) {
        let (id, rx) = self.broadcaster.attach();
        info!(
            session = %id,
            total = self.broadcaster.session_count(),
            "UI tab connected"
        );
        (id, rx)
    }

    pub fn disconnect(&self, id: &SessionId) {
        self.broadcaster.detach(id);
        info!(
            session = %id,
            total = self.broadcaster.session_count(),
            "UI tab disconnected"
        );
    }

    /// Accept one inbound message from a session.
    ///
    /// Never fails: anything that cannot be queued is answered right away
    /// with a broadcast `ERROR` event carrying the message's `requestId`.
    pub fn submit(&self, session: &SessionId, text: &str) {
        let command = match router::admit(text, self.state()) {
            Ok(command) => command,
            Err(event) => {
                self.broadcaster.broadcast(&event);
                return;
            }
        };

        debug!(
            session = %session,
            command = command.kind(),
            request_id = command.request_id(),
            "queueing command"
        );

        match self.commands.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(command)) => {
                warn!(
                    request_id = command.request_id(),
                    "Command queue full, rejecting"
                );
                let err = TabdbError::QueueFull(self.commands.max_capacity());
                self.broadcaster
                    .broadcast(&Event::error(Some(command.request_id().to_string()), &err));
            }
            Err(TrySendError::Closed(command)) => {
                error!("Engine worker is gone, rejecting command");
                let err = TabdbError::EngineError("Engine worker has stopped".to_string());
                self.broadcaster
                    .broadcast(&Event::error(Some(command.request_id().to_string()), &err));
            }
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Wait until the engine is `Ready` or `Failed`.
    pub async fn wait_for_engine(&self) -> EngineState {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|s| matches!(s, EngineState::Ready | EngineState::Failed))
            .await
            .map(|s| *s);
        match settled {
            Ok(s) => s,
            Err(_) => *state.borrow(),
        }
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn session_count(&self) -> usize {
        self.broadcaster.session_count()
    }

    /// Commands queued but not yet picked up by the engine worker
    pub fn pending_commands(&self) -> usize {
        self.commands.max_capacity() - self.commands.capacity()
    }
}

fn run_worker(
    mut lifecycle: EngineLifecycle,
    factory: EngineFactory,
    router: CommandRouter,
    mut queue: mpsc::Receiver<Command>,
    broadcaster: Arc<Broadcaster>,
) {
    lifecycle.initialize(factory, &broadcaster);

    while let Some(command) = queue.blocking_recv() {
        let request_id = command.request_id().to_string();
        let event = panic::catch_unwind(AssertUnwindSafe(|| {
            router.dispatch(&mut lifecycle, command)
        }))
        .unwrap_or_else(|_| {
            error!(request_id = %request_id, "Command handler panicked");
            Event::GenericError {
                request_id: Some(request_id),
                error: "Internal error while processing command".to_string(),
            }
        });
        broadcaster.broadcast(&event);
    }

    info!("Engine worker stopped");
}
