//! Engine lifecycle: the one engine instance and its readiness
//!
//! ```text
//! Uninitialized --initialize--> Initializing --ok--> Ready
//!                                            \--err--> Failed (terminal)
//! ```
//!
//! The lifecycle owns the engine; nothing else holds a reference to it.
//! The current state is published on a `watch` channel so that socket tasks
//! and the health endpoint can read it without touching the engine.

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::broadcast::Broadcaster;
use crate::engine::Engine;
use crate::protocol::Event;
use crate::{Result, TabdbError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

/// Builds the engine; run once, on the thread that will own it.
pub type EngineFactory = Box<dyn FnOnce() -> Result<Box<dyn Engine>> + Send>;

pub struct EngineLifecycle {
    engine: Option<Box<dyn Engine>>,
    state: watch::Sender<EngineState>,
}

impl EngineLifecycle {
    pub fn new() -> (Self, watch::Receiver<EngineState>) {
        let (state, rx) = watch::channel(EngineState::Uninitialized);
        (
            Self {
                engine: None,
                state,
            },
            rx,
        )
    }

    pub fn current_state(&self) -> EngineState {
        *self.state.borrow()
    }

    /// Construct the engine and announce the outcome to every session.
    ///
    /// Only the first call does anything; the state machine never leaves
    /// `Ready` or `Failed`.
    pub fn initialize(&mut self, factory: EngineFactory, broadcaster: &Broadcaster) -> EngineState {
        let current = self.current_state();
        if current != EngineState::Uninitialized {
            warn!(state = ?current, "engine initialization requested twice, ignoring");
            return current;
        }

        self.state.send_replace(EngineState::Initializing);
        info!("Initializing database engine");

        match factory() {
            Ok(engine) => {
                info!(engine = engine.name(), "Database engine initialized");
                self.engine = Some(engine);
                self.state.send_replace(EngineState::Ready);
                broadcaster.announce_lifecycle(&Event::EngineReady { tables: Vec::new() });
            }
            Err(e) => {
                error!("Database engine initialization failed: {}", e);
                self.state.send_replace(EngineState::Failed);
                broadcaster.announce_lifecycle(&Event::EngineInitError {
                    error: e.to_string(),
                });
            }
        }

        self.current_state()
    }

    pub fn engine(&self) -> Result<&dyn Engine> {
        match self.engine.as_deref() {
            Some(engine) if self.current_state() == EngineState::Ready => Ok(engine),
            _ => Err(TabdbError::NotReady),
        }
    }

    pub fn engine_mut(&mut self) -> Result<&mut (dyn Engine + 'static)> {
        if self.current_state() != EngineState::Ready {
            return Err(TabdbError::NotReady);
        }
        self.engine.as_deref_mut().ok_or(TabdbError::NotReady)
    }
}
