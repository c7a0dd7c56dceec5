//! Event fan-out to every connected session
//!
//! Events are serialized once and the same frame is queued on every
//! session's channel. The broadcaster also remembers the most recent engine
//! lifecycle event so that sessions joining later are caught up on
//! registration instead of waiting for a state change that will never come.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::protocol::Event;
use crate::session::{Frame, SessionId, SessionRegistry};

pub struct Broadcaster {
    registry: SessionRegistry,
    /// Last `DB_INITIALIZED` / `DB_INIT_ERROR` frame, replayed to late joiners.
    ///
    /// Held while announcing a transition and while attaching a session, so
    /// a session sees the lifecycle event exactly once.
    lifecycle: Mutex<Option<Frame>>,
}

impl Broadcaster {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            lifecycle: Mutex::new(None),
        }
    }

    /// Register a session, catching it up on the engine lifecycle.
    pub fn attach(&self) -> (SessionId, mpsc::Receiver<Frame>) {
        let lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        let greeting: Vec<Frame> = lifecycle.iter().cloned().collect();
        let (id, rx) = self.registry.register(&greeting);
        if !greeting.is_empty() {
            debug!(session = %id, "replayed engine lifecycle to late joiner");
        }
        (id, rx)
    }

    pub fn detach(&self, id: &SessionId) {
        self.registry.unregister(id);
    }

    /// Record and broadcast an engine lifecycle transition.
    pub fn announce_lifecycle(&self, event: &Event) -> usize {
        let frame: Frame = Arc::from(event.to_json());
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        *lifecycle = Some(Arc::clone(&frame));
        let delivered = self.registry.for_each_deliver(&frame);
        info!(event = event.name(), sessions = delivered, "announced engine state");
        delivered
    }

    /// Broadcast a command outcome to every session.
    pub fn broadcast(&self, event: &Event) -> usize {
        let frame: Frame = Arc::from(event.to_json());
        let delivered = self.registry.for_each_deliver(&frame);
        debug!(
            event = event.name(),
            request_id = event.request_id().unwrap_or("-"),
            sessions = delivered,
            "broadcast"
        );
        delivered
    }

    pub fn session_count(&self) -> usize {
        self.registry.session_count()
    }
}
