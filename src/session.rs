//! Session registry for connected tabs
//!
//! Every connected tab is a session. Each session:
//! - Has a unique id
//! - Records when it connected
//! - Owns a bounded outbound channel of serialized event frames
//!
//! The registry is the only place sessions live; nothing else holds a
//! session's sender. A session whose channel is closed (tab went away) or
//! full (tab stopped reading) is evicted on the next delivery attempt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::TabdbError;

/// A serialized event, shared by every session it is delivered to.
pub type Frame = Arc<str>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    fn generate(seq: u64) -> Self {
        let uuid = Uuid::new_v4().to_string().replace('-', "");
        SessionId(format!("{}-{}", seq, &uuid[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One connected client channel
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub connected_at: DateTime<Utc>,
    tx: mpsc::Sender<Frame>,
}

impl Session {
    /// Queue a frame for this session without waiting.
    pub fn deliver(&self, frame: &Frame) -> Result<(), TabdbError> {
        self.tx.try_send(Arc::clone(frame)).map_err(|e| match e {
            TrySendError::Full(_) => {
                TabdbError::ChannelError(format!("session {} is not draining its events", self.id))
            }
            TrySendError::Closed(_) => {
                TabdbError::ChannelError(format!("session {} has disconnected", self.id))
            }
        })
    }
}

/// Tracks all connected sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Session>>,
    /// Capacity of each session's outbound channel
    buffer: usize,
    next_seq: AtomicU64,
}

impl SessionRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Register a new session and return its id with the receiving end of its channel.
    ///
    /// `greeting` frames are queued before the session becomes visible to
    /// broadcasts, all while holding the write lock, so a concurrent
    /// broadcast either finished before registration or will include it.
    pub fn register(&self, greeting: &[Frame]) -> (SessionId, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.buffer.max(greeting.len()));
        let id = SessionId::generate(self.next_seq.fetch_add(1, Ordering::Relaxed));
        let session = Session {
            id: id.clone(),
            connected_at: Utc::now(),
            tx,
        };

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        for frame in greeting {
            if let Err(e) = session.deliver(frame) {
                warn!("{}", e);
            }
        }
        sessions.insert(id.clone(), session);
        debug!(session = %id, total = sessions.len(), "session registered");
        (id, rx)
    }

    /// Remove a session; returns whether it was still registered.
    pub fn unregister(&self, id: &SessionId) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let removed = sessions.remove(id).is_some();
        if removed {
            debug!(session = %id, total = sessions.len(), "session unregistered");
        }
        removed
    }

    /// Deliver a frame to every registered session.
    ///
    /// The read lock is held for the whole fan-out, so registrations wait
    /// until it completes. Failed deliveries are logged and the failing
    /// sessions evicted afterwards. Returns the number of sessions reached.
    pub fn for_each_deliver(&self, frame: &Frame) -> usize {
        let mut failed = Vec::new();
        let delivered = {
            let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
            let mut delivered = 0;
            for session in sessions.values() {
                match session.deliver(frame) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        warn!("{}", e);
                        failed.push(session.id.clone());
                    }
                }
            }
            delivered
        };

        for id in &failed {
            self.unregister(id);
        }
        delivered
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.contains_key(id)
    }

    /// When the session connected, if it is still registered.
    pub fn connected_at(&self, id: &SessionId) -> Option<DateTime<Utc>> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(id).map(|s| s.connected_at)
    }

    /// Get session count (for health check)
    pub fn session_count(&self) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        Arc::from(text)
    }

    #[test]
    fn test_register_unregister() {
        let registry = SessionRegistry::new(8);
        let (id, _rx) = registry.register(&[]);
        assert!(registry.contains(&id));
        assert!(registry.connected_at(&id).is_some());
        assert_eq!(registry.session_count(), 1);

        assert!(registry.unregister(&id));
        assert!(!registry.contains(&id));
        assert!(!registry.unregister(&id));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let registry = SessionRegistry::new(8);
        let (a, _rx_a) = registry.register(&[]);
        let (b, _rx_b) = registry.register(&[]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_greeting_is_queued_first() {
        let registry = SessionRegistry::new(8);
        let (_id, mut rx) = registry.register(&[frame("hello")]);
        registry.for_each_deliver(&frame("world"));

        assert_eq!(&*rx.try_recv().unwrap(), "hello");
        assert_eq!(&*rx.try_recv().unwrap(), "world");
    }

    #[test]
    fn test_fan_out_reaches_every_session() {
        let registry = SessionRegistry::new(8);
        let (_a, mut rx_a) = registry.register(&[]);
        let (_b, mut rx_b) = registry.register(&[]);

        assert_eq!(registry.for_each_deliver(&frame("event")), 2);
        assert_eq!(&*rx_a.try_recv().unwrap(), "event");
        assert_eq!(&*rx_b.try_recv().unwrap(), "event");
    }

    #[test]
    fn test_closed_session_is_evicted_silently() {
        let registry = SessionRegistry::new(8);
        let (gone, rx_gone) = registry.register(&[]);
        let (_live, mut rx_live) = registry.register(&[]);
        drop(rx_gone);

        assert_eq!(registry.for_each_deliver(&frame("event")), 1);
        assert!(!registry.contains(&gone));
        assert_eq!(&*rx_live.try_recv().unwrap(), "event");
    }

    #[test]
    fn test_stalled_session_is_evicted() {
        let registry = SessionRegistry::new(1);
        let (stalled, _rx) = registry.register(&[]);

        assert_eq!(registry.for_each_deliver(&frame("one")), 1);
        assert_eq!(registry.for_each_deliver(&frame("two")), 0);
        assert!(!registry.contains(&stalled));
    }
}
