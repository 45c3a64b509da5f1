//! Live broadcaster -- fan-out of named run events to connected observers.
//!
//! Every observer holds its own receiver on a `tokio::sync::broadcast`
//! channel. A closed receiver simply stops counting; a receiver that falls
//! more than the channel capacity behind skips what it missed. Neither case
//! is an error: the final state of every run is recoverable from history.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

// ---------------------------------------------------------------------------
// Event vocabulary
// ---------------------------------------------------------------------------

/// Names of the events pushed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Progress,
    Completed,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Started => "tests:started",
            EventKind::Progress => "tests:progress",
            EventKind::Completed => "tests:completed",
            EventKind::Error => "tests:error",
        }
    }

    /// True for the two events that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Completed | EventKind::Error)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What observers receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    pub event: String,
    pub data: Value,
    /// ISO 8601 time the event was broadcast.
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

/// Cheaply cloneable handle; all clones feed the same observers.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<LiveEvent>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new observer.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.tx.subscribe()
    }

    /// Observers currently connected.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Send `{event, data, timestamp}` to every connected observer.
    ///
    /// Returns how many observers the event was queued for.
    pub fn broadcast(&self, kind: EventKind, data: Value) -> usize {
        let event = LiveEvent {
            event: kind.as_str().to_string(),
            data,
            timestamp: Utc::now().to_rfc3339(),
        };
        // Err only means nobody is listening.
        let delivered = self.tx.send(event).unwrap_or(0);
        trace!(event = kind.as_str(), delivered, "broadcast");
        delivered
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
