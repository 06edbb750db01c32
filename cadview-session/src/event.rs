/// Typed session events and their subscribers
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;

use cadview_core::{NodeId, PickHit};
use serde::Serialize;

use crate::error::{ErrorKind, SessionError};

/// Lifecycle notifications published by a session controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    LoadStarted {
        filename: String,
    },
    LoadSucceeded {
        node: NodeId,
        filename: String,
        triangles: usize,
        vertices: usize,
    },
    LoadFailed {
        filename: String,
        kind: ErrorKind,
        message: String,
    },
    FrameReady {
        sequence: u64,
    },
    NodeRemoved {
        node: NodeId,
    },
    SceneCleared {
        removed: usize,
    },
    SelectionChanged {
        hit: Option<PickHit>,
    },
    /// A non-load operation failed; the view keeps its last good frame.
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl SessionEvent {
    pub fn load_failed(filename: &str, err: &SessionError) -> Self {
        SessionEvent::LoadFailed {
            filename: filename.to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn error(err: &SessionError) -> Self {
        SessionEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Fan-out of events to any number of channel subscribers.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: SessionEvent) {
        log::debug!("event: {:?}", event);
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<SessionEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
