use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::status::PeerStatus;

const EVENT_CAPACITY: usize = 256;

/// Notifications published by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    Status(Vec<PeerStatus>),
    Connected {
        remote_id: String,
    },
    Disconnected {
        remote_id: String,
    },
    /// A legacy `{type, ...}` message; `kind` is the `type` field.
    Data {
        remote_id: String,
        kind: String,
        payload: Map<String, Value>,
    },
    Message {
        remote_id: String,
        payload: Vec<u8>,
    },
    PeerError {
        remote_id: String,
        error: String,
    },
}

#[derive(Clone)]
pub struct Observers {
    sender: broadcast::Sender<MeshEvent>,
}

impl Default for Observers {
    fn default() -> Self {
        Self::new()
    }
}

impl Observers {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.sender.subscribe()
    }

    /// Events published with nobody subscribed are dropped.
    pub fn publish(&self, event: MeshEvent) {
        let _ = self.sender.send(event);
    }
}
