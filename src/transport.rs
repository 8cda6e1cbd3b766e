//! The peer transport is a black box: it negotiates and carries one
//! point-to-point connection. The orchestrator only creates it, feeds it
//! relayed handshake descriptors, writes to it and closes it. Everything
//! the transport has to say comes back as [`TransportEvent`]s through a
//! [`PeerEventSink`].

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::MeshResult;

#[derive(Debug, Clone, PartialEq)]
pub struct TransportOptions {
    pub local_id: String,
    pub remote_id: String,
    pub initiator: bool,
    pub room: String,
    /// Transport-specific settings, shared by every session of an orchestrator.
    pub settings: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A local handshake descriptor that must reach the remote peer.
    Signal(Value),
    Connect,
    /// Legacy JSON payload of the form `{type, ...}`.
    Data(Vec<u8>),
    /// Raw payload, passed to observers untouched.
    Message(Vec<u8>),
    Stream,
    Track,
    Error(String),
    Close,
}

/// A transport event tagged with the session it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerEvent {
    pub remote_id: String,
    pub generation: u64,
    pub event: TransportEvent,
}

#[derive(Debug, Clone)]
pub struct PeerEventSink {
    remote_id: String,
    generation: u64,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerEventSink {
    pub(crate) fn new(
        remote_id: String,
        generation: u64,
        tx: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            remote_id,
            generation,
            tx,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    /// Queue an event for the orchestrator. Returns false once the
    /// orchestrator is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(PeerEvent {
                remote_id: self.remote_id.clone(),
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

pub trait PeerTransport: Send {
    /// Inject a handshake descriptor received from the remote peer.
    fn signal(&mut self, descriptor: Value) -> MeshResult<()>;
    fn post_message(&mut self, data: &str) -> MeshResult<()>;
    fn close(&mut self);
}

pub trait TransportFactory: Send {
    fn create(
        &mut self,
        options: TransportOptions,
        events: PeerEventSink,
    ) -> MeshResult<Box<dyn PeerTransport>>;
}
