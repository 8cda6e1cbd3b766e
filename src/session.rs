use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::envelope::SignalRelay;
use crate::error::MeshResult;
use crate::events::MeshEvent;
use crate::logging;
use crate::registry::PeerSession;
use crate::transport::{PeerEvent, PeerEventSink, TransportEvent, TransportFactory, TransportOptions};

/// Builds sessions around fresh transports and wires their events back to
/// the orchestrator's queue.
pub struct PeerSessionFactory<F> {
    transports: F,
    room: String,
    local_id: String,
    settings: Map<String, Value>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl<F: TransportFactory> PeerSessionFactory<F> {
    pub fn new(
        transports: F,
        room: String,
        local_id: String,
        settings: Map<String, Value>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            transports,
            room,
            local_id,
            settings,
            events,
        }
    }

    pub fn create(
        &mut self,
        remote_id: &str,
        initiator: bool,
        generation: u64,
    ) -> MeshResult<PeerSession> {
        let options = TransportOptions {
            local_id: self.local_id.clone(),
            remote_id: remote_id.to_string(),
            initiator,
            room: self.room.clone(),
            settings: self.settings.clone(),
        };
        let sink = PeerEventSink::new(remote_id.to_string(), generation, self.events.clone());
        let transport = self.transports.create(options, sink)?;
        logging::info_kv(
            "peer session created",
            &[
                ("remote", remote_id),
                ("initiator", if initiator { "true" } else { "false" }),
            ],
        );
        Ok(PeerSession::new(
            remote_id.to_string(),
            self.local_id.clone(),
            initiator,
            generation,
            transport,
        ))
    }
}

/// Follow-up work for the orchestrator after a transport event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    Relay(SignalRelay),
    Publish(MeshEvent),
    RefreshStatus,
    /// Close the transport and remove the session.
    Destroy,
    /// The transport closed itself; only remove the session.
    Closed,
}

/// Apply a transport event to its session and report what has to happen
/// next. Only session-local fields change here.
pub fn on_transport_event(
    session: &mut PeerSession,
    event: TransportEvent,
    evict_on_error: bool,
) -> Vec<SessionEffect> {
    let remote_id = session.remote_id().to_string();
    match event {
        TransportEvent::Signal(signal) => vec![SessionEffect::Relay(SignalRelay {
            from: session.local_id().to_string(),
            to: Some(remote_id),
            signal,
            initiator: session.initiator(),
        })],
        TransportEvent::Connect => {
            session.active = true;
            logging::info_kv("peer connected", &[("remote", &remote_id)]);
            vec![
                SessionEffect::Publish(MeshEvent::Connected { remote_id }),
                SessionEffect::RefreshStatus,
            ]
        }
        TransportEvent::Data(raw) => match parse_typed(&raw) {
            Some((kind, payload)) => vec![
                SessionEffect::Publish(MeshEvent::Data {
                    remote_id,
                    kind,
                    payload,
                }),
                SessionEffect::RefreshStatus,
            ],
            None => {
                logging::warn_kv("dropping untyped peer data", &[("remote", &remote_id)]);
                Vec::new()
            }
        },
        TransportEvent::Message(payload) => {
            vec![SessionEffect::Publish(MeshEvent::Message { remote_id, payload })]
        }
        TransportEvent::Stream | TransportEvent::Track => vec![SessionEffect::RefreshStatus],
        TransportEvent::Error(error) => {
            logging::warn_kv(
                "peer transport error",
                &[("remote", &remote_id), ("error", &error)],
            );
            session.error = Some(error.clone());
            let mut effects = vec![
                SessionEffect::Publish(MeshEvent::PeerError { remote_id, error }),
                SessionEffect::RefreshStatus,
            ];
            if evict_on_error {
                effects.push(SessionEffect::Destroy);
            }
            effects
        }
        TransportEvent::Close => vec![SessionEffect::Closed],
    }
}

/// Payloads without a string `type` are dropped rather than emitted untyped.
fn parse_typed(raw: &[u8]) -> Option<(String, Map<String, Value>)> {
    let mut msg: Map<String, Value> = serde_json::from_slice(raw).ok()?;
    match msg.remove("type") {
        Some(Value::String(kind)) => Some((kind, msg)),
        _ => None,
    }
}
