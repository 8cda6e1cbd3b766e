//! Signaling wire format: one UTF-8 JSON object `{"name": ..., "data": ...}`
//! per channel message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MeshResult;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Joined {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub peers: Vec<String>,
    #[serde(rename = "vapidPublicKey", default)]
    pub vapid_public_key: Option<String>,
}

/// A handshake descriptor relayed between two peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRelay {
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    pub signal: Value,
    #[serde(default)]
    pub initiator: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RelayStatus {
    #[serde(default)]
    pub info: Option<Value>,
    #[serde(default)]
    pub pong: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Joined(Joined),
    Signal(SignalRelay),
    Remove { id: String },
    Status(RelayStatus),
    Error(Value),
    Other { name: String },
}

#[derive(Debug, Deserialize)]
struct RemoveById {
    id: String,
}

#[derive(Serialize)]
struct JoinRequest<'a> {
    room: &'a str,
}

#[derive(Serialize)]
struct StatusProbe<'a> {
    ping: &'a str,
}

pub fn encode<T: Serialize>(name: &str, data: &T) -> MeshResult<String> {
    let envelope = Envelope {
        name: name.to_string(),
        data: serde_json::to_value(data)?,
    };
    Ok(serde_json::to_string(&envelope)?)
}

pub fn encode_join(room: &str) -> MeshResult<String> {
    encode("join", &JoinRequest { room })
}

pub fn encode_signal(relay: &SignalRelay) -> MeshResult<String> {
    encode("signal", relay)
}

pub fn encode_status_probe(ping: &str) -> MeshResult<String> {
    encode("status", &StatusProbe { ping })
}

pub fn decode_envelope(raw: &str) -> MeshResult<Envelope> {
    Ok(serde_json::from_str(raw)?)
}

/// Parse a raw channel message into a protocol message. Payloads that do
/// not match the shape their name requires are malformed.
pub fn decode(raw: &str) -> MeshResult<Inbound> {
    let Envelope { name, data } = decode_envelope(raw)?;
    let msg = match name.as_str() {
        "joined" => Inbound::Joined(serde_json::from_value(data)?),
        "signal" => Inbound::Signal(serde_json::from_value(data)?),
        // Older relays send the bare id instead of `{id}`.
        "remove" => match data {
            Value::String(id) => Inbound::Remove { id },
            other => {
                let RemoveById { id } = serde_json::from_value(other)?;
                Inbound::Remove { id }
            }
        },
        "status" => Inbound::Status(serde_json::from_value(data)?),
        "error" => Inbound::Error(data),
        _ => Inbound::Other { name },
    };
    Ok(msg)
}
