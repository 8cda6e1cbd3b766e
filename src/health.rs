use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use crate::envelope::{self, RelayStatus};
use crate::error::{MeshError, MeshResult};
use crate::logging;
use crate::signaling::{ChannelEvent, SignalingChannel};
use crate::ws::WsChannel;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReply {
    pub ok: bool,
    pub pong: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
}

/// Round-trip a `status` ping through the relay on a throwaway connection.
pub async fn check_status(url: Url, timeout: Duration) -> MeshResult<StatusReply> {
    let (channel, events) = WsChannel::open(url, None);
    probe(channel, events, timeout).await
}

/// Channel-agnostic core of [`check_status`]. The channel is closed before
/// returning, whatever the outcome.
pub async fn probe<C: SignalingChannel>(
    mut channel: C,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    timeout: Duration,
) -> MeshResult<StatusReply> {
    let ping = Uuid::new_v4().to_string();
    let outcome = tokio::time::timeout(timeout, exchange(&mut channel, &mut events, &ping)).await;
    channel.close();
    let result = match outcome {
        Ok(result) => result,
        Err(_) => Err(MeshError::SignalingUnreachable(format!(
            "no status reply within {}ms",
            timeout.as_millis()
        ))),
    };
    match &result {
        Ok(_) => logging::info_kv("relay status ok", &[("ping", &ping)]),
        Err(err) => logging::warn_kv("relay status check failed", &[("error", &err.to_string())]),
    }
    result
}

async fn exchange<C: SignalingChannel>(
    channel: &mut C,
    events: &mut mpsc::UnboundedReceiver<ChannelEvent>,
    ping: &str,
) -> MeshResult<StatusReply> {
    loop {
        match events.recv().await {
            Some(ChannelEvent::Connect) => {
                let probe = envelope::encode_status_probe(ping)?;
                channel
                    .post_message(probe)
                    .map_err(|err| MeshError::SignalingUnreachable(err.to_string()))?;
            }
            Some(ChannelEvent::Message(raw)) => return evaluate_reply(&raw, ping),
            Some(ChannelEvent::Close) | None => {
                return Err(MeshError::SignalingUnreachable(
                    "channel closed before status reply".into(),
                ))
            }
        }
    }
}

/// Only the first reply counts: it must be `status` echoing our ping.
fn evaluate_reply(raw: &str, ping: &str) -> MeshResult<StatusReply> {
    let reply = envelope::decode_envelope(raw)
        .map_err(|err| MeshError::SignalingUnreachable(format!("unreadable reply: {err}")))?;
    if reply.name != "status" {
        return Err(MeshError::SignalingUnreachable(format!(
            "unexpected reply: {}",
            reply.name
        )));
    }
    let status: RelayStatus = serde_json::from_value(reply.data)
        .map_err(|err| MeshError::SignalingUnreachable(format!("unreadable status: {err}")))?;
    match status.pong {
        Some(pong) if pong == ping => Ok(StatusReply {
            ok: true,
            pong,
            info: status.info,
        }),
        Some(pong) => Err(MeshError::SignalingUnreachable(format!(
            "pong {pong} does not match ping {ping}"
        ))),
        None => Err(MeshError::SignalingUnreachable("status reply without pong".into())),
    }
}
