use serde::Serialize;

use crate::envelope::{self, Inbound, SignalRelay};
use crate::error::MeshResult;
use crate::logging;

/// Lifecycle and traffic reported by a signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connect,
    Message(String),
    Close,
}

/// Bidirectional message transport to the relay server. Events flow back
/// through the receiver handed out when the channel was opened.
pub trait SignalingChannel: Send {
    fn post_message(&mut self, text: String) -> MeshResult<()>;
    fn close(&mut self);
}

impl<C: SignalingChannel + ?Sized> SignalingChannel for Box<C> {
    fn post_message(&mut self, text: String) -> MeshResult<()> {
        (**self).post_message(text)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

pub struct SignalingLink<C> {
    channel: C,
    room: String,
    closed: bool,
}

impl<C: SignalingChannel> SignalingLink<C> {
    pub fn new(channel: C, room: impl Into<String>) -> Self {
        Self {
            channel,
            room: room.into(),
            closed: false,
        }
    }

    pub fn send<T: Serialize>(&mut self, name: &str, data: &T) -> MeshResult<()> {
        let text = envelope::encode(name, data)?;
        self.post(text)
    }

    pub fn send_signal(&mut self, relay: &SignalRelay) -> MeshResult<()> {
        let text = envelope::encode_signal(relay)?;
        self.post(text)
    }

    fn post(&mut self, text: String) -> MeshResult<()> {
        if self.closed {
            return Err(crate::error::MeshError::ChannelClosed);
        }
        self.channel.post_message(text)
    }

    /// Handle one channel event. Returns the decoded protocol message, if
    /// any. A `Connect` (first or after a reconnect) announces the room.
    pub fn on_channel_event(&mut self, event: ChannelEvent) -> Option<Inbound> {
        match event {
            ChannelEvent::Connect => {
                logging::info_kv("signaling connected", &[("room", &self.room)]);
                let join = envelope::encode_join(&self.room).and_then(|text| self.post(text));
                if let Err(err) = join {
                    logging::error(format!("signaling join failed: {err}"));
                }
                None
            }
            ChannelEvent::Message(raw) => match envelope::decode(&raw) {
                Ok(msg) => Some(msg),
                Err(err) => {
                    logging::warn_kv(
                        "dropping malformed signaling message",
                        &[("error", &err.to_string())],
                    );
                    None
                }
            },
            ChannelEvent::Close => {
                logging::info("signaling channel closed");
                None
            }
        }
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.channel.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
