use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{MeshError, MeshResult};
use crate::logging;
use crate::signaling::{ChannelEvent, SignalingChannel};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket connection to the relay. Must be opened inside a tokio runtime.
pub struct WsChannel {
    outbound: mpsc::UnboundedSender<String>,
    shutdown: Arc<Notify>,
    closed: bool,
}

impl WsChannel {
    /// Start connecting in the background. With `reconnect` set, a dropped
    /// connection is retried after that delay and a fresh `Connect` event is
    /// emitted once it is back.
    pub fn open(
        url: Url,
        reconnect: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shutdown = Arc::new(Notify::new());
        tokio::spawn(run_connection(
            url,
            reconnect,
            out_rx,
            event_tx,
            shutdown.clone(),
        ));
        let channel = Self {
            outbound: out_tx,
            shutdown,
            closed: false,
        };
        (channel, event_rx)
    }
}

impl SignalingChannel for WsChannel {
    fn post_message(&mut self, text: String) -> MeshResult<()> {
        if self.closed {
            return Err(MeshError::ChannelClosed);
        }
        self.outbound
            .send(text)
            .map_err(|_| MeshError::ChannelClosed)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shutdown.notify_one();
    }
}

async fn run_connection(
    url: Url,
    reconnect: Option<Duration>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    shutdown: Arc<Notify>,
) {
    loop {
        let connected = tokio::select! {
            res = connect_async(url.as_str()) => res,
            _ = shutdown.notified() => return,
        };
        match connected {
            Ok((stream, _)) => {
                logging::debug_kv("signaling websocket open", &[("url", url.as_str())]);
                if events.send(ChannelEvent::Connect).is_err() {
                    return;
                }
                let finished = pump(stream, &mut outbound, &events, &shutdown).await;
                let _ = events.send(ChannelEvent::Close);
                if finished {
                    return;
                }
            }
            Err(err) => {
                logging::warn_kv(
                    "signaling connect failed",
                    &[("url", url.as_str()), ("error", &err.to_string())],
                );
                if reconnect.is_none() {
                    let _ = events.send(ChannelEvent::Close);
                    return;
                }
            }
        }

        let Some(delay) = reconnect else {
            return;
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.notified() => return,
        }
        // Anything posted while disconnected is stale by now.
        loop {
            match outbound.try_recv() {
                Ok(_) => logging::warn("dropping signaling message posted while disconnected"),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }
    }
}

/// Shuttle frames until the connection drops (`false`) or the channel is
/// closed locally (`true`).
async fn pump(
    stream: WsStream,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    events: &mpsc::UnboundedSender<ChannelEvent>,
    shutdown: &Notify,
) -> bool {
    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                let _ = write.send(Message::Close(None)).await;
                return true;
            }
            next = outbound.recv() => match next {
                Some(text) => {
                    if let Err(err) = write.send(Message::Text(text)).await {
                        logging::warn_kv("signaling send failed", &[("error", &err.to_string())]);
                        return false;
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    return true;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(txt))) => {
                    if events.send(ChannelEvent::Message(txt)).is_err() {
                        return true;
                    }
                }
                Some(Ok(Message::Binary(bin))) => match String::from_utf8(bin) {
                    Ok(txt) => {
                        if events.send(ChannelEvent::Message(txt)).is_err() {
                            return true;
                        }
                    }
                    Err(_) => logging::warn("dropping non-utf8 signaling frame"),
                },
                Some(Ok(Message::Close(_))) | None => return false,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    logging::warn_kv("signaling read failed", &[("error", &err.to_string())]);
                    return false;
                }
            }
        }
    }
}
