use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use url::Url;
use uuid::Uuid;

use crate::envelope::{Inbound, Joined, SignalRelay};
use crate::error::{MeshError, MeshResult};
use crate::events::{MeshEvent, Observers};
use crate::logging;
use crate::registry::{PeerRegistry, PeerSession};
use crate::session::{self, PeerSessionFactory, SessionEffect};
use crate::signaling::{ChannelEvent, SignalingChannel, SignalingLink};
use crate::status::{self, PeerStatus};
use crate::transport::{PeerEvent, TransportFactory};
use crate::ws::WsChannel;

#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    pub room: Option<String>,
    /// Passed to every transport this orchestrator creates.
    pub peer_settings: Map<String, Value>,
    /// Tear a session down when its transport reports an error.
    pub evict_on_error: bool,
}

impl OrchestratorOptions {
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: Some(room.into()),
            ..Self::default()
        }
    }

    fn validated_room(&self) -> MeshResult<String> {
        self.room
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .ok_or_else(|| MeshError::InvalidConfiguration("room cannot be empty".into()))
    }
}

/// Keeps one peer session per remote in a room, driven by the relay's
/// signaling messages and by the sessions' own transport events. All
/// state changes go through `&mut self`, one event at a time.
pub struct Orchestrator<C, F> {
    room: String,
    local_id: String,
    link: SignalingLink<C>,
    registry: PeerRegistry,
    sessions: PeerSessionFactory<F>,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    observers: Observers,
    relay_status: Option<Value>,
    evict_on_error: bool,
    closed: bool,
}

impl<C: SignalingChannel, F: TransportFactory> Orchestrator<C, F> {
    pub fn new(options: OrchestratorOptions, channel: C, transports: F) -> MeshResult<Self> {
        let room = options.validated_room()?;
        let local_id = Uuid::new_v4().to_string();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let sessions = PeerSessionFactory::new(
            transports,
            room.clone(),
            local_id.clone(),
            options.peer_settings,
            peer_tx,
        );
        logging::info_kv(
            "orchestrator created",
            &[("room", &room), ("local", &local_id)],
        );
        Ok(Self {
            link: SignalingLink::new(channel, room.clone()),
            room,
            local_id,
            registry: PeerRegistry::new(),
            sessions,
            peer_events: peer_rx,
            observers: Observers::new(),
            relay_status: None,
            evict_on_error: options.evict_on_error,
            closed: false,
        })
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn relay_status(&self) -> Option<&Value> {
        self.relay_status.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn peer(&self, remote_id: &str) -> Option<&PeerSession> {
        self.registry.get(remote_id)
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MeshEvent> {
        self.observers.subscribe()
    }

    pub fn status(&self) -> Vec<PeerStatus> {
        status::snapshot(&self.registry)
    }

    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        if self.closed {
            return;
        }
        if let Some(msg) = self.link.on_channel_event(event) {
            self.dispatch(msg);
        }
    }

    pub fn dispatch(&mut self, msg: Inbound) {
        if self.closed {
            return;
        }
        match msg {
            Inbound::Joined(joined) => self.on_joined(joined),
            Inbound::Signal(relay) => self.on_signal(relay),
            Inbound::Remove { id } => self.on_remove(&id),
            Inbound::Status(status) => {
                logging::debug_kv(
                    "relay status",
                    &[("info", &status.info.clone().unwrap_or(Value::Null).to_string())],
                );
                self.relay_status = status.info;
            }
            Inbound::Error(info) => {
                logging::error_kv("relay reported error", &[("info", &info.to_string())]);
            }
            Inbound::Other { name } => {
                logging::debug_kv("ignoring signaling message", &[("name", &name)]);
            }
        }
    }

    fn on_joined(&mut self, joined: Joined) {
        logging::info_kv(
            "joined room",
            &[
                ("room", joined.room.as_deref().unwrap_or(&self.room)),
                ("peers", &joined.peers.len().to_string()),
            ],
        );
        for remote in joined.peers {
            if remote == self.local_id || self.registry.contains(&remote) {
                continue;
            }
            self.create_session(&remote, true);
        }
        self.update_status();
    }

    fn on_signal(&mut self, relay: SignalRelay) {
        if relay.from == self.local_id {
            logging::warn("dropping signal relayed back from ourselves");
            return;
        }
        if let Some(to) = relay.to.as_deref() {
            if to != self.local_id {
                logging::warn_kv("dropping misrouted signal", &[("from", &relay.from), ("to", to)]);
                return;
            }
        }
        if !self.registry.contains(&relay.from) && !self.create_session(&relay.from, false) {
            self.update_status();
            return;
        }
        if let Some(session) = self.registry.get_mut(&relay.from) {
            if let Err(err) = session.transport_mut().signal(relay.signal) {
                let error = err.to_string();
                logging::warn_kv(
                    "peer rejected signal",
                    &[("remote", &relay.from), ("error", &error)],
                );
                session.error = Some(error.clone());
                self.observers.publish(MeshEvent::PeerError {
                    remote_id: relay.from.clone(),
                    error,
                });
            }
        }
        self.update_status();
    }

    fn on_remove(&mut self, remote_id: &str) {
        if self.registry.destroy(remote_id).is_some() {
            self.after_removal(remote_id);
        }
    }

    fn after_removal(&mut self, remote_id: &str) {
        logging::info_kv("peer session removed", &[("remote", remote_id)]);
        self.update_status();
        self.observers.publish(MeshEvent::Disconnected {
            remote_id: remote_id.to_string(),
        });
    }

    fn create_session(&mut self, remote_id: &str, initiator: bool) -> bool {
        let generation = self.registry.next_generation();
        match self.sessions.create(remote_id, initiator, generation) {
            Ok(session) => match self.registry.insert(session) {
                Ok(()) => true,
                Err(mut rejected) => {
                    rejected.close();
                    false
                }
            },
            Err(err) => {
                logging::error_kv(
                    "peer transport creation failed",
                    &[("remote", remote_id), ("error", &err.to_string())],
                );
                self.observers.publish(MeshEvent::PeerError {
                    remote_id: remote_id.to_string(),
                    error: err.to_string(),
                });
                false
            }
        }
    }

    pub fn handle_peer_event(&mut self, event: PeerEvent) {
        if self.closed {
            return;
        }
        let PeerEvent {
            remote_id,
            generation,
            event,
        } = event;
        let Some(peer) = self.registry.current_mut(&remote_id, generation) else {
            logging::debug_kv("dropping stale peer event", &[("remote", &remote_id)]);
            return;
        };
        let effects = session::on_transport_event(peer, event, self.evict_on_error);
        for effect in effects {
            match effect {
                SessionEffect::Relay(relay) => {
                    if let Err(err) = self.link.send_signal(&relay) {
                        logging::warn_kv(
                            "signal relay failed",
                            &[("remote", &remote_id), ("error", &err.to_string())],
                        );
                    }
                }
                SessionEffect::Publish(event) => self.observers.publish(event),
                SessionEffect::RefreshStatus => self.update_status(),
                SessionEffect::Destroy => self.on_remove(&remote_id),
                SessionEffect::Closed => {
                    if self.registry.forget(&remote_id).is_some() {
                        self.after_removal(&remote_id);
                    }
                }
            }
        }
    }

    /// Process transport events that are already queued, without waiting.
    pub fn pump_peer_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.peer_events.try_recv() {
            self.handle_peer_event(event);
            handled += 1;
        }
        handled
    }

    /// Write `data` to every session. Returns how many transports took it.
    pub fn post_message(&mut self, data: &str) -> usize {
        let mut delivered = 0;
        for session in self.registry.sessions_mut() {
            match session.transport_mut().post_message(data) {
                Ok(()) => delivered += 1,
                Err(err) => logging::warn_kv(
                    "peer write failed",
                    &[("remote", session.remote_id()), ("error", &err.to_string())],
                ),
            }
        }
        delivered
    }

    /// Legacy typed broadcast: `msg` plus a `type` field, as JSON.
    pub fn send(&mut self, kind: &str, mut msg: Map<String, Value>) -> MeshResult<usize> {
        msg.insert("type".to_string(), Value::String(kind.to_string()));
        let text = serde_json::to_string(&msg)?;
        Ok(self.post_message(&text))
    }

    fn update_status(&self) {
        self.observers.publish(MeshEvent::Status(self.status()));
    }

    /// Close every session, then the signaling channel. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let closed = self.registry.destroy_all();
        self.link.close();
        self.peer_events.close();
        logging::info_kv(
            "orchestrator closed",
            &[("room", &self.room), ("sessions", &closed.to_string())],
        );
    }
}

impl<F: TransportFactory> Orchestrator<WsChannel, F> {
    /// Open a reconnecting websocket to the relay and build the
    /// orchestrator on it. Feed the returned receiver to [`Orchestrator::run`]
    /// or [`Orchestrator::spawn`].
    pub fn connect(
        options: OrchestratorOptions,
        signaling_url: Url,
        reconnect_delay: Duration,
        transports: F,
    ) -> MeshResult<(Self, mpsc::UnboundedReceiver<ChannelEvent>)> {
        options.validated_room()?;
        let (channel, events) = WsChannel::open(signaling_url, Some(reconnect_delay));
        let orchestrator = Self::new(options, channel, transports)?;
        Ok((orchestrator, events))
    }
}

enum Command {
    PostMessage {
        data: String,
        reply: oneshot::Sender<usize>,
    },
    Send {
        kind: String,
        msg: Map<String, Value>,
        reply: oneshot::Sender<MeshResult<usize>>,
    },
    Status {
        reply: oneshot::Sender<Vec<PeerStatus>>,
    },
    RelayStatus {
        reply: oneshot::Sender<Option<Value>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

impl<C, F> Orchestrator<C, F>
where
    C: SignalingChannel + 'static,
    F: TransportFactory + 'static,
{
    /// Move the orchestrator onto its own task and return a handle to it.
    pub fn spawn(self, channel_events: mpsc::UnboundedReceiver<ChannelEvent>) -> MeshHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = MeshHandle {
            commands: tx,
            observers: self.observers.clone(),
            room: self.room.clone(),
            local_id: self.local_id.clone(),
        };
        tokio::spawn(self.run(channel_events, rx));
        handle
    }

    async fn run(
        mut self,
        mut channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut signaling_open = true;
        loop {
            // Queued events are applied before commands so callers observe
            // everything that arrived ahead of their request.
            tokio::select! {
                biased;
                event = channel_events.recv(), if signaling_open => match event {
                    Some(event) => self.handle_channel_event(event),
                    None => {
                        logging::warn("signaling channel ended");
                        signaling_open = false;
                    }
                },
                Some(event) = self.peer_events.recv() => self.handle_peer_event(event),
                cmd = commands.recv() => match cmd {
                    Some(Command::Close { reply }) => {
                        self.close();
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        self.close();
                        break;
                    }
                },
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::PostMessage { data, reply } => {
                let _ = reply.send(self.post_message(&data));
            }
            Command::Send { kind, msg, reply } => {
                let _ = reply.send(self.send(&kind, msg));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::RelayStatus { reply } => {
                let _ = reply.send(self.relay_status.clone());
            }
            Command::Close { reply } => {
                self.close();
                let _ = reply.send(());
            }
        }
    }
}

/// Cloneable access to a spawned orchestrator.
#[derive(Clone)]
pub struct MeshHandle {
    commands: mpsc::UnboundedSender<Command>,
    observers: Observers,
    room: String,
    local_id: String,
}

impl MeshHandle {
    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MeshEvent> {
        self.observers.subscribe()
    }

    pub async fn post_message(&self, data: impl Into<String>) -> MeshResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::PostMessage {
            data: data.into(),
            reply,
        })?;
        rx.await.map_err(|_| MeshError::ChannelClosed)
    }

    pub async fn send(&self, kind: &str, msg: Map<String, Value>) -> MeshResult<usize> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Send {
            kind: kind.to_string(),
            msg,
            reply,
        })?;
        rx.await.map_err(|_| MeshError::ChannelClosed)?
    }

    pub async fn status(&self) -> MeshResult<Vec<PeerStatus>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Status { reply })?;
        rx.await.map_err(|_| MeshError::ChannelClosed)
    }

    pub async fn relay_status(&self) -> MeshResult<Option<Value>> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::RelayStatus { reply })?;
        rx.await.map_err(|_| MeshError::ChannelClosed)
    }

    /// Shut the orchestrator down and wait for it. Closing twice is a no-op.
    pub async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.request(Command::Close { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    fn request(&self, cmd: Command) -> MeshResult<()> {
        self.commands.send(cmd).map_err(|_| MeshError::ChannelClosed)
    }
}
