#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use peermesh::{
    ChannelEvent, MeshError, MeshEvent, MeshResult, Orchestrator, OrchestratorOptions,
    PeerEventSink, PeerTransport, SignalingChannel, TransportEvent, TransportFactory,
    TransportOptions,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Everything a mock signaling channel was asked to do.
#[derive(Clone, Default)]
pub struct ChannelLog {
    sent: Arc<Mutex<Vec<String>>>,
    closes: Arc<Mutex<usize>>,
}

impl ChannelLog {
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    /// `data` of every outbound envelope called `name`, in send order.
    pub fn sent_named(&self, name: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|env| env["name"] == name)
            .map(|env| env["data"].clone())
            .collect()
    }

    pub fn closes(&self) -> usize {
        *self.closes.lock().unwrap()
    }
}

pub struct MockChannel {
    log: ChannelLog,
}

impl SignalingChannel for MockChannel {
    fn post_message(&mut self, text: String) -> MeshResult<()> {
        self.log.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&mut self) {
        *self.log.closes.lock().unwrap() += 1;
    }
}

#[derive(Debug, Clone)]
pub struct TransportState {
    pub options: TransportOptions,
    pub signals: Vec<Value>,
    pub writes: Vec<String>,
    pub closes: usize,
}

/// Shared view over every transport the mock factory handed out.
#[derive(Clone, Default)]
pub struct Transports {
    created: Arc<Mutex<Vec<Arc<Mutex<TransportState>>>>>,
    sinks: Arc<Mutex<HashMap<String, PeerEventSink>>>,
    failing_writes: Arc<Mutex<HashSet<String>>>,
    refused: Arc<Mutex<HashSet<String>>>,
}

impl Transports {
    pub fn created(&self) -> Vec<TransportState> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|state| state.lock().unwrap().clone())
            .collect()
    }

    pub fn created_for(&self, remote_id: &str) -> Vec<TransportState> {
        self.created()
            .into_iter()
            .filter(|t| t.options.remote_id == remote_id)
            .collect()
    }

    /// Sink of the most recent transport created for `remote_id`.
    pub fn sink(&self, remote_id: &str) -> PeerEventSink {
        self.sinks.lock().unwrap()[remote_id].clone()
    }

    pub fn emit(&self, remote_id: &str, event: TransportEvent) {
        assert!(self.sink(remote_id).emit(event));
    }

    pub fn fail_writes_to(&self, remote_id: &str) {
        self.failing_writes
            .lock()
            .unwrap()
            .insert(remote_id.to_string());
    }

    pub fn refuse(&self, remote_id: &str) {
        self.refused.lock().unwrap().insert(remote_id.to_string());
    }
}

pub struct MockFactory {
    transports: Transports,
}

impl TransportFactory for MockFactory {
    fn create(
        &mut self,
        options: TransportOptions,
        events: PeerEventSink,
    ) -> MeshResult<Box<dyn PeerTransport>> {
        let remote_id = options.remote_id.clone();
        if self.transports.refused.lock().unwrap().contains(&remote_id) {
            return Err(MeshError::Transport(format!("refused {remote_id}")));
        }
        let fail_writes = self
            .transports
            .failing_writes
            .lock()
            .unwrap()
            .contains(&remote_id);
        let state = Arc::new(Mutex::new(TransportState {
            options,
            signals: Vec::new(),
            writes: Vec::new(),
            closes: 0,
        }));
        self.transports.created.lock().unwrap().push(state.clone());
        self.transports
            .sinks
            .lock()
            .unwrap()
            .insert(remote_id, events);
        Ok(Box::new(MockTransport { state, fail_writes }))
    }
}

struct MockTransport {
    state: Arc<Mutex<TransportState>>,
    fail_writes: bool,
}

impl PeerTransport for MockTransport {
    fn signal(&mut self, descriptor: Value) -> MeshResult<()> {
        self.state.lock().unwrap().signals.push(descriptor);
        Ok(())
    }

    fn post_message(&mut self, data: &str) -> MeshResult<()> {
        if self.fail_writes {
            return Err(MeshError::Transport("data channel not open".into()));
        }
        self.state.lock().unwrap().writes.push(data.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closes += 1;
    }
}

pub type TestOrchestrator = Orchestrator<MockChannel, MockFactory>;

pub fn orchestrator_with(options: OrchestratorOptions) -> (TestOrchestrator, ChannelLog, Transports) {
    let log = ChannelLog::default();
    let transports = Transports::default();
    let channel = MockChannel { log: log.clone() };
    let factory = MockFactory {
        transports: transports.clone(),
    };
    let Ok(orchestrator) = Orchestrator::new(options, channel, factory) else {
        panic!("orchestrator construction failed");
    };
    (orchestrator, log, transports)
}

pub fn orchestrator(room: &str) -> (TestOrchestrator, ChannelLog, Transports) {
    orchestrator_with(OrchestratorOptions::new(room))
}

pub fn mock_parts() -> (MockChannel, MockFactory, ChannelLog, Transports) {
    let log = ChannelLog::default();
    let transports = Transports::default();
    (
        MockChannel { log: log.clone() },
        MockFactory {
            transports: transports.clone(),
        },
        log,
        transports,
    )
}

pub fn inbound(name: &str, data: Value) -> ChannelEvent {
    ChannelEvent::Message(json!({ "name": name, "data": data }).to_string())
}

pub fn drain(rx: &mut broadcast::Receiver<MeshEvent>) -> Vec<MeshEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

pub fn remote_ids(orchestrator: &TestOrchestrator) -> Vec<String> {
    orchestrator.registry().remote_ids()
}
