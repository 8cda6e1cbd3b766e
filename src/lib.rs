pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod health;
pub mod logging;
pub mod orchestrator;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod status;
pub mod transport;
pub mod ws;

pub use error::{MeshError, MeshResult};
pub use events::MeshEvent;
pub use orchestrator::{MeshHandle, Orchestrator, OrchestratorOptions};
pub use signaling::{ChannelEvent, SignalingChannel};
pub use status::PeerStatus;
pub use transport::{PeerEventSink, PeerTransport, TransportEvent, TransportFactory, TransportOptions};
