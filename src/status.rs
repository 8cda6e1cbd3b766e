use serde::Serialize;

use crate::registry::PeerRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    pub active: bool,
    pub initiator: bool,
    pub local_id: String,
    pub remote_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Point-in-time view of every session, in creation order. Not cached.
pub fn snapshot(registry: &PeerRegistry) -> Vec<PeerStatus> {
    registry
        .iter()
        .map(|session| PeerStatus {
            active: session.active(),
            initiator: session.initiator(),
            local_id: session.local_id().to_string(),
            remote_id: session.remote_id().to_string(),
            error: session.error().map(str::to_string),
        })
        .collect()
}
