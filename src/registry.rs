use std::collections::HashMap;
use std::fmt;

use crate::transport::PeerTransport;

/// One live connection attempt toward a remote peer. Owns its transport.
pub struct PeerSession {
    remote_id: String,
    local_id: String,
    initiator: bool,
    generation: u64,
    transport: Box<dyn PeerTransport>,
    pub(crate) active: bool,
    pub(crate) error: Option<String>,
}

impl PeerSession {
    pub(crate) fn new(
        remote_id: String,
        local_id: String,
        initiator: bool,
        generation: u64,
        transport: Box<dyn PeerTransport>,
    ) -> Self {
        Self {
            remote_id,
            local_id,
            initiator,
            generation,
            transport,
            active: false,
            error: None,
        }
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn initiator(&self) -> bool {
        self.initiator
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn transport_mut(&mut self) -> &mut dyn PeerTransport {
        self.transport.as_mut()
    }

    pub(crate) fn close(&mut self) {
        self.transport.close();
        self.active = false;
    }
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("remote_id", &self.remote_id)
            .field("local_id", &self.local_id)
            .field("initiator", &self.initiator)
            .field("active", &self.active)
            .field("error", &self.error)
            .finish()
    }
}

/// Sessions keyed by remote id, at most one per id, iterated in creation
/// order. Only the orchestrator mutates it.
#[derive(Default)]
pub struct PeerRegistry {
    sessions: HashMap<String, PeerSession>,
    order: Vec<String>,
    next_generation: u64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, remote_id: &str) -> bool {
        self.sessions.contains_key(remote_id)
    }

    pub fn get(&self, remote_id: &str) -> Option<&PeerSession> {
        self.sessions.get(remote_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerSession> + '_ {
        self.order.iter().filter_map(|id| self.sessions.get(id))
    }

    pub fn remote_ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub(crate) fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Register a session. An existing session for the same remote id wins
    /// and the rejected one is handed back.
    pub(crate) fn insert(&mut self, session: PeerSession) -> Result<(), PeerSession> {
        if self.sessions.contains_key(&session.remote_id) {
            return Err(session);
        }
        self.order.push(session.remote_id.clone());
        self.sessions.insert(session.remote_id.clone(), session);
        Ok(())
    }

    pub(crate) fn get_mut(&mut self, remote_id: &str) -> Option<&mut PeerSession> {
        self.sessions.get_mut(remote_id)
    }

    /// Look up a session only if it is the one that emitted `generation`.
    pub(crate) fn current_mut(
        &mut self,
        remote_id: &str,
        generation: u64,
    ) -> Option<&mut PeerSession> {
        self.sessions
            .get_mut(remote_id)
            .filter(|s| s.generation == generation)
    }

    pub(crate) fn sessions_mut(&mut self) -> impl Iterator<Item = &mut PeerSession> + '_ {
        self.sessions.values_mut()
    }

    /// Close the session's transport and drop it from the registry.
    pub(crate) fn destroy(&mut self, remote_id: &str) -> Option<PeerSession> {
        let mut session = self.sessions.remove(remote_id)?;
        self.order.retain(|id| id != remote_id);
        session.close();
        Some(session)
    }

    /// Drop a session whose transport has already shut down.
    pub(crate) fn forget(&mut self, remote_id: &str) -> Option<PeerSession> {
        let mut session = self.sessions.remove(remote_id)?;
        self.order.retain(|id| id != remote_id);
        session.active = false;
        Some(session)
    }

    pub(crate) fn destroy_all(&mut self) -> usize {
        let ids = std::mem::take(&mut self.order);
        let mut closed = 0;
        for id in ids {
            if let Some(mut session) = self.sessions.remove(&id) {
                session.close();
                closed += 1;
            }
        }
        closed
    }
}

impl fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}
