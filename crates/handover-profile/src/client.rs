use handover_frame::{BdAddr, MarshalProgress, P0_TAG};
use tracing::{debug, info};

use crate::error::{ProtocolFault, Result};

/// Largest number of clients the wire format can address.
///
/// Client ids share the tag byte with the P0 and end tags, so they must stay
/// below [`P0_TAG`].
pub const MAX_CLIENTS: usize = P0_TAG as usize;

/// Result of one [`HandoverClient::unmarshal`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnmarshalProgress {
    pub consumed: usize,
    pub complete: bool,
}

impl UnmarshalProgress {
    pub fn new(consumed: usize, complete: bool) -> Self {
        Self { consumed, complete }
    }
}

/// A subsystem whose state moves with the primary role.
///
/// Clients are driven strictly in registration order. The registration index
/// is the client's id on the wire, so both earbuds must register the same
/// clients in the same order.
pub trait HandoverClient: Send {
    /// Short name used in log lines.
    fn name(&self) -> &str {
        "client"
    }

    /// Refuse the handover in progress. Asked at several checkpoints.
    fn veto(&mut self) -> bool {
        false
    }

    /// Write state into `buf`.
    ///
    /// Called again with a fresh buffer in the next packet until it reports
    /// `complete`. Reporting more bytes than `buf.len()` is a fault.
    fn marshal(&mut self, handset: &BdAddr, buf: &mut [u8]) -> MarshalProgress;

    /// Apply state written by the peer's `marshal`. The whole of `data` must
    /// be consumed.
    fn unmarshal(&mut self, handset: &BdAddr, data: &[u8]) -> UnmarshalProgress;

    /// Switch to the new role. Irreversible.
    fn commit(&mut self, _is_primary: bool) {}

    /// Finish the switch after the link layer committed.
    fn complete(&mut self, _is_primary: bool) {}

    /// Drop any partially marshalled or unmarshalled state.
    fn abort(&mut self) {}
}

/// Ordered, write-once table of handover clients.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Vec<Box<dyn HandoverClient>>,
}

impl ClientRegistry {
    pub fn new(clients: Vec<Box<dyn HandoverClient>>) -> Result<Self> {
        if clients.len() > MAX_CLIENTS {
            return Err(ProtocolFault::usage(format!(
                "{} handover clients registered, at most {MAX_CLIENTS} are addressable",
                clients.len()
            )));
        }
        debug!(
            count = clients.len(),
            names = ?clients.iter().map(|c| c.name().to_string()).collect::<Vec<_>>(),
            "handover clients registered"
        );
        Ok(Self { clients })
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Client registered at wire id `id`.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut (dyn HandoverClient + 'static)> {
        self.clients.get_mut(id).map(|client| client.as_mut())
    }

    /// True as soon as one client vetoes. Later clients are not asked.
    pub fn veto(&mut self) -> bool {
        for (id, client) in self.clients.iter_mut().enumerate() {
            if client.veto() {
                info!(client = id, name = client.name(), "handover vetoed");
                return true;
            }
        }
        false
    }

    pub fn commit_all(&mut self, is_primary: bool) {
        for client in &mut self.clients {
            client.commit(is_primary);
        }
    }

    pub fn complete_all(&mut self, is_primary: bool) {
        for client in &mut self.clients {
            client.complete(is_primary);
        }
    }

    pub fn abort_all(&mut self) {
        debug!(count = self.clients.len(), "aborting handover clients");
        for client in &mut self.clients {
            client.abort();
        }
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.clients.iter().map(|client| client.name()))
            .finish()
    }
}
