//! Outbound ports (SPI) for fragment propagation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use primitive_types::U256;
use shared_types::{Hash, PeerId};

use crate::domain::{FragKind, FragmentRequest, FragmentSet};
use crate::events::PropagationError;

/// Send-side capability of one connected peer.
///
/// Sends go into the transport's per-peer buffered queue; they may park the
/// task, which is why the broadcast scheduler isolates every send in its own
/// task.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    fn id(&self) -> &PeerId;

    /// Most recent round-trip estimate.
    fn latency(&self) -> Duration;

    /// Refresh the round-trip estimate.
    fn update_latency(&self);

    async fn send_transaction_fragments(&self, set: FragmentSet) -> Result<(), PropagationError>;

    /// `td` accompanies freshly propagated blocks; responses to requests
    /// carry `None` and the receiver falls back to its pool line.
    async fn send_block_fragments(
        &self,
        set: FragmentSet,
        td: Option<U256>,
    ) -> Result<(), PropagationError>;

    async fn send_request(
        &self,
        kind: FragKind,
        request: FragmentRequest,
    ) -> Result<(), PropagationError>;
}

/// Membership view over the connected peer set.
pub trait PeerRegistry: Send + Sync {
    /// Peers not yet known to hold fragments of `id`.
    fn peers_without_fragment(&self, id: &Hash) -> Vec<Arc<dyn PeerHandle>>;

    /// Same, additionally excluding the peer the set arrived from.
    fn peers_without_fragment_except(
        &self,
        id: &Hash,
        origin: &PeerId,
    ) -> Vec<Arc<dyn PeerHandle>>;

    fn search_peer(&self, peer: &PeerId) -> Option<Arc<dyn PeerHandle>>;

    fn random_peer(&self) -> Option<Arc<dyn PeerHandle>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Hand-off point into the chain: the gateway owns the chain's object
/// serialisation and decodes the reassembled payload itself.
pub trait ChainGateway: Send + Sync {
    /// Decode a reassembled transaction payload and queue it for the pool.
    fn import_transaction(&self, payload: &[u8]) -> Result<Hash, PropagationError>;

    /// Decode a reassembled block payload and schedule it for import with
    /// the total difficulty claimed by the propagation.
    fn import_block(
        &self,
        origin: &PeerId,
        payload: &[u8],
        td: U256,
    ) -> Result<Hash, PropagationError>;
}
