//! Inbound port (API) for fragment propagation.

use async_trait::async_trait;
use primitive_types::U256;
use shared_types::{Hash, PeerId};

use crate::events::PropagationError;

/// Entry points the transport and the node wire into the gossip layer.
#[async_trait]
pub trait FragmentGossip: Send + Sync {
    /// Feed one inbound message. `code` selects the handler; `payload` is
    /// the undecoded message body.
    ///
    /// # Errors
    ///
    /// Returns only wire-shaped errors (malformed payload, unknown code,
    /// protocol-violating fragments); the transport should drop the peer on
    /// them. Recoverable conditions are consumed and logged.
    async fn handle_message(
        &self,
        peer: &PeerId,
        code: u64,
        payload: &[u8],
    ) -> Result<(), PropagationError>;

    /// Fragment-encode and gossip a freshly sealed block.
    async fn broadcast_block(
        &self,
        id: Hash,
        payload: &[u8],
        td: U256,
    ) -> Result<(), PropagationError>;

    /// Fragment-encode and gossip a batch of local transactions, given as
    /// `(id, encoded payload)` pairs.
    async fn broadcast_transactions(
        &self,
        transactions: Vec<(Hash, Vec<u8>)>,
    ) -> Result<(), PropagationError>;

    /// Gate transaction-fragment ingestion until initial sync is done.
    fn set_accept_transactions(&self, accept: bool);
}
