//! Error types for fragment propagation.

use rlp::DecoderError;
use shared_types::PeerId;
use thiserror::Error;

/// Fragment gossip errors.
///
/// Only the wire-shaped variants (`Decode`, `UnknownMessage`,
/// `InvalidPosition`, `FragmentLength`) escape
/// [`crate::ports::inbound::FragmentGossip::handle_message`]; the transport
/// is expected to drop the offending peer on them. Everything else is
/// handled and logged inside the service.
#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("wire decode failed: {0}")]
    Decode(#[from] DecoderError),

    #[error("unknown message code {0:#x}")]
    UnknownMessage(u64),

    #[error("fragment position {position} outside code width {width}")]
    InvalidPosition { position: u8, width: usize },

    #[error("fragment length {got} differs from line stripe count {expected}")]
    FragmentLength { got: usize, expected: usize },

    #[error("erasure codec: {0}")]
    Erasure(#[from] fragcast_erasure::ErasureError),

    #[error("no connected peers to request from")]
    NoPeers,

    #[error("peer gone: {0}")]
    PeerGone(PeerId),

    #[error("chain import failed: {0}")]
    ChainImport(String),

    #[error("send to peer {peer} failed: {reason}")]
    PeerSend { peer: PeerId, reason: String },
}
