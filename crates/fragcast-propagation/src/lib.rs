//! # Fragcast Propagation
//!
//! Gossip layer that disseminates blocks and transactions as Reed–Solomon
//! fragments over an overlay of peers.
//!
//! ## Architecture Role
//!
//! ```text
//! [sealed block / local txs] ──broadcast──→ [PropagationService]
//!                                                 │ windowed sends
//!                                         ┌───────┴───────┐
//!                                         ↓               ↓
//!                                    [Peer A]        [Peer B] ...
//!
//! [peer message] ──handle_message──→ [FragPool] ──≥ N distinct──→ decode → chain
//!                                        └─── stuck → request upstream (min-hop peer)
//! ```
//!
//! The transport owns connections and message framing; the chain owns
//! object validation and serialisation. Both are reached through the port
//! traits in [`ports`].

pub mod domain;
pub mod events;
pub mod ports;
pub mod service;
pub mod wire;

pub use domain::{
    Bitmap, DecodedQueue, FragKind, FragLine, FragPool, FragmentRequest, FragmentSet,
    InsertOutcome, PendingRequest, PropagationConfig,
};
pub use events::PropagationError;
pub use ports::{ChainGateway, FragmentGossip, PeerHandle, PeerRegistry};
pub use service::PropagationService;
