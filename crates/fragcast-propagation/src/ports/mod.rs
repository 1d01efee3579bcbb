//! Ports for fragment propagation.

pub mod inbound;
pub mod outbound;

pub use inbound::FragmentGossip;
pub use outbound::{ChainGateway, PeerHandle, PeerRegistry};
