//! # Shared Types Crate
//!
//! Primitives shared by every fragcast crate: the 32-byte object identifier,
//! the opaque peer handle id, and the Keccak-256 helper used to derive
//! identifiers from encoded payloads.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: cross-crate types live here, nowhere else.
//! - **Opaque Peer Identity**: peers are referenced by string handle only;
//!   the peer set owns the connection objects.

use sha3::{Digest, Keccak256};
use std::fmt;

/// 32-byte object identifier (Keccak-256 of the encoded payload).
pub type Hash = [u8; 32];

/// Compute the Keccak-256 hash of a byte slice.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Build a [`Hash`] from a byte slice. Returns `None` unless exactly 32 bytes.
pub fn hash_from_slice(bytes: &[u8]) -> Option<Hash> {
    if bytes.len() == 32 {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(bytes);
        Some(hash)
    } else {
        None
    }
}

/// Short hex prefix of a hash, for log lines.
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..4])
}

/// Opaque peer identifier.
///
/// A string handle assigned by the transport layer. The empty handle is
/// reserved for the local node (fragments inserted on the origination path
/// carry it, so the request logic never routes a request back to ourselves).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Creates a peer id from a transport handle.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reserved local-node id.
    pub fn local() -> Self {
        Self(String::new())
    }

    /// True for the reserved local-node id.
    pub fn is_local(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<local>")
        } else {
            f.write_str(&self.0)
        }
    }
}
