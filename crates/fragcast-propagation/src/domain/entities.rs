//! Core entities exchanged by the gossip layer.

use fragcast_erasure::Fragment;
use shared_types::Hash;

use super::bitmap::Bitmap;

/// Kind of object a fragment line carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FragKind {
    Transaction,
    Block,
}

/// An ordered batch of fragments for one object.
///
/// `hop_count` is incremented once per forwarding peer; `is_response` marks
/// sets that answer an earlier [`FragmentRequest`].
#[derive(Clone, Debug)]
pub struct FragmentSet {
    pub fragments: Vec<Fragment>,
    pub id: Hash,
    pub hop_count: u32,
    pub is_response: bool,
}

impl FragmentSet {
    /// A freshly originated set (hop count zero, not a response).
    pub fn new(id: Hash, fragments: Vec<Fragment>) -> Self {
        Self {
            fragments,
            id,
            hop_count: 0,
            is_response: false,
        }
    }

    /// A set answering a request.
    pub fn response(id: Hash, fragments: Vec<Fragment>) -> Self {
        Self {
            fragments,
            id,
            hop_count: 0,
            is_response: true,
        }
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Positions carried by this set, in set order.
    pub fn positions(&self) -> Vec<u8> {
        self.fragments.iter().map(Fragment::position).collect()
    }

    /// A per-peer slice of this set; keeps id and hop count, never a
    /// response.
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            fragments: indices.iter().map(|&i| self.fragments[i].clone()).collect(),
            id: self.id,
            hop_count: self.hop_count,
            is_response: false,
        }
    }
}

/// Request for fragments of `id` that the sender does **not** yet hold:
/// `load` marks the positions already held, the responder answers with the
/// complement out of its own line.
#[derive(Clone, Debug)]
pub struct FragmentRequest {
    pub load: Bitmap,
    pub id: Hash,
}
