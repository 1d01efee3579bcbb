//! # Fragment Pool
//!
//! Per-object fragment accumulation keyed by object id.
//!
//! ## Lock layering
//!
//! - One coarse mutex guards the `id → line` map.
//! - Each line carries its own mutex for the fragment list, bitmap, pending
//!   requests, total difficulty and upstream peer.
//! - Lock order is pool → line; the pool lock is released before line work
//!   (hand-over-hand), so a slow decode never blocks unrelated inserts.
//! - Counters and latches are additionally published through atomics so the
//!   inspector and the handler thresholds can read them without the line
//!   lock.
//!
//! ## Invariants
//!
//! - `bit.count() == distinct ≤ total` for every line.
//! - `head` is strictly ascending by position, one fragment per position.
//! - `is_decoded` latches 0 → 1 and never returns.
//! - `td` is write-once (first carrier wins).
//! - `min_hop` never increases; `min_hop_peer` changes only when it strictly
//!   decreases.
//! - Conflicting codes for one position poison the line: every later decode
//!   attempt fails until the line is evicted.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use fragcast_erasure::{Fragment, RsCodec};
use parking_lot::Mutex;
use primitive_types::U256;
use shared_types::{short_hex, Hash, PeerId};
use tracing::debug;

use super::bitmap::Bitmap;
use super::entities::{FragKind, FragmentRequest, FragmentSet};
use crate::events::PropagationError;

/// Counters returned by [`FragPool::insert`], read by the handler to decide
/// between decoding and requesting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Distinct positions held after the insert.
    pub distinct: u32,
    /// Total fragments seen, duplicates included.
    pub total: u32,
    /// Whether the line had already decoded.
    pub decoded: bool,
}

/// A request parked on a line until fragments arrive to answer it.
#[derive(Clone, Debug)]
pub struct PendingRequest {
    /// Positions the requester already holds.
    pub load: Bitmap,
    /// Requester handle.
    pub peer: PeerId,
}

struct LineInner {
    /// Received fragments, strictly ascending by position.
    head: Vec<Fragment>,
    /// Positions held.
    bit: Bitmap,
    /// Total difficulty recorded by the first carrier (blocks only).
    td: Option<U256>,
    /// Peer that delivered the lowest hop count so far.
    min_hop_peer: PeerId,
    /// Deferred requests, newest first.
    pending: Vec<PendingRequest>,
}

/// Per-object pool entry.
pub struct FragLine {
    kind: FragKind,
    inner: Mutex<LineInner>,
    distinct: AtomicU32,
    total: AtomicU32,
    trials: AtomicU32,
    min_hop: AtomicU32,
    decoded: AtomicBool,
    requesting: AtomicBool,
    poisoned: AtomicBool,
}

impl FragLine {
    fn new(width: usize, kind: FragKind) -> Self {
        Self {
            kind,
            inner: Mutex::new(LineInner {
                head: Vec::new(),
                bit: Bitmap::new(width),
                td: None,
                min_hop_peer: PeerId::local(),
                pending: Vec::new(),
            }),
            distinct: AtomicU32::new(0),
            total: AtomicU32::new(0),
            trials: AtomicU32::new(0),
            min_hop: AtomicU32::new(u32::MAX),
            decoded: AtomicBool::new(false),
            requesting: AtomicBool::new(false),
            poisoned: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> FragKind {
        self.kind
    }

    pub fn is_decoded(&self) -> bool {
        self.decoded.load(Ordering::Acquire)
    }

    pub fn distinct(&self) -> u32 {
        self.distinct.load(Ordering::Acquire)
    }

    pub fn total(&self) -> u32 {
        self.total.load(Ordering::Acquire)
    }

    /// Decode attempts so far, successful or not.
    pub fn trials(&self) -> u32 {
        self.trials.load(Ordering::Acquire)
    }

    pub fn min_hop(&self) -> u32 {
        self.min_hop.load(Ordering::Acquire)
    }

    pub fn min_hop_peer(&self) -> PeerId {
        self.inner.lock().min_hop_peer.clone()
    }

    pub fn td(&self) -> Option<U256> {
        self.inner.lock().td
    }

    /// Snapshot of the held-position bitmap.
    pub fn bitmap(&self) -> Bitmap {
        self.inner.lock().bit.clone()
    }

    /// Latch the requesting flag; returns the prior value so the first
    /// caller alone launches the upstream request.
    pub fn set_requesting(&self) -> bool {
        self.requesting.swap(true, Ordering::AcqRel)
    }

    /// Park a request on this line and latch the requesting flag. Returns
    /// the prior flag value.
    pub fn insert_request(&self, load: Bitmap, peer: PeerId) -> bool {
        let mut inner = self.inner.lock();
        inner.pending.insert(0, PendingRequest { load, peer });
        self.requesting.swap(true, Ordering::AcqRel)
    }

    /// Take every parked request and release the requesting latch.
    pub fn clear_requests(&self) -> Vec<PendingRequest> {
        let mut inner = self.inner.lock();
        let drained = std::mem::take(&mut inner.pending);
        self.requesting.store(false, Ordering::Release);
        drained
    }
}

/// Concurrent fragment pool keyed by object id.
pub struct FragPool {
    width: usize,
    lines: Mutex<HashMap<Hash, Arc<FragLine>>>,
}

impl FragPool {
    /// A pool for codewords of `width = N + E` positions.
    pub fn new(width: usize) -> Self {
        Self {
            width,
            lines: Mutex::new(HashMap::new()),
        }
    }

    /// Insert one fragment into the line for `id`, creating the line when
    /// absent.
    ///
    /// Duplicate positions leave `distinct` and the bitmap untouched but
    /// still count towards `total`; a duplicate carrying different bytes
    /// poisons the line. The hop count updates the upstream peer choice when
    /// it strictly improves.
    ///
    /// # Errors
    ///
    /// `InvalidPosition` when the position falls outside the code width,
    /// `FragmentLength` when the fragment disagrees with the line's stripe
    /// count. Both are protocol violations by the sender.
    pub fn insert(
        &self,
        frag: Fragment,
        id: Hash,
        hop_count: u32,
        peer: &PeerId,
        td: Option<U256>,
        kind: FragKind,
    ) -> Result<InsertOutcome, PropagationError> {
        let position = frag.position() as usize;
        if position >= self.width {
            return Err(PropagationError::InvalidPosition {
                position: frag.position(),
                width: self.width,
            });
        }

        let line = {
            let mut lines = self.lines.lock();
            Arc::clone(
                lines
                    .entry(id)
                    .or_insert_with(|| Arc::new(FragLine::new(self.width, kind))),
            )
        };

        let mut inner = line.inner.lock();
        if let Some(first) = inner.head.first() {
            if first.stripe_count() != frag.stripe_count() {
                return Err(PropagationError::FragmentLength {
                    got: frag.stripe_count(),
                    expected: first.stripe_count(),
                });
            }
        }

        match inner
            .head
            .binary_search_by_key(&frag.position(), Fragment::position)
        {
            Ok(held) => {
                if inner.head[held].code() != frag.code() {
                    line.poisoned.store(true, Ordering::Release);
                    debug!(id = %short_hex(&id), position, "conflicting duplicate poisons line");
                }
            }
            Err(slot) => {
                inner.head.insert(slot, frag);
                inner.bit.set(position);
                line.distinct.fetch_add(1, Ordering::AcqRel);
            }
        }
        line.total.fetch_add(1, Ordering::AcqRel);

        if inner.td.is_none() {
            inner.td = td;
        }
        if hop_count < line.min_hop.load(Ordering::Acquire) {
            line.min_hop.store(hop_count, Ordering::Release);
            inner.min_hop_peer = peer.clone();
        }

        Ok(InsertOutcome {
            distinct: line.distinct.load(Ordering::Acquire),
            total: line.total.load(Ordering::Acquire),
            decoded: line.is_decoded(),
        })
    }

    /// Shared handle to the line for `id`.
    pub fn line(&self, id: &Hash) -> Option<Arc<FragLine>> {
        self.lines.lock().get(id).cloned()
    }

    /// Drop the line for `id`.
    pub fn clean(&self, id: &Hash) {
        self.lines.lock().remove(id);
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Drop every line (shutdown).
    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    /// Shared handles to every line, for the inspector.
    pub fn snapshot(&self) -> Vec<(Hash, Arc<FragLine>)> {
        self.lines
            .lock()
            .iter()
            .map(|(id, line)| (*id, Arc::clone(line)))
            .collect()
    }

    /// Attempt to reassemble the object for `id`.
    ///
    /// The fragment list is snapshotted under the line lock and decoded
    /// outside it. Success latches `is_decoded` (idempotent); the attempt
    /// counter advances either way. Poisoned lines never decode.
    pub fn try_decode(&self, id: &Hash, codec: &RsCodec) -> Option<Vec<u8>> {
        let line = self.line(id)?;
        line.trials.fetch_add(1, Ordering::AcqRel);
        if line.poisoned.load(Ordering::Acquire) {
            debug!(id = %short_hex(id), "line is poisoned, refusing decode");
            return None;
        }
        let fragments = line.inner.lock().head.clone();
        match codec.splice_and_decode(&fragments) {
            Ok(payload) => {
                line.decoded.store(true, Ordering::Release);
                Some(payload)
            }
            Err(err) => {
                debug!(id = %short_hex(id), %err, "splice-and-decode failed");
                None
            }
        }
    }

    /// Build the response to `req`: every held fragment whose position the
    /// requester does not already have (`line.bit \ req.load`).
    pub fn prepare(&self, req: &FragmentRequest) -> Option<FragmentSet> {
        let line = self.line(&req.id)?;
        let inner = line.inner.lock();
        let missing = inner.bit.difference(&req.load);
        let fragments = inner
            .head
            .iter()
            .filter(|frag| missing.test(frag.position() as usize))
            .cloned()
            .collect();
        Some(FragmentSet::response(req.id, fragments))
    }
}

/// FIFO of decoded object ids, bounding how long decoded lines linger for
/// late requesters before eviction.
pub struct DecodedQueue {
    cap: usize,
    ids: Mutex<VecDeque<Hash>>,
}

impl DecodedQueue {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            ids: Mutex::new(VecDeque::new()),
        }
    }

    /// Append `id`; returns the ids pushed out past the capacity, oldest
    /// first, for the caller to evict from the pool.
    pub fn push(&self, id: Hash) -> Vec<Hash> {
        let mut ids = self.ids.lock();
        ids.push_back(id);
        let mut evicted = Vec::new();
        while ids.len() > self.cap {
            if let Some(oldest) = ids.pop_front() {
                evicted.push(oldest);
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}
