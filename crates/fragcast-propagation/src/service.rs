//! # Propagation Service
//!
//! Drives the fragment gossip state machine: inbound message handling,
//! threshold-triggered decoding, request escalation, response fan-out,
//! forwarding and the origination broadcasts.
//!
//! ```text
//! transport ──handle_message──→ pool.insert ──┬─ distinct ≥ min_frag_num → decode → chain
//!                                             ├─ total ≥ max_total_frag → request upstream
//!                                             └─ forward channel → windowed re-broadcast
//! ```
//!
//! One handler call runs per inbound message; forwarding, request
//! escalation and every peer send run in their own tasks, so a slow peer
//! cannot stall ingestion. The forward channel is bounded and lossy: under
//! burst, sets past its capacity are dropped rather than queued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use fragcast_erasure::RsCodec;
use parking_lot::Mutex;
use primitive_types::U256;
use shared_types::{short_hex, Hash, PeerId};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace, warn};

use crate::domain::{
    assign_fragment_windows, split_by_latency, Bitmap, DecodedQueue, FragKind, FragPool,
    FragmentRequest, FragmentSet, PropagationConfig,
};
use crate::events::PropagationError;
use crate::ports::inbound::FragmentGossip;
use crate::ports::outbound::{ChainGateway, PeerHandle, PeerRegistry};
use crate::wire::{
    BlockFragData, BLOCK_FRAG_MSG, REQUEST_BLOCK_FRAG_MSG, REQUEST_TX_FRAG_MSG, TX_FRAG_MSG,
};

/// A received set queued for re-broadcast to further peers.
struct ForwardEvent {
    set: FragmentSet,
    kind: FragKind,
    from: PeerId,
    td: Option<U256>,
}

struct Inner<P, C> {
    config: PropagationConfig,
    codec: RsCodec,
    pool: FragPool,
    decoded: DecodedQueue,
    peers: Arc<P>,
    chain: Arc<C>,
    accept_txs: AtomicBool,
    forward_tx: mpsc::Sender<ForwardEvent>,
    forward_rx: Mutex<Option<mpsc::Receiver<ForwardEvent>>>,
    quit: watch::Sender<bool>,
}

/// Fragment gossip service, generic over the peer set and chain gateways.
///
/// Cheap to clone; every clone shares the pool and channels.
pub struct PropagationService<P, C> {
    inner: Arc<Inner<P, C>>,
}

impl<P, C> Clone for PropagationService<P, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, C> PropagationService<P, C>
where
    P: PeerRegistry + 'static,
    C: ChainGateway + 'static,
{
    pub fn new(
        config: PropagationConfig,
        peers: Arc<P>,
        chain: Arc<C>,
    ) -> Result<Self, PropagationError> {
        let codec = RsCodec::new(config.primitive, config.ecc_symbols, config.num_symbols)?;
        let (forward_tx, forward_rx) = mpsc::channel(config.forward_channel_capacity);
        let (quit, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(Inner {
                pool: FragPool::new(config.code_width()),
                decoded: DecodedQueue::new(config.max_decode_num),
                codec,
                config,
                peers,
                chain,
                accept_txs: AtomicBool::new(false),
                forward_tx,
                forward_rx: Mutex::new(Some(forward_rx)),
                quit,
            }),
        })
    }

    /// Spawn the forward loop and, when configured, the stuck-line
    /// inspector. Idempotent; a second call is a no-op.
    pub fn start(&self) {
        let Some(forward_rx) = self.inner.forward_rx.lock().take() else {
            warn!("fragment gossip already started");
            return;
        };
        let this = self.clone();
        let quit = self.inner.quit.subscribe();
        tokio::spawn(async move { this.forward_loop(forward_rx, quit).await });

        if self.inner.config.enable_inspector {
            let this = self.clone();
            let quit = self.inner.quit.subscribe();
            tokio::spawn(async move { this.inspector_loop(quit).await });
        }
    }

    /// Signal every loop to exit and drop the pooled lines.
    pub fn stop(&self) {
        let _ = self.inner.quit.send(true);
        self.inner.pool.clear();
        debug!("fragment gossip stopped");
    }

    /// Pool access for ancillary inspection.
    pub fn pool(&self) -> &FragPool {
        &self.inner.pool
    }

    pub fn config(&self) -> &PropagationConfig {
        &self.inner.config
    }

    async fn handle_fragments(
        &self,
        peer: &PeerId,
        payload: &[u8],
        kind: FragKind,
    ) -> Result<(), PropagationError> {
        let (mut set, td) = match kind {
            FragKind::Block => {
                let data: BlockFragData = rlp::decode(payload)?;
                // Zero difficulty marks a response set; the line value is
                // used at import time instead.
                let td = (!data.td.is_zero()).then_some(data.td);
                (data.set, td)
            }
            FragKind::Transaction => {
                if !self.inner.accept_txs.load(Ordering::Acquire) {
                    return Ok(());
                }
                (rlp::decode::<FragmentSet>(payload)?, None)
            }
        };
        let id = set.id;

        let mut outcome = None;
        for fragment in &set.fragments {
            outcome = Some(self.inner.pool.insert(
                fragment.clone(),
                id,
                set.hop_count,
                peer,
                td,
                kind,
            )?);
        }
        let Some(outcome) = outcome else {
            trace!(id = %short_hex(&id), peer = %peer, "empty fragment set");
            return Ok(());
        };
        trace!(
            id = %short_hex(&id),
            peer = %peer,
            distinct = outcome.distinct,
            total = outcome.total,
            positions = ?set.positions(),
            "received fragments"
        );

        set.hop_count += 1;
        let event = ForwardEvent {
            set: set.clone(),
            kind,
            from: peer.clone(),
            td,
        };
        if self.inner.forward_tx.try_send(event).is_err() {
            trace!(id = %short_hex(&id), "forward channel full, set not re-broadcast");
        }

        if outcome.distinct >= self.inner.config.min_frag_num && !outcome.decoded {
            self.try_decode_and_import(peer, id, kind, td).await;
        } else if outcome.total >= self.inner.config.max_total_frag && !outcome.decoded {
            match self.inner.pool.line(&id) {
                None => warn!(id = %short_hex(&id), "line evicted before request trigger"),
                Some(line) => {
                    if !line.set_requesting() {
                        trace!(id = %short_hex(&id), total = outcome.total, "requesting missing fragments");
                        let this = self.clone();
                        let upstream = line.min_hop_peer();
                        tokio::spawn(async move {
                            this.request_fragments(id, kind, upstream).await;
                        });
                    }
                }
            }
        }

        if set.is_response {
            self.answer_pending(&id, kind).await;
        }
        Ok(())
    }

    /// Decode the line and hand the reassembled object to the chain.
    ///
    /// Erasure failures are left for the request/retry machinery; chain
    /// rejections of a decoded object are logged, never propagated.
    async fn try_decode_and_import(
        &self,
        peer: &PeerId,
        id: Hash,
        kind: FragKind,
        message_td: Option<U256>,
    ) {
        let Some(payload) = self.inner.pool.try_decode(&id, &self.inner.codec) else {
            debug!(id = %short_hex(&id), "decode attempt failed, awaiting more fragments");
            return;
        };
        match kind {
            FragKind::Transaction => match self.inner.chain.import_transaction(&payload) {
                Ok(hash) => trace!(id = %short_hex(&id), tx = %short_hex(&hash), "transaction reassembled"),
                Err(err) => error!(id = %short_hex(&id), %err, "reassembled transaction rejected"),
            },
            FragKind::Block => {
                let td = message_td.or_else(|| self.inner.pool.line(&id).and_then(|line| line.td()));
                match td {
                    None => warn!(id = %short_hex(&id), "no total difficulty known for reassembled block"),
                    Some(td) => match self.inner.chain.import_block(peer, &payload, td) {
                        Ok(hash) => {
                            trace!(id = %short_hex(&id), block = %short_hex(&hash), "block reassembled")
                        }
                        Err(err) => error!(id = %short_hex(&id), %err, "reassembled block rejected"),
                    },
                }
            }
        }
        for evicted in self.inner.decoded.push(id) {
            self.inner.pool.clean(&evicted);
        }
    }

    async fn handle_request(
        &self,
        peer: &PeerId,
        payload: &[u8],
        kind: FragKind,
    ) -> Result<(), PropagationError> {
        let mut request: FragmentRequest = rlp::decode(payload)?;
        request.load.resize(self.inner.config.code_width());
        let id = request.id;

        let Some(line) = self.inner.pool.line(&id) else {
            debug!(id = %short_hex(&id), peer = %peer, "request for unknown line, fragments dropped");
            return Ok(());
        };

        // Too little coverage between the two of us: park the request and
        // escalate upstream with the merged holdings.
        let merged = request.load.union(&line.bitmap());
        if merged.count() < self.inner.config.upper_request_num {
            trace!(id = %short_hex(&id), peer = %peer, merged = merged.count(), "deferring request upstream");
            if !line.insert_request(request.load, peer.clone()) {
                let this = self.clone();
                let upstream = line.min_hop_peer();
                tokio::spawn(async move {
                    this.request_with_bitmap(id, kind, upstream, merged).await;
                });
            }
            return Ok(());
        }

        let Some(response) = self.inner.pool.prepare(&request) else {
            warn!(id = %short_hex(&id), "line evicted while preparing response");
            return Ok(());
        };
        let Some(handle) = self.inner.peers.search_peer(peer) else {
            warn!(peer = %peer, "requesting peer is gone");
            return Ok(());
        };
        trace!(id = %short_hex(&id), peer = %peer, count = response.len(), "answering fragment request");
        let sent = match kind {
            FragKind::Transaction => handle.send_transaction_fragments(response).await,
            FragKind::Block => handle.send_block_fragments(response, None).await,
        };
        if let Err(err) = sent {
            debug!(peer = %peer, %err, "response send failed");
        }
        Ok(())
    }

    /// Reply to every request parked on the line, now that a response
    /// refreshed our holdings.
    async fn answer_pending(&self, id: &Hash, kind: FragKind) {
        let Some(line) = self.inner.pool.line(id) else {
            return;
        };
        for pending in line.clear_requests() {
            let request = FragmentRequest {
                load: pending.load,
                id: *id,
            };
            let Some(response) = self.inner.pool.prepare(&request) else {
                continue;
            };
            let Some(handle) = self.inner.peers.search_peer(&pending.peer) else {
                warn!(peer = %pending.peer, "peer awaiting response is gone");
                continue;
            };
            trace!(id = %short_hex(id), peer = %pending.peer, count = response.len(), "answering deferred request");
            let sent = match kind {
                FragKind::Transaction => handle.send_transaction_fragments(response).await,
                FragKind::Block => handle.send_block_fragments(response, None).await,
            };
            if let Err(err) = sent {
                debug!(peer = %pending.peer, %err, "deferred response send failed");
            }
        }
    }

    /// Request missing fragments of `id`, advertising our current holdings.
    async fn request_fragments(&self, id: Hash, kind: FragKind, upstream: PeerId) {
        let Some(line) = self.inner.pool.line(&id) else {
            return;
        };
        self.request_with_bitmap(id, kind, upstream, line.bitmap())
            .await;
    }

    /// Request with an explicit holdings bitmap (used for escalation, where
    /// the bitmap is the requester's and our merged view).
    async fn request_with_bitmap(&self, id: Hash, kind: FragKind, upstream: PeerId, load: Bitmap) {
        let peer = self
            .inner
            .peers
            .search_peer(&upstream)
            .or_else(|| self.inner.peers.random_peer());
        let Some(peer) = peer else {
            warn!(id = %short_hex(&id), "no peers, cannot request fragments");
            return;
        };
        trace!(id = %short_hex(&id), peer = %peer.id(), "sending fragment request");
        if let Err(err) = peer.send_request(kind, FragmentRequest { load, id }).await {
            debug!(peer = %peer.id(), %err, "request send failed");
        }
    }

    async fn forward_loop(
        self,
        mut forward_rx: mpsc::Receiver<ForwardEvent>,
        mut quit: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = quit.changed() => {
                    if changed.is_err() || *quit.borrow() {
                        break;
                    }
                }
                event = forward_rx.recv() => match event {
                    Some(event) => self.forward(event),
                    None => break,
                },
            }
        }
    }

    /// Re-broadcast a received set to peers that have not seen it, skipping
    /// its origin. Transactions travel whole; blocks are windowed.
    fn forward(&self, event: ForwardEvent) {
        if event.set.is_empty() {
            return;
        }
        let peers = self
            .inner
            .peers
            .peers_without_fragment_except(&event.set.id, &event.from);
        if peers.is_empty() {
            return;
        }
        let quota = match event.kind {
            FragKind::Transaction => event.set.len(),
            FragKind::Block => self.inner.config.peer_frags_num,
        };
        self.spawn_windowed_sends(peers, &event.set, event.td, event.kind, quota);
    }

    /// Partition `set` into per-peer windows and dispatch one send task per
    /// peer.
    fn spawn_windowed_sends(
        &self,
        peers: Vec<Arc<dyn PeerHandle>>,
        set: &FragmentSet,
        td: Option<U256>,
        kind: FragKind,
        quota: usize,
    ) {
        if peers.is_empty() || set.is_empty() {
            return;
        }
        let windows =
            assign_fragment_windows(set.len(), peers.len(), quota, &mut rand::thread_rng());
        for (peer, window) in peers.into_iter().zip(windows) {
            let subset = set.subset(&window);
            tokio::spawn(async move {
                peer.update_latency();
                let sent = match kind {
                    FragKind::Transaction => peer.send_transaction_fragments(subset).await,
                    FragKind::Block => peer.send_block_fragments(subset, td).await,
                };
                if let Err(err) = sent {
                    debug!(peer = %peer.id(), %err, "fragment send failed");
                }
            });
        }
    }

    /// Periodic liveness pass: any line whose distinct count did not move
    /// over a full cycle and which has not decoded gets a fresh upstream
    /// request.
    async fn inspector_loop(self, mut quit: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.inner.config.force_request_cycle);
        let mut last_counts: HashMap<Hash, u32> = HashMap::new();
        loop {
            tokio::select! {
                changed = quit.changed() => {
                    if changed.is_err() || *quit.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let lines = self.inner.pool.snapshot();
                    let mut counts = HashMap::with_capacity(lines.len());
                    for (id, line) in lines {
                        let distinct = line.distinct();
                        if last_counts.get(&id) == Some(&distinct) && !line.is_decoded() {
                            debug!(id = %short_hex(&id), distinct, "line is stuck, forcing request");
                            let this = self.clone();
                            let kind = line.kind();
                            let upstream = line.min_hop_peer();
                            tokio::spawn(async move {
                                this.request_fragments(id, kind, upstream).await;
                            });
                        }
                        counts.insert(id, distinct);
                    }
                    last_counts = counts;
                }
            }
        }
    }
}

#[async_trait]
impl<P, C> FragmentGossip for PropagationService<P, C>
where
    P: PeerRegistry + 'static,
    C: ChainGateway + 'static,
{
    async fn handle_message(
        &self,
        peer: &PeerId,
        code: u64,
        payload: &[u8],
    ) -> Result<(), PropagationError> {
        match code {
            TX_FRAG_MSG => self.handle_fragments(peer, payload, FragKind::Transaction).await,
            BLOCK_FRAG_MSG => self.handle_fragments(peer, payload, FragKind::Block).await,
            REQUEST_TX_FRAG_MSG => {
                self.handle_request(peer, payload, FragKind::Transaction).await
            }
            REQUEST_BLOCK_FRAG_MSG => self.handle_request(peer, payload, FragKind::Block).await,
            other => Err(PropagationError::UnknownMessage(other)),
        }
    }

    async fn broadcast_block(
        &self,
        id: Hash,
        payload: &[u8],
        td: U256,
    ) -> Result<(), PropagationError> {
        let fragments = self.inner.codec.divide_and_encode(payload)?;
        let set = FragmentSet::new(id, fragments);
        // Self-insert so this node can answer requests for its own block.
        for fragment in &set.fragments {
            self.inner.pool.insert(
                fragment.clone(),
                id,
                0,
                &PeerId::local(),
                Some(td),
                FragKind::Block,
            )?;
        }

        let peers = self.inner.peers.peers_without_fragment(&id);
        let (fast, slow) = split_by_latency(peers, self.inner.config.delay_threshold);
        debug!(
            id = %short_hex(&id),
            fast = fast.len(),
            slow = slow.len(),
            fragments = set.len(),
            "broadcasting block fragments"
        );
        // Every recipient gets a share that decodes on its own; fast peers
        // are dispatched before slow ones.
        let quota = self.inner.config.min_frag_num as usize;
        self.spawn_windowed_sends(fast, &set, Some(td), FragKind::Block, quota);
        self.spawn_windowed_sends(slow, &set, Some(td), FragKind::Block, quota);
        Ok(())
    }

    async fn broadcast_transactions(
        &self,
        transactions: Vec<(Hash, Vec<u8>)>,
    ) -> Result<(), PropagationError> {
        for (id, payload) in transactions {
            let fragments = self.inner.codec.divide_and_encode(&payload)?;
            let set = FragmentSet::new(id, fragments);
            for fragment in &set.fragments {
                self.inner.pool.insert(
                    fragment.clone(),
                    id,
                    0,
                    &PeerId::local(),
                    None,
                    FragKind::Transaction,
                )?;
            }
            let peers = self.inner.peers.peers_without_fragment(&id);
            trace!(id = %short_hex(&id), recipients = peers.len(), "broadcasting transaction fragments");
            self.spawn_windowed_sends(
                peers,
                &set,
                None,
                FragKind::Transaction,
                self.inner.config.peer_frags_num,
            );
        }
        Ok(())
    }

    fn set_accept_transactions(&self, accept: bool) {
        self.inner.accept_txs.store(accept, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use shared_types::keccak256;
    use std::time::Duration;

    #[derive(Debug)]
    enum Sent {
        Tx(FragmentSet),
        Block(FragmentSet, Option<U256>),
        Request(FragKind, FragmentRequest),
    }

    struct MockPeer {
        id: PeerId,
        latency: Duration,
        sent: Mutex<Vec<Sent>>,
    }

    impl MockPeer {
        fn new(id: &str, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                id: PeerId::from(id),
                latency,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent_requests(&self) -> Vec<(FragKind, FragmentRequest)> {
            self.sent
                .lock()
                .iter()
                .filter_map(|msg| match msg {
                    Sent::Request(kind, request) => Some((*kind, request.clone())),
                    _ => None,
                })
                .collect()
        }

        fn sent_sets(&self) -> Vec<FragmentSet> {
            self.sent
                .lock()
                .iter()
                .filter_map(|msg| match msg {
                    Sent::Tx(set) => Some(set.clone()),
                    Sent::Block(set, _) => Some(set.clone()),
                    Sent::Request(..) => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl PeerHandle for MockPeer {
        fn id(&self) -> &PeerId {
            &self.id
        }

        fn latency(&self) -> Duration {
            self.latency
        }

        fn update_latency(&self) {}

        async fn send_transaction_fragments(
            &self,
            set: FragmentSet,
        ) -> Result<(), PropagationError> {
            self.sent.lock().push(Sent::Tx(set));
            Ok(())
        }

        async fn send_block_fragments(
            &self,
            set: FragmentSet,
            td: Option<U256>,
        ) -> Result<(), PropagationError> {
            self.sent.lock().push(Sent::Block(set, td));
            Ok(())
        }

        async fn send_request(
            &self,
            kind: FragKind,
            request: FragmentRequest,
        ) -> Result<(), PropagationError> {
            self.sent.lock().push(Sent::Request(kind, request));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockRegistry {
        peers: Mutex<Vec<Arc<MockPeer>>>,
    }

    impl MockRegistry {
        fn add(&self, peer: Arc<MockPeer>) {
            self.peers.lock().push(peer);
        }
    }

    impl PeerRegistry for MockRegistry {
        fn peers_without_fragment(&self, _id: &Hash) -> Vec<Arc<dyn PeerHandle>> {
            self.peers
                .lock()
                .iter()
                .map(|peer| Arc::clone(peer) as Arc<dyn PeerHandle>)
                .collect()
        }

        fn peers_without_fragment_except(
            &self,
            id: &Hash,
            origin: &PeerId,
        ) -> Vec<Arc<dyn PeerHandle>> {
            self.peers_without_fragment(id)
                .into_iter()
                .filter(|peer| peer.id() != origin)
                .collect()
        }

        fn search_peer(&self, peer: &PeerId) -> Option<Arc<dyn PeerHandle>> {
            self.peers
                .lock()
                .iter()
                .find(|candidate| candidate.id == *peer)
                .map(|found| Arc::clone(found) as Arc<dyn PeerHandle>)
        }

        fn random_peer(&self) -> Option<Arc<dyn PeerHandle>> {
            self.peers
                .lock()
                .first()
                .map(|peer| Arc::clone(peer) as Arc<dyn PeerHandle>)
        }

        fn len(&self) -> usize {
            self.peers.lock().len()
        }
    }

    #[derive(Default)]
    struct MockChain {
        transactions: Mutex<Vec<Vec<u8>>>,
        blocks: Mutex<Vec<(PeerId, Vec<u8>, U256)>>,
    }

    impl ChainGateway for MockChain {
        fn import_transaction(&self, payload: &[u8]) -> Result<Hash, PropagationError> {
            self.transactions.lock().push(payload.to_vec());
            Ok(keccak256(payload))
        }

        fn import_block(
            &self,
            origin: &PeerId,
            payload: &[u8],
            td: U256,
        ) -> Result<Hash, PropagationError> {
            self.blocks
                .lock()
                .push((origin.clone(), payload.to_vec(), td));
            Ok(keccak256(payload))
        }
    }

    fn small_config() -> PropagationConfig {
        PropagationConfig {
            num_symbols: 5,
            ecc_symbols: 6,
            min_frag_num: 5,
            max_total_frag: 8,
            upper_request_num: 5,
            peer_frags_num: 3,
            enable_inspector: false,
            ..Default::default()
        }
    }

    fn service(
        config: PropagationConfig,
    ) -> (
        PropagationService<MockRegistry, MockChain>,
        Arc<MockRegistry>,
        Arc<MockChain>,
    ) {
        let registry = Arc::new(MockRegistry::default());
        let chain = Arc::new(MockChain::default());
        let service =
            PropagationService::new(config, Arc::clone(&registry), Arc::clone(&chain)).unwrap();
        (service, registry, chain)
    }

    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    fn tx_message(service: &PropagationService<MockRegistry, MockChain>, id: Hash, payload: &[u8]) -> Vec<u8> {
        let fragments = service.inner.codec.divide_and_encode(payload).unwrap();
        rlp::encode(&FragmentSet::new(id, fragments)).to_vec()
    }

    #[tokio::test]
    async fn test_tx_fragments_decode_at_threshold() {
        let (service, _registry, chain) = service(small_config());
        service.set_accept_transactions(true);
        let id = keccak256(b"tx-payload");
        let message = tx_message(&service, id, b"tx-payload");

        service
            .handle_message(&PeerId::from("a"), TX_FRAG_MSG, &message)
            .await
            .unwrap();

        assert_eq!(chain.transactions.lock().as_slice(), &[b"tx-payload".to_vec()]);
        assert!(service.pool().line(&id).unwrap().is_decoded());
    }

    #[tokio::test]
    async fn test_tx_fragments_ignored_until_synced() {
        let (service, _registry, chain) = service(small_config());
        let id = keccak256(b"early");
        let message = tx_message(&service, id, b"early");

        service
            .handle_message(&PeerId::from("a"), TX_FRAG_MSG, &message)
            .await
            .unwrap();

        assert!(chain.transactions.lock().is_empty());
        assert!(service.pool().line(&id).is_none());
    }

    #[tokio::test]
    async fn test_block_fragments_import_with_difficulty() {
        let (service, _registry, chain) = service(small_config());
        let id = keccak256(b"block-payload");
        let fragments = service.inner.codec.divide_and_encode(b"block-payload").unwrap();
        let message = rlp::encode(&BlockFragData {
            td: U256::from(777),
            set: FragmentSet::new(id, fragments),
        })
        .to_vec();

        service
            .handle_message(&PeerId::from("miner"), BLOCK_FRAG_MSG, &message)
            .await
            .unwrap();

        let blocks = chain.blocks.lock();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].0, PeerId::from("miner"));
        assert_eq!(blocks[0].1, b"block-payload".to_vec());
        assert_eq!(blocks[0].2, U256::from(777));
    }

    #[tokio::test]
    async fn test_duplicate_flood_triggers_upstream_request() {
        let (service, registry, _chain) = service(small_config());
        service.set_accept_transactions(true);
        let upstream = MockPeer::new("upstream", Duration::from_millis(10));
        registry.add(Arc::clone(&upstream));

        let id = keccak256(b"stuck");
        let fragments = service.inner.codec.divide_and_encode(b"stuck").unwrap();
        // Two distinct positions, repeated until total crosses the request
        // threshold but distinct stays below the decode threshold.
        let pair = FragmentSet::new(id, fragments[..2].to_vec());
        let message = rlp::encode(&pair).to_vec();
        for _ in 0..4 {
            service
                .handle_message(&PeerId::from("upstream"), TX_FRAG_MSG, &message)
                .await
                .unwrap();
        }
        settle().await;

        let requests = upstream.sent_requests();
        assert_eq!(requests.len(), 1, "requesting latch must fire once");
        let (kind, request) = &requests[0];
        assert_eq!(*kind, FragKind::Transaction);
        assert_eq!(request.id, id);
        assert_eq!(request.load.ones().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_low_coverage_request_defers_and_escalates() {
        let config = PropagationConfig {
            min_frag_num: 10,
            ..small_config()
        };
        let (service, registry, _chain) = service(config);
        service.set_accept_transactions(true);
        let origin = MockPeer::new("origin", Duration::from_millis(10));
        let requester = MockPeer::new("requester", Duration::from_millis(10));
        registry.add(Arc::clone(&origin));
        registry.add(Arc::clone(&requester));

        let id = keccak256(b"partial");
        let fragments = service.inner.codec.divide_and_encode(b"partial").unwrap();
        let triple = FragmentSet::new(id, fragments[..3].to_vec());
        service
            .handle_message(&PeerId::from("origin"), TX_FRAG_MSG, &rlp::encode(&triple))
            .await
            .unwrap();

        // Requester holds {1, 2, 3}; merged with our {0, 1, 2} that is four
        // positions, below upper_request_num = 5.
        let mut load = Bitmap::new(service.config().code_width());
        load.set(1);
        load.set(2);
        load.set(3);
        let request = FragmentRequest { load, id };
        service
            .handle_message(
                &PeerId::from("requester"),
                REQUEST_TX_FRAG_MSG,
                &rlp::encode(&request),
            )
            .await
            .unwrap();
        settle().await;

        // No direct answer; the merged bitmap went upstream instead.
        assert!(requester.sent_sets().is_empty());
        let escalated = origin.sent_requests();
        assert_eq!(escalated.len(), 1);
        assert_eq!(
            escalated[0].1.load.ones().collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );

        // The response arrives with position 4: the deferred requester now
        // gets everything it lacks, positions {0, 4}.
        let response = FragmentSet::response(id, vec![fragments[4].clone()]);
        service
            .handle_message(&PeerId::from("origin"), TX_FRAG_MSG, &rlp::encode(&response))
            .await
            .unwrap();
        settle().await;

        let answered = requester.sent_sets();
        assert_eq!(answered.len(), 1);
        assert_eq!(answered[0].positions(), vec![0, 4]);
        assert!(answered[0].is_response);
    }

    #[tokio::test]
    async fn test_covered_request_is_answered_directly() {
        let config = PropagationConfig {
            min_frag_num: 10,
            ..small_config()
        };
        let (service, registry, _chain) = service(config);
        service.set_accept_transactions(true);
        let requester = MockPeer::new("requester", Duration::from_millis(10));
        registry.add(Arc::clone(&requester));

        let id = keccak256(b"covered");
        let fragments = service.inner.codec.divide_and_encode(b"covered").unwrap();
        let six = FragmentSet::new(id, fragments[..6].to_vec());
        service
            .handle_message(&PeerId::from("seed"), TX_FRAG_MSG, &rlp::encode(&six))
            .await
            .unwrap();

        let mut load = Bitmap::new(service.config().code_width());
        load.set(0);
        load.set(1);
        let request = FragmentRequest { load, id };
        service
            .handle_message(
                &PeerId::from("requester"),
                REQUEST_TX_FRAG_MSG,
                &rlp::encode(&request),
            )
            .await
            .unwrap();

        let answered = requester.sent_sets();
        assert_eq!(answered.len(), 1);
        assert_eq!(answered[0].positions(), vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_request_for_unknown_line_is_ignored() {
        let (service, _registry, _chain) = service(small_config());
        let request = FragmentRequest {
            load: Bitmap::new(service.config().code_width()),
            id: [0x42; 32],
        };
        let outcome = service
            .handle_message(
                &PeerId::from("nobody"),
                REQUEST_BLOCK_FRAG_MSG,
                &rlp::encode(&request),
            )
            .await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_code_is_a_wire_error() {
        let (service, _registry, _chain) = service(small_config());
        let err = service
            .handle_message(&PeerId::from("a"), 0x99, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PropagationError::UnknownMessage(0x99)));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_wire_error() {
        let (service, _registry, _chain) = service(small_config());
        let err = service
            .handle_message(&PeerId::from("a"), BLOCK_FRAG_MSG, &[0x01, 0x02])
            .await
            .unwrap_err();
        assert!(matches!(err, PropagationError::Decode(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_position_is_a_wire_error() {
        let (service, _registry, _chain) = service(small_config());
        service.set_accept_transactions(true);
        let set = FragmentSet::new(
            [5u8; 32],
            vec![fragcast_erasure::Fragment::new(200, vec![1, 2, 3])],
        );
        let err = service
            .handle_message(&PeerId::from("a"), TX_FRAG_MSG, &rlp::encode(&set))
            .await
            .unwrap_err();
        assert!(matches!(err, PropagationError::InvalidPosition { .. }));
    }

    #[tokio::test]
    async fn test_broadcast_block_self_inserts_and_fans_out() {
        let (service, registry, _chain) = service(small_config());
        let fast = MockPeer::new("fast", Duration::from_millis(10));
        let slow = MockPeer::new("slow", Duration::from_millis(300));
        registry.add(Arc::clone(&fast));
        registry.add(Arc::clone(&slow));

        let id = keccak256(b"sealed-block");
        service
            .broadcast_block(id, b"sealed-block", U256::from(1000))
            .await
            .unwrap();
        settle().await;

        // Local line can answer requests and is attributed to nobody.
        let line = service.pool().line(&id).unwrap();
        assert_eq!(line.distinct(), 11);
        assert!(line.min_hop_peer().is_local());
        assert_eq!(line.td(), Some(U256::from(1000)));

        // Every peer got a decodable share (quota = min_frag_num ≥ N).
        for peer in [&fast, &slow] {
            let sets = peer.sent_sets();
            assert_eq!(sets.len(), 1);
            assert_eq!(sets[0].len(), 5);
            assert_eq!(sets[0].id, id);
        }
    }

    #[tokio::test]
    async fn test_forward_excludes_origin() {
        let (service, registry, chain) = service(small_config());
        service.set_accept_transactions(true);
        service.start();
        let origin = MockPeer::new("origin", Duration::from_millis(10));
        let other = MockPeer::new("other", Duration::from_millis(10));
        registry.add(Arc::clone(&origin));
        registry.add(Arc::clone(&other));

        let id = keccak256(b"forwarded");
        let message = tx_message(&service, id, b"forwarded");
        service
            .handle_message(&PeerId::from("origin"), TX_FRAG_MSG, &message)
            .await
            .unwrap();
        settle().await;

        assert_eq!(chain.transactions.lock().len(), 1);
        assert!(origin.sent_sets().is_empty(), "origin must not get its set back");
        let forwarded = other.sent_sets();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].hop_count, 1);
        assert_eq!(forwarded[0].len(), 11);
        service.stop();
    }

    #[tokio::test]
    async fn test_decoded_fifo_evicts_old_lines() {
        let config = PropagationConfig {
            max_decode_num: 2,
            ..small_config()
        };
        let (service, _registry, _chain) = service(config);
        service.set_accept_transactions(true);

        let payloads: Vec<Vec<u8>> = (0u8..4).map(|i| vec![i; 16]).collect();
        let mut ids = Vec::new();
        for payload in &payloads {
            let id = keccak256(payload);
            ids.push(id);
            let message = tx_message(&service, id, payload);
            service
                .handle_message(&PeerId::from("a"), TX_FRAG_MSG, &message)
                .await
                .unwrap();
        }

        // Two oldest decoded lines were evicted by the FIFO cap.
        assert!(service.pool().line(&ids[0]).is_none());
        assert!(service.pool().line(&ids[1]).is_none());
        assert!(service.pool().line(&ids[2]).is_some());
        assert!(service.pool().line(&ids[3]).is_some());
    }
}
