//! In-memory gossip network harness.
//!
//! Every node is a real [`PropagationService`]; links between nodes
//! RLP-encode outbound sends into per-link outboxes, and the harness pumps
//! those raw bytes into the receiving node's `handle_message`, so the full
//! wire path is exercised.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use primitive_types::U256;
use shared_types::{keccak256, Hash, PeerId};

use fragcast_propagation::wire::{
    BlockFragData, BLOCK_FRAG_MSG, REQUEST_BLOCK_FRAG_MSG, REQUEST_TX_FRAG_MSG, TX_FRAG_MSG,
};
use fragcast_propagation::{
    ChainGateway, FragKind, FragmentGossip, FragmentRequest, FragmentSet, PeerHandle,
    PeerRegistry, PropagationConfig, PropagationError, PropagationService,
};

/// One directed link to a remote node, acting as that node's peer handle.
///
/// Sends mark the object id as known to the target, mirroring how a real
/// peer set tracks which peer already holds which fragments.
pub struct NetLink {
    target: PeerId,
    latency: Duration,
    sent_ids: Mutex<HashSet<Hash>>,
    outbox: Mutex<Vec<(u64, Vec<u8>)>>,
}

impl NetLink {
    pub fn new(target: PeerId, latency: Duration) -> Self {
        Self {
            target,
            latency,
            sent_ids: Mutex::new(HashSet::new()),
            outbox: Mutex::new(Vec::new()),
        }
    }

    pub fn target(&self) -> &PeerId {
        &self.target
    }

    fn knows(&self, id: &Hash) -> bool {
        self.sent_ids.lock().contains(id)
    }

    fn push(&self, id: Hash, code: u64, payload: Vec<u8>) {
        self.sent_ids.lock().insert(id);
        self.outbox.lock().push((code, payload));
    }

    pub fn drain(&self) -> Vec<(u64, Vec<u8>)> {
        std::mem::take(&mut *self.outbox.lock())
    }
}

#[async_trait]
impl PeerHandle for NetLink {
    fn id(&self) -> &PeerId {
        &self.target
    }

    fn latency(&self) -> Duration {
        self.latency
    }

    fn update_latency(&self) {}

    async fn send_transaction_fragments(&self, set: FragmentSet) -> Result<(), PropagationError> {
        let id = set.id;
        self.push(id, TX_FRAG_MSG, rlp::encode(&set).to_vec());
        Ok(())
    }

    async fn send_block_fragments(
        &self,
        set: FragmentSet,
        td: Option<U256>,
    ) -> Result<(), PropagationError> {
        let id = set.id;
        let data = BlockFragData {
            td: td.unwrap_or_default(),
            set,
        };
        self.push(id, BLOCK_FRAG_MSG, rlp::encode(&data).to_vec());
        Ok(())
    }

    async fn send_request(
        &self,
        kind: FragKind,
        request: FragmentRequest,
    ) -> Result<(), PropagationError> {
        let code = match kind {
            FragKind::Transaction => REQUEST_TX_FRAG_MSG,
            FragKind::Block => REQUEST_BLOCK_FRAG_MSG,
        };
        self.outbox.lock().push((code, rlp::encode(&request).to_vec()));
        Ok(())
    }
}

/// Peer registry backed by the node's outgoing links.
#[derive(Default)]
pub struct InMemoryRegistry {
    links: Mutex<Vec<Arc<NetLink>>>,
}

impl InMemoryRegistry {
    pub fn add(&self, link: Arc<NetLink>) {
        self.links.lock().push(link);
    }

    pub fn links(&self) -> Vec<Arc<NetLink>> {
        self.links.lock().clone()
    }
}

impl PeerRegistry for InMemoryRegistry {
    fn peers_without_fragment(&self, id: &Hash) -> Vec<Arc<dyn PeerHandle>> {
        self.links
            .lock()
            .iter()
            .filter(|link| !link.knows(id))
            .map(|link| Arc::clone(link) as Arc<dyn PeerHandle>)
            .collect()
    }

    fn peers_without_fragment_except(
        &self,
        id: &Hash,
        origin: &PeerId,
    ) -> Vec<Arc<dyn PeerHandle>> {
        self.links
            .lock()
            .iter()
            .filter(|link| !link.knows(id) && link.target() != origin)
            .map(|link| Arc::clone(link) as Arc<dyn PeerHandle>)
            .collect()
    }

    fn search_peer(&self, peer: &PeerId) -> Option<Arc<dyn PeerHandle>> {
        self.links
            .lock()
            .iter()
            .find(|link| link.target() == peer)
            .map(|link| Arc::clone(link) as Arc<dyn PeerHandle>)
    }

    fn random_peer(&self) -> Option<Arc<dyn PeerHandle>> {
        self.links
            .lock()
            .first()
            .map(|link| Arc::clone(link) as Arc<dyn PeerHandle>)
    }

    fn len(&self) -> usize {
        self.links.lock().len()
    }
}

/// Chain gateway that records every imported object.
#[derive(Default)]
pub struct RecordingChain {
    pub transactions: Mutex<Vec<Vec<u8>>>,
    pub blocks: Mutex<Vec<(PeerId, Vec<u8>, U256)>>,
}

impl ChainGateway for RecordingChain {
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

pub struct Node {
    pub id: PeerId,
    pub service: PropagationService<InMemoryRegistry, RecordingChain>,
    pub registry: Arc<InMemoryRegistry>,
    pub chain: Arc<RecordingChain>,
}

/// Fully connected in-memory network of gossip nodes.
pub struct Harness {
    pub nodes: Vec<Node>,
}

impl Harness {
    pub fn new(names: &[&str], config: &PropagationConfig) -> Self {
        let nodes: Vec<Node> = names
            .iter()
            .map(|name| {
                let registry = Arc::new(InMemoryRegistry::default());
                let chain = Arc::new(RecordingChain::default());
                let service = PropagationService::new(
                    config.clone(),
                    Arc::clone(&registry),
                    Arc::clone(&chain),
                )
                .expect("valid test config");
                service.set_accept_transactions(true);
                service.start();
                Node {
                    id: PeerId::from(*name),
                    service,
                    registry,
                    chain,
                }
            })
            .collect();
        for node in &nodes {
            for other in &nodes {
                if node.id != other.id {
                    node.registry
                        .add(Arc::new(NetLink::new(other.id.clone(), Duration::from_millis(10))));
                }
            }
        }
        Self { nodes }
    }

    pub fn node(&self, id: &PeerId) -> &Node {
        self.nodes
            .iter()
            .find(|node| node.id == *id)
            .expect("unknown node")
    }

    /// Let spawned send tasks run to completion.
    pub async fn settle() {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    /// Deliver every queued message once; returns how many were delivered.
    pub async fn pump_round(&self) -> usize {
        Self::settle().await;
        let mut delivered = 0;
        for node in &self.nodes {
            for link in node.registry.links() {
                for (code, payload) in link.drain() {
                    self.node(link.target())
                        .service
                        .handle_message(&node.id, code, &payload)
                        .await
                        .expect("simulated peers speak the protocol");
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Pump until two consecutive quiet rounds (or the round cap).
    pub async fn run_to_quiescence(&self) {
        let mut quiet = 0;
        for _ in 0..64 {
            if self.pump_round().await == 0 {
                quiet += 1;
                if quiet >= 2 {
                    return;
                }
            } else {
                quiet = 0;
            }
        }
        panic!("gossip did not quiesce within the round cap");
    }
}
