//! Propagation configuration.

use std::time::Duration;

/// Tunables for the fragment gossip layer.
#[derive(Clone, Debug)]
pub struct PropagationConfig {
    /// Data symbols per stripe (`N`).
    pub num_symbols: usize,
    /// Parity symbols per stripe (`E`).
    pub ecc_symbols: usize,
    /// GF(2⁸) primitive polynomial.
    pub primitive: u32,
    /// Distinct-position count that triggers a decode attempt.
    pub min_frag_num: u32,
    /// Total received count (duplicates included) that triggers an upstream
    /// request.
    pub max_total_frag: u32,
    /// A request whose merged bitmap holds fewer positions than this is
    /// deferred upstream instead of answered.
    pub upper_request_num: usize,
    /// Fragments per peer in a forwarded broadcast window.
    pub peer_frags_num: usize,
    /// Decoded-ids FIFO capacity; older lines are evicted past it.
    pub max_decode_num: usize,
    /// Inspector tick for stuck lines.
    pub force_request_cycle: Duration,
    /// Latency boundary between the fast and slow broadcast groups.
    pub delay_threshold: Duration,
    /// Forward channel depth; sets beyond it are dropped, not queued.
    pub forward_channel_capacity: usize,
    /// Run the periodic stuck-line inspector.
    pub enable_inspector: bool,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            num_symbols: 40,
            ecc_symbols: 160,
            primitive: 0x11d,
            min_frag_num: 40,
            max_total_frag: 80,
            upper_request_num: 5,
            peer_frags_num: 8,
            max_decode_num: 1024,
            force_request_cycle: Duration::from_secs(5),
            delay_threshold: Duration::from_millis(100),
            forward_channel_capacity: 4096,
            enable_inspector: true,
        }
    }
}

impl PropagationConfig {
    /// Codeword width `N + E`; also the bitmap length.
    pub fn code_width(&self) -> usize {
        self.num_symbols + self.ecc_symbols
    }
}
