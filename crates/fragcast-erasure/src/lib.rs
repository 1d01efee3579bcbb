//! # Fragcast Erasure Codec
//!
//! Reed–Solomon erasure coding over GF(2⁸) for the fragment gossip layer.
//!
//! ## Pipeline
//!
//! ```text
//! payload ──divide_and_encode──→ [Fragment; N+E] ──gossip──→ peers
//!                                        │
//! payload ←──splice_and_decode── any ≥ N distinct fragments
//! ```
//!
//! A payload is framed with a sentinel byte, zero-padded to a whole number
//! of `N`-byte stripes, each stripe is expanded to an `N + E` codeword, and
//! the codeword matrix is emitted column-wise: fragment `j` carries column
//! `j` of every stripe. Any `N` distinct columns reproduce the payload; up
//! to `E` columns may be lost in transit.

mod codec;
mod errors;
mod fragment;
mod galois;
mod partitioner;

pub use codec::RsCodec;
pub use errors::ErasureError;
pub use fragment::Fragment;
pub use galois::GfTables;
pub use partitioner::FRAME_SENTINEL;
