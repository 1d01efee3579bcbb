//! Error types for the erasure codec.

use thiserror::Error;

/// Errors raised by the Galois field, the stripe codec and the partitioner.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ErasureError {
    #[error("invalid codec parameters: {0}")]
    InvalidParameters(&'static str),

    #[error("stripe length {got}, expected {expected}")]
    StripeLength { got: usize, expected: usize },

    #[error("symbol position {position} outside code width {width}")]
    PositionOutOfRange { position: usize, width: usize },

    #[error("{got} erasures exceed correction capacity {capacity}")]
    TooManyErasures { got: usize, capacity: usize },

    #[error("conflicting fragment codes at position {position}")]
    ConflictingFragment { position: usize },

    #[error("fragment code length {got} differs from stripe count {expected}")]
    FragmentLength { got: usize, expected: usize },

    #[error("no fragments to splice")]
    EmptyFragmentSet,

    #[error("stripe decode failed: {0}")]
    DecodeFailed(&'static str),

    #[error("framing sentinel missing from recovered payload")]
    MissingSentinel,

    #[error("division by zero in GF(256)")]
    DivisionByZero,
}
