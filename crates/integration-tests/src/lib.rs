//! # Integration Tests Crate
//!
//! End-to-end simulations of the fragment gossip layer with several
//! [`fragcast_propagation::PropagationService`] nodes wired through an
//! in-memory network.
//!
//! ## Structure
//!
//! ```text
//! integration-tests/
//! └── src/
//!     ├── lib.rs                # This file
//!     └── gossip_simulation.rs  # In-memory network harness + scenarios
//! ```
//!
//! ## Scenarios
//!
//! 1. **Block gossip**: an originating node fragment-encodes a block; every
//!    peer reassembles it from its windowed share plus forwards.
//! 2. **Transaction gossip**: fan-out across three nodes with hop counting.
//! 3. **Request recovery**: a node starved below the decode threshold
//!    escalates to its upstream peer and recovers from the response.
//!
//! All traffic crosses the real wire codecs: sends RLP-encode, the harness
//! delivers raw bytes into `handle_message` on the receiving node.

pub mod gossip_simulation;
