//! The fragment unit exchanged between peers.

/// One column of the stripe-encoding matrix.
///
/// `position` identifies the column in `[0, N+E)`; `code[i]` is the byte the
/// column contributes to stripe `i`. All fragments of one object share
/// `code.len() == stripe count`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    position: u8,
    code: Vec<u8>,
}

impl Fragment {
    pub fn new(position: u8, code: Vec<u8>) -> Self {
        Self { position, code }
    }

    pub fn position(&self) -> u8 {
        self.position
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Stripe count of the object this fragment belongs to.
    pub fn stripe_count(&self) -> usize {
        self.code.len()
    }
}
