//! Compact position bitmap over the code width.
//!
//! Wire form is the raw little-endian packed byte slice, so a bitmap built
//! from received bytes must be re-sized to the local code width before any
//! set operation.

use bitvec::prelude::*;

/// Fixed-width bit-set over fragment positions `[0, N+E)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Bitmap {
    bits: BitVec<u8, Lsb0>,
}

impl Bitmap {
    /// An all-zero bitmap of `width` positions.
    pub fn new(width: usize) -> Self {
        Self {
            bits: bitvec![u8, Lsb0; 0; width],
        }
    }

    /// Rebuild from little-endian packed bytes, clamped to `width`.
    pub fn from_bytes(bytes: &[u8], width: usize) -> Self {
        let mut bits = BitVec::<u8, Lsb0>::from_slice(bytes);
        bits.resize(width, false);
        Self { bits }
    }

    /// Little-endian packed bytes for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.as_raw_slice().to_vec()
    }

    pub fn width(&self) -> usize {
        self.bits.len()
    }

    /// Grow or shrink to `width`, new positions unset.
    pub fn resize(&mut self, width: usize) {
        self.bits.resize(width, false);
    }

    pub fn set(&mut self, position: usize) {
        debug_assert!(position < self.bits.len());
        if position < self.bits.len() {
            self.bits.set(position, true);
        }
    }

    pub fn test(&self, position: usize) -> bool {
        self.bits.get(position).map(|bit| *bit).unwrap_or(false)
    }

    /// Number of set positions.
    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    /// Positions set in either bitmap.
    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.clone();
        if other.bits.len() > out.bits.len() {
            out.bits.resize(other.bits.len(), false);
        }
        for position in other.bits.iter_ones() {
            out.bits.set(position, true);
        }
        out
    }

    /// Positions set here but not in `other`.
    pub fn difference(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for position in other.bits.iter_ones() {
            if position < out.bits.len() {
                out.bits.set(position, false);
            }
        }
        out
    }

    /// Iterator over set positions, ascending.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }
}
