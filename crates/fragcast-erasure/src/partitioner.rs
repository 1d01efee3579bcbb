//! Stripe partitioner: byte string ⇄ ordered fragment column set.
//!
//! `divide_and_encode` frames the payload with a sentinel byte, zero-pads to
//! a whole number of stripes, encodes each stripe and emits the codeword
//! matrix column-wise. `splice_and_decode` is the inverse from any subset of
//! at least `N` distinct columns.

use crate::codec::RsCodec;
use crate::errors::ErasureError;
use crate::fragment::Fragment;

/// Framing byte appended to the payload before padding. The backward scan in
/// [`RsCodec::splice_and_decode`] relies on the padding being all zeros, so
/// the sentinel is always the last non-zero byte of the padded stream.
pub const FRAME_SENTINEL: u8 = 0x01;

impl RsCodec {
    /// Split `payload` into `N + E` fragments of equal length.
    ///
    /// The fragment code length equals the stripe count
    /// `⌈(len + 1) / N⌉`; any `N` of the returned fragments reproduce the
    /// payload through [`RsCodec::splice_and_decode`].
    pub fn divide_and_encode(&self, payload: &[u8]) -> Result<Vec<Fragment>, ErasureError> {
        let n = self.num_symbols();
        let mut data = Vec::with_capacity(payload.len() + 1 + n);
        data.extend_from_slice(payload);
        data.push(FRAME_SENTINEL);
        let tail = data.len() % n;
        if tail != 0 {
            data.resize(data.len() + n - tail, 0);
        }

        let stripes = data.len() / n;
        let mut rows = Vec::with_capacity(stripes);
        for stripe in data.chunks_exact(n) {
            rows.push(self.encode_stripe(stripe)?);
        }

        let width = self.total_symbols();
        let mut fragments = Vec::with_capacity(width);
        for pos in 0..width {
            let code = rows.iter().map(|row| row[pos]).collect();
            fragments.push(Fragment::new(pos as u8, code));
        }
        Ok(fragments)
    }

    /// Reassemble the original payload from fragments.
    ///
    /// Positions absent from `fragments` are treated as erasures. Two
    /// fragments claiming the same position with different code bytes poison
    /// the set and fail the decode.
    pub fn splice_and_decode(&self, fragments: &[Fragment]) -> Result<Vec<u8>, ErasureError> {
        let first = fragments.first().ok_or(ErasureError::EmptyFragmentSet)?;
        let stripes = first.stripe_count();
        let width = self.total_symbols();

        let mut matrix = vec![vec![0u8; width]; stripes];
        let mut present = vec![false; width];
        for frag in fragments {
            let pos = frag.position() as usize;
            if pos >= width {
                return Err(ErasureError::PositionOutOfRange {
                    position: pos,
                    width,
                });
            }
            if frag.stripe_count() != stripes {
                return Err(ErasureError::FragmentLength {
                    got: frag.stripe_count(),
                    expected: stripes,
                });
            }
            if present[pos] {
                for (row, &byte) in matrix.iter().zip(frag.code()) {
                    if row[pos] != byte {
                        return Err(ErasureError::ConflictingFragment { position: pos });
                    }
                }
                continue;
            }
            for (row, &byte) in matrix.iter_mut().zip(frag.code()) {
                row[pos] = byte;
            }
            present[pos] = true;
        }

        let erasures: Vec<usize> = (0..width).filter(|&pos| !present[pos]).collect();
        if erasures.len() > self.ecc_symbols() {
            return Err(ErasureError::TooManyErasures {
                got: erasures.len(),
                capacity: self.ecc_symbols(),
            });
        }

        let mut payload = Vec::with_capacity(stripes * self.num_symbols());
        for row in &matrix {
            payload.extend_from_slice(&self.decode_stripe(row, &erasures)?);
        }

        // Strip the zero padding and the sentinel.
        let sentinel = payload
            .iter()
            .rposition(|&byte| byte == FRAME_SENTINEL)
            .ok_or(ErasureError::MissingSentinel)?;
        payload.truncate(sentinel);
        Ok(payload)
    }
}
