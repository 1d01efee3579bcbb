//! Reed–Solomon stripe codec over GF(2⁸).
//!
//! Systematic encoding: a stripe of `N` data symbols is treated as the
//! message polynomial `m(x)`; the codeword is `m ‖ r` with
//! `r(x) = m(x)·x^E mod g(x)` and `g(x) = Π_{i=0..E-1} (x - α^i)`.
//!
//! Decoding is the standard syndrome decoder: Forney syndromes strip the
//! known erasures, Berlekamp–Massey locates any residual errors, and the
//! Forney formula computes the errata magnitudes. Success is re-checked by
//! recomputing the syndromes over the corrected stripe.
//!
//! Polynomials are stored highest-degree first throughout this module.

use crate::errors::ErasureError;
use crate::galois::GfTables;

/// Stripe-level Reed–Solomon codec with fixed `(primitive, E, N)` shape.
#[derive(Clone)]
pub struct RsCodec {
    gf: GfTables,
    num_symbols: usize,
    ecc_symbols: usize,
    generator: Vec<u8>,
}

impl RsCodec {
    /// Builds a codec and its lookup tables. Requires `N ≥ 1`, `E ≥ 1` and
    /// `N + E ≤ 255`.
    pub fn new(primitive: u32, ecc_symbols: usize, num_symbols: usize) -> Result<Self, ErasureError> {
        if num_symbols == 0 {
            return Err(ErasureError::InvalidParameters("num_symbols must be > 0"));
        }
        if ecc_symbols == 0 {
            return Err(ErasureError::InvalidParameters("ecc_symbols must be > 0"));
        }
        if num_symbols + ecc_symbols > 255 {
            return Err(ErasureError::InvalidParameters(
                "num_symbols + ecc_symbols must not exceed 255",
            ));
        }
        let gf = GfTables::new(primitive)?;
        let mut generator = vec![1u8];
        for i in 0..ecc_symbols {
            generator = poly_mul(&gf, &generator, &[1, gf.alpha_pow(i)]);
        }
        Ok(Self {
            gf,
            num_symbols,
            ecc_symbols,
            generator,
        })
    }

    /// Data symbols per stripe (`N`).
    pub fn num_symbols(&self) -> usize {
        self.num_symbols
    }

    /// Parity symbols per stripe (`E`).
    pub fn ecc_symbols(&self) -> usize {
        self.ecc_symbols
    }

    /// Codeword width (`N + E`).
    pub fn total_symbols(&self) -> usize {
        self.num_symbols + self.ecc_symbols
    }

    /// Encode one stripe of `N` data symbols into an `N + E` codeword.
    pub fn encode_stripe(&self, msg: &[u8]) -> Result<Vec<u8>, ErasureError> {
        if msg.len() != self.num_symbols {
            return Err(ErasureError::StripeLength {
                got: msg.len(),
                expected: self.num_symbols,
            });
        }
        // Synthetic division of m(x)·x^E by g(x); the remainder becomes the
        // parity tail of the systematic codeword.
        let mut work = vec![0u8; self.total_symbols()];
        work[..self.num_symbols].copy_from_slice(msg);
        for i in 0..self.num_symbols {
            let coef = work[i];
            if coef != 0 {
                for (j, &g) in self.generator.iter().enumerate().skip(1) {
                    work[i + j] ^= self.gf.mul(g, coef);
                }
            }
        }
        let mut code = msg.to_vec();
        code.extend_from_slice(&work[self.num_symbols..]);
        Ok(code)
    }

    /// Decode one `N + E` codeword with the given erasure positions back to
    /// its `N` data symbols.
    ///
    /// # Errors
    ///
    /// Fails when more than `E` positions are erased, when the residual
    /// error locator has unresolved roots, or when syndromes remain non-zero
    /// after correction.
    pub fn decode_stripe(&self, code: &[u8], erasures: &[usize]) -> Result<Vec<u8>, ErasureError> {
        let width = self.total_symbols();
        if code.len() != width {
            return Err(ErasureError::StripeLength {
                got: code.len(),
                expected: width,
            });
        }
        for &pos in erasures {
            if pos >= width {
                return Err(ErasureError::PositionOutOfRange {
                    position: pos,
                    width,
                });
            }
        }
        if erasures.len() > self.ecc_symbols {
            return Err(ErasureError::TooManyErasures {
                got: erasures.len(),
                capacity: self.ecc_symbols,
            });
        }

        let mut work = code.to_vec();
        for &pos in erasures {
            work[pos] = 0;
        }
        let synd = self.syndromes(&work);
        if synd.iter().all(|&s| s == 0) {
            return Ok(work[..self.num_symbols].to_vec());
        }

        let fsynd = self.forney_syndromes(&synd, erasures, width);
        let err_loc = self.find_error_locator(&fsynd, erasures.len())?;
        let mut errata = erasures.to_vec();
        if err_loc.len() > 1 {
            errata.extend(self.find_errors(&err_loc, width)?);
        }
        self.correct_errata(&mut work, &synd, &errata)?;

        let check = self.syndromes(&work);
        if check.iter().any(|&s| s != 0) {
            return Err(ErasureError::DecodeFailed(
                "syndromes remain non-zero after correction",
            ));
        }
        Ok(work[..self.num_symbols].to_vec())
    }

    /// `S_i = code(α^i)` for `i ∈ [0, E)`.
    fn syndromes(&self, code: &[u8]) -> Vec<u8> {
        (0..self.ecc_symbols)
            .map(|i| poly_eval(&self.gf, code, self.gf.alpha_pow(i)))
            .collect()
    }

    /// Syndromes with the contribution of the known erasures divided out, so
    /// Berlekamp–Massey only sees residual errors.
    fn forney_syndromes(&self, synd: &[u8], erasures: &[usize], width: usize) -> Vec<u8> {
        let mut fsynd = synd.to_vec();
        for &pos in erasures {
            let x = self.gf.alpha_pow(width - 1 - pos);
            for j in 0..fsynd.len().saturating_sub(1) {
                fsynd[j] = self.gf.mul(fsynd[j], x) ^ fsynd[j + 1];
            }
        }
        fsynd
    }

    /// Berlekamp–Massey over the Forney syndromes. Returns the error
    /// locator polynomial; `[1]` when the erasures explain everything.
    fn find_error_locator(
        &self,
        fsynd: &[u8],
        erase_count: usize,
    ) -> Result<Vec<u8>, ErasureError> {
        let mut err_loc = vec![1u8];
        let mut old_loc = vec![1u8];

        for k in 0..self.ecc_symbols.saturating_sub(erase_count) {
            let mut delta = fsynd[k];
            for j in 1..err_loc.len() {
                if j <= k {
                    let coef = err_loc[err_loc.len() - 1 - j];
                    delta ^= self.gf.mul(coef, fsynd[k - j]);
                }
            }
            old_loc.push(0);
            if delta != 0 {
                if old_loc.len() > err_loc.len() {
                    let new_loc = poly_scale(&self.gf, &old_loc, delta);
                    old_loc = poly_scale(&self.gf, &err_loc, self.gf.inv(delta)?);
                    err_loc = new_loc;
                }
                let scaled = poly_scale(&self.gf, &old_loc, delta);
                err_loc = poly_add(&err_loc, &scaled);
            }
        }

        while err_loc.len() > 1 && err_loc[0] == 0 {
            err_loc.remove(0);
        }
        let errs = err_loc.len() - 1;
        if errs * 2 + erase_count > self.ecc_symbols {
            return Err(ErasureError::DecodeFailed("too many errors to correct"));
        }
        Ok(err_loc)
    }

    /// Chien-style root search: position `width-1-i` is in error when
    /// `Λ_rev(α^i) = 0`.
    fn find_errors(&self, err_loc: &[u8], width: usize) -> Result<Vec<usize>, ErasureError> {
        let errs = err_loc.len() - 1;
        let reversed: Vec<u8> = err_loc.iter().rev().copied().collect();
        let mut positions = Vec::with_capacity(errs);
        for i in 0..width {
            if poly_eval(&self.gf, &reversed, self.gf.alpha_pow(i)) == 0 {
                positions.push(width - 1 - i);
            }
        }
        if positions.len() != errs {
            return Err(ErasureError::DecodeFailed(
                "error locator has unresolved roots",
            ));
        }
        Ok(positions)
    }

    /// Forney magnitude computation; XORs the corrections into `work`.
    fn correct_errata(
        &self,
        work: &mut [u8],
        synd: &[u8],
        errata: &[usize],
    ) -> Result<(), ErasureError> {
        let width = work.len();
        let coef_pos: Vec<usize> = errata.iter().map(|&p| width - 1 - p).collect();

        let mut errata_loc = vec![1u8];
        for &p in &coef_pos {
            errata_loc = poly_mul(&self.gf, &errata_loc, &[self.gf.alpha_pow(p), 1]);
        }

        // Ω(x) = x·S(x)·Λ(x) mod x^(L+1), stored highest-degree first.
        let mut synd_rev: Vec<u8> = synd.iter().rev().copied().collect();
        synd_rev.push(0);
        let product = poly_mul(&self.gf, &synd_rev, &errata_loc);
        let keep = errata_loc.len().min(product.len());
        let err_eval = product[product.len() - keep..].to_vec();

        let locators: Vec<u8> = coef_pos.iter().map(|&p| self.gf.alpha_pow(p)).collect();
        for (i, &xi) in locators.iter().enumerate() {
            let xi_inv = self.gf.inv(xi)?;
            let mut denom = 1u8;
            for (j, &xj) in locators.iter().enumerate() {
                if j != i {
                    denom = self.gf.mul(denom, 1 ^ self.gf.mul(xi_inv, xj));
                }
            }
            if denom == 0 {
                return Err(ErasureError::DecodeFailed(
                    "errata locator derivative vanished",
                ));
            }
            let omega = poly_eval(&self.gf, &err_eval, xi_inv);
            let magnitude = self.gf.div(self.gf.mul(xi, omega), denom)?;
            work[errata[i]] ^= magnitude;
        }
        Ok(())
    }
}

fn poly_scale(gf: &GfTables, p: &[u8], x: u8) -> Vec<u8> {
    p.iter().map(|&c| gf.mul(c, x)).collect()
}

fn poly_add(p: &[u8], q: &[u8]) -> Vec<u8> {
    let n = p.len().max(q.len());
    let mut r = vec![0u8; n];
    for (i, &c) in p.iter().enumerate() {
        r[n - p.len() + i] = c;
    }
    for (i, &c) in q.iter().enumerate() {
        r[n - q.len() + i] ^= c;
    }
    r
}

fn poly_mul(gf: &GfTables, p: &[u8], q: &[u8]) -> Vec<u8> {
    let mut r = vec![0u8; p.len() + q.len() - 1];
    for (i, &pc) in p.iter().enumerate() {
        for (j, &qc) in q.iter().enumerate() {
            r[i + j] ^= gf.mul(pc, qc);
        }
    }
    r
}

/// Horner evaluation, `p[0]` is the highest-degree coefficient.
fn poly_eval(gf: &GfTables, p: &[u8], x: u8) -> u8 {
    let mut y = p[0];
    for &c in &p[1..] {
        y = gf.mul(y, x) ^ c;
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(ecc: usize, num: usize) -> RsCodec {
        RsCodec::new(0x11d, ecc, num).unwrap()
    }

    #[test]
    fn test_rejects_oversized_code() {
        assert!(RsCodec::new(0x11d, 200, 56).is_err());
        assert!(RsCodec::new(0x11d, 0, 40).is_err());
        assert!(RsCodec::new(0x11d, 160, 0).is_err());
        assert!(RsCodec::new(0x11d, 160, 40).is_ok());
    }

    #[test]
    fn test_encode_is_systematic() {
        let rs = codec(6, 5);
        let msg = [0x68, 0x65, 0x6c, 0x6c, 0x6f];
        let code = rs.encode_stripe(&msg).unwrap();
        assert_eq!(code.len(), 11);
        assert_eq!(&code[..5], &msg);
    }

    #[test]
    fn test_clean_codeword_decodes_directly() {
        let rs = codec(6, 5);
        let msg = [1, 2, 3, 4, 5];
        let code = rs.encode_stripe(&msg).unwrap();
        assert_eq!(rs.decode_stripe(&code, &[]).unwrap(), msg);
    }

    #[test]
    fn test_recovers_up_to_capacity_erasures() {
        let rs = codec(6, 5);
        let msg = [9, 8, 7, 6, 5];
        let code = rs.encode_stripe(&msg).unwrap();
        let erasures = [0, 2, 4, 6, 8, 10];
        let mut damaged = code.clone();
        for &pos in &erasures {
            damaged[pos] = 0xff;
        }
        assert_eq!(rs.decode_stripe(&damaged, &erasures).unwrap(), msg);
    }

    #[test]
    fn test_rejects_excess_erasures() {
        let rs = codec(6, 5);
        let code = rs.encode_stripe(&[1, 2, 3, 4, 5]).unwrap();
        let err = rs.decode_stripe(&code, &[0, 1, 2, 3, 4, 5, 6]).unwrap_err();
        assert_eq!(
            err,
            ErasureError::TooManyErasures {
                got: 7,
                capacity: 6
            }
        );
    }

    #[test]
    fn test_corrects_unknown_errors() {
        let rs = codec(6, 5);
        let msg = [11, 22, 33, 44, 55];
        let mut code = rs.encode_stripe(&msg).unwrap();
        // Three unknown corruptions: 2·3 ≤ 6.
        code[1] ^= 0x5a;
        code[6] ^= 0x01;
        code[9] ^= 0xf0;
        assert_eq!(rs.decode_stripe(&code, &[]).unwrap(), msg);
    }

    #[test]
    fn test_mixed_erasures_and_errors() {
        let rs = codec(6, 5);
        let msg = [0xde, 0xad, 0xbe, 0xef, 0x01];
        let mut code = rs.encode_stripe(&msg).unwrap();
        // Two erasures plus one unknown error: 2·1 + 2 ≤ 6.
        code[3] = 0;
        code[7] = 0;
        code[0] ^= 0x21;
        assert_eq!(rs.decode_stripe(&code, &[3, 7]).unwrap(), msg);
    }

    #[test]
    fn test_corruption_beyond_capacity_never_recovers_the_stripe() {
        let rs = codec(4, 5);
        let msg = [1, 2, 3, 4, 5];
        let mut code = rs.encode_stripe(&msg).unwrap();
        // Four unknown corruptions exceed the 2·t bound for E = 4: the
        // decoder must fail rather than hand back the original stripe.
        for pos in [0, 2, 5, 8] {
            code[pos] ^= 0x77;
        }
        assert_ne!(rs.decode_stripe(&code, &[]), Ok(msg.to_vec()));
    }

    #[test]
    fn test_any_n_positions_suffice() {
        let rs = codec(8, 4);
        let msg = [0x10, 0x20, 0x30, 0x40];
        let code = rs.encode_stripe(&msg).unwrap();
        // Keep a sliding window of 4 surviving positions, erase the rest.
        for start in 0..9 {
            let keep: Vec<usize> = (start..start + 4).collect();
            let erasures: Vec<usize> = (0..12).filter(|p| !keep.contains(p)).collect();
            let mut damaged = code.clone();
            for &pos in &erasures {
                damaged[pos] = 0;
            }
            assert_eq!(rs.decode_stripe(&damaged, &erasures).unwrap(), msg);
        }
    }
}
