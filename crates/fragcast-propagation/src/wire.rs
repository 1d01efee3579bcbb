//! Wire codecs for the fragment gossip messages.
//!
//! Every message body is an RLP list:
//!
//! ```text
//! Fragment        := [position: u8, code: bytes]
//! FragmentSet     := [ [Fragment, ...], id: bytes32, hop_count: u32, is_response: u32 ]
//! FragmentRequest := [ load: bitmap-bytes (LE packed), id: bytes32 ]
//! BlockFragData   := [ td: u256, set: FragmentSet ]
//! ```
//!
//! The request bitmap travels as raw packed bytes; the receiver re-sizes it
//! to its own code width before use.

use fragcast_erasure::Fragment;
use primitive_types::U256;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use shared_types::hash_from_slice;

use crate::domain::{Bitmap, FragmentRequest, FragmentSet};

/// Message codes in the host protocol's extension space. Embedders remap
/// them when the hosting protocol assigns different values.
pub const TX_FRAG_MSG: u64 = 0x11;
pub const BLOCK_FRAG_MSG: u64 = 0x12;
pub const REQUEST_TX_FRAG_MSG: u64 = 0x13;
pub const REQUEST_BLOCK_FRAG_MSG: u64 = 0x14;

/// Block fragment sets travel with the claimed total difficulty.
///
/// A zero `td` marks a set answering a request; the receiver falls back to
/// the difficulty recorded on its pool line.
#[derive(Clone, Debug)]
pub struct BlockFragData {
    pub td: U256,
    pub set: FragmentSet,
}

fn append_fragment(s: &mut RlpStream, fragment: &Fragment) {
    s.begin_list(2);
    s.append(&fragment.position());
    s.append(&fragment.code().to_vec());
}

fn decode_fragment(rlp: &Rlp) -> Result<Fragment, DecoderError> {
    if rlp.item_count()? != 2 {
        return Err(DecoderError::RlpIncorrectListLen);
    }
    let position: u8 = rlp.val_at(0)?;
    let code: Vec<u8> = rlp.val_at(1)?;
    Ok(Fragment::new(position, code))
}

impl Encodable for FragmentSet {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4);
        s.begin_list(self.fragments.len());
        for fragment in &self.fragments {
            append_fragment(s, fragment);
        }
        s.append(&self.id.to_vec());
        s.append(&self.hop_count);
        s.append(&u32::from(self.is_response));
    }
}

impl Decodable for FragmentSet {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 4 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let list = rlp.at(0)?;
        let mut fragments = Vec::with_capacity(list.item_count()?);
        for item in list.iter() {
            fragments.push(decode_fragment(&item)?);
        }
        let id_bytes: Vec<u8> = rlp.val_at(1)?;
        let id = hash_from_slice(&id_bytes)
            .ok_or(DecoderError::Custom("fragment set id must be 32 bytes"))?;
        let hop_count: u32 = rlp.val_at(2)?;
        let is_response: u32 = rlp.val_at(3)?;
        Ok(Self {
            fragments,
            id,
            hop_count,
            is_response: is_response == 1,
        })
    }
}

impl Encodable for FragmentRequest {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.load.to_bytes());
        s.append(&self.id.to_vec());
    }
}

impl Decodable for FragmentRequest {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let load_bytes: Vec<u8> = rlp.val_at(0)?;
        let id_bytes: Vec<u8> = rlp.val_at(1)?;
        let id = hash_from_slice(&id_bytes)
            .ok_or(DecoderError::Custom("request id must be 32 bytes"))?;
        Ok(Self {
            load: Bitmap::from_bytes(&load_bytes, load_bytes.len() * 8),
            id,
        })
    }
}

impl Encodable for BlockFragData {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.td);
        s.append(&self.set);
    }
}

impl Decodable for BlockFragData {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            td: rlp.val_at(0)?,
            set: rlp.val_at(1)?,
        })
    }
}
