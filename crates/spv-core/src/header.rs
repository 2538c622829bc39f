//! Block headers, merge-mined auxiliary proof-of-work, and the stored
//! header record.
//!
//! A header's identity is the double SHA-256 of its base fields; the
//! auxiliary proof-of-work is carried alongside but not hashed into the
//! identity. Proof-of-work is checked against the hash of the merge-mined
//! parent header instead.
//!
//! # Stored record layout
//!
//! ```text
//! version u32 | previous [32] | merkle_root [32] | timestamp u32 | bits u32 |
//! nonce u32 | height u32 | auxpow | total_work var-bytes
//!
//! auxpow = coinbase var-bytes | branch count var-int | branch [32]* |
//!          branch_index u32 | parent header (80 bytes)
//! ```
//!
//! `total_work` is the big-endian cumulative work with leading zero bytes
//! stripped, so zero work encodes as a single `0x00` length byte.

use bytes::{Buf, BufMut};
use primitive_types::U256;

use crate::codec::{self, Decodable, Encodable};
use crate::error::CodecError;
use crate::types::Hash256;

/// Maximum coinbase size carried in an auxiliary proof-of-work.
pub const MAX_AUX_COINBASE_SIZE: u64 = 100_000;

/// Maximum coinbase merkle branch length (a 2^32-leaf tree).
pub const MAX_AUX_BRANCH_LEN: u64 = 32;

/// Header of the merge-mined parent chain block (Bitcoin layout, 80 bytes).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ParentHeader {
    pub version: u32,
    pub previous: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl ParentHeader {
    pub const SIZE: usize = 80;

    /// Double SHA-256 of the 80-byte serialization.
    pub fn hash(&self) -> Hash256 {
        Hash256::digest(&self.to_bytes())
    }
}

impl Encodable for ParentHeader {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.version);
        buf.put_slice(self.previous.as_bytes());
        buf.put_slice(self.merkle_root.as_bytes());
        buf.put_u32_le(self.timestamp);
        buf.put_u32_le(self.bits);
        buf.put_u32_le(self.nonce);
    }
}

impl Decodable for ParentHeader {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        Ok(Self {
            version: codec::read_u32(buf)?,
            previous: codec::read_hash(buf)?,
            merkle_root: codec::read_hash(buf)?,
            timestamp: codec::read_u32(buf)?,
            bits: codec::read_u32(buf)?,
            nonce: codec::read_u32(buf)?,
        })
    }
}

/// Auxiliary proof-of-work: the parent-chain coinbase committing to this
/// header, its merkle branch, and the parent header that was mined.
///
/// The commitment itself is verified by full nodes; the SPV engine only
/// checks the parent header's work.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct AuxPow {
    pub coinbase: Vec<u8>,
    pub coinbase_branch: Vec<Hash256>,
    pub branch_index: u32,
    pub parent_header: ParentHeader,
}

impl Encodable for AuxPow {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        codec::write_var_bytes(buf, &self.coinbase);
        codec::write_var_int(buf, self.coinbase_branch.len() as u64);
        for hash in &self.coinbase_branch {
            buf.put_slice(hash.as_bytes());
        }
        buf.put_u32_le(self.branch_index);
        self.parent_header.encode(buf);
    }
}

impl Decodable for AuxPow {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        let coinbase = codec::read_var_bytes(buf, MAX_AUX_COINBASE_SIZE)?;
        let branch_len = codec::read_length(buf, MAX_AUX_BRANCH_LEN)?;
        let mut coinbase_branch = Vec::with_capacity(branch_len);
        for _ in 0..branch_len {
            coinbase_branch.push(codec::read_hash(buf)?);
        }
        Ok(Self {
            coinbase,
            coinbase_branch,
            branch_index: codec::read_u32(buf)?,
            parent_header: ParentHeader::decode(buf)?,
        })
    }
}

/// A block header as received from peers.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Header {
    pub version: u32,
    pub previous: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub height: u32,
    pub aux_pow: AuxPow,
}

impl Header {
    /// Size of the hashed base fields.
    const BASE_SIZE: usize = 4 + 32 + 32 + 4 + 4 + 4 + 4;

    fn encode_base<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.version);
        buf.put_slice(self.previous.as_bytes());
        buf.put_slice(self.merkle_root.as_bytes());
        buf.put_u32_le(self.timestamp);
        buf.put_u32_le(self.bits);
        buf.put_u32_le(self.nonce);
        buf.put_u32_le(self.height);
    }

    /// Header identity: double SHA-256 of the base fields.
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(Self::BASE_SIZE);
        self.encode_base(&mut data);
        Hash256::digest(&data)
    }

    /// Hash used for the proof-of-work check (the merge-mined parent header).
    pub fn pow_hash(&self) -> Hash256 {
        self.aux_pow.parent_header.hash()
    }
}

impl Encodable for Header {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.encode_base(buf);
        self.aux_pow.encode(buf);
    }
}

impl Decodable for Header {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        Ok(Self {
            version: codec::read_u32(buf)?,
            previous: codec::read_hash(buf)?,
            merkle_root: codec::read_hash(buf)?,
            timestamp: codec::read_u32(buf)?,
            bits: codec::read_u32(buf)?,
            nonce: codec::read_u32(buf)?,
            height: codec::read_u32(buf)?,
            aux_pow: AuxPow::decode(buf)?,
        })
    }
}

/// A header together with the cumulative work of its chain.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct StoredHeader {
    pub header: Header,
    pub total_work: U256,
}

impl StoredHeader {
    pub fn new(header: Header, total_work: U256) -> Self {
        Self { header, total_work }
    }

    /// The zero-work stand-in returned as genesis's parent.
    pub fn synthetic_root() -> Self {
        Self::default()
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn previous(&self) -> &Hash256 {
        &self.header.previous
    }

    /// Whether this is the first real header of a chain (no parent).
    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.previous.is_zero() && *self != Self::synthetic_root()
    }

    /// Whether this is the synthetic stand-in for genesis's parent.
    pub fn is_synthetic_root(&self) -> bool {
        *self == Self::synthetic_root()
    }
}

impl Encodable for StoredHeader {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.header.encode(buf);
        let mut work = [0u8; 32];
        self.total_work.to_big_endian(&mut work);
        let first = work.iter().position(|b| *b != 0).unwrap_or(work.len());
        codec::write_var_bytes(buf, &work[first..]);
    }
}

impl Decodable for StoredHeader {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        let header = Header::decode(buf)?;
        let work = codec::read_var_bytes(buf, 32)?;
        if work.first() == Some(&0) {
            return Err(CodecError::InvalidValue("total work has leading zero".into()));
        }
        Ok(Self {
            header,
            total_work: U256::from_big_endian(&work),
        })
    }
}
