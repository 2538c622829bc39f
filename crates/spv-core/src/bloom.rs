//! BIP37 bloom filter and its wire messages.
//!
//! The filter is the probabilistic set a light client hands to full peers so
//! they only relay transactions that touch watched addresses or outpoints.
//! Bit `i` of the filter is bit `i % 8` of byte `i / 8`, and the `n`-th hash
//! function is MurmurHash3 (32-bit) seeded with `n * 0xFBA4C795 + tweak`.
//!
//! # Sizing
//!
//! For `n` elements at false-positive rate `p`:
//! - bits = `-n * ln(p) / ln(2)^2`, capped at [`MAX_FILTER_SIZE`] bytes
//! - hash functions = `bits / n * ln(2)`, capped at [`MAX_HASH_FUNCS`]

use std::f64::consts::LN_2;
use std::io::Cursor;

use bytes::{Buf, BufMut};

use crate::codec::{self, Decodable, Encodable};
use crate::error::{CodecError, FilterError};
use crate::types::{Address, OutPoint, Transaction};

/// Maximum filter size in bytes.
pub const MAX_FILTER_SIZE: usize = 36_000;

/// Maximum number of hash functions.
pub const MAX_HASH_FUNCS: u32 = 50;

/// Maximum size of a single `FilterAdd` element.
pub const MAX_FILTER_ADD_SIZE: usize = 520;

/// Default false-positive rate for wallet filters.
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.0001;

const SEED_MULTIPLIER: u32 = 0xFBA4_C795;

/// What a peer (and [`BloomFilter::match_tx_and_update`]) does with the
/// outpoints of matched outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BloomUpdate {
    None,
    /// Insert every matched output's outpoint.
    #[default]
    All,
    /// Insert matched pay-to-pubkey outputs only. Outputs here always pay an
    /// address, so this behaves like `All`.
    P2PubkeyOnly,
}

impl BloomUpdate {
    pub fn as_u8(self) -> u8 {
        match self {
            BloomUpdate::None => 0,
            BloomUpdate::All => 1,
            BloomUpdate::P2PubkeyOnly => 2,
        }
    }

    pub fn from_u8(flags: u8) -> Self {
        match flags & 0x03 {
            1 => BloomUpdate::All,
            2 => BloomUpdate::P2PubkeyOnly,
            _ => BloomUpdate::None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BloomFilter {
    data: Vec<u8>,
    hash_funcs: u32,
    tweak: u32,
    flags: BloomUpdate,
}

impl BloomFilter {
    /// Size a filter for `elements` entries at false-positive rate `fp_rate`.
    pub fn new(elements: usize, fp_rate: f64, tweak: u32, flags: BloomUpdate) -> Self {
        let n = elements.max(1) as f64;
        let bits = (-1.0 / (LN_2 * LN_2) * n * fp_rate.ln()).min((MAX_FILTER_SIZE * 8) as f64);
        let size = ((bits as usize) / 8).max(1);
        let hash_funcs = ((size * 8) as f64 / n * LN_2).min(MAX_HASH_FUNCS as f64) as u32;
        Self {
            data: vec![0u8; size],
            hash_funcs: hash_funcs.max(1),
            tweak,
            flags,
        }
    }

    /// Rebuild a filter from its wire form, enforcing the size limits.
    pub fn load(msg: &FilterLoad) -> Result<Self, FilterError> {
        if msg.filter.len() > MAX_FILTER_SIZE {
            return Err(FilterError::TooLarge {
                size: msg.filter.len(),
                max: MAX_FILTER_SIZE,
            });
        }
        if msg.hash_funcs > MAX_HASH_FUNCS {
            return Err(FilterError::TooManyHashFuncs {
                count: msg.hash_funcs,
                max: MAX_HASH_FUNCS,
            });
        }
        Ok(Self {
            data: msg.filter.clone(),
            hash_funcs: msg.hash_funcs,
            tweak: msg.tweak,
            flags: BloomUpdate::from_u8(msg.flags),
        })
    }

    pub fn hash_funcs(&self) -> u32 {
        self.hash_funcs
    }

    pub fn tweak(&self) -> u32 {
        self.tweak
    }

    pub fn flags(&self) -> BloomUpdate {
        self.flags
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn bit_index(&self, n: u32, data: &[u8]) -> usize {
        let seed = n.wrapping_mul(SEED_MULTIPLIER).wrapping_add(self.tweak);
        let hash = murmur3::murmur3_32(&mut Cursor::new(data), seed).unwrap_or(0);
        hash as usize % (self.data.len() * 8)
    }

    pub fn insert(&mut self, data: &[u8]) {
        if self.data.is_empty() {
            return;
        }
        for n in 0..self.hash_funcs {
            let idx = self.bit_index(n, data);
            self.data[idx >> 3] |= 1 << (idx & 7);
        }
    }

    pub fn contains(&self, data: &[u8]) -> bool {
        if self.data.is_empty() {
            return false;
        }
        (0..self.hash_funcs).all(|n| {
            let idx = self.bit_index(n, data);
            self.data[idx >> 3] & (1 << (idx & 7)) != 0
        })
    }

    pub fn insert_address(&mut self, address: &Address) {
        self.insert(address.as_bytes());
    }

    pub fn insert_outpoint(&mut self, outpoint: &OutPoint) {
        self.insert(&outpoint.to_bytes());
    }

    pub fn contains_outpoint(&self, outpoint: &OutPoint) -> bool {
        self.contains(&outpoint.to_bytes())
    }

    /// Whether `tx` is relevant: its txid, a paid address, or a spent
    /// outpoint is in the filter.
    ///
    /// Each output paying a watched address has its outpoint inserted
    /// (unless the update flag is [`BloomUpdate::None`]) so later spends of
    /// it also match.
    pub fn match_tx_and_update(&mut self, tx: &Transaction) -> bool {
        let txid = tx.txid();
        let mut matched = self.contains(txid.as_bytes());
        for (index, output) in tx.outputs.iter().enumerate() {
            if !self.contains(output.address.as_bytes()) {
                continue;
            }
            matched = true;
            if self.flags == BloomUpdate::None {
                continue;
            }
            // Outputs past the u16 index range have no outpoint to follow.
            if let Ok(index) = u16::try_from(index) {
                self.insert_outpoint(&OutPoint::new(txid, index));
            }
        }
        if matched {
            return true;
        }
        tx.inputs
            .iter()
            .any(|input| self.contains_outpoint(&input.previous_output))
    }

    pub fn to_filter_load(&self) -> FilterLoad {
        FilterLoad {
            filter: self.data.clone(),
            hash_funcs: self.hash_funcs,
            tweak: self.tweak,
            flags: self.flags.as_u8(),
        }
    }
}

/// Build a filter over a wallet's watched addresses and outpoints with a
/// random tweak.
pub fn build_filter(addresses: &[Address], outpoints: &[OutPoint], fp_rate: f64) -> BloomFilter {
    let elements = addresses.len() + outpoints.len();
    let mut filter = BloomFilter::new(elements, fp_rate, rand::random(), BloomUpdate::All);
    for address in addresses {
        filter.insert_address(address);
    }
    for outpoint in outpoints {
        filter.insert_outpoint(outpoint);
    }
    filter
}

/// `filterload` message.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FilterLoad {
    pub filter: Vec<u8>,
    pub hash_funcs: u32,
    pub tweak: u32,
    pub flags: u8,
}

impl Encodable for FilterLoad {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        codec::write_var_bytes(buf, &self.filter);
        buf.put_u32_le(self.hash_funcs);
        buf.put_u32_le(self.tweak);
        buf.put_u8(self.flags);
    }
}

impl Decodable for FilterLoad {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        Ok(Self {
            filter: codec::read_var_bytes(buf, MAX_FILTER_SIZE as u64)?,
            hash_funcs: codec::read_u32(buf)?,
            tweak: codec::read_u32(buf)?,
            flags: codec::read_u8(buf)?,
        })
    }
}

/// `filteradd` message: one element to add to a loaded filter.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct FilterAdd {
    pub data: Vec<u8>,
}

impl Encodable for FilterAdd {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        codec::write_var_bytes(buf, &self.data);
    }
}

impl Decodable for FilterAdd {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        Ok(Self {
            data: codec::read_var_bytes(buf, MAX_FILTER_ADD_SIZE as u64)?,
        })
    }
}

/// Filter type carried in a [`TxFilterLoad`] envelope.
pub const FILTER_TYPE_BLOOM: u8 = 0;

/// Typed envelope around a serialized filter.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct TxFilterLoad {
    pub filter_type: u8,
    pub data: Vec<u8>,
}

impl TxFilterLoad {
    pub fn bloom(filter: &FilterLoad) -> Self {
        Self {
            filter_type: FILTER_TYPE_BLOOM,
            data: filter.to_bytes(),
        }
    }

    /// Decode the bloom payload.
    pub fn to_filter_load(&self) -> Result<FilterLoad, FilterError> {
        if self.filter_type != FILTER_TYPE_BLOOM {
            return Err(FilterError::UnsupportedType(self.filter_type));
        }
        Ok(FilterLoad::from_bytes(&self.data)?)
    }
}

impl Encodable for TxFilterLoad {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.filter_type);
        codec::write_var_bytes(buf, &self.data);
    }
}

impl Decodable for TxFilterLoad {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        Ok(Self {
            filter_type: codec::read_u8(buf)?,
            data: codec::read_var_bytes(buf, codec::MAX_VAR_BYTES)?,
        })
    }
}
