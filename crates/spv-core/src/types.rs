//! Core value types: hashes, addresses, outpoints and transactions.
//!
//! Transactions are modelled only as far as the filter needs them: which
//! outpoints they spend and which addresses they pay. Script and signature
//! validation happen upstream.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codec::{self, Decodable, Encodable};
use crate::error::{AddressError, CodecError};

/// Double SHA-256.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// A 32-byte hash value, stored in little-endian (wire) order.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Used as the previous hash of genesis.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Hash arbitrary bytes with double SHA-256.
    pub fn digest(data: &[u8]) -> Self {
        Self(sha256d(data))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Hash256 {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| CodecError::InvalidValue(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 21-byte program-hash address (prefix byte + 20-byte hash).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; Address::LEN]);

impl Address {
    pub const LEN: usize = 21;

    /// Length of the base58check string form.
    pub const ENCODED_LEN: usize = 34;

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Encode as base58check (payload || first 4 bytes of sha256d(payload)).
    pub fn to_base58(&self) -> String {
        let mut data = Vec::with_capacity(Self::LEN + 4);
        data.extend_from_slice(&self.0);
        data.extend_from_slice(&sha256d(&self.0)[..4]);
        bs58::encode(data).into_string()
    }

    /// Decode a base58check address string.
    pub fn from_base58(s: &str) -> Result<Self, AddressError> {
        let data = bs58::decode(s)
            .into_vec()
            .map_err(|e| AddressError::InvalidBase58(e.to_string()))?;
        if data.len() != Self::LEN + 4 {
            return Err(AddressError::InvalidLength(data.len()));
        }
        let (payload, checksum) = data.split_at(Self::LEN);
        if sha256d(payload)[..4] != *checksum {
            return Err(AddressError::InvalidChecksum);
        }
        let mut bytes = [0u8; Self::LEN];
        bytes.copy_from_slice(payload);
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub index: u16,
}

impl OutPoint {
    pub const LEN: usize = 34;

    pub fn new(txid: Hash256, index: u16) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

impl Encodable for OutPoint {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(self.txid.as_bytes());
        buf.put_u16_le(self.index);
    }
}

impl Decodable for OutPoint {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        Ok(Self {
            txid: codec::read_hash(buf)?,
            index: codec::read_u16(buf)?,
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxInput {
    pub previous_output: OutPoint,
    pub sequence: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub address: Address,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

/// Maximum inputs accepted when decoding a transaction.
const MAX_TX_INPUTS: u64 = 100_000;

/// Maximum outputs accepted when decoding a transaction: every output must
/// be addressable by a `u16` outpoint index.
pub const MAX_TX_OUTPUTS: u64 = u16::MAX as u64 + 1;

impl Transaction {
    /// Transaction ID: double SHA-256 of the canonical encoding.
    pub fn txid(&self) -> Hash256 {
        Hash256::digest(&self.to_bytes())
    }
}

impl Encodable for Transaction {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.version);
        codec::write_var_int(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.previous_output.encode(buf);
            buf.put_u32_le(input.sequence);
        }
        codec::write_var_int(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            buf.put_u64_le(output.value);
            buf.put_slice(output.address.as_bytes());
        }
        buf.put_u32_le(self.lock_time);
    }
}

impl Decodable for Transaction {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        let version = codec::read_u32(buf)?;
        let input_count = codec::read_length(buf, MAX_TX_INPUTS)?;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            inputs.push(TxInput {
                previous_output: OutPoint::decode(buf)?,
                sequence: codec::read_u32(buf)?,
            });
        }
        let output_count = codec::read_length(buf, MAX_TX_OUTPUTS)?;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            outputs.push(TxOutput {
                value: codec::read_u64(buf)?,
                address: Address(codec::read_array(buf)?),
            });
        }
        let lock_time = codec::read_u32(buf)?;
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}
