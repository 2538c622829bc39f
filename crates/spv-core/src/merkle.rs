//! Transaction merkle trees and BIP37 merkle blocks.
//!
//! Nodes are `sha256d(left || right)` over txids; an odd layer pairs its
//! last node with itself. A merkle block carries only the hashes and flag
//! bits needed to prove which transactions matched the peer's filter.
//!
//! Flag bits are read depth-first: a set bit on an inner node means "a
//! matched leaf lies below, descend"; a clear bit means "take the next hash
//! as this subtree's value". On a leaf a set bit marks a match.

use bytes::{Buf, BufMut};

use crate::codec::{self, Decodable, Encodable};
use crate::error::{CodecError, MerkleError};
use crate::header::Header;
use crate::types::Hash256;

/// Upper bound on transactions claimed by a merkle block.
pub const MAX_MERKLE_TRANSACTIONS: u32 = 1_000_000;

fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left.as_bytes());
    data[32..].copy_from_slice(right.as_bytes());
    Hash256::digest(&data)
}

/// Merkle root of a list of txids. [`Hash256::ZERO`] when empty.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return Hash256::ZERO;
    }
    let mut layer = txids.to_vec();
    while layer.len() > 1 {
        layer = layer
            .chunks(2)
            .map(|pair| node_hash(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    layer[0]
}

/// Partial merkle tree: the proof part of a merkle block.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct PartialMerkleTree {
    pub transactions: u32,
    pub hashes: Vec<Hash256>,
    pub flags: Vec<u8>,
}

fn tree_width(transactions: u32, height: u32) -> u32 {
    ((transactions as u64 + (1u64 << height) - 1) >> height) as u32
}

fn tree_height(transactions: u32) -> u32 {
    let mut height = 0;
    while tree_width(transactions, height) > 1 {
        height += 1;
    }
    height
}

impl PartialMerkleTree {
    /// Build a proof for `txids` where `matches[i]` marks the wanted ones.
    pub fn build(txids: &[Hash256], matches: &[bool]) -> Self {
        let transactions = txids.len() as u32;
        let mut builder = Builder {
            txids,
            matches,
            transactions,
            bits: Vec::new(),
            hashes: Vec::new(),
        };
        if transactions > 0 {
            builder.traverse(tree_height(transactions), 0);
        }
        let mut flags = vec![0u8; builder.bits.len().div_ceil(8)];
        for (i, bit) in builder.bits.iter().enumerate() {
            if *bit {
                flags[i / 8] |= 1 << (i % 8);
            }
        }
        Self {
            transactions,
            hashes: builder.hashes,
            flags,
        }
    }

    /// Recompute the merkle root and collect the matched txids with their
    /// positions in the block.
    pub fn extract_matches(&self) -> Result<(Hash256, Vec<(Hash256, u32)>), MerkleError> {
        if self.transactions == 0 {
            return Err(MerkleError::NoTransactions);
        }
        if self.hashes.len() > self.transactions as usize {
            return Err(MerkleError::TooManyHashes {
                hashes: self.hashes.len(),
                transactions: self.transactions,
            });
        }
        if self.flags.len() * 8 < self.hashes.len() {
            return Err(MerkleError::NotEnoughBits);
        }
        let mut extractor = Extractor {
            tree: self,
            bits_used: 0,
            hashes_used: 0,
            matches: Vec::new(),
        };
        let root = extractor.traverse(tree_height(self.transactions), 0)?;
        if extractor.bits_used.div_ceil(8) != self.flags.len()
            || extractor.hashes_used != self.hashes.len()
        {
            return Err(MerkleError::UnconsumedData);
        }
        Ok((root, extractor.matches))
    }

    fn bit(&self, index: usize) -> bool {
        self.flags[index / 8] & (1 << (index % 8)) != 0
    }
}

struct Builder<'a> {
    txids: &'a [Hash256],
    matches: &'a [bool],
    transactions: u32,
    bits: Vec<bool>,
    hashes: Vec<Hash256>,
}

impl Builder<'_> {
    fn subtree_hash(&self, height: u32, pos: u32) -> Hash256 {
        if height == 0 {
            return self.txids[pos as usize];
        }
        let left = self.subtree_hash(height - 1, pos * 2);
        let right = if pos * 2 + 1 < tree_width(self.transactions, height - 1) {
            self.subtree_hash(height - 1, pos * 2 + 1)
        } else {
            left
        };
        node_hash(&left, &right)
    }

    fn traverse(&mut self, height: u32, pos: u32) {
        let start = (pos as u64) << height;
        let end = (((pos as u64) + 1) << height).min(self.transactions as u64);
        let parent_of_match = (start..end).any(|i| self.matches.get(i as usize).copied().unwrap_or(false));
        self.bits.push(parent_of_match);
        if height == 0 || !parent_of_match {
            let hash = self.subtree_hash(height, pos);
            self.hashes.push(hash);
            return;
        }
        self.traverse(height - 1, pos * 2);
        if pos * 2 + 1 < tree_width(self.transactions, height - 1) {
            self.traverse(height - 1, pos * 2 + 1);
        }
    }
}

struct Extractor<'a> {
    tree: &'a PartialMerkleTree,
    bits_used: usize,
    hashes_used: usize,
    matches: Vec<(Hash256, u32)>,
}

impl Extractor<'_> {
    fn traverse(&mut self, height: u32, pos: u32) -> Result<Hash256, MerkleError> {
        if self.bits_used >= self.tree.flags.len() * 8 {
            return Err(MerkleError::NotEnoughBits);
        }
        let parent_of_match = self.tree.bit(self.bits_used);
        self.bits_used += 1;

        if height == 0 || !parent_of_match {
            let hash = *self
                .tree
                .hashes
                .get(self.hashes_used)
                .ok_or(MerkleError::NotEnoughHashes)?;
            self.hashes_used += 1;
            if height == 0 && parent_of_match {
                self.matches.push((hash, pos));
            }
            return Ok(hash);
        }

        let left = self.traverse(height - 1, pos * 2)?;
        let right = if pos * 2 + 1 < tree_width(self.tree.transactions, height - 1) {
            let right = self.traverse(height - 1, pos * 2 + 1)?;
            // Identical siblings allow forging a different tx list with the
            // same root.
            if right == left {
                return Err(MerkleError::DuplicateSibling);
            }
            right
        } else {
            left
        };
        Ok(node_hash(&left, &right))
    }
}

impl Encodable for PartialMerkleTree {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.transactions);
        codec::write_var_int(buf, self.hashes.len() as u64);
        for hash in &self.hashes {
            buf.put_slice(hash.as_bytes());
        }
        codec::write_var_bytes(buf, &self.flags);
    }
}

impl Decodable for PartialMerkleTree {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        let transactions = codec::read_u32(buf)?;
        if transactions > MAX_MERKLE_TRANSACTIONS {
            return Err(CodecError::LengthTooLarge {
                len: transactions as u64,
                max: MAX_MERKLE_TRANSACTIONS as u64,
            });
        }
        let count = codec::read_length(buf, transactions as u64)?;
        let mut hashes = Vec::with_capacity(count);
        for _ in 0..count {
            hashes.push(codec::read_hash(buf)?);
        }
        let flags = codec::read_var_bytes(buf, (transactions as u64).div_ceil(4) + 1)?;
        Ok(Self {
            transactions,
            hashes,
            flags,
        })
    }
}

/// A header plus a partial merkle tree proving the matched transactions.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct MerkleBlock {
    pub header: Header,
    pub tree: PartialMerkleTree,
}

impl MerkleBlock {
    /// Build a merkle block over `txids`, proving those flagged in `matches`.
    pub fn new(header: Header, txids: &[Hash256], matches: &[bool]) -> Self {
        Self {
            header,
            tree: PartialMerkleTree::build(txids, matches),
        }
    }

    pub fn block_hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Matched txids, after checking the proof against the header's merkle
    /// root.
    pub fn matched_txids(&self) -> Result<Vec<Hash256>, MerkleError> {
        let (root, matches) = self.tree.extract_matches()?;
        if root != self.header.merkle_root {
            return Err(MerkleError::RootMismatch);
        }
        Ok(matches.into_iter().map(|(txid, _)| txid).collect())
    }
}

impl Encodable for MerkleBlock {
    fn encode<B: BufMut>(&self, buf: &mut B) {
        self.header.encode(buf);
        self.tree.encode(buf);
    }
}

impl Decodable for MerkleBlock {
    fn decode<B: Buf>(buf: &mut B) -> Result<Self, CodecError> {
        Ok(Self {
            header: Header::decode(buf)?,
            tree: PartialMerkleTree::decode(buf)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txids(n: u8) -> Vec<Hash256> {
        (0..n).map(|i| Hash256::digest(&[i])).collect()
    }

    // --- merkle_root ---

    #[test]
    fn single_leaf_root_is_the_leaf() {
        let ids = txids(1);
        assert_eq!(merkle_root(&ids), ids[0]);
    }

    #[test]
    fn odd_layer_duplicates_last() {
        let ids = txids(3);
        let expected = node_hash(&node_hash(&ids[0], &ids[1]), &node_hash(&ids[2], &ids[2]));
        assert_eq!(merkle_root(&ids), expected);
    }

    #[test]
    fn empty_root_is_zero() {
        assert_eq!(merkle_root(&[]), Hash256::ZERO);
    }

    // --- partial trees ---

    #[test]
    fn extract_recovers_root_and_matches() {
        for n in [1u8, 2, 3, 7, 16, 33] {
            let ids = txids(n);
            let matches: Vec<bool> = (0..n).map(|i| i % 3 == 1).collect();
            let tree = PartialMerkleTree::build(&ids, &matches);
            let (root, found) = tree.extract_matches().unwrap();
            assert_eq!(root, merkle_root(&ids), "n = {n}");
            let expected: Vec<(Hash256, u32)> = ids
                .iter()
                .enumerate()
                .filter(|(i, _)| matches[*i])
                .map(|(i, h)| (*h, i as u32))
                .collect();
            assert_eq!(found, expected, "n = {n}");
        }
    }

    #[test]
    fn no_matches_is_just_the_root() {
        let ids = txids(8);
        let tree = PartialMerkleTree::build(&ids, &[false; 8]);
        assert_eq!(tree.hashes, vec![merkle_root(&ids)]);
        let (root, found) = tree.extract_matches().unwrap();
        assert_eq!(root, merkle_root(&ids));
        assert!(found.is_empty());
    }

    #[test]
    fn empty_tree_rejected() {
        assert_eq!(
            PartialMerkleTree::default().extract_matches(),
            Err(MerkleError::NoTransactions)
        );
    }

    #[test]
    fn missing_hash_rejected() {
        let ids = txids(4);
        let mut tree = PartialMerkleTree::build(&ids, &[true, false, false, true]);
        tree.hashes.pop();
        assert_eq!(tree.extract_matches(), Err(MerkleError::NotEnoughHashes));
    }

    #[test]
    fn extra_hash_rejected() {
        let ids = txids(4);
        let mut tree = PartialMerkleTree::build(&ids, &[true, false, false, false]);
        tree.hashes.push(Hash256([1; 32]));
        assert_eq!(tree.extract_matches(), Err(MerkleError::UnconsumedData));
    }

    #[test]
    fn duplicate_siblings_rejected() {
        let mut ids = txids(2);
        ids[1] = ids[0];
        let tree = PartialMerkleTree::build(&ids, &[true, true]);
        assert_eq!(tree.extract_matches(), Err(MerkleError::DuplicateSibling));
    }

    // --- merkle blocks ---

    #[test]
    fn merkle_block_checks_header_root() {
        let ids = txids(5);
        let header = Header {
            merkle_root: merkle_root(&ids),
            ..Header::default()
        };
        let block = MerkleBlock::new(header.clone(), &ids, &[false, true, false, false, true]);
        assert_eq!(block.matched_txids().unwrap(), vec![ids[1], ids[4]]);

        let mut forged = block.clone();
        forged.header.merkle_root = Hash256([9; 32]);
        assert_eq!(forged.matched_txids(), Err(MerkleError::RootMismatch));
    }

    #[test]
    fn merkle_block_wire_round_trip() {
        let ids = txids(6);
        let header = Header {
            merkle_root: merkle_root(&ids),
            height: 9,
            ..Header::default()
        };
        let block = MerkleBlock::new(header, &ids, &[true, false, false, false, false, true]);
        let decoded = MerkleBlock::from_bytes(&block.to_bytes()).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.block_hash(), block.block_hash());
    }
}
