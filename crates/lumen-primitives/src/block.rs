//! Block and header types.

use crate::encode::{Decodable, Encodable, Error as EncodeError};
use crate::hashes::{sha256d, BlockHash, MerkleRoot, Txid};
use crate::transaction::Transaction;
use std::io::{self, Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: i32,
    pub prev_blockhash: BlockHash,
    pub merkle_root: MerkleRoot,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl Header {
    pub fn block_hash(&self) -> BlockHash {
        let mut buf = Vec::with_capacity(80);
        self.encode_to(&mut buf)
            .expect("in-memory writers do not fail");
        BlockHash::from_byte_array(sha256d(&buf))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    /// Block signature; present on proof-of-stake blocks, empty otherwise.
    pub signature: Vec<u8>,
}

impl Block {
    pub fn block_hash(&self) -> BlockHash {
        self.header.block_hash()
    }

    /// The block kind is a property of the coinstake's presence.
    pub fn is_proof_of_stake(&self) -> bool {
        self.transactions.len() > 1 && self.transactions[1].is_coinstake()
    }

    pub fn compute_merkle_root(&self) -> MerkleRoot {
        merkle_root(&self.transactions.iter().map(Transaction::txid).collect::<Vec<_>>())
    }
}

/// Merkle root over txids: pairwise double-SHA256, odd leaves duplicated.
pub fn merkle_root(txids: &[Txid]) -> MerkleRoot {
    if txids.is_empty() {
        return MerkleRoot::from_byte_array([0u8; 32]);
    }
    let mut layer: Vec<[u8; 32]> = txids.iter().map(|id| id.to_byte_array()).collect();
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(2));
        for pair in layer.chunks(2) {
            let left = pair[0];
            let right = *pair.last().expect("chunk is non-empty");
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(&left);
            buf[32..].copy_from_slice(&right);
            next.push(sha256d(&buf));
        }
        layer = next;
    }
    MerkleRoot::from_byte_array(layer[0])
}

impl Encodable for Header {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.version.encode_to(w)?;
        len += self.prev_blockhash.encode_to(w)?;
        len += self.merkle_root.encode_to(w)?;
        len += self.time.encode_to(w)?;
        len += self.bits.encode_to(w)?;
        len += self.nonce.encode_to(w)?;
        Ok(len)
    }
}

impl Decodable for Header {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, EncodeError> {
        Ok(Header {
            version: i32::decode_from(r)?,
            prev_blockhash: BlockHash::decode_from(r)?,
            merkle_root: MerkleRoot::decode_from(r)?,
            time: u32::decode_from(r)?,
            bits: u32::decode_from(r)?,
            nonce: u32::decode_from(r)?,
        })
    }
}

impl Encodable for Block {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        let mut len = self.header.encode_to(w)?;
        len += self.transactions.encode_to(w)?;
        len += self.signature.encode_to(w)?;
        Ok(len)
    }
}

impl Decodable for Block {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, EncodeError> {
        Ok(Block {
            header: Header::decode_from(r)?,
            transactions: Vec::<Transaction>::decode_from(r)?,
            signature: Vec::<u8>::decode_from(r)?,
        })
    }
}
