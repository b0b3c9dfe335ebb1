//! Hash newtypes used across the chain.

use crate::encode::{Decodable, Encodable, Error};
use bitcoin_hashes::{hash160, hash_newtype, sha256d, Hash};
use std::io::{self, Read, Write};

hash_newtype! {
    /// Transaction identifier: double SHA-256 of the serialization without
    /// witness data.
    pub struct Txid(sha256d::Hash);

    /// Witness transaction identifier: double SHA-256 of the full
    /// serialization. Equals [`Txid`] for transactions without witnesses.
    pub struct Wtxid(sha256d::Hash);

    /// Block identifier: double SHA-256 of the serialized header.
    pub struct BlockHash(sha256d::Hash);

    /// Merkle root over a block's transaction ids.
    pub struct MerkleRoot(sha256d::Hash);

    /// RIPEMD160(SHA256) of a public key.
    pub struct PubkeyHash(hash160::Hash);

    /// RIPEMD160(SHA256) of a redeem script.
    pub struct ScriptHash(hash160::Hash);
}

macro_rules! impl_byte_array {
    ($ty:ident, $len:expr) => {
        impl $ty {
            pub fn from_byte_array(bytes: [u8; $len]) -> Self {
                <$ty as Hash>::from_byte_array(bytes)
            }

            pub fn to_byte_array(self) -> [u8; $len] {
                <$ty as Hash>::to_byte_array(self)
            }

            pub fn as_byte_array(&self) -> &[u8; $len] {
                <$ty as Hash>::as_byte_array(self)
            }

            pub fn all_zeros() -> Self {
                Self::from_byte_array([0u8; $len])
            }
        }
    };
}

impl_byte_array!(Txid, 32);
impl_byte_array!(Wtxid, 32);
impl_byte_array!(BlockHash, 32);
impl_byte_array!(MerkleRoot, 32);
impl_byte_array!(PubkeyHash, 20);
impl_byte_array!(ScriptHash, 20);

macro_rules! impl_hash_codec {
    ($ty:ident, $len:expr) => {
        impl Encodable for $ty {
            fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
                w.write_all(self.as_byte_array())?;
                Ok($len)
            }
        }

        impl Decodable for $ty {
            fn decode_from<R: Read>(r: &mut R) -> Result<Self, Error> {
                let mut buf = [0u8; $len];
                r.read_exact(&mut buf)?;
                Ok($ty::from_byte_array(buf))
            }
        }
    };
}

impl_hash_codec!(Txid, 32);
impl_hash_codec!(Wtxid, 32);
impl_hash_codec!(BlockHash, 32);
impl_hash_codec!(MerkleRoot, 32);
impl_hash_codec!(PubkeyHash, 20);
impl_hash_codec!(ScriptHash, 20);

/// Double SHA-256 of arbitrary bytes.
pub fn sha256d(bytes: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(bytes).to_byte_array()
}

/// RIPEMD160(SHA256) of arbitrary bytes.
pub fn hash160(bytes: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(bytes).to_byte_array()
}
