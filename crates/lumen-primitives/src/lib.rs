//! Chain primitives: amounts, hashes, consensus serialization, scripts,
//! destinations, transactions, and blocks.

pub mod address;
pub mod amount;
pub mod block;
pub mod encode;
pub mod hashes;
pub mod opcodes;
pub mod script;
pub mod standard;
pub mod transaction;

pub use self::address::{decode_destination, encode_destination, AddressPrefixes};
pub use self::amount::{Amount, COIN, MAX_MONEY, MAX_MONEY_TOKENS};
pub use self::block::{merkle_root, Block, Header};
pub use self::encode::{deserialize, serialize, Decodable, Encodable};
pub use self::hashes::{BlockHash, MerkleRoot, PubkeyHash, ScriptHash, Txid, Wtxid};
pub use self::script::{Script, TokenScriptOp};
pub use self::standard::{
    extract_destination, script_for_destination, solve, Destination, ScriptKind, Solution,
};
pub use self::transaction::{
    OutPoint, Transaction, TxIn, TxOut, Witness, COINBASE_MATURITY, LOCKTIME_THRESHOLD,
    SEQUENCE_FINAL, WITNESS_SCALE_FACTOR,
};
