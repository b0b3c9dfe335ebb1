//! Transactions and their wire format.

use crate::amount::Amount;
use crate::encode::{
    deserialize, serialize, CompactSize, Decodable, Encodable, Error as EncodeError,
};
use crate::hashes::{sha256d, Txid, Wtxid};
use crate::script::Script;
use std::fmt;
use std::io::{self, Read, Write};

/// Weight units per stripped byte.
pub const WITNESS_SCALE_FACTOR: usize = 4;

/// Sequence value that opts an input out of lock-time semantics.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// nLockTime values below this are heights; at or above, unix times.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// Blocks a coinbase/coinstake output must wait before being spent.
pub const COINBASE_MATURITY: u32 = 100;

/// Reference to a specific output of a prior transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutPoint {
    pub txid: Txid,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Txid, vout: u32) -> Self {
        OutPoint { txid, vout }
    }

    pub fn null() -> Self {
        OutPoint {
            txid: Txid::all_zeros(),
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        *self == OutPoint::null()
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Per-input witness stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Witness(pub Vec<Vec<u8>>);

impl Witness {
    pub fn new() -> Self {
        Witness(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
    pub witness: Witness,
}

impl TxIn {
    pub fn new(prevout: OutPoint) -> Self {
        TxIn {
            prevout,
            script_sig: Script::new(),
            sequence: SEQUENCE_FINAL,
            witness: Witness::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Script) -> Self {
        TxOut {
            value,
            script_pubkey,
        }
    }

    /// The empty output used as the first output of coinstakes and the
    /// whole output set of PoS coinbases.
    pub fn empty() -> Self {
        TxOut {
            value: Amount::ZERO,
            script_pubkey: Script::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value == Amount::ZERO && self.script_pubkey.is_empty()
    }

    /// CLTV lock time guarding this output, zero if unguarded.
    pub fn lock_time(&self) -> i64 {
        self.script_pubkey.cltv_lock_time()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error("transaction output value out of money range")]
    ValueOutOfRange,
}

/// A transaction. `time` is the Peercoin-lineage stamp field; `message` an
/// optional free-form payload carried after the lock time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub time: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
    pub message: String,
}

impl Transaction {
    pub const CURRENT_VERSION: i32 = 2;

    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// Identifier over the witness-stripped serialization.
    pub fn txid(&self) -> Txid {
        let bytes = self.serialize_internal(false);
        Txid::from_byte_array(sha256d(&bytes))
    }

    /// Identifier over the full serialization; equals [`Self::txid`] when no
    /// input carries witness data.
    pub fn wtxid(&self) -> Wtxid {
        let bytes = self.serialize_internal(self.has_witness());
        Wtxid::from_byte_array(sha256d(&bytes))
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Coinstake: spends a real outpoint, and its first output is empty.
    pub fn is_coinstake(&self) -> bool {
        !self.inputs.is_empty()
            && !self.inputs[0].prevout.is_null()
            && self.outputs.len() >= 2
            && self.outputs[0].is_empty()
    }

    /// Sum of output values, enforcing the money range at every step.
    pub fn value_out(&self) -> Result<Amount, TxError> {
        let mut total = Amount::ZERO;
        for output in &self.outputs {
            if !output.value.is_money_range() {
                return Err(TxError::ValueOutOfRange);
            }
            total = total
                .checked_add(output.value)
                .filter(|t| t.is_money_range())
                .ok_or(TxError::ValueOutOfRange)?;
        }
        Ok(total)
    }

    pub fn total_size(&self) -> usize {
        self.serialize_internal(self.has_witness()).len()
    }

    pub fn stripped_size(&self) -> usize {
        self.serialize_internal(false).len()
    }

    /// Weight: stripped size counted [`WITNESS_SCALE_FACTOR`] times, witness
    /// bytes once.
    pub fn weight(&self) -> usize {
        self.stripped_size() * (WITNESS_SCALE_FACTOR - 1) + self.total_size()
    }

    pub fn vsize(&self) -> usize {
        self.weight().div_ceil(WITNESS_SCALE_FACTOR)
    }

    /// Legacy sigop count over all input and output scripts.
    pub fn legacy_sigop_count(&self) -> usize {
        let inputs: usize = self
            .inputs
            .iter()
            .map(|i| i.script_sig.legacy_sigop_count())
            .sum();
        let outputs: usize = self
            .outputs
            .iter()
            .map(|o| o.script_pubkey.legacy_sigop_count())
            .sum();
        inputs + outputs
    }

    fn serialize_internal(&self, with_witness: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        self.encode_inner(&mut buf, with_witness)
            .expect("in-memory writers do not fail");
        buf
    }

    fn encode_inner<W: Write>(&self, w: &mut W, with_witness: bool) -> io::Result<usize> {
        let mut len = self.version.encode_to(w)?;
        len += self.time.encode_to(w)?;
        if with_witness {
            // Marker and flag announcing the witness section.
            len += 0u8.encode_to(w)?;
            len += 1u8.encode_to(w)?;
        }
        len += CompactSize(self.inputs.len() as u64).encode_to(w)?;
        for input in &self.inputs {
            len += input.prevout.encode_to(w)?;
            len += input.script_sig.encode_to(w)?;
            len += input.sequence.encode_to(w)?;
        }
        len += CompactSize(self.outputs.len() as u64).encode_to(w)?;
        for output in &self.outputs {
            len += output.encode_to(w)?;
        }
        if with_witness {
            for input in &self.inputs {
                len += input.witness.0.encode_to(w)?;
            }
        }
        len += self.lock_time.encode_to(w)?;
        len += self.message.encode_to(w)?;
        Ok(len)
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction {
            version: Transaction::CURRENT_VERSION,
            time: 0,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
            message: String::new(),
        }
    }
}

impl Encodable for OutPoint {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        Ok(self.txid.encode_to(w)? + self.vout.encode_to(w)?)
    }
}

impl Decodable for OutPoint {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, EncodeError> {
        Ok(OutPoint {
            txid: Txid::decode_from(r)?,
            vout: u32::decode_from(r)?,
        })
    }
}

impl Encodable for TxOut {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        Ok(self.value.encode_to(w)? + self.script_pubkey.encode_to(w)?)
    }
}

impl Decodable for TxOut {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, EncodeError> {
        Ok(TxOut {
            value: Amount::decode_from(r)?,
            script_pubkey: Script::decode_from(r)?,
        })
    }
}

impl Encodable for Transaction {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        self.encode_inner(w, self.has_witness())
    }
}

impl Decodable for Transaction {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, EncodeError> {
        let version = i32::decode_from(r)?;
        let time = u32::decode_from(r)?;

        let mut input_count = CompactSize::decode_from(r)?.0;
        let mut has_witness = false;
        if input_count == 0 {
            // Marker byte was zero: expect the witness flag.
            let flag = u8::decode_from(r)?;
            if flag != 1 {
                return Err(EncodeError::ParseFailed("unknown transaction flag"));
            }
            has_witness = true;
            input_count = CompactSize::decode_from(r)?.0;
        }

        let mut inputs = Vec::with_capacity(std::cmp::min(input_count as usize, 1024));
        for _ in 0..input_count {
            inputs.push(TxIn {
                prevout: OutPoint::decode_from(r)?,
                script_sig: Script::decode_from(r)?,
                sequence: u32::decode_from(r)?,
                witness: Witness::new(),
            });
        }

        let outputs = Vec::<TxOut>::decode_from(r)?;

        if has_witness {
            for input in &mut inputs {
                input.witness = Witness(Vec::<Vec<u8>>::decode_from(r)?);
            }
        }

        let lock_time = u32::decode_from(r)?;
        let message = String::decode_from(r)?;

        Ok(Transaction {
            version,
            time,
            inputs,
            outputs,
            lock_time,
            message,
        })
    }
}

/// Serialize and reparse, used by tests and the round-trip property.
pub fn transaction_round_trips(tx: &Transaction) -> bool {
    let bytes = serialize(tx);
    matches!(deserialize::<Transaction>(&bytes), Ok(ref decoded) if decoded == tx)
}
