//! Output scripts: byte buffer, builder, instruction iterator, and the
//! structural predicates used by the solver and the token layer.

use crate::encode::{Decodable, Encodable, Error};
use crate::opcodes::*;
use std::fmt;
use std::io::{self, Read, Write};

/// Scripts above this size are unspendable by policy.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Token payloads open with these marker bytes, followed by one operation
/// byte and the serialized record.
pub const TOKEN_MARKER: [u8; 3] = *b"alp";

pub const TOKEN_ISSUE: u8 = b'q';
pub const TOKEN_OWNER: u8 = b'o';
pub const TOKEN_TRANSFER: u8 = b't';
pub const TOKEN_REISSUE: u8 = b'r';

/// An owned output script.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Script(Vec<u8>);

/// One parsed script element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction<'a> {
    Op(u8),
    PushBytes(&'a [u8]),
}

/// The token operation embedded in a script, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenScriptOp {
    Issue,
    Owner,
    Transfer,
    Reissue,
}

/// Decomposition of a script that carries a token payload: the plain
/// spending destination in front of the marker, plus the payload itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenScriptParts<'a> {
    pub op: TokenScriptOp,
    /// True when the destination part pays to a script hash rather than a
    /// pubkey hash.
    pub dest_is_script_hash: bool,
    pub dest_hash: [u8; 20],
    /// Serialized token record (marker and operation byte stripped).
    pub payload: &'a [u8],
}

impl Script {
    pub fn new() -> Self {
        Script(Vec::new())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Script(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    // === builder ===

    pub fn push_opcode(&mut self, op: u8) -> &mut Self {
        self.0.push(op);
        self
    }

    /// Push raw data with a minimal push prefix.
    pub fn push_slice(&mut self, data: &[u8]) -> &mut Self {
        match data.len() {
            0..=0x4b => self.0.push(data.len() as u8),
            0x4c..=0xff => {
                self.0.push(OP_PUSHDATA1);
                self.0.push(data.len() as u8);
            }
            0x100..=0xffff => {
                self.0.push(OP_PUSHDATA2);
                self.0.extend_from_slice(&(data.len() as u16).to_le_bytes());
            }
            _ => {
                self.0.push(OP_PUSHDATA4);
                self.0.extend_from_slice(&(data.len() as u32).to_le_bytes());
            }
        }
        self.0.extend_from_slice(data);
        self
    }

    /// Push an integer the way script builders do: small values become
    /// `OP_0`..`OP_16`, everything else a minimal scriptnum push.
    pub fn push_int(&mut self, n: i64) -> &mut Self {
        if n == 0 {
            return self.push_opcode(OP_0);
        }
        if n == -1 {
            return self.push_opcode(OP_1NEGATE);
        }
        if (1..=16).contains(&n) {
            return self.push_opcode(encode_op_n(n as u8));
        }
        self.push_slice(&scriptnum_encode(n))
    }

    /// Append another script verbatim.
    pub fn extend(&mut self, other: &Script) -> &mut Self {
        self.0.extend_from_slice(&other.0);
        self
    }

    // === iteration ===

    pub fn instructions(&self) -> Instructions<'_> {
        Instructions {
            bytes: &self.0,
            pos: 0,
        }
    }

    // === predicates ===

    pub fn is_pay_to_script_hash(&self) -> bool {
        self.0.len() == 23
            && self.0[0] == OP_HASH160
            && self.0[1] == 0x14
            && self.0[22] == OP_EQUAL
    }

    pub fn is_pay_to_pubkey_hash(&self) -> bool {
        self.0.len() == 25
            && self.0[0] == OP_DUP
            && self.0[1] == OP_HASH160
            && self.0[2] == 0x14
            && self.0[23] == OP_EQUALVERIFY
            && self.0[24] == OP_CHECKSIG
    }

    /// Witness program: version opcode then a single 2..=40 byte push.
    pub fn witness_program(&self) -> Option<(u8, &[u8])> {
        if self.0.len() < 4 || self.0.len() > 42 {
            return None;
        }
        let version = decode_op_n(self.0[0])?;
        if self.0[1] as usize != self.0.len() - 2 {
            return None;
        }
        Some((version, &self.0[2..]))
    }

    /// Two-branch offline staking form:
    /// `OP_OFFLINE_STAKE OP_IF <p2pkh staking> OP_ELSE <p2pkh spending> OP_ENDIF`.
    pub fn is_offline_staking(&self) -> bool {
        const LEN: usize = 54;
        let s = &self.0;
        s.len() == LEN
            && s[0] == OP_OFFLINE_STAKE
            && s[1] == OP_IF
            && s[2] == OP_DUP
            && s[3] == OP_HASH160
            && s[4] == 0x14
            && s[25] == OP_EQUALVERIFY
            && s[26] == OP_CHECKSIG
            && s[27] == OP_ELSE
            && s[28] == OP_DUP
            && s[29] == OP_HASH160
            && s[30] == 0x14
            && s[51] == OP_EQUALVERIFY
            && s[52] == OP_CHECKSIG
            && s[53] == OP_ENDIF
    }

    pub fn offline_staking_hashes(&self) -> Option<([u8; 20], [u8; 20])> {
        if !self.is_offline_staking() {
            return None;
        }
        let mut staking = [0u8; 20];
        let mut spending = [0u8; 20];
        staking.copy_from_slice(&self.0[5..25]);
        spending.copy_from_slice(&self.0[31..51]);
        Some((staking, spending))
    }

    pub fn is_op_return(&self) -> bool {
        !self.0.is_empty() && self.0[0] == OP_RETURN
    }

    pub fn is_unspendable(&self) -> bool {
        self.is_op_return() || self.0.len() > MAX_SCRIPT_SIZE
    }

    /// True when every instruction from `offset` onwards is a push.
    pub fn is_push_only_from(&self, offset: usize) -> bool {
        let tail = Script(self.0[offset.min(self.0.len())..].to_vec());
        for ins in tail.instructions() {
            match ins {
                Ok(Instruction::PushBytes(_)) => {}
                Ok(Instruction::Op(op)) if op <= OP_16 => {}
                _ => return false,
            }
        }
        true
    }

    /// Parse the embedded token payload, if this script carries one.
    ///
    /// The destination part always comes first so the output still "spends
    /// to D" in the ordinary way; the marker opcode and payload follow.
    pub fn token_parts(&self) -> Option<TokenScriptParts<'_>> {
        let (dest_is_script_hash, dest_hash, marker_at) = if self.is_token_dest_p2pkh() {
            let mut h = [0u8; 20];
            h.copy_from_slice(&self.0[3..23]);
            (false, h, 25)
        } else if self.is_token_dest_p2sh() {
            let mut h = [0u8; 20];
            h.copy_from_slice(&self.0[2..22]);
            (true, h, 23)
        } else {
            return None;
        };

        if self.0.get(marker_at) != Some(&OP_TOKEN_SCRIPT) {
            return None;
        }

        let tail = &self.0[marker_at + 1..];
        let (push, rest) = read_push(tail)?;
        if rest != [OP_DROP] {
            return None;
        }
        if push.len() < 4 || push[..3] != TOKEN_MARKER {
            return None;
        }
        let op = match push[3] {
            TOKEN_ISSUE => TokenScriptOp::Issue,
            TOKEN_OWNER => TokenScriptOp::Owner,
            TOKEN_TRANSFER => TokenScriptOp::Transfer,
            TOKEN_REISSUE => TokenScriptOp::Reissue,
            _ => return None,
        };

        Some(TokenScriptParts {
            op,
            dest_is_script_hash,
            dest_hash,
            payload: &push[4..],
        })
    }

    pub fn is_token_script(&self) -> bool {
        self.token_parts().is_some()
    }

    /// Whether the raw marker opcode appears anywhere. Used to reject
    /// malformed embeddings that [`Self::token_parts`] will not parse.
    pub fn contains_token_marker(&self) -> bool {
        for ins in self.instructions() {
            match ins {
                Ok(Instruction::Op(OP_TOKEN_SCRIPT)) => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
        false
    }

    fn is_token_dest_p2pkh(&self) -> bool {
        self.0.len() > 25
            && self.0[0] == OP_DUP
            && self.0[1] == OP_HASH160
            && self.0[2] == 0x14
            && self.0[23] == OP_EQUALVERIFY
            && self.0[24] == OP_CHECKSIG
    }

    fn is_token_dest_p2sh(&self) -> bool {
        self.0.len() > 23 && self.0[0] == OP_HASH160 && self.0[1] == 0x14 && self.0[22] == OP_EQUAL
    }

    /// Lock time of a CLTV-guarded output:
    /// `<n> OP_CHECKLOCKTIMEVERIFY OP_DROP ...`. Zero when the script has no
    /// such prefix.
    pub fn cltv_lock_time(&self) -> i64 {
        let mut ins = self.instructions();
        let first = ins.next();
        let n = match first {
            Some(Ok(Instruction::PushBytes(data))) => match scriptnum_decode(data) {
                Some(n) => n,
                None => return 0,
            },
            Some(Ok(Instruction::Op(op))) => match decode_op_n(op) {
                Some(n) => n as i64,
                None => return 0,
            },
            _ => return 0,
        };
        match (ins.next(), ins.next()) {
            (
                Some(Ok(Instruction::Op(OP_CHECKLOCKTIMEVERIFY))),
                Some(Ok(Instruction::Op(OP_DROP))),
            ) => n,
            _ => 0,
        }
    }

    /// Count legacy signature operations in this script.
    pub fn legacy_sigop_count(&self) -> usize {
        let mut count = 0;
        for ins in self.instructions() {
            match ins {
                Ok(Instruction::Op(OP_CHECKSIG | OP_CHECKSIGVERIFY)) => count += 1,
                Ok(Instruction::Op(OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY)) => count += 20,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        count
    }
}

/// Read one push (immediate or PUSHDATA) from the front of `bytes`.
fn read_push(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    let (len, data_at) = match *bytes.first()? {
        n @ 0x01..=0x4b => (n as usize, 1),
        OP_PUSHDATA1 => (*bytes.get(1)? as usize, 2),
        OP_PUSHDATA2 => (u16::from_le_bytes([*bytes.get(1)?, *bytes.get(2)?]) as usize, 3),
        OP_PUSHDATA4 => (
            u32::from_le_bytes([*bytes.get(1)?, *bytes.get(2)?, *bytes.get(3)?, *bytes.get(4)?])
                as usize,
            5,
        ),
        _ => return None,
    };
    if bytes.len() < data_at + len {
        return None;
    }
    Some((&bytes[data_at..data_at + len], &bytes[data_at + len..]))
}

/// Minimal scriptnum encoding (little-endian, sign in the top bit).
pub fn scriptnum_encode(n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let negative = n < 0;
    let mut abs = n.unsigned_abs();
    let mut out = Vec::new();
    while abs > 0 {
        out.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    if out.last().map_or(false, |b| b & 0x80 != 0) {
        out.push(if negative { 0x80 } else { 0 });
    } else if negative {
        *out.last_mut().expect("non-empty") |= 0x80;
    }
    out
}

/// Decode a scriptnum of at most 5 bytes.
pub fn scriptnum_decode(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() {
        return Some(0);
    }
    if bytes.len() > 5 {
        return None;
    }
    let mut n: i64 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if i == bytes.len() - 1 {
            n |= i64::from(b & 0x7f) << (8 * i);
            if b & 0x80 != 0 {
                n = -n;
            }
        } else {
            n |= i64::from(b) << (8 * i);
        }
    }
    Some(n)
}

pub struct Instructions<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ScriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let op = self.bytes[self.pos];
        if op == OP_0 {
            self.pos += 1;
            return Some(Ok(Instruction::PushBytes(&[])));
        }
        if (0x01..=OP_PUSHDATA4).contains(&op) {
            match read_push(&self.bytes[self.pos..]) {
                Some((data, rest)) => {
                    self.pos = self.bytes.len() - rest.len();
                    Some(Ok(Instruction::PushBytes(data)))
                }
                None => {
                    self.pos = self.bytes.len();
                    Some(Err(ScriptError::EarlyEndOfScript))
                }
            }
        } else {
            self.pos += 1;
            Some(Ok(Instruction::Op(op)))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("push extends past the end of the script")]
    EarlyEndOfScript,
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", self.to_hex())
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Encodable for Script {
    fn encode_to<W: Write>(&self, w: &mut W) -> io::Result<usize> {
        self.0.encode_to(w)
    }
}

impl Decodable for Script {
    fn decode_from<R: Read>(r: &mut R) -> Result<Self, Error> {
        Ok(Script(Vec::<u8>::decode_from(r)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p2pkh(hash: [u8; 20]) -> Script {
        let mut s = Script::new();
        s.push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(&hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG);
        s
    }

    #[test]
    fn p2sh_shape() {
        let mut s = Script::new();
        s.push_opcode(OP_HASH160)
            .push_slice(&[7u8; 20])
            .push_opcode(OP_EQUAL);
        assert!(s.is_pay_to_script_hash());
        assert!(!s.is_pay_to_pubkey_hash());
    }

    #[test]
    fn token_script_round_trip() {
        let mut s = p2pkh([9u8; 20]);
        let mut payload = TOKEN_MARKER.to_vec();
        payload.push(TOKEN_TRANSFER);
        payload.extend_from_slice(b"rest");
        s.push_opcode(OP_TOKEN_SCRIPT);
        s.push_slice(&payload);
        s.push_opcode(OP_DROP);

        let parts = s.token_parts().expect("token script");
        assert_eq!(parts.op, TokenScriptOp::Transfer);
        assert!(!parts.dest_is_script_hash);
        assert_eq!(parts.dest_hash, [9u8; 20]);
        assert_eq!(parts.payload, b"rest");
        assert!(s.contains_token_marker());
    }

    #[test]
    fn plain_p2pkh_is_not_token_script() {
        assert!(p2pkh([1u8; 20]).token_parts().is_none());
    }

    #[test]
    fn cltv_prefix_lock_time() {
        let mut s = Script::new();
        s.push_int(500_000);
        s.push_opcode(OP_CHECKLOCKTIMEVERIFY);
        s.push_opcode(OP_DROP);
        s.extend(&p2pkh([2u8; 20]));
        assert_eq!(s.cltv_lock_time(), 500_000);
        assert_eq!(p2pkh([2u8; 20]).cltv_lock_time(), 0);
    }

    #[test]
    fn scriptnum_round_trip() {
        for n in [0i64, 1, -1, 127, 128, 255, 256, 500_000, -500_000] {
            assert_eq!(scriptnum_decode(&scriptnum_encode(n)), Some(n));
        }
    }

    #[test]
    fn witness_program_shapes() {
        let mut s = Script::new();
        s.push_opcode(OP_0);
        s.push_slice(&[5u8; 20]);
        let (version, program) = s.witness_program().expect("v0 keyhash");
        assert_eq!(version, 0);
        assert_eq!(program.len(), 20);

        let mut s = Script::new();
        s.push_opcode(OP_0);
        s.push_slice(&[5u8; 32]);
        assert_eq!(s.witness_program().expect("v0 scripthash").1.len(), 32);
    }

    #[test]
    fn offline_staking_shape() {
        let mut s = Script::new();
        s.push_opcode(OP_OFFLINE_STAKE).push_opcode(OP_IF);
        s.push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(&[3u8; 20])
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG);
        s.push_opcode(OP_ELSE);
        s.push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(&[4u8; 20])
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG);
        s.push_opcode(OP_ENDIF);

        let (staking, spending) = s.offline_staking_hashes().expect("offline staking");
        assert_eq!(staking, [3u8; 20]);
        assert_eq!(spending, [4u8; 20]);
    }

    #[test]
    fn sigop_counting() {
        let mut s = p2pkh([1u8; 20]);
        s.push_opcode(OP_CHECKMULTISIG);
        assert_eq!(s.legacy_sigop_count(), 21);
    }
}
