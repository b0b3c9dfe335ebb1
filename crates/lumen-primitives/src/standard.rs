//! Standard script templates: the destination taxonomy and the solver.

use crate::hashes::{PubkeyHash, ScriptHash};
use crate::opcodes::*;
use crate::script::{scriptnum_decode, Instruction, Script, TokenScriptOp};

/// Where an output pays to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Null,
    PubKey(Vec<u8>),
    PubkeyHash(PubkeyHash),
    ScriptHash(ScriptHash),
    WitnessV0KeyHash([u8; 20]),
    WitnessV0ScriptHash([u8; 32]),
    Cltv {
        lock_time: i64,
        key_hash: PubkeyHash,
    },
    OfflineStake {
        staking: PubkeyHash,
        spending: PubkeyHash,
    },
}

impl Destination {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Destination::Null)
    }
}

/// Recognized output shapes, in solver vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    NonStandard,
    Cltv,
    PubKey,
    PubkeyHash,
    ScriptHash,
    Multisig,
    NullData,
    WitnessV0KeyHash,
    WitnessV0ScriptHash,
    OfflineStaking,
    NewToken,
    TransferToken,
    ReissueToken,
}

impl ScriptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptKind::NonStandard => "nonstandard",
            ScriptKind::Cltv => "cltv",
            ScriptKind::PubKey => "pubkey",
            ScriptKind::PubkeyHash => "pubkeyhash",
            ScriptKind::ScriptHash => "scripthash",
            ScriptKind::Multisig => "multisig",
            ScriptKind::NullData => "nulldata",
            ScriptKind::WitnessV0KeyHash => "witness_v0_keyhash",
            ScriptKind::WitnessV0ScriptHash => "witness_v0_scripthash",
            ScriptKind::OfflineStaking => "offline_staking",
            ScriptKind::NewToken => "new_token",
            ScriptKind::TransferToken => "transfer_token",
            ScriptKind::ReissueToken => "reissue_token",
        }
    }
}

/// Solver output: the shape, the destination shape beneath it (differs from
/// `kind` only for token scripts), and the extracted stack solutions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub kind: ScriptKind,
    pub script_kind: ScriptKind,
    pub solutions: Vec<Vec<u8>>,
}

/// Classify an output script.
///
/// Matching is strictly ordered: P2SH first (it is more constrained than
/// everything else), then token scripts by their reserved marker, then the
/// offline-staking form, witness programs, prunable data, and finally the
/// small template list.
pub fn solve(script: &Script) -> Solution {
    // Pay-to-script-hash: always OP_HASH160 <20> OP_EQUAL.
    if script.is_pay_to_script_hash() {
        return Solution {
            kind: ScriptKind::ScriptHash,
            script_kind: ScriptKind::ScriptHash,
            solutions: vec![script.as_bytes()[2..22].to_vec()],
        };
    }

    if let Some(parts) = script.token_parts() {
        let kind = match parts.op {
            TokenScriptOp::Issue | TokenScriptOp::Owner => ScriptKind::NewToken,
            TokenScriptOp::Transfer => ScriptKind::TransferToken,
            TokenScriptOp::Reissue => ScriptKind::ReissueToken,
        };
        let script_kind = if parts.dest_is_script_hash {
            ScriptKind::ScriptHash
        } else {
            ScriptKind::PubkeyHash
        };
        return Solution {
            kind,
            script_kind,
            solutions: vec![parts.dest_hash.to_vec()],
        };
    }

    if let Some((staking, spending)) = script.offline_staking_hashes() {
        return Solution {
            kind: ScriptKind::OfflineStaking,
            script_kind: ScriptKind::OfflineStaking,
            solutions: vec![staking.to_vec(), spending.to_vec()],
        };
    }

    if let Some((version, program)) = script.witness_program() {
        if version == 0 && program.len() == 20 {
            return Solution {
                kind: ScriptKind::WitnessV0KeyHash,
                script_kind: ScriptKind::WitnessV0KeyHash,
                solutions: vec![program.to_vec()],
            };
        }
        if version == 0 && program.len() == 32 {
            return Solution {
                kind: ScriptKind::WitnessV0ScriptHash,
                script_kind: ScriptKind::WitnessV0ScriptHash,
                solutions: vec![program.to_vec()],
            };
        }
        return nonstandard();
    }

    // Provably prunable, data-carrying output.
    if script.is_op_return() && script.is_push_only_from(1) {
        return Solution {
            kind: ScriptKind::NullData,
            script_kind: ScriptKind::NullData,
            solutions: Vec::new(),
        };
    }

    if let Some(solution) = match_templates(script) {
        return solution;
    }

    nonstandard()
}

fn nonstandard() -> Solution {
    Solution {
        kind: ScriptKind::NonStandard,
        script_kind: ScriptKind::NonStandard,
        solutions: Vec::new(),
    }
}

fn match_templates(script: &Script) -> Option<Solution> {
    let ins: Vec<Instruction<'_>> = script.instructions().collect::<Result<_, _>>().ok()?;

    // <pubkey> OP_CHECKSIG
    if let [Instruction::PushBytes(key), Instruction::Op(OP_CHECKSIG)] = ins.as_slice() {
        if (33..=65).contains(&key.len()) {
            return Some(Solution {
                kind: ScriptKind::PubKey,
                script_kind: ScriptKind::PubKey,
                solutions: vec![key.to_vec()],
            });
        }
    }

    // OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
    if let [Instruction::Op(OP_DUP), Instruction::Op(OP_HASH160), Instruction::PushBytes(hash), Instruction::Op(OP_EQUALVERIFY), Instruction::Op(OP_CHECKSIG)] =
        ins.as_slice()
    {
        if hash.len() == 20 {
            return Some(Solution {
                kind: ScriptKind::PubkeyHash,
                script_kind: ScriptKind::PubkeyHash,
                solutions: vec![hash.to_vec()],
            });
        }
    }

    // <n> OP_CHECKLOCKTIMEVERIFY OP_DROP OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
    if let [lock, Instruction::Op(OP_CHECKLOCKTIMEVERIFY), Instruction::Op(OP_DROP), Instruction::Op(OP_DUP), Instruction::Op(OP_HASH160), Instruction::PushBytes(hash), Instruction::Op(OP_EQUALVERIFY), Instruction::Op(OP_CHECKSIG)] =
        ins.as_slice()
    {
        if hash.len() == 20 {
            let lock_bytes = match lock {
                Instruction::PushBytes(bytes) => bytes.to_vec(),
                Instruction::Op(op) => vec![decode_op_n(*op)?],
            };
            return Some(Solution {
                kind: ScriptKind::Cltv,
                script_kind: ScriptKind::Cltv,
                solutions: vec![lock_bytes, hash.to_vec()],
            });
        }
    }

    // <m> <pubkey>.. <n> OP_CHECKMULTISIG
    if ins.len() >= 4 {
        if let (Instruction::Op(m_op), Instruction::Op(n_op), Instruction::Op(OP_CHECKMULTISIG)) =
            (ins[0], ins[ins.len() - 2], ins[ins.len() - 1])
        {
            let m = decode_op_n(m_op)?;
            let n = decode_op_n(n_op)?;
            let keys = &ins[1..ins.len() - 2];
            let mut solutions = vec![vec![m]];
            for key in keys {
                match key {
                    Instruction::PushBytes(bytes) if (33..=65).contains(&bytes.len()) => {
                        solutions.push(bytes.to_vec())
                    }
                    _ => return None,
                }
            }
            solutions.push(vec![n]);
            if m < 1 || n < 1 || m > n || keys.len() != n as usize {
                return None;
            }
            return Some(Solution {
                kind: ScriptKind::Multisig,
                script_kind: ScriptKind::Multisig,
                solutions,
            });
        }
    }

    None
}

/// Extract the spending destination of an output, if it has a single one.
pub fn extract_destination(script: &Script) -> Option<Destination> {
    let solved = solve(script);
    match solved.kind {
        ScriptKind::PubKey => Some(Destination::PubKey(solved.solutions[0].clone())),
        ScriptKind::PubkeyHash => Some(Destination::PubkeyHash(PubkeyHash::from_byte_array(
            to_20(&solved.solutions[0])?,
        ))),
        ScriptKind::ScriptHash => Some(Destination::ScriptHash(ScriptHash::from_byte_array(
            to_20(&solved.solutions[0])?,
        ))),
        ScriptKind::NewToken | ScriptKind::TransferToken | ScriptKind::ReissueToken => {
            let hash = to_20(&solved.solutions[0])?;
            if solved.script_kind == ScriptKind::ScriptHash {
                Some(Destination::ScriptHash(ScriptHash::from_byte_array(hash)))
            } else {
                Some(Destination::PubkeyHash(PubkeyHash::from_byte_array(hash)))
            }
        }
        ScriptKind::WitnessV0KeyHash => {
            Some(Destination::WitnessV0KeyHash(to_20(&solved.solutions[0])?))
        }
        ScriptKind::WitnessV0ScriptHash => {
            Some(Destination::WitnessV0ScriptHash(to_32(&solved.solutions[0])?))
        }
        ScriptKind::Cltv => Some(Destination::Cltv {
            lock_time: scriptnum_decode(&solved.solutions[0])?,
            key_hash: PubkeyHash::from_byte_array(to_20(&solved.solutions[1])?),
        }),
        ScriptKind::OfflineStaking => Some(Destination::OfflineStake {
            staking: PubkeyHash::from_byte_array(to_20(&solved.solutions[0])?),
            spending: PubkeyHash::from_byte_array(to_20(&solved.solutions[1])?),
        }),
        // Multisig spends to more than one destination; data to none.
        _ => None,
    }
}

/// Build the locking script for a destination. A positive `lock_time` above
/// 255 prefixes the script with a CLTV guard.
pub fn script_for_destination(dest: &Destination, lock_time: i64) -> Script {
    let mut inner = Script::new();
    match dest {
        Destination::Null => {}
        Destination::PubKey(key) => {
            inner.push_slice(key).push_opcode(OP_CHECKSIG);
        }
        Destination::PubkeyHash(hash) | Destination::Cltv { key_hash: hash, .. } => {
            push_p2pkh(&mut inner, hash.to_byte_array());
        }
        Destination::ScriptHash(hash) => {
            inner
                .push_opcode(OP_HASH160)
                .push_slice(&hash.to_byte_array())
                .push_opcode(OP_EQUAL);
        }
        Destination::WitnessV0KeyHash(program) => {
            inner.push_opcode(OP_0).push_slice(program);
        }
        Destination::WitnessV0ScriptHash(program) => {
            inner.push_opcode(OP_0).push_slice(program);
        }
        Destination::OfflineStake { staking, spending } => {
            inner.push_opcode(OP_OFFLINE_STAKE).push_opcode(OP_IF);
            push_p2pkh(&mut inner, staking.to_byte_array());
            inner.push_opcode(OP_ELSE);
            push_p2pkh(&mut inner, spending.to_byte_array());
            inner.push_opcode(OP_ENDIF);
        }
    }

    if lock_time > 255 {
        let mut guarded = Script::new();
        guarded.push_int(lock_time);
        guarded.push_opcode(OP_CHECKLOCKTIMEVERIFY);
        guarded.push_opcode(OP_DROP);
        guarded.extend(&inner);
        return guarded;
    }
    inner
}

fn push_p2pkh(script: &mut Script, hash: [u8; 20]) {
    script
        .push_opcode(OP_DUP)
        .push_opcode(OP_HASH160)
        .push_slice(&hash)
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG);
}

fn to_20(bytes: &[u8]) -> Option<[u8; 20]> {
    bytes.try_into().ok()
}

fn to_32(bytes: &[u8]) -> Option<[u8; 32]> {
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{TOKEN_MARKER, TOKEN_TRANSFER};

    fn p2pkh_script(hash: [u8; 20]) -> Script {
        script_for_destination(&Destination::PubkeyHash(PubkeyHash::from_byte_array(hash)), 0)
    }

    #[test]
    fn solver_precedence_p2sh_before_templates() {
        let script =
            script_for_destination(&Destination::ScriptHash(ScriptHash::from_byte_array([1; 20])), 0);
        let solved = solve(&script);
        assert_eq!(solved.kind, ScriptKind::ScriptHash);
        assert_eq!(solved.solutions[0], vec![1u8; 20]);
    }

    #[test]
    fn solver_recognizes_token_script() {
        let mut script = p2pkh_script([7; 20]);
        let mut payload = TOKEN_MARKER.to_vec();
        payload.push(TOKEN_TRANSFER);
        payload.extend_from_slice(&[0; 8]);
        script.push_opcode(OP_TOKEN_SCRIPT);
        script.push_slice(&payload);
        script.push_opcode(OP_DROP);

        let solved = solve(&script);
        assert_eq!(solved.kind, ScriptKind::TransferToken);
        assert_eq!(solved.script_kind, ScriptKind::PubkeyHash);
        assert_eq!(solved.solutions[0], vec![7u8; 20]);

        // The destination stays extractable in the ordinary way.
        assert_eq!(
            extract_destination(&script),
            Some(Destination::PubkeyHash(PubkeyHash::from_byte_array([7; 20])))
        );
    }

    #[test]
    fn solver_templates() {
        let solved = solve(&p2pkh_script([3; 20]));
        assert_eq!(solved.kind, ScriptKind::PubkeyHash);

        let mut pubkey = Script::new();
        pubkey.push_slice(&[2u8; 33]);
        pubkey.push_opcode(OP_CHECKSIG);
        assert_eq!(solve(&pubkey).kind, ScriptKind::PubKey);

        let mut data = Script::new();
        data.push_opcode(OP_RETURN);
        data.push_slice(b"memo");
        assert_eq!(solve(&data).kind, ScriptKind::NullData);
    }

    #[test]
    fn solver_multisig() {
        let mut script = Script::new();
        script.push_int(1);
        script.push_slice(&[2u8; 33]);
        script.push_slice(&[3u8; 33]);
        script.push_int(2);
        script.push_opcode(OP_CHECKMULTISIG);
        let solved = solve(&script);
        assert_eq!(solved.kind, ScriptKind::Multisig);
        assert_eq!(solved.solutions.first().unwrap(), &vec![1u8]);
        assert_eq!(solved.solutions.last().unwrap(), &vec![2u8]);
    }

    #[test]
    fn solver_rejects_bad_multisig() {
        // m > n must not match.
        let mut script = Script::new();
        script.push_int(2);
        script.push_slice(&[2u8; 33]);
        script.push_int(1);
        script.push_opcode(OP_CHECKMULTISIG);
        assert_eq!(solve(&script).kind, ScriptKind::NonStandard);
    }

    #[test]
    fn cltv_destination_round_trip() {
        let dest = Destination::Cltv {
            lock_time: 800_000,
            key_hash: PubkeyHash::from_byte_array([9; 20]),
        };
        let script = script_for_destination(&dest, 800_000);
        let solved = solve(&script);
        assert_eq!(solved.kind, ScriptKind::Cltv);
        assert_eq!(extract_destination(&script), Some(dest));
        assert_eq!(script.cltv_lock_time(), 800_000);
    }

    #[test]
    fn offline_stake_destination_round_trip() {
        let dest = Destination::OfflineStake {
            staking: PubkeyHash::from_byte_array([1; 20]),
            spending: PubkeyHash::from_byte_array([2; 20]),
        };
        let script = script_for_destination(&dest, 0);
        assert_eq!(solve(&script).kind, ScriptKind::OfflineStaking);
        assert_eq!(extract_destination(&script), Some(dest));
    }

    #[test]
    fn witness_destinations() {
        let keyhash = Destination::WitnessV0KeyHash([8; 20]);
        let script = script_for_destination(&keyhash, 0);
        assert_eq!(solve(&script).kind, ScriptKind::WitnessV0KeyHash);
        assert_eq!(extract_destination(&script), Some(keyhash));

        let scripthash = Destination::WitnessV0ScriptHash([8; 32]);
        let script = script_for_destination(&scripthash, 0);
        assert_eq!(solve(&script).kind, ScriptKind::WitnessV0ScriptHash);
    }
}
