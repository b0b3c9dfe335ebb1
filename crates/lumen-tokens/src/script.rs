//! Constructing and parsing token-carrying output scripts.
//!
//! A token script is an ordinary destination script followed by the reserved
//! marker opcode, one payload push, and `OP_DROP`, so every token output
//! still "spends to D" in the usual way.

use crate::types::{IssueToken, ReissueToken, TokenError, TokenTransfer, OWNER_TOKEN_AMOUNT};
use lumen_primitives::encode::{deserialize, serialize, Encodable};
use lumen_primitives::hashes::{PubkeyHash, ScriptHash};
use lumen_primitives::opcodes::{OP_DROP, OP_TOKEN_SCRIPT};
use lumen_primitives::script::{
    TokenScriptOp, TokenScriptParts, TOKEN_ISSUE, TOKEN_MARKER, TOKEN_OWNER, TOKEN_REISSUE,
    TOKEN_TRANSFER,
};
use lumen_primitives::{encode_destination, AddressPrefixes, Amount, Destination, Script};

fn append_payload(script: &mut Script, op_byte: u8, record: &impl Encodable) {
    let mut payload = TOKEN_MARKER.to_vec();
    payload.push(op_byte);
    payload.extend_from_slice(&serialize(record));
    script.push_opcode(OP_TOKEN_SCRIPT);
    script.push_slice(&payload);
    script.push_opcode(OP_DROP);
}

/// Append an issuance payload to a destination script.
pub fn construct_issue_script(dest_script: &Script, token: &IssueToken) -> Script {
    let mut script = dest_script.clone();
    append_payload(&mut script, TOKEN_ISSUE, token);
    script
}

/// Append the owner-token payload (the bare owner name string).
pub fn construct_owner_script(dest_script: &Script, owner_name: &str) -> Script {
    let mut script = dest_script.clone();
    append_payload(&mut script, TOKEN_OWNER, &owner_name.to_string());
    script
}

pub fn construct_transfer_script(dest_script: &Script, transfer: &TokenTransfer) -> Script {
    let mut script = dest_script.clone();
    append_payload(&mut script, TOKEN_TRANSFER, transfer);
    script
}

pub fn construct_reissue_script(dest_script: &Script, reissue: &ReissueToken) -> Script {
    let mut script = dest_script.clone();
    append_payload(&mut script, TOKEN_REISSUE, reissue);
    script
}

fn parts_of(script: &Script, want: TokenScriptOp) -> Result<TokenScriptParts<'_>, TokenError> {
    match script.token_parts() {
        Some(parts) if parts.op == want => Ok(parts),
        _ => Err(TokenError::ScriptParse),
    }
}

fn address_of(parts: &TokenScriptParts<'_>, prefixes: AddressPrefixes) -> Result<String, TokenError> {
    let dest = if parts.dest_is_script_hash {
        Destination::ScriptHash(ScriptHash::from_byte_array(parts.dest_hash))
    } else {
        Destination::PubkeyHash(PubkeyHash::from_byte_array(parts.dest_hash))
    };
    encode_destination(&dest, prefixes).map_err(|_| TokenError::NoDestination)
}

/// Parse an issuance script into its record and receiving address.
pub fn token_from_script(
    script: &Script,
    prefixes: AddressPrefixes,
) -> Result<(IssueToken, String), TokenError> {
    let parts = parts_of(script, TokenScriptOp::Issue)?;
    let token = deserialize(parts.payload).map_err(|_| TokenError::ScriptParse)?;
    Ok((token, address_of(&parts, prefixes)?))
}

/// Parse an owner-token script into the owner name and receiving address.
pub fn owner_token_from_script(
    script: &Script,
    prefixes: AddressPrefixes,
) -> Result<(String, String), TokenError> {
    let parts = parts_of(script, TokenScriptOp::Owner)?;
    let name: String = deserialize(parts.payload).map_err(|_| TokenError::ScriptParse)?;
    Ok((name, address_of(&parts, prefixes)?))
}

pub fn transfer_token_from_script(
    script: &Script,
    prefixes: AddressPrefixes,
) -> Result<(TokenTransfer, String), TokenError> {
    let parts = parts_of(script, TokenScriptOp::Transfer)?;
    let transfer = deserialize(parts.payload).map_err(|_| TokenError::ScriptParse)?;
    Ok((transfer, address_of(&parts, prefixes)?))
}

pub fn reissue_token_from_script(
    script: &Script,
    prefixes: AddressPrefixes,
) -> Result<(ReissueToken, String), TokenError> {
    let parts = parts_of(script, TokenScriptOp::Reissue)?;
    let reissue = deserialize(parts.payload).map_err(|_| TokenError::ScriptParse)?;
    Ok((reissue, address_of(&parts, prefixes)?))
}

/// Uniform view of any token output: name, quantity, lock time, address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOutput {
    pub op: TokenScriptOp,
    pub name: String,
    pub amount: Amount,
    pub token_lock_time: u32,
    pub address: String,
}

/// Decompose any token-carrying script; `None` for plain outputs.
pub fn token_output_from_script(
    script: &Script,
    prefixes: AddressPrefixes,
) -> Result<Option<TokenOutput>, TokenError> {
    let Some(parts) = script.token_parts() else {
        return Ok(None);
    };
    let output = match parts.op {
        TokenScriptOp::Issue => {
            let (token, address) = token_from_script(script, prefixes)?;
            TokenOutput {
                op: TokenScriptOp::Issue,
                name: token.name,
                amount: token.amount,
                token_lock_time: 0,
                address,
            }
        }
        TokenScriptOp::Owner => {
            let (name, address) = owner_token_from_script(script, prefixes)?;
            TokenOutput {
                op: TokenScriptOp::Owner,
                name,
                amount: Amount::from_sat(OWNER_TOKEN_AMOUNT),
                token_lock_time: 0,
                address,
            }
        }
        TokenScriptOp::Transfer => {
            let (transfer, address) = transfer_token_from_script(script, prefixes)?;
            TokenOutput {
                op: TokenScriptOp::Transfer,
                name: transfer.name,
                amount: transfer.amount,
                token_lock_time: transfer.token_lock_time,
                address,
            }
        }
        TokenScriptOp::Reissue => {
            let (reissue, address) = reissue_token_from_script(script, prefixes)?;
            TokenOutput {
                op: TokenScriptOp::Reissue,
                name: reissue.name,
                amount: reissue.amount,
                token_lock_time: 0,
                address,
            }
        }
    };
    Ok(Some(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_primitives::address::TESTNET_PREFIXES;
    use lumen_primitives::amount::COIN;
    use lumen_primitives::{decode_destination, script_for_destination};

    const TEST_ADDRESS: &str = "mfe7MqgYZgBuXzrT2QTFqZwBXwRDqagHTp";

    fn dest_script() -> Script {
        let dest = decode_destination(TEST_ADDRESS, TESTNET_PREFIXES).unwrap();
        script_for_destination(&dest, 0)
    }

    #[test]
    fn owner_token_serialization() {
        // Issue SERIALIZATION and read the owner script back.
        let token = IssueToken::new("SERIALIZATION", Amount::from_sat(COIN));
        let script = construct_owner_script(&dest_script(), "SERIALIZATION!");

        let (owner_name, address) = owner_token_from_script(&script, TESTNET_PREFIXES).unwrap();
        assert_eq!(owner_name, format!("{}!", token.name));
        assert_eq!(address, TEST_ADDRESS);
    }

    #[test]
    fn issue_round_trip() {
        let mut token = IssueToken::new("COPPER", Amount::from_sat(1_000 * COIN));
        token.units = 2;
        let script = construct_issue_script(&dest_script(), &token);
        assert!(script.is_token_script());

        let (decoded, address) = token_from_script(&script, TESTNET_PREFIXES).unwrap();
        assert_eq!(decoded, token);
        assert_eq!(address, TEST_ADDRESS);

        // A transfer extractor must refuse an issue script.
        assert_eq!(
            transfer_token_from_script(&script, TESTNET_PREFIXES).unwrap_err(),
            TokenError::ScriptParse
        );
    }

    #[test]
    fn transfer_round_trip_keeps_lock_time() {
        let transfer = TokenTransfer::new("COPPER", Amount::from_sat(25 * COIN), 900_000);
        let script = construct_transfer_script(&dest_script(), &transfer);
        let (decoded, _) = transfer_token_from_script(&script, TESTNET_PREFIXES).unwrap();
        assert_eq!(decoded.token_lock_time, 900_000);
    }

    #[test]
    fn reissue_round_trip() {
        let reissue = ReissueToken {
            name: "COPPER".to_string(),
            amount: Amount::from_sat(10 * COIN),
            units: -1,
            reissuable: true,
        };
        let script = construct_reissue_script(&dest_script(), &reissue);
        let (decoded, _) = reissue_token_from_script(&script, TESTNET_PREFIXES).unwrap();
        assert_eq!(decoded, reissue);
    }

    #[test]
    fn unified_view_covers_all_ops() {
        let issue = IssueToken::new("COPPER", Amount::from_sat(COIN));
        let script = construct_issue_script(&dest_script(), &issue);
        let output = token_output_from_script(&script, TESTNET_PREFIXES)
            .unwrap()
            .unwrap();
        assert_eq!(output.op, TokenScriptOp::Issue);
        assert_eq!(output.name, "COPPER");

        let owner = construct_owner_script(&dest_script(), "COPPER!");
        let output = token_output_from_script(&owner, TESTNET_PREFIXES)
            .unwrap()
            .unwrap();
        assert_eq!(output.amount, Amount::from_sat(OWNER_TOKEN_AMOUNT));

        assert_eq!(
            token_output_from_script(&dest_script(), TESTNET_PREFIXES).unwrap(),
            None
        );
    }
}
