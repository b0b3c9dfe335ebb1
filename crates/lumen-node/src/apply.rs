//! Per-block state transitions: token accounting, governance actions, and
//! the checks that tie issuance to the fee and ownership rules.

use crate::error::NodeError;
use lumen_governance::{CostType, GovernanceStore};
use lumen_primitives::encode::deserialize;
use lumen_primitives::opcodes::OP_RETURN;
use lumen_primitives::script::{Instruction, TokenScriptOp};
use lumen_primitives::{Amount, OutPoint, Script, Transaction, TxOut};
use lumen_tokens::{
    owner_token_name, parent_name, token_output_from_script, TokenNameKind, TokensCache,
    TokensDb,
};

/// Read access to the outputs a block spends. The chain's UTXO storage is
/// an external collaborator; verification only needs lookups.
pub trait UtxoProvider {
    fn get(&self, outpoint: &OutPoint) -> Option<TxOut>;
}

impl UtxoProvider for std::collections::HashMap<OutPoint, TxOut> {
    fn get(&self, outpoint: &OutPoint) -> Option<TxOut> {
        std::collections::HashMap::get(self, outpoint).cloned()
    }
}

// Governance actions ride in provably-unspendable outputs:
// `OP_RETURN <marker 'G' 'A', action byte, payload>`.
const GOVERNANCE_MARKER: u8 = b'G';
const GOVERNANCE_ACTION: u8 = b'A';
const ACTION_FREEZE: u8 = b'F';
const ACTION_UNFREEZE: u8 = b'U';
const ACTION_COST: u8 = b'C';
const ACTION_FEE: u8 = b'f';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernanceAction {
    Freeze(Script),
    Unfreeze(Script),
    UpdateCost { cost_type: CostType, amount: Amount },
    UpdateFeeScript(Script),
}

/// Parse a governance action output, if this script is one.
pub fn parse_governance_action(script: &Script) -> Option<GovernanceAction> {
    if !script.is_op_return() {
        return None;
    }
    let mut instructions = script.instructions();
    let Some(Ok(Instruction::Op(OP_RETURN))) = instructions.next() else {
        return None;
    };
    let Some(Ok(Instruction::PushBytes(payload))) = instructions.next() else {
        return None;
    };
    if payload.len() < 3 || payload[0] != GOVERNANCE_MARKER || payload[1] != GOVERNANCE_ACTION {
        return None;
    }
    let body = &payload[3..];
    match payload[2] {
        ACTION_FREEZE => Some(GovernanceAction::Freeze(Script::from_bytes(body.to_vec()))),
        ACTION_UNFREEZE => Some(GovernanceAction::Unfreeze(Script::from_bytes(
            body.to_vec(),
        ))),
        ACTION_COST => {
            let (raw_type, amount) = deserialize::<(i32, Amount)>(body).ok()?;
            let cost_type = CostType::from_i32(raw_type)?;
            Some(GovernanceAction::UpdateCost { cost_type, amount })
        }
        ACTION_FEE => Some(GovernanceAction::UpdateFeeScript(Script::from_bytes(
            body.to_vec(),
        ))),
        _ => None,
    }
}

/// Serialize a governance action into its carrier script.
pub fn governance_action_script(action: &GovernanceAction) -> Script {
    let mut payload = vec![GOVERNANCE_MARKER, GOVERNANCE_ACTION];
    match action {
        GovernanceAction::Freeze(script) => {
            payload.push(ACTION_FREEZE);
            payload.extend_from_slice(script.as_bytes());
        }
        GovernanceAction::Unfreeze(script) => {
            payload.push(ACTION_UNFREEZE);
            payload.extend_from_slice(script.as_bytes());
        }
        GovernanceAction::UpdateCost { cost_type, amount } => {
            payload.push(ACTION_COST);
            payload.extend_from_slice(&lumen_primitives::serialize(&(
                *cost_type as i32,
                *amount,
            )));
        }
        GovernanceAction::UpdateFeeScript(script) => {
            payload.push(ACTION_FEE);
            payload.extend_from_slice(script.as_bytes());
        }
    }
    let mut script = Script::new();
    script.push_opcode(OP_RETURN);
    script.push_slice(&payload);
    script
}

/// Governance actions of a block, in output order.
pub fn collect_governance_actions(block_txs: &[Transaction]) -> Vec<GovernanceAction> {
    let mut actions = Vec::new();
    for tx in block_txs {
        for output in &tx.outputs {
            if let Some(action) = parse_governance_action(&output.script_pubkey) {
                actions.push(action);
            }
        }
    }
    actions
}

pub fn apply_governance_actions(
    governance: &GovernanceStore,
    actions: &[GovernanceAction],
    height: i32,
) -> Result<(), NodeError> {
    for action in actions {
        match action {
            GovernanceAction::Freeze(script) => governance.freeze_script(script)?,
            GovernanceAction::Unfreeze(script) => governance.unfreeze_script(script)?,
            GovernanceAction::UpdateCost { cost_type, amount } => {
                governance.update_cost(*cost_type, height, *amount)?
            }
            GovernanceAction::UpdateFeeScript(script) => {
                governance.update_fee_script(script, height)?
            }
        }
    }
    Ok(())
}

/// Apply the single-step inverses, in reverse order of application.
pub fn revert_governance_actions(
    governance: &GovernanceStore,
    actions: &[GovernanceAction],
    height: i32,
) -> Result<(), NodeError> {
    for action in actions.iter().rev() {
        match action {
            GovernanceAction::Freeze(script) => governance.revert_freeze_script(script)?,
            GovernanceAction::Unfreeze(script) => governance.revert_unfreeze_script(script)?,
            GovernanceAction::UpdateCost { cost_type, .. } => {
                governance.revert_update_cost(*cost_type, height)?
            }
            GovernanceAction::UpdateFeeScript(_) => {
                governance.revert_update_fee_script(height)?
            }
        }
    }
    Ok(())
}

/// The burn an issuance owes, by name kind.
fn issue_cost(governance: &GovernanceStore, kind: TokenNameKind) -> Result<Amount, NodeError> {
    let cost_type = match kind {
        TokenNameKind::Root => CostType::Root,
        TokenNameKind::Sub => CostType::Sub,
        TokenNameKind::Unique => CostType::Unique,
        TokenNameKind::Username => CostType::Username,
        TokenNameKind::Owner => return Err(NodeError::MalformedTokenTx("owner is not issuable")),
    };
    Ok(governance.get_cost(cost_type)?)
}

/// Check that `tx` pays `amount` to the current fee script.
fn has_burn_output(tx: &Transaction, fee_script: &Script, amount: Amount) -> bool {
    tx.outputs
        .iter()
        .any(|out| out.value == amount && out.script_pubkey == *fee_script)
}

/// Check that some input of `tx` spends the owner token of `name`.
fn spends_owner_token<U: UtxoProvider>(
    tx: &Transaction,
    utxos: &U,
    cache: &TokensCache,
    name: &str,
) -> bool {
    let owner = owner_token_name(name);
    tx.inputs.iter().any(|input| {
        utxos
            .get(&input.prevout)
            .and_then(|out| {
                token_output_from_script(&out.script_pubkey, cache.address_prefixes()).ok()
            })
            .flatten()
            .map(|token_out| token_out.name == owner)
            .unwrap_or(false)
    })
}

/// Apply one transaction's token effects to the cache. Returns the reissue
/// undo records the transaction produced.
pub fn apply_token_tx<U: UtxoProvider>(
    cache: &mut TokensCache,
    db: &TokensDb,
    governance: &GovernanceStore,
    tx: &Transaction,
    utxos: &U,
    height: u32,
    median_time: u32,
    block_hash: lumen_primitives::BlockHash,
) -> Result<Vec<lumen_tokens::ReissueUndo>, NodeError> {
    let prefixes = cache.address_prefixes();

    // Inputs first: spending moves balances away from the prior holders.
    if !tx.is_coinbase() {
        for input in &tx.inputs {
            let Some(spent) = utxos.get(&input.prevout) else {
                // Plain value inputs are not the token layer's concern;
                // a missing lookup only matters if the tx claims tokens.
                continue;
            };
            cache.try_spend_coin(db, input.prevout, &spent, height, median_time)?;
        }
    }

    let mut undo_records = Vec::new();
    let fee_script = governance.get_fee_script()?;

    for (vout, output) in tx.outputs.iter().enumerate() {
        let outpoint = OutPoint::new(tx.txid(), vout as u32);
        let Some(token_output) = token_output_from_script(&output.script_pubkey, prefixes)
            .map_err(lumen_tokens::CacheError::Token)?
        else {
            continue;
        };
        match token_output.op {
            TokenScriptOp::Issue => {
                let (token, address) =
                    lumen_tokens::token_from_script(&output.script_pubkey, prefixes)
                        .map_err(lumen_tokens::CacheError::Token)?;
                let kind = token
                    .check_valid()
                    .map_err(lumen_tokens::CacheError::Token)?;

                let cost = issue_cost(governance, kind)?;
                if !has_burn_output(tx, &fee_script, cost) {
                    return Err(NodeError::MissingIssuanceBurn {
                        name: token.name,
                        required: cost,
                    });
                }
                // Sub and unique issuance must prove control of the parent.
                if matches!(kind, TokenNameKind::Sub | TokenNameKind::Unique) {
                    let parent = parent_name(&token.name)
                        .ok_or(NodeError::MalformedTokenTx("issue without a parent name"))?;
                    if !spends_owner_token(tx, utxos, cache, &parent) {
                        return Err(NodeError::OwnerTokenNotSpent { name: token.name });
                    }
                }
                cache.add_new_token(db, token, &address, height as i32, block_hash)?;
            }
            TokenScriptOp::Owner => {
                let (owner_name, address) =
                    lumen_tokens::owner_token_from_script(&output.script_pubkey, prefixes)
                        .map_err(lumen_tokens::CacheError::Token)?;
                cache.add_owner_token(&owner_name, &address)?;
            }
            TokenScriptOp::Transfer => {
                let (transfer, address) =
                    lumen_tokens::transfer_token_from_script(&output.script_pubkey, prefixes)
                        .map_err(lumen_tokens::CacheError::Token)?;
                cache.add_transfer_token(db, transfer, &address, outpoint)?;
            }
            TokenScriptOp::Reissue => {
                let (reissue, address) =
                    lumen_tokens::reissue_token_from_script(&output.script_pubkey, prefixes)
                        .map_err(lumen_tokens::CacheError::Token)?;
                let reissue_cost = governance.get_cost(CostType::Reissue)?;
                if !has_burn_output(tx, &fee_script, reissue_cost) {
                    return Err(NodeError::MissingIssuanceBurn {
                        name: reissue.name,
                        required: reissue_cost,
                    });
                }
                if !spends_owner_token(tx, utxos, cache, &reissue.name) {
                    return Err(NodeError::OwnerTokenNotSpent {
                        name: reissue.name,
                    });
                }
                let undo = cache.add_reissue_token(db, reissue, &address, outpoint)?;
                undo_records.push(undo);
            }
        }
    }
    Ok(undo_records)
}

/// Undo one transaction's token effects; outputs unwind before inputs.
pub fn revert_token_tx<U: UtxoProvider>(
    cache: &mut TokensCache,
    db: &TokensDb,
    tx: &Transaction,
    utxos: &U,
    undo_records: &[lumen_tokens::ReissueUndo],
) -> Result<(), NodeError> {
    let prefixes = cache.address_prefixes();

    for (vout, output) in tx.outputs.iter().enumerate().rev() {
        let outpoint = OutPoint::new(tx.txid(), vout as u32);
        let Some(token_output) = token_output_from_script(&output.script_pubkey, prefixes)
            .map_err(lumen_tokens::CacheError::Token)?
        else {
            continue;
        };
        match token_output.op {
            TokenScriptOp::Issue => {
                let (token, address) =
                    lumen_tokens::token_from_script(&output.script_pubkey, prefixes)
                        .map_err(lumen_tokens::CacheError::Token)?;
                cache.remove_new_token(db, token, &address)?;
            }
            TokenScriptOp::Owner => {
                let (owner_name, address) =
                    lumen_tokens::owner_token_from_script(&output.script_pubkey, prefixes)
                        .map_err(lumen_tokens::CacheError::Token)?;
                cache.remove_owner_token(&owner_name, &address)?;
            }
            TokenScriptOp::Transfer => {
                let (transfer, address) =
                    lumen_tokens::transfer_token_from_script(&output.script_pubkey, prefixes)
                        .map_err(lumen_tokens::CacheError::Token)?;
                cache.remove_transfer(db, transfer, &address, outpoint)?;
            }
            TokenScriptOp::Reissue => {
                let (reissue, address) =
                    lumen_tokens::reissue_token_from_script(&output.script_pubkey, prefixes)
                        .map_err(lumen_tokens::CacheError::Token)?;
                cache.remove_reissue_token(db, reissue, &address, outpoint, undo_records)?;
            }
        }
    }

    if !tx.is_coinbase() {
        for input in tx.inputs.iter().rev() {
            let Some(spent) = utxos.get(&input.prevout) else {
                continue;
            };
            cache.undo_token_coin(db, &spent, input.prevout)?;
        }
    }
    Ok(())
}
