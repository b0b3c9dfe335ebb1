//! The `lumen` command surface: token verbs over an opened node context.
//!
//! Construction verbs build the unsigned transaction and print it; funding
//! and signing belong to the wallet layer outside the core.

use crate::context::Context;
use crate::error::NodeError;
use clap::{Parser, Subcommand, ValueEnum};
use lumen_consensus::ChainParams;
use lumen_governance::CostType;
use lumen_primitives::{
    decode_destination, script_for_destination, serialize, Amount, Script, Transaction, TxOut,
};
use lumen_tokens::{
    construct_issue_script, construct_owner_script, construct_reissue_script,
    construct_transfer_script, owner_token_name, token_name_kind, unique_token_name,
    IssueToken, ReissueToken, TokenNameKind, TokenTransfer,
};
use serde_json::json;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "lumen", about = "Lumen node token interface")]
pub struct Cli {
    /// Data directory holding the token and governance databases.
    #[arg(long, default_value = ".lumen")]
    pub datadir: PathBuf,

    #[arg(long, value_enum, default_value = "mainnet")]
    pub network: NetworkArg,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum NetworkArg {
    Mainnet,
    Testnet,
    Regtest,
}

impl NetworkArg {
    pub fn params(self) -> ChainParams {
        match self {
            NetworkArg::Mainnet => ChainParams::mainnet(),
            NetworkArg::Testnet => ChainParams::testnet(),
            NetworkArg::Regtest => ChainParams::regtest(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Construct a root or sub token issuance.
    Issue {
        name: String,
        /// Quantity in base units.
        amount: i64,
        #[arg(long, default_value_t = 0)]
        units: i8,
        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        reissuable: bool,
        /// Receiving address.
        to: String,
    },
    /// Construct unique token issuances under a root.
    Issueunique {
        root: String,
        /// One tag per unique token.
        tags: Vec<String>,
        #[arg(long)]
        to: String,
    },
    /// Construct a reissue of an existing token.
    Reissue {
        name: String,
        amount: i64,
        #[arg(long, default_value_t = -1)]
        units: i8,
        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        reissuable: bool,
        to: String,
    },
    /// Construct a single transfer.
    Transfer {
        name: String,
        amount: i64,
        to: String,
        #[arg(long, default_value_t = 0)]
        locktime: u32,
    },
    /// Construct one transaction carrying several transfers of one token.
    Transfermany {
        name: String,
        /// `address=amount` pairs.
        outputs: Vec<String>,
    },
    /// Construct a transfer spending a specific address's balance.
    Transferfromaddress {
        name: String,
        from: String,
        amount: i64,
        to: String,
    },
    /// Balances of every token held by an address.
    Listmytokens {
        address: String,
        #[arg(long, default_value_t = false)]
        only_total: bool,
        #[arg(long, default_value_t = 100)]
        count: usize,
        #[arg(long, default_value_t = 0)]
        start: i64,
    },
    /// All known tokens, filtered by name.
    Listtokens {
        #[arg(default_value = "*")]
        filter: String,
        #[arg(long, default_value_t = 100)]
        count: usize,
        #[arg(long, default_value_t = 0)]
        start: i64,
    },
    /// Holders of one token.
    Listaddressesbytoken {
        name: String,
        #[arg(long, default_value_t = false)]
        only_total: bool,
        #[arg(long, default_value_t = 100)]
        count: usize,
        #[arg(long, default_value_t = 0)]
        start: i64,
    },
    /// Token balances of one address.
    Listtokenbalancesbyaddress {
        address: String,
        #[arg(long, default_value_t = false)]
        only_total: bool,
        #[arg(long, default_value_t = 100)]
        count: usize,
        #[arg(long, default_value_t = 0)]
        start: i64,
    },
    /// Metadata record of one token.
    Gettokendata { name: String },
    /// Metadata-cache statistics.
    Getcacheinfo,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("invalid argument: {0}")]
    BadArgument(String),

    #[error(transparent)]
    Node(#[from] NodeError),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::BadArgument(_) => 1,
            CliError::Node(err) => err.exit_code(),
        }
    }
}

impl From<lumen_governance::Error> for CliError {
    fn from(err: lumen_governance::Error) -> Self {
        CliError::Node(err.into())
    }
}

impl From<lumen_store::Error> for CliError {
    fn from(err: lumen_store::Error) -> Self {
        CliError::Node(err.into())
    }
}

impl From<lumen_tokens::CacheError> for CliError {
    fn from(err: lumen_tokens::CacheError) -> Self {
        CliError::Node(err.into())
    }
}

fn dest_script_of(address: &str, params: &ChainParams) -> Result<Script, CliError> {
    let dest = decode_destination(address, params.address_prefixes)
        .map_err(|err| CliError::BadArgument(format!("address '{address}': {err}")))?;
    Ok(script_for_destination(&dest, 0))
}

fn unsigned_tx_json(tx: &Transaction) -> serde_json::Value {
    json!({
        "txid": tx.txid().to_string(),
        "hex": hex::encode(serialize(tx)),
        "vout": tx.outputs.len(),
    })
}

/// Execute one command against the context; the result is printed as JSON.
pub fn run(cli: Cli) -> Result<serde_json::Value, CliError> {
    let params = cli.network.params();
    let context = Context::open(&cli.datadir, params.clone())?;

    match cli.command {
        Command::Issue {
            name,
            amount,
            units,
            reissuable,
            to,
        } => {
            let token = IssueToken {
                name: name.clone(),
                amount: Amount::from_sat(amount),
                units,
                reissuable,
            };
            let kind = token
                .check_valid()
                .map_err(|err| CliError::BadArgument(err.to_string()))?;
            let cost_type = match kind {
                TokenNameKind::Root => CostType::Root,
                TokenNameKind::Sub => CostType::Sub,
                TokenNameKind::Username => CostType::Username,
                _ => {
                    return Err(CliError::BadArgument(
                        "use issueunique for unique tokens".to_string(),
                    ))
                }
            };
            let dest = dest_script_of(&to, &params)?;
            let fee_script = context.governance().get_fee_script()?;
            let burn = context.governance().get_cost(cost_type)?;

            let mut tx = Transaction::default();
            tx.outputs.push(TxOut::new(burn, fee_script));
            if kind != TokenNameKind::Username {
                tx.outputs.push(TxOut::new(
                    Amount::ZERO,
                    construct_owner_script(&dest, &owner_token_name(&name)),
                ));
            }
            tx.outputs
                .push(TxOut::new(Amount::ZERO, construct_issue_script(&dest, &token)));
            Ok(unsigned_tx_json(&tx))
        }

        Command::Issueunique { root, tags, to } => {
            if tags.is_empty() {
                return Err(CliError::BadArgument("no tags given".to_string()));
            }
            let dest = dest_script_of(&to, &params)?;
            let fee_script = context.governance().get_fee_script()?;
            let burn = context.governance().get_cost(CostType::Unique)?;

            let mut tx = Transaction::default();
            let total_burn = burn
                .checked_mul(tags.len() as i64)
                .ok_or_else(|| CliError::BadArgument("burn amount overflow".to_string()))?;
            tx.outputs.push(TxOut::new(total_burn, fee_script));
            for tag in &tags {
                let name = unique_token_name(&root, tag).ok_or_else(|| {
                    CliError::BadArgument(format!("invalid unique tag '{tag}'"))
                })?;
                let token = IssueToken {
                    name,
                    amount: Amount::from_sat(lumen_tokens::types::UNIQUE_TOKEN_AMOUNT),
                    units: 0,
                    reissuable: false,
                };
                tx.outputs
                    .push(TxOut::new(Amount::ZERO, construct_issue_script(&dest, &token)));
            }
            Ok(unsigned_tx_json(&tx))
        }

        Command::Reissue {
            name,
            amount,
            units,
            reissuable,
            to,
        } => {
            let reissue = ReissueToken {
                name: name.clone(),
                amount: Amount::from_sat(amount),
                units,
                reissuable,
            };
            reissue
                .check_valid()
                .map_err(|err| CliError::BadArgument(err.to_string()))?;
            let dest = dest_script_of(&to, &params)?;
            let fee_script = context.governance().get_fee_script()?;
            let burn = context.governance().get_cost(CostType::Reissue)?;

            let mut tx = Transaction::default();
            tx.outputs.push(TxOut::new(burn, fee_script));
            // Owner token change back to the reissuer.
            tx.outputs.push(TxOut::new(
                Amount::ZERO,
                construct_transfer_script(
                    &dest,
                    &TokenTransfer::new(
                        owner_token_name(&name),
                        Amount::from_sat(lumen_tokens::types::OWNER_TOKEN_AMOUNT),
                        0,
                    ),
                ),
            ));
            tx.outputs.push(TxOut::new(
                Amount::ZERO,
                construct_reissue_script(&dest, &reissue),
            ));
            Ok(unsigned_tx_json(&tx))
        }

        Command::Transfer {
            name,
            amount,
            to,
            locktime,
        } => {
            token_name_kind(&name)
                .map_err(|err| CliError::BadArgument(err.to_string()))?;
            let dest = dest_script_of(&to, &params)?;
            let mut tx = Transaction::default();
            tx.outputs.push(TxOut::new(
                Amount::ZERO,
                construct_transfer_script(
                    &dest,
                    &TokenTransfer::new(name, Amount::from_sat(amount), locktime),
                ),
            ));
            Ok(unsigned_tx_json(&tx))
        }

        Command::Transfermany { name, outputs } => {
            token_name_kind(&name)
                .map_err(|err| CliError::BadArgument(err.to_string()))?;
            let mut tx = Transaction::default();
            for pair in &outputs {
                let (address, amount) = pair.split_once('=').ok_or_else(|| {
                    CliError::BadArgument(format!("expected address=amount, got '{pair}'"))
                })?;
                let amount: i64 = amount
                    .parse()
                    .map_err(|_| CliError::BadArgument(format!("bad amount in '{pair}'")))?;
                let dest = dest_script_of(address, &params)?;
                tx.outputs.push(TxOut::new(
                    Amount::ZERO,
                    construct_transfer_script(
                        &dest,
                        &TokenTransfer::new(name.clone(), Amount::from_sat(amount), 0),
                    ),
                ));
            }
            if tx.outputs.is_empty() {
                return Err(CliError::BadArgument("no outputs given".to_string()));
            }
            Ok(unsigned_tx_json(&tx))
        }

        Command::Transferfromaddress {
            name,
            from,
            amount,
            to,
        } => {
            let have = context.with_tokens(|cache, db| cache.get_balance(db, &name, &from));
            let have = have?;
            if have.to_sat() < amount {
                return Err(CliError::BadArgument(format!(
                    "address {from} holds {have} of '{name}', needs {amount}"
                )));
            }
            let dest = dest_script_of(&to, &params)?;
            let mut tx = Transaction::default();
            tx.outputs.push(TxOut::new(
                Amount::ZERO,
                construct_transfer_script(
                    &dest,
                    &TokenTransfer::new(name, Amount::from_sat(amount), 0),
                ),
            ));
            Ok(unsigned_tx_json(&tx))
        }

        Command::Listmytokens {
            address,
            only_total,
            count,
            start,
        }
        | Command::Listtokenbalancesbyaddress {
            address,
            only_total,
            count,
            start,
        } => {
            let (balances, total) =
                context
                    .tokens_db()
                    .address_dir(&address, only_total, count, start)?;
            Ok(json!({
                "address": address,
                "total": total,
                "balances": balances
                    .into_iter()
                    .map(|(name, amount)| json!({"token": name, "amount": amount.to_sat()}))
                    .collect::<Vec<_>>(),
            }))
        }

        Command::Listtokens {
            filter,
            count,
            start,
        } => {
            let (tokens, total) = context.tokens_db().token_dir(&filter, count, start)?;
            Ok(json!({
                "total": total,
                "tokens": tokens
                    .into_iter()
                    .map(|m| json!({
                        "name": m.token.name,
                        "amount": m.token.amount.to_sat(),
                        "units": m.token.units,
                        "reissuable": m.token.reissuable,
                        "height": m.height,
                    }))
                    .collect::<Vec<_>>(),
            }))
        }

        Command::Listaddressesbytoken {
            name,
            only_total,
            count,
            start,
        } => {
            let (holders, total) =
                context
                    .tokens_db()
                    .token_address_dir(&name, only_total, count, start)?;
            Ok(json!({
                "token": name,
                "total": total,
                "holders": holders
                    .into_iter()
                    .map(|(address, amount)| json!({"address": address, "amount": amount.to_sat()}))
                    .collect::<Vec<_>>(),
            }))
        }

        Command::Gettokendata { name } => {
            let metadata = context.with_tokens(|cache, db| cache.get_token_metadata(db, &name));
            match metadata? {
                Some(m) => Ok(json!({
                    "name": m.token.name,
                    "amount": m.token.amount.to_sat(),
                    "units": m.token.units,
                    "reissuable": m.token.reissuable,
                    "height": m.height,
                    "blockhash": m.block_hash.to_string(),
                })),
                None => Err(CliError::BadArgument(format!("token '{name}' not found"))),
            }
        }

        Command::Getcacheinfo => {
            let (len, max, dirty) = context.with_tokens(|cache, _| {
                (
                    cache.metadata_cache().len(),
                    cache.metadata_cache().max_size(),
                    cache.dirty_entry_count(),
                )
            });
            Ok(json!({
                "metadata-cache-entries": len,
                "metadata-cache-limit": max,
                "dirty-entries": dirty,
            }))
        }
    }
}
