//! The token engine: metadata and per-address balances layered over a
//! persistent store, with reorg-safe undo.

pub mod cache;
pub mod db;
pub mod lru;
pub mod script;
pub mod types;

pub use self::cache::{CacheError, TokensCache, MAX_CACHE_TOKENS_SIZE};
pub use self::db::{TokensDb, MAX_DATABASE_RESULTS};
pub use self::lru::LruCache;
pub use self::script::{
    construct_issue_script, construct_owner_script, construct_reissue_script,
    construct_transfer_script, owner_token_from_script, reissue_token_from_script,
    token_from_script, token_output_from_script, transfer_token_from_script, TokenOutput,
};
pub use self::types::{
    check_amount_with_units, is_name_an_owner, is_token_name_valid, owner_token_name,
    parent_name, token_name_kind, unique_token_name, IssueToken, NameError, ReissueToken,
    ReissueUndo, TokenError, TokenMetadata, TokenNameKind, TokenTransfer,
};
