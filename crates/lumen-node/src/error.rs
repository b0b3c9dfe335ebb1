//! Node-level errors and the process exit taxonomy.

use lumen_primitives::Amount;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Chain(#[from] crate::chain::ChainError),

    #[error(transparent)]
    Governance(#[from] lumen_governance::Error),

    #[error(transparent)]
    Tokens(#[from] lumen_tokens::CacheError),

    #[error(transparent)]
    Store(#[from] lumen_store::Error),

    #[error("incorrect difficulty bits: got {got:#010x}, expected {expected:#010x}")]
    BadDifficultyBits { got: u32, expected: u32 },

    #[error("proof-of-work validation failed")]
    InvalidProofOfWork,

    #[error("issuing '{name}' requires burning {required} to the fee address")]
    MissingIssuanceBurn { name: String, required: Amount },

    #[error("'{name}' requires its owner token as an input")]
    OwnerTokenNotSpent { name: String },

    #[error("malformed token transaction: {0}")]
    MalformedTokenTx(&'static str),
}

impl NodeError {
    /// Process exit code: 1 configuration, 2 corruption, 3 validation.
    pub fn exit_code(&self) -> i32 {
        match self {
            NodeError::Store(_) => 2,
            NodeError::Governance(lumen_governance::Error::CorruptState(_)) => 2,
            NodeError::Governance(lumen_governance::Error::Store(_)) => 2,
            NodeError::Tokens(lumen_tokens::CacheError::CorruptState(_)) => 2,
            NodeError::Tokens(lumen_tokens::CacheError::Store(_)) => 2,
            _ => 3,
        }
    }
}
