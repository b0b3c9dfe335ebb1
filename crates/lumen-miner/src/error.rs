//! Assembly errors.

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("mempool view returned a stale entry during assembly")]
    StaleEntry,

    #[error("block reward overflowed the money range")]
    RewardOverflow,
}
