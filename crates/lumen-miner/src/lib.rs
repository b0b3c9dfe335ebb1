//! Block production: the template assembler and the worker loops that
//! drive it.

pub mod assembler;
pub mod error;
pub mod worker;

pub use self::assembler::{AssemblerOptions, BlockAssembler, BlockTemplate};
pub use self::error::AssembleError;
pub use self::worker::{
    spawn_pow_miner, spawn_staker, RoundOutcome, ShutdownFlag, WorkerGroup,
    STAKER_POLLING_PERIOD,
};
