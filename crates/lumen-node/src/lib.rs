//! Node wiring: the chain index, the shared context, block application,
//! and the command surface.

pub mod apply;
pub mod chain;
pub mod cli;
pub mod context;
pub mod error;

pub use self::apply::{GovernanceAction, UtxoProvider};
pub use self::chain::Chain;
pub use self::context::Context;
pub use self::error::NodeError;
