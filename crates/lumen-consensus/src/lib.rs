//! Consensus rules that gate block acceptance: difficulty retargeting,
//! proof-of-work verification, subsidy, and transaction finality.

pub mod params;
pub mod pow;
pub mod retarget;
pub mod target;

pub use self::params::{
    get_block_subsidy, ChainParams, Network, DEFAULT_BLOCK_MIN_TX_FEE, MAX_BLOCK_SIGOPS_COST,
    MAX_BLOCK_WEIGHT,
};
pub use self::pow::check_proof_of_work;
pub use self::retarget::{calculate_next_target, next_target_required, ChainEntry, ChainView};
pub use self::target::U256;

use lumen_primitives::transaction::{LOCKTIME_THRESHOLD, SEQUENCE_FINAL};
use lumen_primitives::{BlockHash, Transaction};

/// Number of trailing headers the median time is taken over.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Median time of the last [`MEDIAN_TIME_SPAN`] blocks ending at `from`.
pub fn median_time_past<C: ChainView>(chain: &C, from: &BlockHash) -> u32 {
    let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
    let mut cursor = *from;
    for _ in 0..MEDIAN_TIME_SPAN {
        let Some(entry) = chain.entry(&cursor) else {
            break;
        };
        times.push(entry.time);
        cursor = entry.prev;
    }
    if times.is_empty() {
        return 0;
    }
    times.sort_unstable();
    times[times.len() / 2]
}

/// Whether a transaction is final at the given height and time cutoff.
pub fn is_final_tx(tx: &Transaction, height: u32, time_cutoff: i64) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let cutoff = if tx.lock_time < LOCKTIME_THRESHOLD {
        i64::from(height)
    } else {
        time_cutoff
    };
    if i64::from(tx.lock_time) < cutoff {
        return true;
    }
    tx.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_primitives::transaction::{OutPoint, TxIn};

    #[test]
    fn final_when_lock_time_zero() {
        let tx = Transaction::default();
        assert!(is_final_tx(&tx, 0, 0));
    }

    #[test]
    fn height_lock_time_respected() {
        let mut tx = Transaction::default();
        tx.lock_time = 100;
        let mut input = TxIn::new(OutPoint::null());
        input.sequence = 0;
        tx.inputs.push(input);
        assert!(!is_final_tx(&tx, 100, 0));
        assert!(is_final_tx(&tx, 101, 0));
    }

    #[test]
    fn final_sequences_override_lock_time() {
        let mut tx = Transaction::default();
        tx.lock_time = u32::MAX - 1;
        tx.inputs.push(TxIn::new(OutPoint::null()));
        assert!(is_final_tx(&tx, 0, 0));
    }
}
