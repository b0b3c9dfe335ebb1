//! Long-lived mining and staking workers.
//!
//! A [`WorkerGroup`] owns its threads: stopping the group flips the shared
//! shutdown flag and joins every worker, so cancellation cascades from the
//! parent to all children. Workers observe the flag between rounds; no
//! round is interrupted midway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Pause between staking attempts.
pub const STAKER_POLLING_PERIOD: Duration = Duration::from_millis(5000);

/// Cooperative shutdown signal shared by a group's workers.
#[derive(Clone)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Sleep in short slices so shutdown is observed promptly.
    pub fn sleep(&self, duration: Duration) {
        let slice = Duration::from_millis(100);
        let mut remaining = duration;
        while !self.is_set() && remaining > Duration::ZERO {
            let step = remaining.min(slice);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
    }
}

/// A set of worker threads with one shutdown switch.
pub struct WorkerGroup {
    shutdown: Arc<AtomicBool>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl WorkerGroup {
    pub fn new() -> Self {
        WorkerGroup {
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Spawn a named worker. The closure runs until it returns; it should
    /// poll the flag between units of work.
    pub fn spawn<F>(&mut self, name: &str, work: F)
    where
        F: FnOnce(ShutdownFlag) + Send + 'static,
    {
        let flag = ShutdownFlag(self.shutdown.clone());
        let thread_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || work(flag))
            .expect("spawning a worker thread");
        tracing::info!(worker = %thread_name, "started worker");
        self.handles.push((thread_name, handle));
    }

    /// Signal shutdown and join every worker.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for (name, handle) in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!(worker = %name, "worker panicked during shutdown");
            } else {
                tracing::info!(worker = %name, "worker stopped");
            }
        }
    }
}

impl Default for WorkerGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerGroup {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Outcome of one staking or mining attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Produced and submitted a block.
    Produced,
    /// Nothing found this round; sleep and retry.
    Idle,
    /// Preconditions unmet (no peers, not synced); back off longer.
    NotReady,
}

/// Drive a staking loop on the group: call `attempt` each round, pacing by
/// [`STAKER_POLLING_PERIOD`].
pub fn spawn_staker<F>(group: &mut WorkerGroup, mut attempt: F)
where
    F: FnMut() -> RoundOutcome + Send + 'static,
{
    group.spawn("lumen-stake", move |flag| {
        while !flag.is_set() {
            match attempt() {
                RoundOutcome::Produced => flag.sleep(Duration::from_millis(500)),
                RoundOutcome::Idle => flag.sleep(STAKER_POLLING_PERIOD),
                RoundOutcome::NotReady => flag.sleep(Duration::from_secs(10)),
            }
        }
    });
}

/// Drive a proof-of-work loop: `round` hashes a bounded batch and returns
/// how it went. The flag is observed between rounds only.
pub fn spawn_pow_miner<F>(group: &mut WorkerGroup, mut round: F)
where
    F: FnMut() -> RoundOutcome + Send + 'static,
{
    group.spawn("lumen-solo-miner", move |flag| {
        while !flag.is_set() {
            match round() {
                RoundOutcome::Produced | RoundOutcome::Idle => {}
                RoundOutcome::NotReady => flag.sleep(Duration::from_secs(1)),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn stop_joins_all_workers() {
        let rounds = Arc::new(AtomicU32::new(0));
        let mut group = WorkerGroup::new();
        for _ in 0..3 {
            let rounds = rounds.clone();
            group.spawn("test-worker", move |flag| {
                while !flag.is_set() {
                    rounds.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(Duration::from_millis(1));
                }
            });
        }
        std::thread::sleep(Duration::from_millis(20));
        group.stop();
        let after_stop = rounds.load(Ordering::Relaxed);
        assert!(after_stop > 0);
        // No worker survives the join.
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(rounds.load(Ordering::Relaxed), after_stop);
    }

    #[test]
    fn drop_cascades_shutdown() {
        let alive = Arc::new(AtomicBool::new(true));
        {
            let mut group = WorkerGroup::new();
            let alive = alive.clone();
            group.spawn("short-lived", move |flag| {
                while !flag.is_set() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                alive.store(false, Ordering::Relaxed);
            });
        }
        assert!(!alive.load(Ordering::Relaxed));
    }

    #[test]
    fn sleep_wakes_on_shutdown() {
        let mut group = WorkerGroup::new();
        let started = std::time::Instant::now();
        group.spawn("sleeper", |flag| {
            flag.sleep(Duration::from_secs(60));
        });
        std::thread::sleep(Duration::from_millis(20));
        group.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
