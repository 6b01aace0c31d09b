//! Two-phase start/end barrier for a persistent worker cohort.
//!
//! The driver and `n` workers share one [`BlockBarrier`]. For each block the
//! driver calls [`release`](BlockBarrier::release), which lets every worker out
//! of [`wait_for_start`](BlockBarrier::wait_for_start) at the same moment, and
//! then [`await_completion`](BlockBarrier::await_completion), which returns once
//! every worker has called [`finish`](BlockBarrier::finish). Workers are torn
//! down by [`shutdown`](BlockBarrier::shutdown), after which `wait_for_start`
//! returns `false`.

use std::sync::Barrier;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct BlockBarrier {
    start: Barrier,
    end: Barrier,
    shutdown: AtomicBool,
    workers: usize,
}

impl BlockBarrier {
    /// Barrier for `workers` workers plus the driver.
    pub fn new(workers: usize) -> Self {
        Self {
            start: Barrier::new(workers + 1),
            end: Barrier::new(workers + 1),
            shutdown: AtomicBool::new(false),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Driver: start the next block on every worker.
    pub fn release(&self) {
        self.start.wait();
    }

    /// Driver: block until every worker has finished the current block.
    pub fn await_completion(&self) {
        self.end.wait();
    }

    /// Driver: let every waiting worker exit. Must be called exactly once, while
    /// the workers are parked in `wait_for_start`.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.start.wait();
    }

    /// Worker: park until released. Returns `false` when the cohort is shutting down.
    pub fn wait_for_start(&self) -> bool {
        self.start.wait();
        !self.shutdown.load(Ordering::SeqCst)
    }

    /// Worker: report the current block done.
    pub fn finish(&self) {
        self.end.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn workers_run_each_block_once() {
        let barrier = BlockBarrier::new(4);
        let done = AtomicUsize::new(0);
        let exits = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..barrier.workers() {
                s.spawn(|| {
                    while barrier.wait_for_start() {
                        done.fetch_add(1, Ordering::SeqCst);
                        barrier.finish();
                    }
                    exits.fetch_add(1, Ordering::SeqCst);
                });
            }

            for block in 1..=3 {
                barrier.release();
                barrier.await_completion();
                // Every worker has finished this block before the driver moves on.
                assert_eq!(done.load(Ordering::SeqCst), block * 4);
            }
            barrier.shutdown();
        });

        assert_eq!(done.load(Ordering::SeqCst), 12);
        assert_eq!(exits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn immediate_shutdown() {
        let barrier = BlockBarrier::new(2);
        std::thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| assert!(!barrier.wait_for_start()));
            }
            barrier.shutdown();
        });
    }
}
