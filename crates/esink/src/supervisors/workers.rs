//! 🧵 Workers -- small spawned loops with one job each.
//!
//! One [`SourceWorker`] reads messages and pushes them into a bounded channel.
//! N [`SinkWorker`]s pull from that channel and hand each message to the shared
//! pipeline. A [`FailureWorker`] counts what the failure channel reports while
//! all of that is going on. The channel closing is the only shutdown signal
//! anybody needs.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use tokio::task::JoinHandle;

mod failure_worker;
mod sink_worker;
mod source_worker;

pub(in crate::supervisors) use failure_worker::FailureWorker;
pub(in crate::supervisors) use sink_worker::SinkWorker;
pub(in crate::supervisors) use source_worker::SourceWorker;

pub(in crate::supervisors) trait Worker {
    fn start(self) -> JoinHandle<Result<()>>;
}

/// 📊 Tallies kept by the workers while the run is on.
#[derive(Debug, Default)]
pub(in crate::supervisors) struct RunStats {
    pub(in crate::supervisors) received: AtomicUsize,
    pub(in crate::supervisors) accepted: AtomicUsize,
    pub(in crate::supervisors) failed: AtomicUsize,
    pub(in crate::supervisors) reported: AtomicUsize,
}

impl RunStats {
    pub(in crate::supervisors) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(in crate::supervisors) fn read(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::Relaxed)
    }
}
