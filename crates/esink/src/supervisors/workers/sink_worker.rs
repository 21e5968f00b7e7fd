use std::sync::Arc;

use anyhow::Result;
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::common::Message;
use crate::pipeline::SinkPipeline;
use crate::supervisors::workers::{RunStats, Worker};

/// 🕳️ Pulls messages off the queue and feeds them to the shared pipeline.
///
/// A failed message is logged and counted, then the worker moves on. The message
/// is not retried; the supervisor reports the tally at the end.
pub(in crate::supervisors) struct SinkWorker {
    id: usize,
    rx: Receiver<Message>,
    pipeline: Arc<SinkPipeline>,
    stats: Arc<RunStats>,
}

impl SinkWorker {
    pub(in crate::supervisors) fn new(
        id: usize,
        rx: Receiver<Message>,
        pipeline: Arc<SinkPipeline>,
        stats: Arc<RunStats>,
    ) -> Self {
        Self {
            id,
            rx,
            pipeline,
            stats,
        }
    }
}

impl Worker for SinkWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("🕳️ sink worker #{} started", self.id);
            while let Ok(message) = self.rx.recv().await {
                match self.pipeline.accept(message).await {
                    Ok(()) => RunStats::bump(&self.stats.accepted),
                    Err(err) => {
                        error!("💀 sink worker #{}: {}", self.id, err);
                        RunStats::bump(&self.stats.failed);
                    }
                }
            }
            debug!("🕳️ sink worker #{} done, the queue is closed", self.id);
            Ok(())
        })
    }
}
