use std::sync::Arc;

use anyhow::{Context, Result};
use async_channel::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::backends::{Source, SourceBackend};
use crate::common::Message;
use crate::supervisors::workers::{RunStats, Worker};

/// 🚰 Drains the source into the queue. Dropping the sender at the end is what tells
/// the sink workers to go home.
pub(in crate::supervisors) struct SourceWorker {
    source: SourceBackend,
    tx: Sender<Message>,
    stats: Arc<RunStats>,
}

impl SourceWorker {
    pub(in crate::supervisors) fn new(
        source: SourceBackend,
        tx: Sender<Message>,
        stats: Arc<RunStats>,
    ) -> Self {
        Self { source, tx, stats }
    }
}

impl Worker for SourceWorker {
    fn start(mut self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("🚰 source worker started on {:?}", self.source);
            while let Some(message) = self
                .source
                .next_message()
                .await
                .context("💀 The source could not produce the next message.")?
            {
                trace!("🚰 queueing message with {} headers", message.headers.len());
                self.tx.send(message).await.context(
                    "💀 Every sink worker is gone, so the queue has nobody left to deliver to.",
                )?;
                RunStats::bump(&self.stats.received);
            }
            debug!(
                "🚰 source worker done after {} messages",
                RunStats::read(&self.stats.received)
            );
            Ok(())
        })
    }
}
