//! 🎬 The Supervisor -- sets the stage, starts the workers, counts the bodies.
//!
//! ```text
//!   SourceWorker ──▶ async_channel (bounded) ──▶ SinkWorker × N ──▶ Arc<SinkPipeline>
//! ```
//!
//! All sink workers share one pipeline, and therefore one aggregator group. That
//! is exactly the concurrent-producer situation the aggregator is built for.
//!
//! Shutdown order: the source runs dry and drops its sender, sink workers drain
//! the queue and exit, the pipeline is closed (pending group flushed, async writes
//! awaited), and then the failure channel is closed so its worker can finish
//! counting. Failures are counted as they arrive, not piled up until the end. A run
//! with any failure is an error.

mod workers;

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::app_config::AppConfig;
use crate::backends::{SourceBackend, StoreBackend};
use crate::pipeline::SinkPipeline;
use workers::{FailureWorker, RunStats, SinkWorker, SourceWorker, Worker};

/// 📊 What happened during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// ✉️ Messages read from the source.
    pub received: usize,
    /// ✅ Messages the pipeline took without complaint. In async mode that means "handed off".
    pub accepted: usize,
    /// 💀 Messages whose `accept` returned an error.
    pub failed: usize,
    /// 📣 Failures that arrived through the failure channel: async writes and timer releases.
    pub reported: usize,
}

impl RunSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.reported == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received {}, accepted {}, failed {}, reported asynchronously {}",
            self.received, self.accepted, self.failed, self.reported
        )
    }
}

pub struct Supervisor {
    app_config: AppConfig,
}

impl Supervisor {
    pub fn new(app_config: AppConfig) -> Self {
        Self { app_config }
    }

    /// 🚀 Build the configured source and store, then run until the source is empty.
    pub async fn start_workers(&self) -> Result<RunSummary> {
        let source = SourceBackend::from_config(&self.app_config.source)
            .await
            .context("💀 Could not set up the message source.")?;
        let store = StoreBackend::from_config(&self.app_config.store)
            .await
            .context("💀 Could not set up the index store.")?;
        self.run_with(source, store).await
    }

    /// 🧵 Run the workers against an already-built source and store.
    pub async fn run_with(&self, source: SourceBackend, store: StoreBackend) -> Result<RunSummary> {
        let runtime = &self.app_config.runtime;
        let pipeline = Arc::new(
            SinkPipeline::new(&self.app_config.sink, store)
                .context("💀 Could not wire the sink pipeline.")?,
        );
        let failures = pipeline.failures();
        let stats = Arc::new(RunStats::default());
        let failure_handle = FailureWorker::new(failures.clone(), Arc::clone(&stats)).start();

        let (tx, rx) = async_channel::bounded(runtime.queue_capacity.max(1));
        let parallelism = runtime.sink_parallelism.max(1);
        info!(
            "🎬 starting 1 source worker and {} sink workers, queue capacity {}",
            parallelism,
            runtime.queue_capacity.max(1)
        );

        let sink_handles: Vec<_> = (0..parallelism)
            .map(|id| {
                SinkWorker::new(id, rx.clone(), Arc::clone(&pipeline), Arc::clone(&stats)).start()
            })
            .collect();
        drop(rx);
        let source_handle = SourceWorker::new(source, tx, Arc::clone(&stats)).start();

        let source_result = source_handle
            .await
            .context("💀 The source worker panicked.");
        for handle in sink_handles {
            handle
                .await
                .context("💀 A sink worker panicked.")?
                .context("💀 A sink worker gave up.")?;
        }

        let closed = pipeline.close().await;
        failures.close();
        failure_handle
            .await
            .context("💀 The failure worker panicked.")??;

        let mut summary = RunSummary {
            received: RunStats::read(&stats.received),
            accepted: RunStats::read(&stats.accepted),
            failed: RunStats::read(&stats.failed),
            reported: RunStats::read(&stats.reported),
        };
        if let Err(err) = closed {
            error!("💀 closing the pipeline: {}", err);
            summary.failed += 1;
        }

        source_result?.context("💀 The source worker stopped early.")?;

        info!("📊 run finished: {}", summary);
        if !summary.is_clean() {
            anyhow::bail!(
                "💀 The run finished with failures ({}). Every failure was logged above as it happened.",
                summary
            );
        }
        Ok(summary)
    }
}
