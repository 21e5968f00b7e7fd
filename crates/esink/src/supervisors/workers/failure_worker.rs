use std::sync::Arc;

use anyhow::Result;
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::SinkError;
use crate::supervisors::workers::{RunStats, Worker};

/// 📣 Empties the failure channel while the run is on.
///
/// The reporter already logged each error, so all that is left is the count. The
/// worker stops once the channel is closed and drained.
pub(in crate::supervisors) struct FailureWorker {
    rx: Receiver<SinkError>,
    stats: Arc<RunStats>,
}

impl FailureWorker {
    pub(in crate::supervisors) fn new(rx: Receiver<SinkError>, stats: Arc<RunStats>) -> Self {
        Self { rx, stats }
    }
}

impl Worker for FailureWorker {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            while self.rx.recv().await.is_ok() {
                RunStats::bump(&self.stats.reported);
            }
            debug!(
                "📣 failure worker done, {} failures counted",
                RunStats::read(&self.stats.reported)
            );
            Ok(())
        })
    }
}
