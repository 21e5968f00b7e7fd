//! 🚰 The Sink Pipeline -- builder, maybe an aggregator, executor. In that order.
//!
//! The route is picked once, at startup, from `batch_size`:
//!
//! ```text
//!   batch_size <= 1:  Message ──build──▶ WriteRequest ──index_one──▶ store
//!   batch_size  > 1:  Message ──build──▶ WriteRequest ──append──▶ Aggregator
//!                                                                   │ count release: caller ships it
//!                                                                   │ timer release: expiry handler ships it
//!                                                                   ▼
//!                                                         index_batch ──▶ store
//! ```
//!
//! A count release is shipped by whoever appended the last request, so that caller
//! sees the bulk result (in sync mode). A timer release has no caller at all, so its
//! failures go to the failure channel whatever the mode.

use std::sync::Arc;

use async_channel::Receiver;
use futures::FutureExt;
use tracing::info;

use crate::aggregator::{BatchAggregator, ExpiryHandler};
use crate::app_config::SinkConfig;
use crate::backends::StoreBackend;
use crate::common::{Batch, Message};
use crate::documents::DocumentBuilder;
use crate::errors::SinkError;
use crate::executor::{ExecutionMode, FailureReporter, IndexExecutor};

#[derive(Debug)]
enum Route {
    Direct,
    Aggregated(BatchAggregator),
}

/// 🚰 One message in, zero or more store writes out. Share it behind an `Arc`.
#[derive(Debug)]
pub struct SinkPipeline {
    builder: DocumentBuilder,
    executor: IndexExecutor,
    route: Route,
    failures: Receiver<SinkError>,
}

impl SinkPipeline {
    /// 🚀 Wire the components for this config. Fails only when the id expression does not parse.
    pub fn new(config: &SinkConfig, store: StoreBackend) -> anyhow::Result<Self> {
        let builder = DocumentBuilder::new(config)?;
        let (reporter, failures) = FailureReporter::channel();
        let mode = ExecutionMode::from_async_flag(config.async_mode);
        let executor = IndexExecutor::new(Arc::new(store), mode, reporter);

        let batch_size = config.effective_batch_size();
        let route = if batch_size > 1 {
            Route::Aggregated(BatchAggregator::new(
                batch_size,
                config.idle_timeout(),
                expiry_handler(executor.clone()),
            ))
        } else {
            Route::Direct
        };

        info!(
            index = %config.index,
            ?mode,
            batch_size,
            group_timeout_ms = config.group_timeout,
            "🚰 sink pipeline ready ({})",
            if batch_size > 1 { "aggregated" } else { "direct" }
        );

        Ok(Self {
            builder,
            executor,
            route,
            failures,
        })
    }

    /// 📥 Build the message and write it, now or when its group is released.
    ///
    /// Returns the build error, the single-write error (sync mode), or the bulk error of a
    /// count release this call triggered (sync mode). Everything else ends up in [`Self::failures`].
    pub async fn accept(&self, message: Message) -> Result<(), SinkError> {
        let request = self.builder.build(message)?;
        match &self.route {
            Route::Direct => self.executor.index_one(request).await,
            Route::Aggregated(aggregator) => match aggregator.append(request).await {
                Some(batch) => self.executor.index_batch(batch).await,
                None => Ok(()),
            },
        }
    }

    /// 🗑️ Ship whatever is still waiting and wait for async writes to land.
    pub async fn close(&self) -> Result<(), SinkError> {
        let flushed = match &self.route {
            Route::Direct => Ok(()),
            Route::Aggregated(aggregator) => match aggregator.flush().await {
                Some(batch) => {
                    info!("🗑️ flushing {} pending requests on close", batch.len());
                    self.executor.index_batch(batch).await
                }
                None => Ok(()),
            },
        };
        self.executor.drain().await;
        flushed
    }

    /// 📣 Failures nobody was awaiting: async writes and timer-released batches.
    pub fn failures(&self) -> Receiver<SinkError> {
        self.failures.clone()
    }

    pub fn is_batching(&self) -> bool {
        matches!(self.route, Route::Aggregated(_))
    }

    /// 🔢 Requests waiting in the current group. Always 0 on the direct route.
    pub async fn pending(&self) -> usize {
        match &self.route {
            Route::Direct => 0,
            Route::Aggregated(aggregator) => aggregator.pending().await,
        }
    }
}

fn expiry_handler(executor: IndexExecutor) -> ExpiryHandler {
    Arc::new(move |batch: Batch| {
        let executor = executor.clone();
        async move {
            if let Err(err) = executor.index_batch(batch).await {
                executor.failures().report(err);
            }
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryStore;
    use crate::common::INDEX_ID_HEADER;
    use std::time::Duration;

    fn numbered(n: usize) -> Message {
        Message::text(format!(r#"{{"n":{n}}}"#)).with_header(INDEX_ID_HEADER, n.to_string())
    }

    fn pipeline(configure: impl FnOnce(&mut SinkConfig)) -> (SinkPipeline, InMemoryStore) {
        let mut config = SinkConfig::new("test");
        configure(&mut config);
        let store = InMemoryStore::default();
        let pipeline = SinkPipeline::new(&config, StoreBackend::InMemory(store.clone()))
            .expect("pipeline should wire up");
        (pipeline, store)
    }

    #[tokio::test]
    async fn the_one_where_full_groups_ship_in_order_and_nothing_else_does() {
        let (pipeline, store) = pipeline(|c| c.batch_size = 3);
        assert!(pipeline.is_batching());

        for n in 0..9 {
            pipeline.accept(numbered(n)).await.unwrap();
        }

        assert_eq!(
            store.bulk_calls().await,
            vec![vec!["0", "1", "2"], vec!["3", "4", "5"], vec!["6", "7", "8"]]
        );
        assert!(store.single_calls().await.is_empty());
        assert_eq!(pipeline.pending().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_a_quiet_spell_ships_a_partial_group() {
        let (pipeline, store) = pipeline(|c| {
            c.batch_size = 5;
            c.group_timeout = 2000;
        });

        for n in 0..3 {
            pipeline.accept(numbered(n)).await.unwrap();
        }
        assert!(store.bulk_calls().await.is_empty());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(store.bulk_calls().await, vec![vec!["0", "1", "2"]]);
        assert_eq!(pipeline.pending().await, 0);
    }

    #[tokio::test]
    async fn the_one_where_batch_size_one_means_one_write_per_message() {
        let (pipeline, store) = pipeline(|c| c.batch_size = 1);
        assert!(!pipeline.is_batching());

        for n in 0..3 {
            pipeline.accept(numbered(n)).await.unwrap();
            assert_eq!(store.single_calls().await.len(), n + 1);
        }
        assert_eq!(store.single_calls().await, vec!["0", "1", "2"]);
        assert!(store.bulk_calls().await.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_a_bad_id_expression_never_reaches_the_store() {
        let (pipeline, store) = pipeline(|c| c.id = Some("headers['key']".into()));
        let err = pipeline.accept(Message::text("{}")).await.unwrap_err();
        assert!(matches!(err, SinkError::Build { .. }));
        assert!(store.single_calls().await.is_empty());
    }

    #[tokio::test]
    async fn the_one_where_the_middle_document_fails_and_its_neighbours_stay() {
        let (pipeline, store) = pipeline(|c| c.batch_size = 3);

        pipeline.accept(numbered(1)).await.unwrap();
        pipeline
            .accept(Message::text("{not json").with_header(INDEX_ID_HEADER, "2"))
            .await
            .unwrap();
        let err = pipeline.accept(numbered(3)).await.unwrap_err();

        assert!(matches!(err, SinkError::BulkFailure { failed: 1, total: 3, .. }));
        assert!(store.get("test", "1").await.is_some());
        assert!(store.get("test", "2").await.is_none());
        assert!(store.get("test", "3").await.is_some());
    }

    #[tokio::test]
    async fn the_one_where_close_flushes_the_group_that_would_wait_forever() {
        let (pipeline, store) = pipeline(|c| c.batch_size = 10);
        for n in 0..4 {
            pipeline.accept(numbered(n)).await.unwrap();
        }
        assert_eq!(pipeline.pending().await, 4);

        pipeline.close().await.unwrap();
        assert_eq!(store.bulk_calls().await, vec![vec!["0", "1", "2", "3"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn the_one_where_timer_released_failures_land_in_the_failure_channel() {
        let (pipeline, store) = pipeline(|c| {
            c.batch_size = 4;
            c.group_timeout = 100;
        });
        let failures = pipeline.failures();

        pipeline.accept(numbered(1)).await.unwrap();
        pipeline
            .accept(Message::text("[]").with_header(INDEX_ID_HEADER, "2"))
            .await
            .unwrap();

        let err = failures.recv().await.expect("the timer release failed loudly");
        assert!(matches!(err, SinkError::BulkFailure { failed: 1, total: 2, .. }));
        assert_eq!(store.count("test").await, 1);
    }

    #[tokio::test]
    async fn the_one_where_async_mode_returns_first_and_reports_later() {
        let (pipeline, store) = pipeline(|c| c.async_mode = true);
        let failures = pipeline.failures();

        pipeline.accept(numbered(1)).await.unwrap();
        pipeline
            .accept(Message::text("oops").with_header(INDEX_ID_HEADER, "2"))
            .await
            .expect("async mode does not wait for the verdict");
        pipeline.close().await.unwrap();

        assert!(matches!(failures.try_recv(), Ok(SinkError::IndexFailure { .. })));
        assert_eq!(store.count("test").await, 1);
    }
}
