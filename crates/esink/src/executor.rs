//! 📤 The Index Executor -- the part that actually talks to the store.
//!
//! One function per path ([`index_document`], [`index_bulk`]) does the real work
//! and returns a future. Sync mode awaits it right there in the caller. Async mode
//! spawns it and returns immediately, and whatever goes wrong later is reported
//! to the [`FailureReporter`] instead of evaporating.
//!
//! Bulk responses are read item by item. Successes get a debug line, failures get
//! an error line each, and then the whole call fails once with a [`SinkError::BulkFailure`].
//! The items that made it stay made it. The store offers no rollback and neither do we.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_channel::{Receiver, Sender};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::backends::{IndexStore, StoreBackend};
use crate::common::{Batch, BatchOutcome, OutcomeItem, WriteRequest};
use crate::errors::{SinkError, StoreError};

/// 🎭 Block the caller until the store answers, or fire and forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sync,
    Async,
}

impl ExecutionMode {
    pub fn from_async_flag(async_mode: bool) -> Self {
        if async_mode {
            ExecutionMode::Async
        } else {
            ExecutionMode::Sync
        }
    }
}

/// 📣 The error channel for failures nobody is awaiting: async writes and timer releases.
#[derive(Debug, Clone)]
pub struct FailureReporter {
    tx: Sender<SinkError>,
}

impl FailureReporter {
    /// 🚀 A reporter plus the receiving end. Unbounded: reporting must never block a store callback.
    pub fn channel() -> (Self, Receiver<SinkError>) {
        let (tx, rx) = async_channel::unbounded();
        (Self { tx }, rx)
    }

    pub fn report(&self, err: SinkError) {
        error!("💀 {}", err);
        if self.tx.try_send(err).is_err() {
            warn!("📣 failure channel is closed, the error above was only logged");
        }
    }
}

/// 🧮 Counts work that is still running so shutdown can wait for it.
#[derive(Debug, Clone, Default)]
pub(crate) struct InFlight {
    inner: Arc<InFlightInner>,
}

#[derive(Debug, Default)]
struct InFlightInner {
    count: AtomicUsize,
    idle: Notify,
}

pub(crate) struct InFlightGuard {
    inner: Arc<InFlightInner>,
}

impl InFlight {
    pub(crate) fn enter(&self) -> InFlightGuard {
        self.inner.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub(crate) async fn wait_idle(&self) {
        loop {
            // -- register interest before looking, or a wakeup can slip between the two
            let notified = self.inner.idle.notified();
            if self.inner.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

/// 📤 Sends write requests and batches to the store.
#[derive(Debug, Clone)]
pub struct IndexExecutor {
    store: Arc<StoreBackend>,
    mode: ExecutionMode,
    failures: FailureReporter,
    in_flight: InFlight,
}

impl IndexExecutor {
    pub fn new(store: Arc<StoreBackend>, mode: ExecutionMode, failures: FailureReporter) -> Self {
        Self {
            store,
            mode,
            failures,
            in_flight: InFlight::default(),
        }
    }

    /// 📄 Index one document.
    ///
    /// Sync: returns the store's verdict. Async: returns `Ok` right away and
    /// reports a failure later.
    pub async fn index_one(&self, request: WriteRequest) -> Result<(), SinkError> {
        match self.mode {
            ExecutionMode::Sync => {
                info!("📤 indexRequest document desc : {}", request.description());
                index_document(&self.store, &request).await.map(|_| ())
            }
            ExecutionMode::Async => {
                info!("📤 indexRequest async document desc : {}", request.description());
                let store = Arc::clone(&self.store);
                let failures = self.failures.clone();
                let guard = self.in_flight.enter();
                tokio::spawn(async move {
                    let _guard = guard;
                    if let Err(err) = index_document(&store, &request).await {
                        failures.report(err);
                    }
                });
                Ok(())
            }
        }
    }

    /// 📦 Index a released batch with one bulk call.
    pub async fn index_batch(&self, batch: Batch) -> Result<(), SinkError> {
        match self.mode {
            ExecutionMode::Sync => {
                info!("📤 bulkRequest document desc : {}", batch.description());
                index_bulk(&self.store, &batch).await.map(|_| ())
            }
            ExecutionMode::Async => {
                info!("📤 bulkRequest async document desc : {}", batch.description());
                let store = Arc::clone(&self.store);
                let failures = self.failures.clone();
                let guard = self.in_flight.enter();
                tokio::spawn(async move {
                    let _guard = guard;
                    if let Err(err) = index_bulk(&store, &batch).await {
                        failures.report(err);
                    }
                });
                Ok(())
            }
        }
    }

    /// ⏳ Wait until every spawned async write has finished. No-op in sync mode.
    pub async fn drain(&self) {
        self.in_flight.wait_idle().await;
    }

    pub fn failures(&self) -> &FailureReporter {
        &self.failures
    }
}

/// 📄 The single-document path. Success is logged, failure becomes [`SinkError::IndexFailure`].
pub async fn index_document(
    store: &StoreBackend,
    request: &WriteRequest,
) -> Result<OutcomeItem, SinkError> {
    let outcome = store
        .write_one(request)
        .await
        .map_err(|cause| SinkError::IndexFailure {
            index: request.target_index.clone(),
            id: request.document_id.clone().unwrap_or_else(|| "<auto>".into()),
            cause,
        })?;

    debug!(
        "✅ Index operation [index={}] succeeded: document [id={}, version={}] was written on shard {}.",
        outcome.target_index,
        outcome.document_id.as_deref().unwrap_or("<auto>"),
        outcome.version.unwrap_or_default(),
        outcome.shard.as_deref().unwrap_or("<unknown>")
    );
    Ok(outcome)
}

/// 📦 The bulk path. Every item is inspected before the verdict is reached.
pub async fn index_bulk(store: &StoreBackend, batch: &Batch) -> Result<BatchOutcome, SinkError> {
    let outcome = store
        .write_bulk(batch)
        .await
        .and_then(|outcome| {
            if outcome.items.len() == batch.len() {
                Ok(outcome)
            } else {
                Err(StoreError::Protocol(format!(
                    "sent {} documents but got {} item results back",
                    batch.len(),
                    outcome.items.len()
                )))
            }
        })
        .map_err(|cause| SinkError::BulkTransport {
            description: batch.description(),
            cause,
        })?;

    for (position, item) in outcome.items.iter().enumerate() {
        if item.succeeded {
            debug!(
                "✅ Index operation [i={}, id={}, index={}] succeeded: document [id={}, version={}] was written on shard {}.",
                position,
                item.document_id.as_deref().unwrap_or("<auto>"),
                item.target_index,
                item.document_id.as_deref().unwrap_or("<auto>"),
                item.version.unwrap_or_default(),
                item.shard.as_deref().unwrap_or("<unknown>")
            );
        } else {
            error!(
                "💀 Index operation [i={}, id={}, index={}] failed: {}",
                position,
                item.document_id.as_deref().unwrap_or("<auto>"),
                item.target_index,
                item.failure_message.as_deref().unwrap_or("unknown failure")
            );
        }
    }

    if outcome.has_failures {
        return Err(SinkError::bulk_failure(outcome));
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryStore;
    use crate::common::DocumentSource;

    fn request(id: Option<&str>, source: &str) -> WriteRequest {
        WriteRequest {
            target_index: "test".into(),
            document_id: id.map(String::from),
            routing: None,
            timeout: None,
            source: Some(DocumentSource::Json(source.into())),
        }
    }

    fn executor(mode: ExecutionMode) -> (IndexExecutor, InMemoryStore, Receiver<SinkError>) {
        let store = InMemoryStore::default();
        let (failures, rx) = FailureReporter::channel();
        let executor = IndexExecutor::new(
            Arc::new(StoreBackend::InMemory(store.clone())),
            mode,
            failures,
        );
        (executor, store, rx)
    }

    #[tokio::test]
    async fn the_one_where_the_same_id_twice_is_one_document_with_two_versions() {
        let (executor, store, _rx) = executor(ExecutionMode::Sync);
        let doc = request(Some("same"), r#"{"n":1}"#);

        executor.index_one(doc.clone()).await.unwrap();
        executor.index_one(doc).await.unwrap();

        assert_eq!(store.count("test").await, 1);
        let stored = store.get("test", "same").await.expect("document exists");
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn the_one_where_no_id_means_duplicates_on_redelivery() {
        let (executor, store, _rx) = executor(ExecutionMode::Sync);
        let doc = request(None, r#"{"n":1}"#);
        executor.index_one(doc.clone()).await.unwrap();
        executor.index_one(doc).await.unwrap();
        assert_eq!(store.count("test").await, 2);
    }

    #[tokio::test]
    async fn the_one_where_one_bad_apple_fails_the_bulk_but_not_the_bunch() {
        let (executor, store, _rx) = executor(ExecutionMode::Sync);
        let batch = Batch::new(vec![
            request(Some("1"), r#"{"n":1}"#),
            request(Some("2"), r#"{"n":"#),
            request(Some("3"), r#"{"n":3}"#),
        ]);

        let err = executor.index_batch(batch).await.expect_err("item #2 is broken");
        match &err {
            SinkError::BulkFailure {
                failed,
                total,
                outcome,
                ..
            } => {
                assert_eq!((*failed, *total), (1, 3));
                assert!(outcome.items[0].succeeded);
                assert!(!outcome.items[1].succeeded);
                assert!(outcome.items[2].succeeded);
            }
            other => panic!("💀 expected a bulk failure, got {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains("[1]: index [test], id [2]"), "{message}");

        assert_eq!(store.count("test").await, 2);
        assert!(store.get("test", "1").await.is_some());
        assert!(store.get("test", "3").await.is_some());
        assert!(store.get("test", "2").await.is_none());
    }

    #[tokio::test]
    async fn the_one_where_a_rejected_single_write_is_an_index_failure() {
        let (executor, _store, _rx) = executor(ExecutionMode::Sync);
        let mut doc = request(Some("x"), "{}");
        doc.source = None;
        let err = executor.index_one(doc).await.expect_err("no source, no document");
        assert!(matches!(err, SinkError::IndexFailure { ref index, ref id, .. } if index == "test" && id == "x"));
    }

    #[tokio::test]
    async fn the_one_where_async_failures_show_up_in_the_failure_channel() {
        let (executor, store, failures) = executor(ExecutionMode::Async);
        let mut doc = request(Some("x"), "{}");
        doc.source = None;

        executor.index_one(doc).await.expect("async returns immediately");
        executor
            .index_one(request(Some("ok"), r#"{"fine":true}"#))
            .await
            .unwrap();
        executor.drain().await;

        let err = failures.try_recv().expect("the failure was reported");
        assert!(matches!(err, SinkError::IndexFailure { .. }));
        assert!(failures.try_recv().is_err(), "exactly one failure");
        assert_eq!(store.count("test").await, 1);
    }

    #[tokio::test]
    async fn the_one_where_async_bulk_failures_are_reported_too() {
        let (executor, store, failures) = executor(ExecutionMode::Async);
        let batch = Batch::new(vec![
            request(Some("1"), r#"{"n":1}"#),
            request(Some("2"), "[1,2]"),
        ]);
        executor.index_batch(batch).await.unwrap();
        executor.drain().await;

        assert!(matches!(
            failures.try_recv(),
            Ok(SinkError::BulkFailure { failed: 1, total: 2, .. })
        ));
        assert_eq!(store.count("test").await, 1);
    }
}
