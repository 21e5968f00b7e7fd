//! # Previously, on esink...
//!
//! 🎬 The cluster was down. The laptop was on a plane. Somebody still needed to
//! know whether batch #3 really held documents 7, 8 and 9. Enter a store so
//! simple it lives entirely in RAM, gone the moment you blink.
//!
//! [`InMemoryStore`] behaves like a tiny, single-shard search index: explicit ids
//! overwrite and bump the version, missing ids get generated ones, and sources
//! that are not JSON objects get rejected the way a real mapper would. It also
//! keeps a log of every call so tests can check what arrived, and in what shape.
//!
//! [`InMemorySource`] hands out a fixed list of messages, once.
//!
//! ⚠️ Not for production. For tests, dry runs and the occasional demo. 🦆

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::trace;

use crate::backends::{IndexStore, Source};
use crate::common::{Batch, BatchOutcome, Message, OutcomeItem, WriteRequest};
use crate::errors::StoreError;

/// 📄 A document as the in-memory store keeps it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub version: i64,
    pub routing: Option<String>,
    pub source: Value,
}

/// 🧠 A search index that fits in a `BTreeMap`. Clone it, hand one copy to the
/// pipeline, keep the other for assertions. Both see the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

#[derive(Debug, Default)]
struct StoreState {
    indices: BTreeMap<String, BTreeMap<String, StoredDocument>>,
    next_auto_id: u64,
    /// 📋 Document ids of every single-document call, in call order.
    single_calls: Vec<String>,
    /// 📋 Document ids of every bulk call, one inner vec per call.
    bulk_calls: Vec<Vec<String>>,
}

impl StoreState {
    fn apply(&mut self, request: &WriteRequest) -> OutcomeItem {
        let index = request.target_index.as_str();
        let source = match request.source.as_ref().map(|source| source.to_value()) {
            None => {
                return OutcomeItem::failure(
                    index,
                    request.document_id.clone(),
                    400,
                    "action_request_validation_exception: source is missing",
                );
            }
            Some(Err(err)) => {
                return OutcomeItem::failure(
                    index,
                    request.document_id.clone(),
                    400,
                    format!("mapper_parsing_exception: failed to parse: {err}"),
                );
            }
            Some(Ok(value)) if !value.is_object() => {
                return OutcomeItem::failure(
                    index,
                    request.document_id.clone(),
                    400,
                    "mapper_parsing_exception: root of the document must be an object",
                );
            }
            Some(Ok(value)) => value,
        };

        let id = match &request.document_id {
            Some(id) => id.clone(),
            None => {
                self.next_auto_id += 1;
                format!("auto-{}", self.next_auto_id)
            }
        };

        let documents = self.indices.entry(index.to_string()).or_default();
        let version = documents.get(&id).map_or(1, |existing| existing.version + 1);
        let (status, result) = if version == 1 {
            (201, "created")
        } else {
            (200, "updated")
        };
        trace!("🧠 {} [{}/{}] version {}", result, index, id, version);

        documents.insert(
            id.clone(),
            StoredDocument {
                id: id.clone(),
                version,
                routing: request.routing.clone(),
                source,
            },
        );

        OutcomeItem::success(index, Some(id), Some(version), status)
            .with_result(Some(result.to_string()))
            .with_shard(Some("[total=1, successful=1, failed=0]".to_string()))
    }
}

impl InMemoryStore {
    /// 🔢 Number of documents currently held by `index`.
    pub async fn count(&self, index: &str) -> usize {
        let state = self.state.lock().await;
        state.indices.get(index).map_or(0, BTreeMap::len)
    }

    pub async fn get(&self, index: &str, id: &str) -> Option<StoredDocument> {
        let state = self.state.lock().await;
        state.indices.get(index)?.get(id).cloned()
    }

    pub async fn indices(&self) -> Vec<String> {
        self.state.lock().await.indices.keys().cloned().collect()
    }

    pub async fn single_calls(&self) -> Vec<String> {
        self.state.lock().await.single_calls.clone()
    }

    pub async fn bulk_calls(&self) -> Vec<Vec<String>> {
        self.state.lock().await.bulk_calls.clone()
    }
}

fn call_label(item: &OutcomeItem) -> String {
    item.document_id.clone().unwrap_or_else(|| "<rejected>".into())
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn write_one(&self, request: &WriteRequest) -> Result<OutcomeItem, StoreError> {
        let mut state = self.state.lock().await;
        let item = state.apply(request);
        state.single_calls.push(call_label(&item));

        if item.succeeded {
            Ok(item)
        } else {
            Err(StoreError::Rejected {
                status: item.status,
                reason: item.failure_message.unwrap_or_default(),
            })
        }
    }

    async fn write_bulk(&self, batch: &Batch) -> Result<BatchOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let items: Vec<OutcomeItem> = batch
            .requests()
            .iter()
            .map(|request| state.apply(request))
            .collect();
        state.bulk_calls.push(items.iter().map(call_label).collect());
        Ok(BatchOutcome::new(items))
    }
}

/// ✉️ Hands out a fixed list of messages, in order, exactly once.
#[derive(Debug, Default)]
pub struct InMemorySource {
    messages: VecDeque<Message>,
}

impl InMemorySource {
    pub fn new(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Source for InMemorySource {
    async fn next_message(&mut self) -> Result<Option<Message>> {
        Ok(self.messages.pop_front())
    }
}
