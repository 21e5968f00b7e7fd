//! 🔌 Backends -- where the real I/O happens.
//!
//! 🚰 Sources pour messages in, stores swallow documents out.
//! Everything in between is pure logic and lives elsewhere.
//!
//! 🎭 Same casting agency as always: one trait per role, one enum per role that
//! dispatches to the concrete type, so the pipeline never needs to know whether
//! it is talking to a cluster or to a `HashMap` wearing a cluster costume. 🦆

use std::fmt::Debug;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::app_config::{SourceConfig, StoreConfig};
use crate::common::{Batch, BatchOutcome, Message, OutcomeItem, WriteRequest};
use crate::errors::StoreError;

pub mod elasticsearch;
pub mod in_mem;
pub mod ndjson;

pub use elasticsearch::{ElasticsearchStore, ElasticsearchStoreConfig};
pub use in_mem::{InMemorySource, InMemoryStore, StoredDocument};
pub use ndjson::{NdjsonSource, parse_envelope};

// ===== Store Trait and Backend Enum =====

/// 📡 An index store that accepts single writes and bulk writes.
///
/// # Contract
/// - `write_one` resolves to the store's verdict for that one document.
///   A rejected document is an `Err`, not a failed [`OutcomeItem`].
/// - `write_bulk` is all-or-nothing only at the transport level. Once the
///   store answers, it answers per item, in request order, one item per request.
/// - Shared across tasks, hence `&self` and `Send + Sync`.
#[async_trait]
pub trait IndexStore: Debug + Send + Sync {
    async fn write_one(&self, request: &WriteRequest) -> Result<OutcomeItem, StoreError>;
    async fn write_bulk(&self, batch: &Batch) -> Result<BatchOutcome, StoreError>;
}

/// 🎭 The many faces of a store.
#[derive(Debug)]
pub enum StoreBackend {
    Elasticsearch(ElasticsearchStore),
    InMemory(InMemoryStore),
}

impl StoreBackend {
    /// 🚀 Build the configured store. Elasticsearch gets pinged on the way up,
    /// so a wrong URL fails here and not ten thousand messages later.
    pub async fn from_config(config: &StoreConfig) -> Result<Self> {
        match config {
            StoreConfig::Elasticsearch(es_config) => {
                let store = ElasticsearchStore::connect(es_config.clone())
                    .await
                    .with_context(|| {
                        format!(
                            "💀 Could not reach Elasticsearch at '{}'. Check the url, the credentials and whether the cluster is actually up.",
                            es_config.url
                        )
                    })?;
                Ok(StoreBackend::Elasticsearch(store))
            }
            StoreConfig::InMemory => Ok(StoreBackend::InMemory(InMemoryStore::default())),
        }
    }
}

#[async_trait]
impl IndexStore for StoreBackend {
    async fn write_one(&self, request: &WriteRequest) -> Result<OutcomeItem, StoreError> {
        match self {
            StoreBackend::Elasticsearch(store) => store.write_one(request).await,
            StoreBackend::InMemory(store) => store.write_one(request).await,
        }
    }

    async fn write_bulk(&self, batch: &Batch) -> Result<BatchOutcome, StoreError> {
        match self {
            StoreBackend::Elasticsearch(store) => store.write_bulk(batch).await,
            StoreBackend::InMemory(store) => store.write_bulk(batch).await,
        }
    }
}

// ===== Source Trait and Backend Enum =====

/// 🚰 A source that produces messages until it runs dry.
///
/// # Contract
/// - `next_message` returns `Ok(Some(..))` while messages flow and `Ok(None)` once done.
/// - `&mut self` because sources have state. Read positions, mostly.
#[async_trait]
pub trait Source: Debug + Send {
    async fn next_message(&mut self) -> Result<Option<Message>>;
}

#[derive(Debug)]
pub enum SourceBackend {
    Ndjson(NdjsonSource),
    InMemory(InMemorySource),
}

impl SourceBackend {
    pub async fn from_config(config: &SourceConfig) -> Result<Self> {
        match config {
            SourceConfig::File { file_name } => {
                let source = NdjsonSource::open(file_name).await.with_context(|| {
                    format!(
                        "💀 Could not open message file '{}'. It has to exist and be readable.",
                        file_name.display()
                    )
                })?;
                Ok(SourceBackend::Ndjson(source))
            }
            SourceConfig::Stdin => Ok(SourceBackend::Ndjson(NdjsonSource::stdin())),
        }
    }
}

#[async_trait]
impl Source for SourceBackend {
    async fn next_message(&mut self) -> Result<Option<Message>> {
        match self {
            SourceBackend::Ndjson(source) => source.next_message().await,
            SourceBackend::InMemory(source) => source.next_message().await,
        }
    }
}
