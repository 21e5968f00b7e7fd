//! 📦 Common data structures -- the building blocks of esink.
//!
//! 🎬 COLD OPEN: INT. MESSAGE BROKER, 3:47 AM
//!
//! A message arrives. It has headers. It has a payload. It has no idea that in a
//! few microseconds it will be stamped with an index name, maybe an id, maybe a
//! routing key, and hurled into a search cluster alongside its batch-mates.
//!
//! This module holds the humble structs that ferry it there:
//! [`Message`] on the way in, [`WriteRequest`] in the middle, [`Batch`] when it
//! travels with friends, and [`OutcomeItem`] / [`BatchOutcome`] when the store
//! tells us how it went. 🦆

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value};

/// 📡 Header that overrides the configured index for a single message.
pub const INDEX_NAME_HEADER: &str = "INDEX_NAME";

/// 🔑 Header that carries an explicit document id when no id expression is configured.
pub const INDEX_ID_HEADER: &str = "INDEX_ID";

/// 📦 The body of an inbound message.
///
/// Only two shapes are indexable: JSON text and a string-keyed mapping.
/// Everything else rides along as [`Payload::Bytes`] and is indexed without a source,
/// which the store will politely (or not so politely) reject.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// 📝 JSON-encoded text, shipped to the store as-is.
    Text(String),
    /// 🗺️ A structured key-value document.
    Map(Map<String, Value>),
    /// 🤷 Anything else. Carried, never indexed as a source.
    Bytes(Vec<u8>),
}

/// ✉️ One inbound message: headers plus a payload. That's the whole envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub headers: BTreeMap<String, String>,
    pub payload: Payload,
}

impl Message {
    /// 🚀 A message with no headers. The minimalist lifestyle.
    pub fn new(payload: Payload) -> Self {
        Self {
            headers: BTreeMap::new(),
            payload,
        }
    }

    /// 📝 Shorthand for a JSON text payload.
    pub fn text(payload: impl Into<String>) -> Self {
        Self::new(Payload::Text(payload.into()))
    }

    /// 🏷️ Builder-style header setter, for tests and sources alike.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// 📄 The document body attached to a [`WriteRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentSource {
    Json(String),
    Fields(Map<String, Value>),
}

impl DocumentSource {
    /// 🔄 Render the source as JSON text for the wire.
    ///
    /// `Json` passes through untouched, byte-for-byte. We trust it. We have to.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            DocumentSource::Json(raw) => Ok(raw.clone()),
            DocumentSource::Fields(fields) => serde_json::to_string(fields),
        }
    }

    /// 🔍 Parse the source into a JSON value (the in-memory store wants to look inside).
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            DocumentSource::Json(raw) => serde_json::from_str(raw),
            DocumentSource::Fields(fields) => Ok(Value::Object(fields.clone())),
        }
    }
}

/// 🎯 One document write, fully resolved. Immutable once the builder hands it over.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    pub target_index: String,
    pub document_id: Option<String>,
    pub routing: Option<String>,
    pub timeout: Option<Duration>,
    pub source: Option<DocumentSource>,
}

impl WriteRequest {
    /// 📋 Short human-readable description for the logs you will grep at 3am.
    pub fn description(&self) -> String {
        let source = match &self.source {
            Some(DocumentSource::Json(raw)) => format!("{} bytes of json", raw.len()),
            Some(DocumentSource::Fields(fields)) => format!("{} fields", fields.len()),
            None => "no source".to_string(),
        };
        format!(
            "index {{[{}][{}], {}}}",
            self.target_index,
            self.document_id.as_deref().unwrap_or("<auto>"),
            source
        )
    }
}

/// 🚌 A released group: write requests in arrival order, shipped as one bulk call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    requests: Vec<WriteRequest>,
}

impl Batch {
    pub fn new(requests: Vec<WriteRequest>) -> Self {
        Self { requests }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn requests(&self) -> &[WriteRequest] {
        &self.requests
    }

    /// ⏱️ The per-request timeout for the whole bulk call: the longest one any member asked for.
    pub fn timeout(&self) -> Option<Duration> {
        self.requests.iter().filter_map(|r| r.timeout).max()
    }

    /// 📋 "requests[3], indices[logs-2024-01-15]" -- the bulk call's business card.
    pub fn description(&self) -> String {
        let mut indices: Vec<&str> = self
            .requests
            .iter()
            .map(|r| r.target_index.as_str())
            .collect();
        indices.sort_unstable();
        indices.dedup();
        format!(
            "requests[{}], indices[{}]",
            self.requests.len(),
            indices.join(", ")
        )
    }
}

/// ✅ / 💀 The store's verdict on one write request.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeItem {
    pub succeeded: bool,
    pub target_index: String,
    pub document_id: Option<String>,
    /// 🔢 Document version after the write. Only on success.
    pub version: Option<i64>,
    /// 📝 `created`, `updated`, ... whatever the store called it.
    pub result: Option<String>,
    /// 🧩 Shard summary as reported by the store, when it reports one.
    pub shard: Option<String>,
    pub status: u16,
    /// 💀 Why it failed. Only on failure.
    pub failure_message: Option<String>,
}

impl OutcomeItem {
    pub fn success(
        target_index: impl Into<String>,
        document_id: Option<String>,
        version: Option<i64>,
        status: u16,
    ) -> Self {
        Self {
            succeeded: true,
            target_index: target_index.into(),
            document_id,
            version,
            result: None,
            shard: None,
            status,
            failure_message: None,
        }
    }

    pub fn failure(
        target_index: impl Into<String>,
        document_id: Option<String>,
        status: u16,
        failure_message: impl Into<String>,
    ) -> Self {
        Self {
            succeeded: false,
            target_index: target_index.into(),
            document_id,
            version: None,
            result: None,
            shard: None,
            status,
            failure_message: Some(failure_message.into()),
        }
    }

    pub fn with_result(mut self, result: Option<String>) -> Self {
        self.result = result;
        self
    }

    pub fn with_shard(mut self, shard: Option<String>) -> Self {
        self.shard = shard;
        self
    }
}

/// 📊 Per-item results of one bulk call, in request order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchOutcome {
    pub items: Vec<OutcomeItem>,
    pub has_failures: bool,
}

impl BatchOutcome {
    /// 🔍 Computes `has_failures` from the items themselves. No trusting aggregate flags.
    pub fn new(items: Vec<OutcomeItem>) -> Self {
        let has_failures = items.iter().any(|item| !item.succeeded);
        Self {
            items,
            has_failures,
        }
    }

    /// 💀 `(position, item)` for every failed item.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &OutcomeItem)> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| !item.succeeded)
    }

    /// 📋 One line per failed item: position, index, id and reason.
    pub fn failure_summary(&self) -> String {
        self.failures()
            .map(|(position, item)| {
                format!(
                    "\n[{}]: index [{}], id [{}], message [{}]",
                    position,
                    item.target_index,
                    item.document_id.as_deref().unwrap_or("<auto>"),
                    item.failure_message.as_deref().unwrap_or("unknown failure")
                )
            })
            .collect()
    }
}
