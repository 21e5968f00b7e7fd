//! 💀 Errors -- named, numbered and ready for the postmortem.
//!
//! Two layers, same as everywhere else in this codebase:
//! - [`StoreError`]: what the index store (or the wire to it) did to us.
//! - [`SinkError`]: what the sink tells its caller. Build, single write, bulk write.
//!
//! Config and bootstrap code wraps these in `anyhow` with a context string. Nobody
//! retries anything in here. Redelivery is the messaging layer's problem. 🦆

use thiserror::Error;

use crate::common::BatchOutcome;

/// 📡 Failures talking to the index store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// 🔌 The request never got a response: DNS, TCP, TLS, timeout...
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// 🚫 The store answered, and the answer was no.
    #[error("store responded with status {status}: {body}")]
    Status { status: u16, body: String },

    /// 🚫 The store rejected one specific document.
    #[error("document rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },

    /// 🧩 The response body was not the shape we were promised.
    #[error("could not understand the store response: {0}")]
    Protocol(String),

    /// 🔧 The configured URL cannot host an index path.
    #[error("invalid store url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("could not serialize document source: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 🚰 Everything the sink can surface to whoever handed it a message.
#[derive(Debug, Error)]
pub enum SinkError {
    /// 🏗️ The id expression could not be evaluated. Fatal for that message.
    #[error("💀 Could not build a write request for index '{index}': id expression `{expression}` failed: {reason}")]
    Build {
        index: String,
        expression: String,
        reason: String,
    },

    /// 📄 A single-document write failed.
    #[error("💀 Error occurred while indexing document [index={index}, id={id}]: {cause}")]
    IndexFailure {
        index: String,
        id: String,
        #[source]
        cause: StoreError,
    },

    /// 📦 The bulk call itself failed. No per-item verdicts exist.
    #[error("💀 Error occurred while performing bulk index operation [{description}]: {cause}")]
    BulkTransport {
        description: String,
        #[source]
        cause: StoreError,
    },

    /// 🧨 The bulk call went through but some items were rejected.
    /// The successful ones are committed. Nobody rolls anything back.
    #[error("💀 Bulk indexing operation completed with failures: {failed} of {total} documents failed{summary}")]
    BulkFailure {
        failed: usize,
        total: usize,
        summary: String,
        outcome: BatchOutcome,
    },
}

impl SinkError {
    /// 🔧 Wraps a bulk outcome with failures into a [`SinkError::BulkFailure`].
    pub fn bulk_failure(outcome: BatchOutcome) -> Self {
        SinkError::BulkFailure {
            failed: outcome.failures().count(),
            total: outcome.items.len(),
            summary: outcome.failure_summary(),
            outcome,
        }
    }
}
