//! 🏗️ Document building -- one message in, one [`WriteRequest`] out.
//!
//! 🎬 *[a message walks into a builder. it leaves with an index name, an id,
//! a routing key and a stopwatch. it did not ask for any of these.]*
//!
//! Resolution rules, in the order they happen:
//! 1. 📡 index: the `INDEX_NAME` header, else the configured index.
//! 2. 📅 rolling suffix: `-{now formatted}` when a pattern is configured.
//!    A pattern that won't format leaves the name alone. Best effort, no drama.
//! 3. 🔑 id: the id expression when configured (failure is fatal for the message),
//!    else a non-empty `INDEX_ID` header, else nothing and the store picks one.
//! 4. 📄 source: text stays JSON text, maps stay fields, anything else gets no source.
//! 5. 🧭 routing and ⏱️ timeout straight from config.

pub mod expression;
pub mod rolling;

use std::time::Duration;

use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use tracing::{debug, info};

use crate::app_config::SinkConfig;
use crate::common::{
    DocumentSource, INDEX_ID_HEADER, INDEX_NAME_HEADER, Message, Payload, WriteRequest,
};
use crate::errors::SinkError;
pub use expression::{ExpressionError, IdExpression};

/// 🏗️ Turns messages into write requests. Pure, apart from asking the clock what day it is.
#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    default_index: String,
    rolling_format: Option<String>,
    id_expression: Option<IdExpression>,
    routing: Option<String>,
    timeout: Option<Duration>,
}

impl DocumentBuilder {
    /// 🚀 Compile the static part of the config. The id expression is parsed here, once.
    pub fn new(config: &SinkConfig) -> anyhow::Result<Self> {
        let id_expression = config
            .id
            .as_deref()
            .filter(|expression| !expression.trim().is_empty())
            .map(IdExpression::parse)
            .transpose()
            .with_context(|| {
                format!(
                    "💀 The id expression {:?} does not parse. It has to be headers[...], payload..., 'literals' and + between them.",
                    config.id.as_deref().unwrap_or_default()
                )
            })?;

        Ok(Self {
            default_index: config.index.clone(),
            rolling_format: config
                .date_time_rolling_format
                .clone()
                .filter(|format| !format.is_empty()),
            id_expression,
            routing: config.routing.clone().filter(|routing| !routing.is_empty()),
            timeout: config.request_timeout(),
        })
    }

    /// 🎯 Build a write request using the local wall clock for the rolling suffix.
    pub fn build(&self, message: Message) -> Result<WriteRequest, SinkError> {
        self.build_at(message, Local::now().naive_local())
    }

    /// 🎯 Build a write request as if it were `now`. Tests time-travel through here.
    pub fn build_at(&self, message: Message, now: NaiveDateTime) -> Result<WriteRequest, SinkError> {
        let target_index = self.resolve_index(&message, &now);
        let document_id = self.resolve_id(&message, &target_index)?;

        let request = WriteRequest {
            target_index,
            document_id,
            routing: self.routing.clone(),
            timeout: self.timeout,
            source: resolve_source(message.payload),
        };

        info!(
            index = %request.target_index,
            id = request.document_id.as_deref().unwrap_or("<auto>"),
            "🏗️ built write request: {}",
            request.description()
        );
        Ok(request)
    }

    fn resolve_index(&self, message: &Message, now: &NaiveDateTime) -> String {
        let mut index = message
            .header(INDEX_NAME_HEADER)
            .unwrap_or(&self.default_index)
            .to_string();

        if let Some(pattern) = &self.rolling_format {
            match rolling::format_suffix(pattern, now) {
                Ok(suffix) => {
                    index.push('-');
                    index.push_str(&suffix);
                }
                // -- 🤷 swallowed on purpose: the document still lands, just without a suffix
                Err(err) => debug!(
                    "📅 rolling format {:?} did not format ({}), index '{}' stays unsuffixed",
                    pattern, err, index
                ),
            }
        }

        index
    }

    fn resolve_id(&self, message: &Message, index: &str) -> Result<Option<String>, SinkError> {
        if let Some(expression) = &self.id_expression {
            return expression
                .evaluate(message)
                .map(Some)
                .map_err(|err| SinkError::Build {
                    index: index.to_string(),
                    expression: expression.to_string(),
                    reason: err.to_string(),
                });
        }

        Ok(message
            .header(INDEX_ID_HEADER)
            .filter(|id| !id.is_empty())
            .map(String::from))
    }
}

fn resolve_source(payload: Payload) -> Option<DocumentSource> {
    match payload {
        Payload::Text(raw) => Some(DocumentSource::Json(raw)),
        Payload::Map(fields) => Some(DocumentSource::Fields(fields)),
        Payload::Bytes(bytes) => {
            debug!(
                "🤷 payload of {} raw bytes is neither JSON text nor a map, indexing without a source",
                bytes.len()
            );
            None
        }
    }
}
