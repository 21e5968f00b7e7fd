//! 📜 NDJSON message source -- one message per line, from a file or from stdin.
//!
//! Each line is a message envelope:
//!
//! ```text
//! {"headers": {"INDEX_NAME": "orders", "key": "o-1"}, "payload": {"order": "o-1"}}
//! ```
//!
//! A string payload becomes [`Payload::Text`], an object becomes [`Payload::Map`],
//! anything else rides along as [`Payload::Bytes`]. A line that is not an envelope
//! is the payload itself, as text. Blank lines are skipped without comment.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::trace;

use crate::backends::Source;
use crate::common::{Message, Payload};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    #[serde(default)]
    headers: BTreeMap<String, Value>,
    payload: Value,
}

/// 🔄 Turn one line into a message. Never fails: a line that is not an envelope is just text.
pub fn parse_envelope(line: &str) -> Message {
    let Ok(envelope) = serde_json::from_str::<Envelope>(line) else {
        return Message::text(line);
    };

    let headers = envelope
        .headers
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            (name, value)
        })
        .collect();

    let payload = match envelope.payload {
        Value::String(text) => Payload::Text(text),
        Value::Object(fields) => Payload::Map(fields),
        other => Payload::Bytes(other.to_string().into_bytes()),
    };

    Message { headers, payload }
}

/// 📜 Reads envelopes line by line from any buffered async reader.
pub struct NdjsonSource {
    name: String,
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
    line_number: usize,
}

impl std::fmt::Debug for NdjsonSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdjsonSource")
            .field("name", &self.name)
            .field("line_number", &self.line_number)
            .finish()
    }
}

impl NdjsonSource {
    pub fn from_reader(
        name: impl Into<String>,
        reader: impl AsyncBufRead + Send + Unpin + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            reader: Box::new(reader),
            line_number: 0,
        }
    }

    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).await?;
        Ok(Self::from_reader(
            path.display().to_string(),
            BufReader::new(file),
        ))
    }

    pub fn stdin() -> Self {
        Self::from_reader("<stdin>", BufReader::new(io::stdin()))
    }
}

#[async_trait]
impl Source for NdjsonSource {
    async fn next_message(&mut self) -> Result<Option<Message>> {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = self.reader.read_line(&mut line).await.with_context(|| {
                format!(
                    "💀 Reading line {} of '{}' went sideways. Is it UTF-8? Is it still there?",
                    self.line_number + 1,
                    self.name
                )
            })?;
            if bytes_read == 0 {
                trace!("📜 '{}' ran dry after {} lines", self.name, self.line_number);
                return Ok(None);
            }
            self.line_number += 1;

            let content = line.trim_end_matches(['\n', '\r']);
            if content.trim().is_empty() {
                continue;
            }
            return Ok(Some(parse_envelope(content)));
        }
    }
}
