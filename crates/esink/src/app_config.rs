//! 🔧 App Configuration -- the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." -- every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::ElasticsearchStoreConfig;

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🚰 What the sink does with each message. The interesting part.
    pub sink: SinkConfig,
    /// 📡 Where documents end up.
    pub store: StoreConfig,
    /// ✉️ Where messages come from. Defaults to stdin, like a good unix citizen.
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 🚰 Sink behaviour: index naming, ids, routing, timeouts, batching.
///
/// Field names follow the property names operators already know:
/// `index`, `date_time_rolling_format`, `id`, `routing`, `timeout_seconds`,
/// `async`, `batch_size`, `group_timeout`.
#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    /// 📦 Default target index. Messages may override it with the `INDEX_NAME` header.
    pub index: String,
    /// 📅 Optional rolling suffix pattern, e.g. `yyyy-MM-dd` -> `logs-2024-01-15`.
    #[serde(default)]
    pub date_time_rolling_format: Option<String>,
    /// 🔑 Optional id expression, e.g. `headers['key']` or `payload.user.id`.
    #[serde(default)]
    pub id: Option<String>,
    /// 🧭 Optional shard routing value attached to every document.
    #[serde(default)]
    pub routing: Option<String>,
    /// ⏱️ Per-request store timeout in seconds. 0 (or less) means "no opinion".
    #[serde(default)]
    pub timeout_seconds: i64,
    /// 🎭 Fire-and-forget indexing. Failures go to the failure channel instead of the caller.
    #[serde(default, rename = "async")]
    pub async_mode: bool,
    /// 📦 Documents per bulk request. 1 (or less) disables batching altogether.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    /// ⏳ Idle milliseconds before a partial batch is released. Negative disables it.
    #[serde(default = "default_group_timeout")]
    pub group_timeout: i64,
}

fn default_batch_size() -> i64 {
    1
}

// -- ⏳ -1: the "wait for a full batch, however long it takes" setting. Bring snacks.
fn default_group_timeout() -> i64 {
    -1
}

impl SinkConfig {
    /// 🚀 A config with every knob at its default. Tests love this one.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            date_time_rolling_format: None,
            id: None,
            routing: None,
            timeout_seconds: 0,
            async_mode: false,
            batch_size: default_batch_size(),
            group_timeout: default_group_timeout(),
        }
    }

    /// 📦 Batch size with the nonsense clamped away: anything below 1 means 1.
    pub fn effective_batch_size(&self) -> usize {
        usize::try_from(self.batch_size).unwrap_or(0).max(1)
    }

    /// ⏳ The idle timeout, or `None` when only the count may release a group.
    pub fn idle_timeout(&self) -> Option<Duration> {
        u64::try_from(self.group_timeout)
            .ok()
            .map(Duration::from_millis)
    }

    /// ⏱️ Per-request store timeout, when one is configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        u64::try_from(self.timeout_seconds)
            .ok()
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs)
    }
}

/// 📡 The index store backends we know how to talk to.
#[derive(Debug, Deserialize, Clone)]
pub enum StoreConfig {
    Elasticsearch(ElasticsearchStoreConfig),
    /// 🧠 RAM only. Dry runs and tests. Gone when the process is.
    InMemory,
}

/// ✉️ Inbound message sources. Each line is an NDJSON message envelope.
#[derive(Debug, Deserialize, Clone, Default)]
pub enum SourceConfig {
    File { file_name: PathBuf },
    #[default]
    Stdin,
}

/// 🧵 Runtime knobs: how deep the queue is, how many workers drain it.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_queue_capacity", alias = "channel_size")]
    pub queue_capacity: usize,
    /// 🧵 Concurrent producers feeding the pipeline. More than one means a shared group under contention.
    #[serde(default = "default_sink_parallelism", alias = "num_sink_workers")]
    pub sink_parallelism: usize,
}

fn default_queue_capacity() -> usize {
    10
}

fn default_sink_parallelism() -> usize {
    1
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            sink_parallelism: default_sink_parallelism(),
        }
    }
}

/// 🚀 Load the config -- from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`ESINK_*`, nested with `__`, e.g.
/// `ESINK_SINK__BATCH_SIZE=50`) with an optional TOML file. TOML wins on conflicts.
///
/// 💀 Returns an error if config is unparseable. The message says which source to blame.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("ESINK_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (ESINK_*). \
             The file exists in our hearts, but apparently not on disk (or not in that shape).",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (ESINK_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    config.extract().context(context_msg)
}
