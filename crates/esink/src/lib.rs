//! 🚰 esink -- messages in, search-index documents out.
//!
//! Each message is turned into a write request (index name, optional id, routing,
//! timeout, source), optionally grouped with its neighbours by count or by idle
//! time, and written to the store one by one or as a bulk call.
//!
//! 🧭 Where things live:
//! - [`documents`]: message -> write request.
//! - [`aggregator`]: write requests -> batches.
//! - [`executor`]: write requests and batches -> the store.
//! - [`pipeline`]: the three above, wired per config.
//! - [`backends`]: the store and the message sources.
//! - [`supervisors`]: workers, queue and shutdown around a pipeline.

pub mod aggregator;
pub mod app_config;
pub mod backends;
pub mod common;
pub mod documents;
pub mod errors;
pub mod executor;
pub mod pipeline;
pub mod supervisors;

use anyhow::{Context, Result};
use tracing::info;

use crate::app_config::AppConfig;
use crate::supervisors::Supervisor;

/// 🚀 Run a full pass: read every message from the configured source into the configured store.
pub async fn run(app_config: AppConfig) -> Result<()> {
    let summary = Supervisor::new(app_config)
        .start_workers()
        .await
        .context("💀 The sink run did not complete cleanly.")?;
    info!("✅ all done: {}", summary);
    Ok(())
}
