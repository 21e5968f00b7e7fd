//! 🚀 esink-cli -- the front door.
//!
//! Loads config, sets up logging, runs the sink, and explains itself when things go wrong.
//!
//! ```text
//! esink-cli [config.toml]      # defaults to ./esink.toml, env vars (ESINK_*) fill the gaps
//! ```

use anyhow::{Context, Result};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 🔧 Steps:
/// 1. Init tracing (`RUST_LOG=esink=debug` for the chatty version)
/// 2. Find the config file, if there is one
/// 3. Load config
/// 4. Run
/// 5. On failure, print the whole error chain and a hint when it smells like networking
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let path_arg = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "esink.toml".to_string());

    let config_file = std::path::Path::new(&path_arg);
    let config_file = config_file
        .try_exists()
        .with_context(|| {
            format!(
                "💀 Could not check whether the configuration file exists. Was checking here: '{}'",
                config_file.display()
            )
        })?
        .then_some(config_file);

    let app_config = esink::app_config::load_config(config_file).context(
        "💀 In esink-cli, main, we couldn't load the configuration. Check the file and the ESINK_* environment variables.",
    )?;

    if let Err(err) = esink::run(app_config).await {
        error!("💀 error: {}", err);
        let mut looks_like_connectivity = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause = cause.to_string();
            if cause.contains("error sending request")
                || cause.contains("connection refused")
                || cause.contains("Connection refused")
                || cause.contains("tcp connect error")
                || cause.contains("dns error")
            {
                looks_like_connectivity = true;
            }
        }

        if looks_like_connectivity {
            error!(
                "🔧 hint: Elasticsearch does not seem to be reachable. \
                Check that the cluster is running and that the configured url is right. \
                With Docker, `docker ps` shows what is up."
            );
        }

        std::process::exit(1);
    }

    Ok(())
}
