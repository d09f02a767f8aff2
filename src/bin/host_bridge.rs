//! Headless host bridge binary for stdin/stdout JSON communication.
//!
//! Reads `CommandEnvelope` messages as newline-delimited JSON from stdin,
//! routes them to the call coordinator, and writes `ResponseEnvelope` and
//! `EventEnvelope` messages to stdout.
//!
//! Usage: `huddle-host [--config <path>]`. Without `--config` the default
//! config path is used when it exists, built-in defaults otherwise.
//!
//! All tracing/diagnostic output goes to stderr (and the optional log
//! directory) so that stdout remains a clean JSON protocol channel.

use huddle::HuddleConfig;
use huddle::diagnostics::init_tracing;
use huddle::host::{HostBridge, HostEvents, run_stdio_bridge};
use huddle::pipeline::Coordinator;
use std::path::PathBuf;
use std::sync::Arc;

fn config_path_from_args() -> anyhow::Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => Ok(None),
        Some("--config" | "-c") => match args.next() {
            Some(path) => Ok(Some(PathBuf::from(path))),
            None => anyhow::bail!("--config requires a path"),
        },
        Some(other) => anyhow::bail!("unknown argument `{other}`; usage: huddle-host [--config <path>]"),
    }
}

fn load_config() -> anyhow::Result<HuddleConfig> {
    let path = match config_path_from_args()? {
        Some(path) => path,
        None => {
            let default = HuddleConfig::default_config_path();
            if !default.exists() {
                return Ok(HuddleConfig::default());
            }
            default
        }
    };
    HuddleConfig::from_file(&path)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    let _log_guard = init_tracing(&config.logging)?;

    tracing::info!("huddle-host starting");

    let coordinator = Arc::new(Coordinator::from_config(config)?);
    let bridge = Arc::new(HostBridge::new(coordinator, HostEvents::default()));

    run_stdio_bridge(bridge).await.map_err(|e| {
        tracing::error!(error = %e, "huddle-host exited with error");
        anyhow::anyhow!("huddle-host failed: {e}")
    })?;

    tracing::info!("huddle-host shut down cleanly");
    Ok(())
}
