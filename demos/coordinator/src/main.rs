//! The PeerLink coordinator process.
//!
//! Environment:
//! - `PEERLINK_BIND`: listen address, default `0.0.0.0:8080`
//! - `PEERLINK_IDLE_TIMEOUT_SECS`: drop connections silent for this long
//! - `RUST_LOG`: log filter, default `info`

use std::time::Duration;

use peerlink::prelude::*;

const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[derive(Debug, PartialEq, Eq)]
struct Settings {
    bind: String,
    idle_timeout: Option<Duration>,
}

impl Settings {
    fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let bind = lookup("PEERLINK_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let idle_timeout = lookup("PEERLINK_IDLE_TIMEOUT_SECS").and_then(|raw| {
            match raw.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring invalid PEERLINK_IDLE_TIMEOUT_SECS");
                    None
                }
            }
        });
        Self { bind, idle_timeout }
    }
}

#[tokio::main]
async fn main() -> Result<(), PeerlinkError> {
    peerlink::telemetry::init();
    let settings = Settings::from_env();

    let mut builder = Coordinator::builder().bind(&settings.bind);
    if let Some(timeout) = settings.idle_timeout {
        builder = builder.idle_timeout(timeout);
    }
    let coordinator = builder.build().await?;
    match coordinator.local_addr() {
        Ok(addr) => tracing::info!(%addr, "peerlink coordinator listening"),
        Err(_) => tracing::info!(addr = %settings.bind, "peerlink coordinator listening"),
    }

    coordinator.run().await?;
    Ok(())
}
