//! `opal-node`: serve the built-in procedure table over HTTP.
//!
//! Configuration comes from `$OPAL_CONFIG` or `~/.opal/config.toml`, with
//! `OPAL_BIND` overriding the listen address. `RUST_LOG` overrides the
//! configured log filter.

use std::{env, future, io};

use anyhow::{Context, Result};
use opal_engine::{BIND_ENV, DEFAULT_LOG_FILTER, OpalConfig};
use opal_remote::builtins::register_builtins;
use opal_remote::{ProcedureRegistry, RemoteNode};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn init_tracing(configured: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();
}

fn registry() -> Result<ProcedureRegistry> {
    let mut registry = ProcedureRegistry::new();
    register_builtins(&mut registry).context("failed to register built-in procedures")?;
    Ok(registry)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for ctrl-c: {err}");
        // Keep serving rather than exiting immediately.
        future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Config errors are reported after logging is up.
    let loaded = OpalConfig::load();
    let filter = loaded
        .as_ref()
        .map_or(DEFAULT_LOG_FILTER, |config| config.log.filter.as_str())
        .to_string();
    init_tracing(&filter);

    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("{err}; using defaults");
            let mut config = OpalConfig::default();
            config.apply_bind_override(env::var(BIND_ENV).ok());
            config
        }
    };

    let registry = registry()?;
    if env::args().nth(1).as_deref() == Some("--procedures") {
        for (name, description) in registry.describe() {
            println!("{name:<12}  {description}");
        }
        return Ok(());
    }

    let node = RemoteNode::bind(&config.node, registry)
        .await
        .with_context(|| format!("failed to bind {}", config.node.bind))?;
    tracing::info!(addr = %node.local_addr(), "opal node listening");
    node.serve_with_shutdown(shutdown_signal())
        .await
        .context("node stopped with an error")?;
    Ok(())
}
