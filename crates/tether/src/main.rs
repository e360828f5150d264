//! tetherd — the tether remoting bridge server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};

use tether_rpc::registry::{HandlerGroup, MethodRegistry, StatelessProvider};
use tether_server::{BridgeServer, ServerConfig};

mod groups;

#[derive(Debug, Parser)]
#[command(name = "tetherd", about = "tether remoting bridge server", version)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

/// Defaults, then the config file, then `TETHER_`-prefixed environment
/// variables (`__` separates nesting), then CLI flags — last one wins.
fn load_config(args: &Args) -> anyhow::Result<ServerConfig> {
    let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
    if let Some(path) = &args.config {
        figment = figment.merge(Json::file(path));
    }
    let mut config: ServerConfig = figment
        .merge(Env::prefixed("TETHER_").split("__"))
        .extract()
        .context("invalid configuration")?;

    if let Some(host) = &args.host {
        config.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    // Scan before the transport accepts anything; an id collision here
    // must abort startup, never degrade silently.
    let mut registry = MethodRegistry::new();
    let candidates: Vec<Arc<dyn HandlerGroup>> = vec![Arc::new(groups::DiagnosticsGroup)];
    registry.scan(&candidates).context("registry scan failed")?;
    tracing::info!(handlers = registry.len(), "registry ready");

    let metrics_handle = tether_server::metrics::install_recorder();
    let server = BridgeServer::new(config, registry, Arc::new(StatelessProvider))
        .context("server startup failed")?
        .with_metrics(metrics_handle);

    let shutdown = server.shutdown().clone();
    let _ = tokio::spawn(async move { shutdown.wait_for_signal().await });

    server.serve().await.context("server failed")?;
    Ok(())
}
