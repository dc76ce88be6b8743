use std::net::{IpAddr, SocketAddr};

use clap::Parser;
use rpc_method_router::{config::ProxyConfig, server};

#[derive(Debug, Parser)]
#[command(version, about = "Method-aware JSON-RPC router")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, env = "CONFIG_PATH", default_value = "config.yaml")]
    config: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,
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
    tracing::info!(config = %args.config, "loading configuration");

    let cfg = ProxyConfig::load(&args.config).await?;
    server::run(cfg, SocketAddr::new(args.host, args.port)).await
}
