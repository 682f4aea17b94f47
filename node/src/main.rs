use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tracing::info;

use walletbridge_client::{AuditClient, RedisStore, RedisTransport};
use walletbridge_node::{Engine, NodeConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Fabric connection string (pub/sub and wallet store).
    #[arg(long, env = "REDIS_URL")]
    redis_url: String,

    /// Audit sink base URL.
    #[arg(long, env = "AUDIT_API_URL")]
    audit_url: String,

    /// Stable node identifier; generated when omitted.
    #[arg(long, env = "NODE_ID")]
    node_id: Option<String>,

    /// Session lease TTL in seconds.
    #[arg(long, default_value_t = 30)]
    lease_ttl_secs: u64,

    /// Watchdog republish cadence in seconds (0 disables).
    #[arg(long, default_value_t = 0)]
    watchdog_secs: u64,
}

fn require_env(var: &str) -> Result<String> {
    let value = std::env::var(var).unwrap_or_default();
    if value.trim().is_empty() {
        anyhow::bail!("Missing required env: {var}");
    }
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let secret = require_env("WEBHOOK_SECRET")?;

    let defaults = NodeConfig::default();
    let config = NodeConfig {
        node_id: args.node_id.unwrap_or(defaults.node_id),
        lease_ttl: Duration::from_secs(args.lease_ttl_secs.max(1)),
        watchdog_interval: match args.watchdog_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
        ..defaults
    };

    let store = RedisStore::new(&args.redis_url).context("connect wallet store")?;
    let transport = RedisTransport::new(&args.redis_url).context("connect transport")?;
    let audit =
        AuditClient::new(&args.audit_url, &secret, &config.node_id).context("build audit client")?;

    let engine = Engine::new(config, store, transport, Some(audit));
    info!("wallet bridge node starting");

    tokio::select! {
        result = engine.run() => {
            result.context("command subscription failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received; releasing sessions");
        }
    }
    engine.shutdown().await;
    Ok(())
}
