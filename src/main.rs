//! Webhook fan-out service binary.
//!
//! Receives inbound webhooks on a configurable path, relays them to the
//! configured endpoints, and exposes the management API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webhook_fanout::{serve, AppState, FanoutConfig, ServerConfig, Storage};

#[derive(Parser, Debug)]
#[command(name = "webhook-fanout")]
#[command(version, about = "Webhook fan-out relay: receive, persist, fan out, replay")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8787")]
    addr: SocketAddr,

    /// Path that receives inbound webhooks.
    #[arg(long, default_value = "/webhook", env = "WEBHOOK_PATH")]
    webhook_path: String,

    /// Bearer token required on management endpoints. Unset leaves them open.
    #[arg(long, env = "FANOUT_MANAGEMENT_TOKEN")]
    management_token: Option<String>,

    /// Per-endpoint delivery timeout in seconds.
    #[arg(long, default_value_t = 30)]
    request_timeout_secs: u64,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,

    /// Postgres connection string. Unset uses in-memory storage.
    #[cfg(feature = "postgres")]
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "webhook_fanout=info".into()),
    );
    if args.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %args.addr,
        webhook_path = %args.webhook_path,
        "starting webhook-fanout"
    );

    if args.management_token.is_none() {
        warn!("management API is unauthenticated; set --management-token in production");
    }

    let storage = build_storage(&args).await?;
    let fanout = FanoutConfig {
        request_timeout: Duration::from_secs(args.request_timeout_secs),
    };
    let server = ServerConfig {
        webhook_path: args.webhook_path.clone(),
        management_token: args.management_token.clone(),
    };

    let state = AppState::new(storage, fanout, server);
    let listener = TcpListener::bind(args.addr).await?;
    serve(listener, state).await?;
    Ok(())
}

#[cfg(feature = "postgres")]
async fn build_storage(args: &Args) -> anyhow::Result<Arc<dyn Storage>> {
    use tracing::error;

    match &args.database_url {
        Some(url) => {
            let (client, connection) = tokio_postgres::connect(url, tokio_postgres::NoTls).await?;
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    error!(error = %err, "postgres connection closed");
                }
            });
            info!("using postgres storage");
            Ok(Arc::new(
                webhook_fanout::PostgresStorage::new(client).await?,
            ))
        }
        None => {
            info!("using in-memory storage; state is lost on restart");
            Ok(Arc::new(webhook_fanout::InMemoryStorage::new()))
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn build_storage(_args: &Args) -> anyhow::Result<Arc<dyn Storage>> {
    info!("using in-memory storage; state is lost on restart");
    Ok(Arc::new(webhook_fanout::InMemoryStorage::new()))
}
