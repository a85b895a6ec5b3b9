//! Governance service binary

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use governance::config::{BatchDefaults, RateLimitDefaults};
use governance::database::mask_connection_string;
use governance::{Database, GovernanceConfig, GovernanceService};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[clap(name = "governance-server")]
#[clap(about = "Batch approval workflow for VM lifecycle requests")]
struct Args {
    /// Database connection URL (can also be set via GOVERNANCE_DATABASE_URL env var)
    #[clap(long, env = "GOVERNANCE_DATABASE_URL")]
    database_url: String,

    /// Listen address for the HTTP server
    #[clap(long, default_value = "0.0.0.0:8080", env = "GOVERNANCE_LISTEN_ADDR")]
    listen_addr: SocketAddr,

    /// Maximum database connections in pool
    #[clap(long, default_value_t = 50, env = "GOVERNANCE_MAX_CONNECTIONS")]
    max_connections: u32,

    /// Log every SQL statement at debug level
    #[clap(long, env = "GOVERNANCE_SQL_LOGGING")]
    sql_logging: bool,

    /// Auth provider resolving request identities
    #[clap(long, default_value = "header", env = "GOVERNANCE_AUTH_PROVIDER")]
    auth_provider: String,

    /// Default per-user cap on pending batches
    #[clap(long, env = "GOVERNANCE_MAX_PENDING_PARENTS")]
    max_pending_parents: Option<u64>,

    /// Default per-user cap on pending batch items
    #[clap(long, env = "GOVERNANCE_MAX_PENDING_CHILDREN")]
    max_pending_children: Option<u64>,

    /// Default per-user cooldown between batches, in seconds
    #[clap(long, env = "GOVERNANCE_COOLDOWN_SECONDS")]
    cooldown_seconds: Option<u64>,

    /// Create missing tables before serving
    #[clap(long, env = "GOVERNANCE_INIT_SCHEMA")]
    init_schema: bool,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("governance={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting governance service");
    tracing::info!("Database URL: {}", mask_connection_string(&args.database_url));
    tracing::info!("Listen address: {}", args.listen_addr);

    let mut rate_limits = RateLimitDefaults::default();
    if let Some(v) = args.max_pending_parents {
        rate_limits.max_pending_parents = v;
    }
    if let Some(v) = args.max_pending_children {
        rate_limits.max_pending_children = v;
    }
    if let Some(v) = args.cooldown_seconds {
        rate_limits.cooldown_seconds = v;
    }

    let config = GovernanceConfig {
        database_url: args.database_url,
        max_connections: args.max_connections,
        enable_sql_logging: args.sql_logging,
        listen_addr: args.listen_addr,
        auth_provider: args.auth_provider,
        rate_limits,
        batch: BatchDefaults::default(),
        ..Default::default()
    };

    let db = Database::new(&config).await?;
    if args.init_schema {
        tracing::info!("Initialising schema");
        db.create_schema().await?;
    }
    let service = GovernanceService::with_database(
        config,
        db,
        governance::AuthProviderRegistry::with_builtins(),
    );

    // Handle shutdown gracefully
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received shutdown signal");
    };

    tokio::select! {
        result = service.run() => {
            if let Err(e) = result {
                tracing::error!("Service error: {}", e);
                std::process::exit(1);
            }
        }
        _ = shutdown => {
            tracing::info!("Shutting down gracefully");
        }
    }

    tracing::info!("Governance service stopped");
    Ok(())
}
