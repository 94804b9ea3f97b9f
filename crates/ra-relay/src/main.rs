//! remote-admin relay daemon
//!
//! Brokers agent and operator WebSocket connections, media signaling and
//! privileged actions.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ra_core::config::{self, RelayConfig};
use ra_core::traits::{AuditSink, Sfu};
use ra_core::{Principal, Role};
use ra_relay::audit::{AuditLog, JsonlAuditSink, TracingAuditSink};
use ra_relay::auth::TokenAuthority;
use ra_relay::media::MemorySfu;
use ra_relay::{RelayServer, RelayState};

#[derive(Parser)]
#[command(name = "ra-relay")]
#[command(about = "remote-admin relay daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Mint an operator token with the configured secret and print it
    Token {
        /// Role carried by the token (readonly, operator, admin)
        #[arg(long, default_value = "operator")]
        role: Role,

        /// User name carried by the token
        #[arg(long)]
        user: Option<String>,
    },
}

fn load(args: &Args) -> Result<RelayConfig> {
    let mut config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                RelayConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            RelayConfig::default()
        }
    };

    config.apply_env_overrides();
    if let Some(bind) = &args.bind {
        config.bind_address = bind.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load(&args)?;

    if let Some(Command::Token { role, user }) = &args.command {
        let tokens = TokenAuthority::new(&config.auth.jwt_secret, config.auth.token_ttl);
        let token = tokens
            .issue(&Principal::new(*role, user.clone()))
            .context("Failed to issue token")?;
        println!("{}", token);
        return Ok(());
    }

    tracing::info!("remote-admin relay starting...");

    if config.agent_key == RelayConfig::default().agent_key {
        tracing::warn!("Using the default agent key - set AGENT_KEY or agent_key");
    }
    if config.auth.jwt_secret == "secret" {
        tracing::warn!("Using the default token secret - set JWT_SECRET or auth.jwt_secret");
    }
    if config.auth.use_directory && config.auth.users.is_empty() {
        tracing::warn!("Directory login enabled with no users - every login will fail");
    }

    let sink: Arc<dyn AuditSink> = if config.audit.enabled {
        tracing::info!("Audit log: {:?}", config.audit.path);
        Arc::new(JsonlAuditSink::new(config.audit.path.clone()))
    } else {
        Arc::new(TracingAuditSink)
    };

    let sfu = MemorySfu::with_ports(config.media.rtc_min_port, config.media.rtc_max_port);
    tracing::info!(
        "SFU ports {}-{}, listening on {}",
        config.media.rtc_min_port,
        config.media.rtc_max_port,
        config.media.listen_ip
    );

    let bind_addr = config.bind_address.clone();
    let state = Arc::new(RelayState::new(
        config,
        Arc::new(sfu.clone()),
        AuditLog::new(sink),
    ));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    let server = RelayServer::new(Arc::clone(&state), cancel.clone());

    tokio::select! {
        result = server.run(&bind_addr) => result?,
        _ = sfu.worker_died() => {
            tracing::error!("SFU worker died, shutting down");
            cancel.cancel();
            anyhow::bail!("SFU worker died");
        }
    }

    tracing::info!("Relay shutdown complete");
    Ok(())
}
