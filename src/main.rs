//! CYAN server.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────── EDGE (:12345) ───────────────────────┐
//!   Client ───────▶│ net::Listener → ConnectionActor → parser → SessionLink ──────┼──┐
//!          ◀───────│                      reply duty ◀── link reader ◀────────────┼┐ │
//!                  └──────────────────────────────────────────────────────────────┘│ │
//!                  ┌──────────────────── SESSION (127.0.0.1:12346) ───────────────┐│ │
//!                  │ SessionRouter → SessionRegistry → SessionActor (per token) ◀─┼┼─┘
//!                  │                                      │                       ││
//!                  │                         ResourceHandler / placeholder ───────┼┘
//!                  └──────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};

use cyan_server::config::{load_config, ServerConfig};
use cyan_server::handler::{AcceptingHandler, ResourceHandler};
use cyan_server::lifecycle::{signals, Shutdown};
use cyan_server::net::Listener;
use cyan_server::observability::{logging, metrics};
use cyan_server::{EdgeServer, SessionRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Tier {
    Edge,
    Session,
    All,
}

#[derive(Parser)]
#[command(name = "cyan-server")]
#[command(about = "Two-tier CYAN protocol server", long_about = None)]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Which tier(s) to run in this process.
    #[arg(short, long, value_enum, default_value_t = Tier::All)]
    tier: Tier,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), tier = ?args.tier, "cyan-server starting");
    tracing::info!(
        edge_address = %config.edge.bind_address,
        session_address = %config.session.bind_address,
        ttl_secs = config.session.ttl_secs,
        max_version = %config.protocol.max_version,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let mut tasks = tokio::task::JoinSet::new();

    // Session tier binds first so the edge never opens links to nothing.
    if matches!(args.tier, Tier::Session | Tier::All) {
        let listener = Listener::bind(
            "session",
            &config.session.bind_address,
            config.session.max_connections,
        )
        .await?;
        let handler: Arc<dyn ResourceHandler> = Arc::new(AcceptingHandler::new());
        let router = SessionRouter::new(&config, handler);
        tasks.spawn(router.run(listener, shutdown.subscribe()));
    }

    if matches!(args.tier, Tier::Edge | Tier::All) {
        let listener = Listener::bind("edge", &config.edge.bind_address, config.edge.max_connections).await?;
        let server = EdgeServer::new(&config);
        tasks.spawn(server.run(listener, shutdown.subscribe()));
    }

    signals::spawn_signal_listener(shutdown.clone());

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Listener failed");
                shutdown.trigger();
            }
            Err(e) => {
                tracing::error!(error = %e, "Server task panicked");
                shutdown.trigger();
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
