//! prefix-lb
//!
//! An HTTP load balancer that routes by longest path prefix and spreads
//! traffic over a pool of backends per route.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌────────────────────────────────────────────────────┐
//!                          │                    LOAD BALANCER                    │
//!                          │                                                     │
//!     Client Request       │  ┌──────────┐    ┌──────────┐    ┌──────────────┐   │
//!     ─────────────────────┼─▶│   rate   │───▶│ routing  │───▶│load_balancer │   │
//!                          │  │  limit   │    │  (trie)  │    │ pool+strategy│   │
//!                          │  └──────────┘    └──────────┘    └──────┬───────┘   │
//!                          │                                         │           │
//!                          │                                         ▼           │
//!     Client Response      │  ┌──────────┐    ┌──────────┐    ┌──────────────┐   │
//!     ◀────────────────────┼──│ observed │◀───│  http    │◀───│   backend    │◀──┼── Backend
//!                          │  │   body   │    │  client  │    │  (counters)  │   │   Server
//!                          │  └──────────┘    └──────────┘    └──────────────┘   │
//!                          │                                                     │
//!                          │  ┌───────────────────────────────────────────────┐  │
//!                          │  │ health monitor · admin API · telemetry        │  │
//!                          │  └───────────────────────────────────────────────┘  │
//!                          └────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use clap::Parser;
use tokio::net::TcpListener;

use prefix_lb::config::load_config;
use prefix_lb::lifecycle::{wait_for_signal, Shutdown};
use prefix_lb::observability::logging::init_logging;
use prefix_lb::{HttpServer, Telemetry};

#[derive(Parser)]
#[command(name = "prefix-lb", version, about = "Prefix-routed HTTP load balancer")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "prefix-lb.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "prefix-lb starting"
    );
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        request_timeout_secs = config.timeouts.request_secs,
        health_interval_secs = config.health_check.interval_secs,
        "Configuration loaded"
    );

    let telemetry = Arc::new(Telemetry::install(&config.observability)?);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config, telemetry.clone())?;

    let shutdown = Shutdown::new();
    let mut server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    tokio::select! {
        _ = wait_for_signal() => {
            shutdown.trigger();
            server_task.await??;
        }
        result = &mut server_task => {
            tracing::error!("HTTP server exited unexpectedly");
            result??;
        }
    }

    telemetry.shutdown();
    tracing::info!("Shutdown complete");
    Ok(())
}
