//! stagehand API server

use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use stagehand_api::{AppState, routes};
use stagehand_config::load_system_config;
use stagehand_db::{create_pool, run_migrations};
use stagehand_jenkins::JenkinsClient;
use stagehand_scheduler::{
    IntakeSettings, LogMailer, RestartPolicy, Stores, Watchdog, spawn_supervised,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stagehand-server", about = "stagehand build orchestration server")]
struct Args {
    /// Path to the system configuration
    #[arg(long, env = "STAGEHAND_CONFIG", default_value = "stagehand.kdl")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = load_system_config(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, config.database.max_connections).await?;
    run_migrations(&pool).await?;
    info!("Database connected");

    let ci = JenkinsClient::from_config(&config.jenkins)?;
    info!(url = %config.jenkins.url, intake_job = %config.jenkins.intake_job, "CI engine configured");

    let shutdown = CancellationToken::new();
    let state = AppState::new(
        pool.clone(),
        Arc::new(ci),
        Arc::new(LogMailer),
        IntakeSettings::from_config(&config.jenkins),
        shutdown.clone(),
    );

    let watchdog = if config.watchdog.enabled {
        let watchdog = Watchdog::from_config(
            Stores::postgres(pool),
            state.tracker.clone(),
            &config.watchdog,
        );
        Some(spawn_supervised(
            Arc::new(watchdog),
            RestartPolicy::from_config(&config.watchdog),
            shutdown.clone(),
        ))
    } else {
        info!("Watchdog disabled");
        None
    };

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", config.server.listen);
    let listener = TcpListener::bind(config.server.listen).await?;
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown.clone()));

    let watchdog_done = async move {
        match watchdog {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        res = server.into_future() => res?,
        res = watchdog_done => {
            let err = match res {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => anyhow::Error::from(stagehand_core::Error::from(e)),
                Err(e) => anyhow::Error::from(e),
            };
            error!(error = %err, "Watchdog terminated, shutting down");
            shutdown.cancel();
            return Err(err);
        }
    }

    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}
