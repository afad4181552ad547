use anyhow::Result;
use argus::{
    config::Config,
    serialization::SerialRegistry,
    storage::{SqliteResultStore, SqliteRunningTaskStore},
    tasks::FleetManager,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{env, sync::Arc};
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let version = argus::config::version()?;

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{version}");
            std::process::exit(0);
        }
    });

    let config = Config::new()?;

    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "argus=info,sqlx=warn".into()),
    );

    // Configure output format based on environment
    let fmt_layer = if std::env::var("JSON_LOGS").is_ok() {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .pretty()
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!(version = %config.version, "starting argus");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    let running_tasks = SqliteRunningTaskStore::new(pool.clone());
    running_tasks.initialize_schema().await?;
    let results = SqliteResultStore::new(pool.clone());
    results.initialize_schema().await?;

    let registry = Arc::new(SerialRegistry::standard());

    let tracker = TaskTracker::new();
    let token = CancellationToken::new();

    // Signal handler
    {
        let signal_tracker = tracker.clone();
        let signal_token = token.clone();

        tokio::spawn(async move {
            let ctrl_c = async {
                signal::ctrl_c()
                    .await
                    .expect("failed to install Ctrl+C handler");
            };

            #[cfg(unix)]
            let terminate = async {
                signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to install signal handler")
                    .recv()
                    .await;
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                () = signal_token.cancelled() => {
                    tracing::info!("Signal handler task shutting down gracefully");
                },
                _ = terminate => {
                    tracing::info!("Received SIGTERM signal, initiating shutdown");
                },
                _ = ctrl_c => {
                    tracing::info!("Received Ctrl+C signal, initiating shutdown");
                },
            }

            signal_tracker.close();
            signal_token.cancel();
        });
    }

    let manager = FleetManager::new(
        Arc::new(running_tasks),
        Arc::new(results),
        registry,
        token.clone(),
    )
    .with_tick_interval(config.tick_interval.to_duration());

    tracker.spawn(manager.run());

    tracker.wait().await;
    tracing::info!("All tasks completed, application shutting down");

    Ok(())
}
