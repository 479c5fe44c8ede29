mod bloom;
mod blockclient;
mod catchup;
mod chain;
mod checkpoint;
mod config;
mod coordinator;
mod db;
mod decode;
mod live;
mod metrics;
mod ops;
mod processor;
mod rpc;
mod scanner;
mod supervisor;
mod ws;

use anyhow::{Context, Result};
use coordinator::Coordinator;
use db::PgDatabase;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cfg = config::load_config()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("indexer starting");
    tracing::info!(chains = cfg.chains.len(), "config loaded");

    let db = PgDatabase::connect(&cfg.global.database_url, cfg.global.db_max_connections)
        .await
        .context("connect to database")?;
    sqlx::migrate!("./db/migrations")
        .run(db.pool())
        .await
        .context("run pending migrations (or run `cargo run -p indexer --bin migrate`)")?;

    let coordinator = Arc::new(Coordinator::new(cfg, Arc::new(db)));
    let shutdown = CancellationToken::new();

    let mut join_set: tokio::task::JoinSet<Result<()>> = tokio::task::JoinSet::new();
    {
        let coordinator = coordinator.clone();
        let shutdown = shutdown.clone();
        join_set.spawn(async move { coordinator.start(shutdown).await });
    }

    tracing::info!("indexer started");

    let mut fatal: Option<anyhow::Error> = None;
    tokio::select! {
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown requested");
        }
        res = join_set.join_next() => {
            if let Some(res) = res {
                let res = res.context("indexer task panicked")?;
                if let Err(e) = res {
                    fatal = Some(e.context("coordinator failed"));
                }
            }
        }
    }

    if let Err(e) = coordinator.shutdown(&shutdown, coordinator.shutdown_timeout()).await {
        fatal.get_or_insert(e);
    }

    while let Some(res) = join_set.join_next().await {
        let res = res.context("indexer task panicked")?;
        if let Err(e) = res {
            fatal.get_or_insert_with(|| e.context("coordinator failed"));
        }
    }

    fatal.map_or(Ok(()), Err)
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("ctrl-c")?;
        Ok(())
    }
}
