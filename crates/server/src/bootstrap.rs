//! Startup sequence for a herald process.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use herald_delivery::{MessageRenderer, WorkerPool, WorkerPoolConfig};
use herald_dispatch::strategies::StrategyDeps;
use herald_dispatch::{QueueEnqueuer, Strategies};
use herald_infra::config::Config;
use herald_infra::db::{ensure_schema, MessageRepository, PostgresMessageRepository};
use herald_infra::jobs::{JobQueue, PostgresJobStore};
use herald_infra::mail::SmtpMailerFactory;
use herald_infra::preferences::PostgresPreferences;
use herald_infra::providers::{CloudControllerClient, UaaClient};
use herald_infra::templates::{
    seed_defaults, FallbackTemplateLoader, PostgresTemplateStore, TemplateStore,
};

use crate::app::{build_app, AppState};

/// Audience strategies over UAA, the Cloud Controller and the given stores.
pub fn build_strategies(
    config: &Config,
    templates: Arc<dyn TemplateStore>,
    messages: Arc<dyn MessageRepository>,
    queue: JobQueue,
) -> Strategies {
    let uaa = Arc::new(UaaClient::new(
        config.uaa_host.clone(),
        config.uaa_client_id.clone(),
        config.uaa_client_secret.clone(),
    ));
    let cc = Arc::new(CloudControllerClient::new(config.cc_host.clone()));

    Strategies::new(StrategyDeps {
        tokens: uaa.clone(),
        identity: uaa,
        spaces: cc.clone(),
        organizations: cc,
        templates: Arc::new(FallbackTemplateLoader::new(templates)),
        enqueuer: Arc::new(QueueEnqueuer::new(messages, queue)),
    })
}

/// Connect, prepare storage, start the workers and serve `/health` until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let db = PgPoolOptions::new()
        .max_connections(config.worker_count as u32 + 5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres")?;

    ensure_schema(&db).await.context("failed to ensure schema")?;
    let templates = Arc::new(PostgresTemplateStore::new(db.clone()));
    let seeded = seed_defaults(templates.as_ref())
        .await
        .context("failed to seed default templates")?;
    info!(seeded, "default templates in place");

    let queue = JobQueue::new(
        Arc::new(PostgresJobStore::new(db.clone())),
        config.queue_config(),
    );
    if config.unlocks_on_startup() {
        queue.unlock().await.context("failed to release orphaned leases")?;
    }

    let messages: Arc<dyn MessageRepository> =
        Arc::new(PostgresMessageRepository::new(db.clone()));
    let strategies = build_strategies(&config, templates, messages.clone(), queue.clone());

    let pool = WorkerPool::new(
        queue.clone(),
        messages,
        Arc::new(PostgresPreferences::new(db.clone())),
        MessageRenderer::new(config.sender.clone(), config.root_path.clone()),
        Arc::new(SmtpMailerFactory::new(config.smtp.clone())),
    );
    let workers = pool.spawn(
        WorkerPoolConfig::default()
            .with_workers(config.worker_count)
            .with_instance(config.instance_index),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, instance = config.instance_index, "listening");

    let state = AppState {
        queue,
        strategies: Arc::new(strategies),
    };
    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("http server failed")?;

    let stats = workers.stats();
    workers.shutdown().await;
    info!(
        processed = stats.jobs_processed,
        delivered = stats.delivered,
        failed = stats.failed,
        "herald stopped"
    );
    Ok(())
}
