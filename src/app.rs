//! Application setup and wiring

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

use rtg_core::infrastructure::rate_limiter::{general_limiter, report_limiter};
use rtg_core::{
    CacheManager, CacheOptions, Config, MetricsCollector, MetricsOptions, RateLimiter,
    spawn_background,
};
use rtg_llm::CompletionClient;
use rtg_orchestrator::infrastructure::{DatastoreSettingsStore, SqlxDatastore};
use rtg_orchestrator::{BatchGenerator, Datastore, ReportRunner, ReportScheduler, SettingsStore};

/// Everything a caller needs to serve report requests, plus the token that
/// stops background work
pub struct AppHandle {
    pub config: Config,
    pub cache: Arc<CacheManager>,
    pub metrics: Arc<MetricsCollector>,
    pub report_limiter: Arc<RateLimiter>,
    pub general_limiter: Arc<RateLimiter>,
    pub llm: Arc<CompletionClient>,
    pub runner: Arc<ReportRunner>,
    pub batch: Arc<BatchGenerator>,
    pub scheduler: ReportScheduler,
    pub shutdown_token: CancellationToken,
}

/// Periodically prunes metric samples and idle rate-limit histories.
/// Stops when `shutdown_token` is cancelled.
fn spawn_maintenance(
    metrics: Arc<MetricsCollector>,
    limiters: Vec<Arc<RateLimiter>>,
    interval: Duration,
    shutdown_token: CancellationToken,
) {
    spawn_background("maintenance", async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    tracing::debug!("Maintenance worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let samples = metrics.cleanup();
                    let identifiers: usize = limiters.iter().map(|l| l.cleanup()).sum();
                    tracing::debug!(samples, identifiers, "Maintenance pass finished");
                }
            }
        }
        Ok::<(), std::convert::Infallible>(())
    });
}

/// Build every component from `config`. Fails only if the database pool
/// cannot be created; an unreachable shared cache tier leaves the cache
/// memory-only.
pub async fn create_app(config: Config) -> anyhow::Result<AppHandle> {
    let shutdown_token = CancellationToken::new();

    let mut pool_options = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_idle.unwrap_or(0))
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_seconds));
    if let Some(seconds) = config.database.max_lifetime_seconds {
        pool_options = pool_options.max_lifetime(Duration::from_secs(seconds));
    }
    if let Some(seconds) = config.database.idle_timeout_seconds {
        pool_options = pool_options.idle_timeout(Duration::from_secs(seconds));
    }
    // Connections are opened on first use so the engine can start while the
    // database is still coming up
    let pool = Arc::new(pool_options.connect_lazy(&config.database.url)?);
    tracing::info!(
        max_connections = config.database.max_connections,
        "Database pool configured"
    );

    let datastore: Arc<dyn Datastore> = Arc::new(SqlxDatastore::new(pool));
    let settings: Arc<dyn SettingsStore> =
        Arc::new(DatastoreSettingsStore::new(datastore.clone()));

    let cache = Arc::new(CacheManager::connect(CacheOptions::from(&config.cache)).await);
    let metrics = Arc::new(MetricsCollector::new(MetricsOptions::from(&config.metrics)));
    let report_limiter =
        Arc::new(report_limiter(&config.rate_limit).with_metrics(metrics.clone()));
    let general_limiter =
        Arc::new(general_limiter(&config.rate_limit).with_metrics(metrics.clone()));
    let llm = Arc::new(CompletionClient::from_config(&config.llm).with_metrics(metrics.clone()));
    tracing::info!(providers = ?llm.providers(), "Completion backends registered");

    let runner = Arc::new(ReportRunner::new(
        datastore,
        settings,
        cache.clone(),
        llm.clone(),
        metrics.clone(),
        &config,
    ));
    let batch = Arc::new(BatchGenerator::new(
        runner.clone(),
        metrics.clone(),
        &config.batch,
    ));
    let scheduler = ReportScheduler::new(
        runner.clone(),
        batch.clone(),
        metrics.clone(),
        &config.scheduler,
    );

    spawn_maintenance(
        metrics.clone(),
        vec![report_limiter.clone(), general_limiter.clone()],
        Duration::from_secs(config.metrics.cleanup_interval_seconds.max(1)),
        shutdown_token.clone(),
    );

    Ok(AppHandle {
        config,
        cache,
        metrics,
        report_limiter,
        general_limiter,
        llm,
        runner,
        batch,
        scheduler,
        shutdown_token,
    })
}
