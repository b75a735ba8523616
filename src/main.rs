//! rtg - report generation engine entry point

use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use rtg_core::infrastructure::rate_limiter::RequestContext;
use rtg_engine::cli::{BatchArgs, Cli, Commands, GenerateArgs, HealthArgs};
use rtg_engine::{AppHandle, Config, create_app, init_tracing};
use rtg_orchestrator::{BatchProgress, ReportFilters};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let cli = Cli::parse();

    let config = Config::load().map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration. Check DATABASE_URL and RTG__* env vars: {}",
            e
        )
    })?;
    init_tracing(&config.logging)?;

    let app = create_app(config).await?;
    let result = match cli.command {
        Commands::Run => run(&app).await,
        Commands::Generate(args) => generate(&app, args).await,
        Commands::Batch(args) => batch(&app, args).await,
        Commands::Health(args) => health(&app, args).await,
    };

    app.shutdown_token.cancel();
    result
}

async fn run(app: &AppHandle) -> anyhow::Result<()> {
    if !app.config.scheduler.enabled {
        tracing::warn!("Scheduler is disabled in configuration; nothing to run");
        return Ok(());
    }

    let loop_handle = app.scheduler.start();
    shutdown_signal(app.shutdown_token.clone()).await;

    if !app.scheduler.shutdown().await {
        tracing::warn!("Some scheduled reports were still running at shutdown");
    }
    loop_handle.await?;
    tracing::info!("Scheduler shutdown complete");
    Ok(())
}

async fn generate(app: &AppHandle, args: GenerateArgs) -> anyhow::Result<()> {
    let mut filters: ReportFilters = args.report.filters();
    filters.target_id = args.target.clone();

    let mut request = RequestContext::new("cli");
    if let Some(target) = &args.target {
        request = request.with_target(target.clone());
    }
    let decision = app.report_limiter.admit(&request);
    if !decision.is_allowed() {
        anyhow::bail!(
            "Report rate limit reached; retry in {}s",
            decision.retry_after().unwrap_or_default().as_secs()
        );
    }

    let cancel = CancellationToken::new();
    let options = args.report.options().with_cancel(cancel.clone());
    let report_type = args.report.report_type();

    let report = tokio::select! {
        report = app.runner.generate_report_detailed(
            &report_type,
            &args.report.template_id,
            &filters,
            options,
        ) => report?,
        _ = signal::ctrl_c() => {
            cancel.cancel();
            anyhow::bail!("Report generation cancelled");
        }
    };

    if args.verbose {
        eprintln!(
            "provider={} model={} prompt_chars={}",
            report.provider,
            report.model.as_deref().unwrap_or("default"),
            report.prompt_chars
        );
        for warning in &report.warnings {
            eprintln!("warning: {}", warning);
        }
    }
    println!("{}", report.content);
    Ok(())
}

async fn batch(app: &AppHandle, args: BatchArgs) -> anyhow::Result<()> {
    let generator = match args.concurrency {
        Some(limit) => std::sync::Arc::new(
            rtg_orchestrator::BatchGenerator::new(
                app.runner.clone(),
                app.metrics.clone(),
                &app.config.batch,
            )
            .with_max_concurrent(limit),
        ),
        None => app.batch.clone(),
    };

    if args.estimate {
        let estimate = generator.estimate_batch_time(args.targets.len(), None);
        println!("{}", serde_json::to_string_pretty(&estimate)?);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let options = args.report.options().with_cancel(cancel.clone());
    let report_type = args.report.report_type();
    let filters = args.report.filters();
    let on_progress = |event: BatchProgress| match event {
        BatchProgress::TargetCompleted { target_id, progress, .. } => {
            tracing::info!(target_id = %target_id, progress, "Target completed");
        }
        BatchProgress::TargetFailed { target_id, error, progress, .. } => {
            tracing::warn!(target_id = %target_id, error = %error, progress, "Target failed");
        }
        _ => {}
    };

    let job = tokio::select! {
        job = generator.generate_batch_reports_streaming(
            &args.targets,
            &report_type,
            &args.report.template_id,
            &filters,
            options,
            &on_progress,
        ) => job?,
        _ = signal::ctrl_c() => {
            cancel.cancel();
            anyhow::bail!("Batch cancelled");
        }
    };

    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

async fn health(app: &AppHandle, args: HealthArgs) -> anyhow::Result<()> {
    if args.prometheus {
        print!("{}", app.metrics.to_prometheus());
        return Ok(());
    }

    let mut backends = serde_json::Map::new();
    for provider in app.llm.providers() {
        let state = if args.probe {
            match app.llm.health_check(provider).await {
                Ok(()) => "healthy".to_string(),
                Err(e) => format!("unhealthy: {}", e),
            }
        } else {
            app.llm
                .circuit_state(provider)
                .map(|state| format!("circuit {:?}", state).to_lowercase())
                .unwrap_or_else(|| "unknown".to_string())
        };
        backends.insert(provider.to_string(), serde_json::Value::String(state));
    }

    let report = serde_json::json!({
        "metrics": app.metrics.get_health_metrics(),
        "cache": app.cache.stats(),
        "backends": backends,
        "scheduler": app.scheduler.stats(),
        "rate_limits": {
            "report": {
                "limit": app.report_limiter.limit(),
                "window_seconds": app.report_limiter.window().as_secs(),
            },
            "general": {
                "limit": app.general_limiter.limit(),
                "window_seconds": app.general_limiter.window().as_secs(),
            },
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then cancel background work
async fn shutdown_signal(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }

    shutdown_token.cancel();
    // Leave room for in-flight logging before the runtime is torn down
    tokio::time::sleep(Duration::from_millis(100)).await;
}
