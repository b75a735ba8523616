//! Batch generation: validation, bounded concurrency, isolation, progress

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use common::{
    EchoBackend, MockDatastore, Reply, StubGenerator, TEMPLATE_ID, by_target, client, metrics,
    project_row, runner, settings, targets, template_row,
};
use rtg_core::config::BatchConfig;
use rtg_core::infrastructure::metrics::{names, tags};
use rtg_llm::LlmError;
use rtg_orchestrator::{
    BatchGenerator, BatchProgress, ReportError, ReportFilters, ReportOptions, ReportType,
    TargetStatus,
};

fn batch(generator: Arc<StubGenerator>, max_concurrent: usize) -> BatchGenerator {
    BatchGenerator::new(generator, metrics(), &BatchConfig::default())
        .with_max_concurrent(max_concurrent)
}

#[tokio::test(start_paused = true)]
async fn test_invalid_target_is_dropped_and_the_rest_complete() {
    let generator = Arc::new(StubGenerator::new(Duration::from_millis(50)));
    let mut ids = targets(4);
    ids.insert(2, "project-42".to_string());

    let job = batch(generator.clone(), 3)
        .generate_batch_reports(
            &ids,
            &ReportType::ComponentInventory,
            "tpl",
            &ReportFilters::default(),
            ReportOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(job.total_targets, 4);
    assert_eq!(job.completed, 4);
    assert_eq!(job.failed, 0);
    assert!(job.is_finished());
    assert_eq!(generator.call_count(), 4);
    let order: Vec<String> = job.results.iter().map(|r| r.target_id.clone()).collect();
    assert_eq!(order, targets(4));
    assert!(
        job.results[0]
            .content
            .as_deref()
            .is_some_and(|c| c.contains(&ids[0]))
    );
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_targets_never_exceed_the_limit() {
    let generator = Arc::new(StubGenerator::new(Duration::from_millis(100)));

    let job = batch(generator.clone(), 3)
        .generate_batch_reports(
            &targets(8),
            &ReportType::ProjectPortfolio,
            "tpl",
            &ReportFilters::default(),
            ReportOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(generator.max_in_flight(), 3);
    assert_eq!(job.completed + job.failed, 8);
    assert_eq!(job.concurrency_limit, 3);
}

#[tokio::test(start_paused = true)]
async fn test_one_failure_does_not_affect_siblings() {
    let ids = targets(4);
    let generator = Arc::new(StubGenerator::new(Duration::from_millis(10)).failing_for(&ids[1]));

    let job = batch(generator, 2)
        .generate_batch_reports(
            &ids,
            &ReportType::SafeguardStatus,
            "tpl",
            &ReportFilters::default(),
            ReportOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(job.completed, 3);
    assert_eq!(job.failed, 1);
    let failure = job.errors().next().unwrap();
    assert_eq!(failure.target_id, ids[1]);
    assert_eq!(failure.error_kind.as_deref(), Some("provider_error"));
    assert!(failure.content.is_none());
    assert_eq!(by_target(&job.results)[&ids[0]], "Success");
}

#[tokio::test(start_paused = true)]
async fn test_slow_target_times_out_individually() {
    let generator = Arc::new(StubGenerator::new(Duration::from_secs(10)));

    let job = batch(generator, 2)
        .with_report_timeout(Duration::from_secs(1))
        .generate_batch_reports(
            &targets(2),
            &ReportType::ProjectPortfolio,
            "tpl",
            &ReportFilters::default(),
            ReportOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(job.failed, 2);
    assert!(job.results.iter().all(|r| r.status == TargetStatus::Failed));
    assert!(
        job.results
            .iter()
            .all(|r| r.error_kind.as_deref() == Some("timeout"))
    );
    assert!(
        job.results[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("exceeded 1000ms"))
    );
}

#[tokio::test]
async fn test_no_valid_targets_is_a_validation_error() {
    let generator = Arc::new(StubGenerator::new(Duration::ZERO));
    let batch = batch(generator.clone(), 3);

    for input in [vec![], vec!["P1".to_string(), "  ".to_string()]] {
        let err = batch
            .generate_batch_reports(
                &input,
                &ReportType::ProjectPortfolio,
                "tpl",
                &ReportFilters::default(),
                ReportOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::ValidationError(_)));
    }
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_streaming_reports_every_transition() {
    let ids = targets(3);
    let generator = Arc::new(StubGenerator::new(Duration::from_millis(20)).failing_for(&ids[2]));
    let events = Mutex::new(Vec::new());

    let job = batch(generator, 2)
        .generate_batch_reports_streaming(
            &ids,
            &ReportType::ThreatModelSummary,
            "tpl",
            &ReportFilters::default(),
            ReportOptions::default(),
            &|event: BatchProgress| events.lock().unwrap().push(event),
        )
        .await
        .unwrap();

    let events = events.into_inner().unwrap();
    assert_eq!(events.len(), 1 + 3 + 3 + 1);
    assert!(matches!(
        events.first(),
        Some(BatchProgress::BatchStarted { total_targets: 3, concurrency_limit: 2, .. })
    ));
    assert!(matches!(
        events.last(),
        Some(BatchProgress::BatchCompleted { completed: 2, failed: 1, .. })
    ));
    let started = events
        .iter()
        .filter(|e| matches!(e, BatchProgress::TargetStarted { .. }))
        .count();
    assert_eq!(started, 3);
    let failed: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            BatchProgress::TargetFailed { target_id, .. } => Some(target_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![ids[2].as_str()]);
    let last_progress = events
        .iter()
        .filter_map(|e| match e {
            BatchProgress::TargetCompleted { progress, .. }
            | BatchProgress::TargetFailed { progress, .. } => Some(*progress),
            _ => None,
        })
        .fold(0.0, f64::max);
    assert_eq!(last_progress, 100.0);
    assert!(events.iter().all(|e| match e {
        BatchProgress::TargetStarted { batch_id, .. } => batch_id == &job.batch_id,
        _ => true,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_shared_signal_cancels_in_flight_and_queued_targets() {
    let generator = Arc::new(StubGenerator::new(Duration::from_secs(10)));
    let batch = batch(generator.clone(), 1);
    let cancel = CancellationToken::new();
    let ids = targets(3);
    let filters = ReportFilters::default();

    let (job, _) = tokio::join!(
        batch.generate_batch_reports(
            &ids,
            &ReportType::ProjectPortfolio,
            "tpl",
            &filters,
            ReportOptions::default().with_cancel(cancel.clone()),
        ),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    );
    let job = job.unwrap();

    assert_eq!(job.failed, 3);
    assert!(
        job.results
            .iter()
            .all(|r| r.error_kind.as_deref() == Some("aborted"))
    );
    assert_eq!(generator.call_count(), 1);
    assert_eq!(generator.cancelled.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_batch_duration_is_tagged_with_counts() {
    let generator = Arc::new(StubGenerator::new(Duration::from_millis(5)));
    let metrics = metrics();
    let batch = BatchGenerator::new(generator, metrics.clone(), &BatchConfig::default());

    let job = batch
        .generate_batch_reports(
            &targets(2),
            &ReportType::ProjectPortfolio,
            "tpl",
            &ReportFilters::default(),
            ReportOptions::default(),
        )
        .await
        .unwrap();

    let samples = metrics.get_metrics(
        names::BATCH_GENERATION_DURATION,
        None,
        &tags([("batch_id", job.batch_id.as_str())]),
    );
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].tags["total_targets"], "2");
    assert_eq!(samples[0].tags["completed"], "2");
    assert_eq!(samples[0].tags["failed"], "0");
    let successes = metrics.get_stats(
        names::BATCH_TARGET_SUCCESS,
        &tags([("batch_id", job.batch_id.as_str())]),
        None,
    );
    assert_eq!(successes.count, 2);
}

#[test]
fn test_estimate_accounts_for_concurrency() {
    let batch = batch(Arc::new(StubGenerator::new(Duration::ZERO)), 3);

    let estimate = batch.estimate_batch_time(7, Some(Duration::from_secs(30)));

    assert_eq!(estimate.serial.total_ms, 210_000);
    assert_eq!(estimate.serial.total_minutes, 3.5);
    assert_eq!(estimate.parallel.total_ms, 90_000);
    assert_eq!(estimate.parallel.total_minutes, 1.5);
}

#[tokio::test]
async fn test_batch_failures_count_once_in_health() {
    let metrics = metrics();
    let datastore = || {
        Arc::new(
            MockDatastore::new()
                .on("FROM reports.report_templates WHERE id::text", vec![template_row("Summary")])
                .on("FROM threat_model.projects WHERE id::text", vec![project_row()]),
        )
    };
    let refusing = Arc::new(EchoBackend::new(
        "openai",
        Reply::Fail(LlmError::Authentication("invalid api key".to_string())),
    ));
    let failing_runner = runner(
        datastore(),
        settings(),
        client(vec![(refusing, Duration::from_secs(45))]),
        metrics.clone(),
    );
    let batch = BatchGenerator::new(
        Arc::new(failing_runner),
        metrics.clone(),
        &BatchConfig::default(),
    );

    let job = batch
        .generate_batch_reports(
            &targets(2),
            &ReportType::ProjectPortfolio,
            TEMPLATE_ID,
            &ReportFilters::default(),
            ReportOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(job.failed, 2);

    let healthy_runner = runner(
        datastore(),
        settings(),
        client(vec![(Arc::new(EchoBackend::echo("openai")), Duration::from_secs(45))]),
        metrics.clone(),
    );
    for _ in 0..2 {
        healthy_runner
            .generate_report(
                &ReportType::ProjectPortfolio,
                TEMPLATE_ID,
                &ReportFilters::default(),
                ReportOptions::default(),
            )
            .await
            .unwrap();
    }

    let health = metrics.get_health_metrics();
    assert_eq!(health.total_requests, 4);
    assert_eq!(health.error_count, 2);
    assert_eq!(health.success_rate_percent, 50.0);

    let per_target = metrics.get_stats(
        names::BATCH_TARGET_ERRORS,
        &tags([("batch_id", job.batch_id.as_str())]),
        None,
    );
    assert_eq!(per_target.count, 2);
}
