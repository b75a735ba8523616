//! Background task spawning with an error boundary

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

/// Spawn a detached task whose failure is logged and never propagated.
///
/// The returned handle may be dropped; the task keeps running.
pub fn spawn_background<F, E>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    tokio::spawn(guarded(name, fut))
}

/// Like [`spawn_background`], registering the task on `tracker` so a
/// shutdown can wait for it
pub fn spawn_tracked<F, E>(tracker: &TaskTracker, name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    tracker.spawn(guarded(name, fut))
}

async fn guarded<F, E>(name: &'static str, fut: F)
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    match fut.await {
        Ok(()) => debug!(task = name, "Background task finished"),
        Err(e) => error!(task = name, error = %e, "Background task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_task_does_not_panic_the_caller() {
        let handle = spawn_background("failing", async { Err::<(), _>("boom") });
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_successful_task_runs_to_completion() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        spawn_background("ok", async move {
            let _ = tx.send(42);
            Ok::<(), String>(())
        });
        assert_eq!(rx.await.ok(), Some(42));
    }

    #[tokio::test]
    async fn test_tracked_tasks_are_awaited_on_close() {
        let tracker = TaskTracker::new();
        spawn_tracked(&tracker, "tracked", async {
            tokio::task::yield_now().await;
            Err::<(), _>("boom")
        });
        tracker.close();
        tracker.wait().await;
        assert!(tracker.is_empty());
    }
}
