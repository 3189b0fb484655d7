use ledger_core::Status;
use ledger_mongo::LedgerRepository;
use ledger_retry::Classification;

/// The Failure Handling sub-protocol: records the handler's error, then
/// either requeues the task for another attempt or terminates it at
/// `Failed`, depending on its retry budget and whether the failure was
/// classified as terminal.
///
/// A version mismatch at any step means the task is no longer ours - some
/// other authoritative change (most likely stall-recovery) has happened -
/// and we abort silently rather than retry the CAS.
pub async fn handle_failure(
    repository: &LedgerRepository,
    task_id: &str,
    worker_id: &str,
    error: &(dyn std::error::Error + 'static),
    max_retries: u32,
) -> ledger_core::Result<()> {
    let Some(task) = repository.get_by_task_id(task_id).await? else {
        tracing::warn!(task_id, "task vanished before failure could be recorded");
        return Ok(());
    };

    let message = error.to_string();
    let recorded = repository
        .update_status_and_error_if_version_matches(task_id, task.version, Status::Error, Some(&message))
        .await?;

    if !recorded {
        tracing::debug!(task_id, worker_id, "version mismatch recording handler error; task no longer ours");
        return Ok(());
    }

    let Some(task) = repository.get_by_task_id(task_id).await? else {
        return Ok(());
    };

    let terminal = matches!(ledger_retry::classify(error), Classification::Terminal);

    if terminal || task.retry_count >= max_retries {
        let reason = format!("Failed permanently after {} retries: {message}", task.retry_count);
        let failed = repository
            .update_status_and_error_if_version_matches(task_id, task.version, Status::Failed, Some(&reason))
            .await?;

        if !failed {
            tracing::debug!(task_id, "version mismatch transitioning to Failed; task no longer ours");
        }

        return Ok(());
    }

    let next_attempt = task.retry_count + 1;
    let reason = format!("Retry attempt {next_attempt}/{max_retries}");
    let retried = repository
        .retry_task_if_version_matches(task_id, task.version, &reason)
        .await?;

    if !retried {
        tracing::debug!(task_id, "version mismatch requeueing for retry; task no longer ours");
    }

    Ok(())
}

/// Integration tests that exercise the failure-handling sub-protocol
/// against a live MongoDB.
///
/// Gated behind `#[ignore]` and a `LEDGER_TEST_MONGO_URI` env var - these
/// never run in a plain `cargo test` without an opt-in database.
#[cfg(test)]
mod integration {
    use std::env;
    use std::time::Duration as StdDuration;

    use ledger_core::{Status, Task, TerminalFailure};
    use ledger_mongo::{LedgerConfig, LedgerRepository};

    use super::handle_failure;

    async fn repository(database_name: &str) -> LedgerRepository {
        let connection_string = env::var("LEDGER_TEST_MONGO_URI")
            .expect("LEDGER_TEST_MONGO_URI must be set for ignored integration tests");

        let config = LedgerConfig {
            connection_string,
            database_name: database_name.to_string(),
            connect_timeout: StdDuration::from_secs(5),
            stale_task_timeout: StdDuration::from_secs(1),
        };

        LedgerRepository::initialize(&config)
            .await
            .expect("failed to connect to test MongoDB")
    }

    #[tokio::test]
    #[ignore]
    async fn exhausting_the_retry_budget_terminates_at_failed() {
        let repo = repository("ledger_test_failure_retry").await;
        let task = Task::new("failure-task", "body", Status::Running);
        repo.upsert_task(&task).await.unwrap();

        let max_retries = 2;
        let error = std::io::Error::new(std::io::ErrorKind::Other, "handler exploded");

        for _ in 0..=max_retries {
            handle_failure(&repo, "failure-task", "worker-a", &error, max_retries)
                .await
                .unwrap();
        }

        let reloaded = repo.get_by_task_id("failure-task").await.unwrap().unwrap();
        assert_eq!(reloaded.status.code(), Status::Failed.code());
        assert_eq!(reloaded.retry_count, max_retries);
        assert_eq!(
            reloaded.error_message.as_deref(),
            Some(format!("Failed permanently after {max_retries} retries: handler exploded").as_str()),
        );
    }

    #[tokio::test]
    #[ignore]
    async fn a_terminal_failure_skips_the_retry_budget() {
        let repo = repository("ledger_test_failure_terminal").await;
        let task = Task::new("terminal-task", "body", Status::Running);
        repo.upsert_task(&task).await.unwrap();

        handle_failure(&repo, "terminal-task", "worker-a", &TerminalFailure, 5)
            .await
            .unwrap();

        let reloaded = repo.get_by_task_id("terminal-task").await.unwrap().unwrap();
        assert_eq!(reloaded.status.code(), Status::Failed.code());
        assert_eq!(reloaded.retry_count, 0);
    }

    #[tokio::test]
    #[ignore]
    async fn a_transient_failure_within_budget_requeues_with_bumped_retry_count() {
        let repo = repository("ledger_test_failure_requeue").await;
        let task = Task::new("requeue-task", "body", Status::Running);
        repo.upsert_task(&task).await.unwrap();

        let error = std::io::Error::new(std::io::ErrorKind::Other, "transient blip");
        handle_failure(&repo, "requeue-task", "worker-a", &error, 3)
            .await
            .unwrap();

        let reloaded = repo.get_by_task_id("requeue-task").await.unwrap().unwrap();
        assert_eq!(reloaded.status.code(), Status::Queued.code());
        assert_eq!(reloaded.retry_count, 1);
    }
}
