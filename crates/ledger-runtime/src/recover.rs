use std::time::Duration;

use ledger_core::Status;
use ledger_mongo::LedgerRepository;

/// Reclaim tasks whose owning worker has stopped heartbeating.
///
/// Invoked at the top of every worker loop iteration, before acquisition,
/// so a stalled task can be reacquired in the same iteration that frees it.
pub async fn recover_stalled_tasks(
    repository: &LedgerRepository,
    threshold: Duration,
    self_worker_id: &str,
) -> ledger_core::Result<usize> {
    let stalled = repository.get_stalled_tasks(threshold, self_worker_id).await?;
    let mut recovered = 0;

    for task in stalled {
        let owner = task.worker_pod_id.as_deref().unwrap_or("unknown");
        let reason = if owner == self_worker_id {
            "Task stalled in current worker".to_string()
        } else {
            format!("Task stalled in worker {owner}")
        };

        match repository.requeue_task(&task.task_id, Status::Queued, &reason).await {
            Ok(true) => {
                recovered += 1;
                tracing::info!(task_id = %task.task_id, %reason, "recovered stalled task");
            }
            // Another worker already won the recovery race - expected and benign.
            Ok(false) => tracing::debug!(task_id = %task.task_id, "stalled task already recovered"),
            Err(error) => tracing::warn!(task_id = %task.task_id, %error, "failed to recover stalled task"),
        }
    }

    Ok(recovered)
}
