use std::time::Duration;

use bson::{doc, oid::ObjectId, Bson, Document};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use ledger_core::{LedgerError, Result, Status, Task};
use mongodb::options::{
    ClientOptions, FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument,
};
use mongodb::{Client, Collection, IndexModel};

use crate::config::LedgerConfig;

const COLLECTION_NAME: &str = "tasks";

/// Atomic MongoDB operations backing the task ledger.
///
/// Every mutation here is either a single `find_one_and_update` (atomic
/// find-and-modify) or a compare-and-set keyed on `(taskId, version)`; no
/// method here ever holds a multi-document transaction open across task
/// processing.
pub struct LedgerRepository {
    collection: Collection<Task>,
    stale_task_timeout: Duration,
    client: Client,
}

impl LedgerRepository {
    /// Binds to the `tasks` collection in the configured database and
    /// ensures a unique ascending index on `taskId` exists.
    ///
    /// Fails with [`LedgerError::Initialization`] if the index cannot be
    /// built or the server is unreachable within `connect_timeout`.
    pub async fn initialize(config: &LedgerConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(&config.connection_string)
            .await
            .map_err(|e| LedgerError::Initialization(e.to_string()))?;
        options.connect_timeout = Some(config.connect_timeout);
        options.server_selection_timeout = Some(config.connect_timeout);

        let client = Client::with_options(options)
            .map_err(|e| LedgerError::Initialization(e.to_string()))?;

        // Fail fast rather than lazily on the first real operation.
        client
            .database(&config.database_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| LedgerError::Initialization(e.to_string()))?;

        let collection: Collection<Task> = client
            .database(&config.database_name)
            .collection(COLLECTION_NAME);

        let index = IndexModel::builder()
            .keys(doc! { "taskId": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|e| LedgerError::Initialization(e.to_string()))?;

        tracing::info!(
            database = %config.database_name,
            collection = COLLECTION_NAME,
            "ledger repository initialized, unique index on taskId ensured"
        );

        Ok(Self {
            collection,
            stale_task_timeout: config.stale_task_timeout,
            client,
        })
    }

    /// Insert a task if `taskId` is absent, otherwise replace it whole.
    ///
    /// This is the outbox-style persist used by the ingester and by test
    /// fixtures; it deliberately does not increment `version` on replace -
    /// it sits outside the optimistic-concurrency scheme.
    pub async fn upsert_task(&self, task: &Task) -> Result<()> {
        let mut doc = task.clone();
        let now = Utc::now();
        doc.updated_at = now;

        if doc.id.is_empty() {
            doc.id = ObjectId::new().to_hex();
            doc.created_at = now;
        }

        let filter = doc! { "taskId": &doc.task_id };
        let replacement = to_document(&doc)?;

        let result = self
            .collection
            .clone_with_type::<Document>()
            .replace_one(filter, replacement)
            .upsert(true)
            .await;

        match result {
            Ok(_) => Ok(()),
            // A racing insert with the same taskId is treated as
            // success-equivalent - somebody else's outbox persist won.
            Err(e) if is_duplicate_key(&e) => Ok(()),
            Err(e) => Err(LedgerError::database_operation(e)),
        }
    }

    pub async fn get_by_task_id(&self, task_id: &str) -> Result<Option<Task>> {
        self.collection
            .find_one(doc! { "taskId": task_id })
            .await
            .map_err(LedgerError::database_operation)
    }

    /// The core scheduling primitive: atomically claim the oldest matching
    /// task and swap its status/ownership in one find-and-modify.
    pub async fn try_acquire_task(
        &self,
        from_status: Status,
        to_status: Status,
        worker_id: &str,
        heartbeat_now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let cutoff = heartbeat_now - chrono::Duration::from_std(self.stale_task_timeout)
            .unwrap_or(chrono::Duration::zero());

        let filter = doc! {
            "status": status_bson(from_status),
            "$or": [
                { "workerPodId": Bson::Null },
                { "lastHeartbeat": { "$lt": bson::DateTime::from_chrono(cutoff) } },
            ],
        };

        let update = doc! {
            "$set": {
                "status": status_bson(to_status),
                "workerPodId": worker_id,
                "lastHeartbeat": bson::DateTime::from_chrono(heartbeat_now),
                "lockedAt": bson::DateTime::from_chrono(Utc::now()),
                "updatedAt": bson::DateTime::from_chrono(Utc::now()),
            },
            "$inc": { "version": 1i64 },
        };

        let options = FindOneAndUpdateOptions::builder()
            .sort(doc! { "createdAt": 1 })
            .return_document(ReturnDocument::After)
            .build();

        self.collection
            .find_one_and_update(filter, update)
            .with_options(options)
            .await
            .map_err(LedgerError::database_operation)
    }

    /// Compare-and-set on `(taskId, version)`. Sets the status-appropriate
    /// timestamp witness alongside the transition.
    pub async fn update_status_if_version_matches(
        &self,
        task_id: &str,
        expected_version: i64,
        new_status: Status,
    ) -> Result<bool> {
        self.update_status_and_error_if_version_matches(task_id, expected_version, new_status, None)
            .await
    }

    pub async fn update_status_and_error_if_version_matches(
        &self,
        task_id: &str,
        expected_version: i64,
        new_status: Status,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let filter = doc! { "taskId": task_id, "version": expected_version };

        let mut set = doc! {
            "status": status_bson(new_status),
            "updatedAt": bson::DateTime::from_chrono(Utc::now()),
        };

        if let Some(field) = status_timestamp_field(new_status) {
            set.insert(field, bson::DateTime::from_chrono(Utc::now()));
        }

        if let Some(message) = error_message {
            set.insert("errorMessage", message);
        }

        let update = doc! { "$set": set, "$inc": { "version": 1i64 } };

        let result = self
            .collection
            .update_one(filter, update)
            .await
            .map_err(LedgerError::database_operation)?;

        Ok(result.modified_count == 1)
    }

    /// Requeue a task for another attempt: sets `status=Queued`,
    /// `errorMessage=reason`, and bumps both `version` and `retryCount`
    /// together so the retry budget and the optimistic-concurrency token
    /// advance atomically in one write.
    pub async fn retry_task_if_version_matches(
        &self,
        task_id: &str,
        expected_version: i64,
        reason: &str,
    ) -> Result<bool> {
        let filter = doc! { "taskId": task_id, "version": expected_version };

        let update = doc! {
            "$set": {
                "status": status_bson(Status::Queued),
                "errorMessage": reason,
                "updatedAt": bson::DateTime::from_chrono(Utc::now()),
            },
            "$inc": { "version": 1i64, "retryCount": 1i32 },
        };

        let result = self
            .collection
            .update_one(filter, update)
            .await
            .map_err(LedgerError::database_operation)?;

        Ok(result.modified_count == 1)
    }

    /// Refresh `lastHeartbeat`. Additionally requires `workerPodId ==
    /// workerId` - a worker may never refresh another worker's lock.
    pub async fn update_heartbeat_if_version_matches(
        &self,
        task_id: &str,
        expected_version: i64,
        worker_id: &str,
        heartbeat: DateTime<Utc>,
    ) -> Result<bool> {
        let filter = doc! {
            "taskId": task_id,
            "version": expected_version,
            "workerPodId": worker_id,
        };

        let update = doc! {
            "$set": {
                "lastHeartbeat": bson::DateTime::from_chrono(heartbeat),
                "updatedAt": bson::DateTime::from_chrono(Utc::now()),
            },
            "$inc": { "version": 1i64 },
        };

        let result = self
            .collection
            .update_one(filter, update)
            .await
            .map_err(LedgerError::database_operation)?;

        Ok(result.modified_count == 1)
    }

    /// Convenience wrapper: read the current version, then CAS. Not atomic
    /// across the read and the write - callers that require strict
    /// linearizability must call
    /// [`update_status_if_version_matches`](Self::update_status_if_version_matches)
    /// directly.
    pub async fn try_update_task_status(&self, task_id: &str, new_status: Status) -> Result<bool> {
        let Some(task) = self.get_by_task_id(task_id).await? else {
            return Ok(false);
        };

        self.update_status_if_version_matches(task_id, task.version, new_status)
            .await
    }

    /// Tasks whose heartbeat has expired: owned by `self_worker_id` and
    /// stale past `threshold`, or owned by anyone else and stale past
    /// `2 * threshold` (a grace period for the original owner). Sorted by
    /// `lastHeartbeat` ascending.
    pub async fn get_stalled_tasks(
        &self,
        threshold: Duration,
        self_worker_id: &str,
    ) -> Result<Vec<Task>> {
        let now = Utc::now();
        let own_cutoff = now - chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::zero());
        let foreign_cutoff =
            now - chrono::Duration::from_std(threshold * 2).unwrap_or(chrono::Duration::zero());

        let filter = doc! {
            "status": status_bson(Status::Running),
            "$or": [
                {
                    "workerPodId": self_worker_id,
                    "lastHeartbeat": { "$lt": bson::DateTime::from_chrono(own_cutoff) },
                },
                {
                    "workerPodId": { "$ne": self_worker_id },
                    "lastHeartbeat": { "$lt": bson::DateTime::from_chrono(foreign_cutoff) },
                },
            ],
        };

        let options = FindOptions::builder()
            .sort(doc! { "lastHeartbeat": 1 })
            .build();

        let cursor = self
            .collection
            .find(filter)
            .with_options(options)
            .await
            .map_err(LedgerError::database_operation)?;

        cursor
            .try_collect()
            .await
            .map_err(LedgerError::database_operation)
    }

    /// Release ownership and move a task back to a waiting status. Matches
    /// only if `status == Running`; returns `true` iff this call won the
    /// race (another worker may have already recovered the task).
    pub async fn requeue_task(&self, task_id: &str, new_status: Status, reason: &str) -> Result<bool> {
        let filter = doc! { "taskId": task_id, "status": status_bson(Status::Running) };

        let update = doc! {
            "$set": {
                "status": status_bson(new_status),
                "errorMessage": reason,
                "updatedAt": bson::DateTime::from_chrono(Utc::now()),
            },
            "$unset": {
                "workerPodId": "",
                "workerNodeId": "",
                "lastHeartbeat": "",
                "lockedAt": "",
            },
            "$inc": { "version": 1i64 },
        };

        let result = self
            .collection
            .update_one(filter, update)
            .await
            .map_err(LedgerError::database_operation)?;

        Ok(result.modified_count == 1)
    }

    /// Liveness probe; fails with `DatabaseUnavailable` if the server
    /// cannot be reached.
    pub async fn ping(&self) -> Result<()> {
        self.client
            .database(self.collection.namespace().db.as_str())
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| LedgerError::DatabaseUnavailable(e.to_string()))
    }
}

fn status_bson(status: Status) -> Bson {
    bson::to_bson(&status).expect("Status always serializes to a BSON string")
}

fn status_timestamp_field(status: Status) -> Option<&'static str> {
    match status {
        Status::Processing => Some("processedAt"),
        Status::Completed | Status::Succeeded => Some("completedAt"),
        Status::Failed => Some("failedAt"),
        _ => None,
    }
}

fn to_document(task: &Task) -> Result<Document> {
    bson::to_document(task).map_err(LedgerError::database_operation)
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    use mongodb::error::ErrorKind;

    match error.kind.as_ref() {
        ErrorKind::Write(mongodb::error::WriteFailure::WriteError(write_error)) => {
            write_error.code == 11000
        }
        ErrorKind::BulkWrite(failure) => failure
            .write_errors
            .iter()
            .any(|e| e.code == 11000),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_field_matches_status() {
        assert_eq!(status_timestamp_field(Status::Processing), Some("processedAt"));
        assert_eq!(status_timestamp_field(Status::Completed), Some("completedAt"));
        assert_eq!(status_timestamp_field(Status::Succeeded), Some("completedAt"));
        assert_eq!(status_timestamp_field(Status::Failed), Some("failedAt"));
        assert_eq!(status_timestamp_field(Status::Pending), None);
        assert_eq!(status_timestamp_field(Status::Running), None);
    }

    #[test]
    fn status_bson_round_trips_as_variant_name() {
        assert_eq!(status_bson(Status::Running), Bson::String("Running".to_string()));
    }
}

/// Integration tests that exercise real atomicity against a live MongoDB.
///
/// Gated behind `#[ignore]` and a `LEDGER_TEST_MONGO_URI` env var - these
/// never run in a plain `cargo test` without an opt-in database.
#[cfg(test)]
mod integration {
    use std::env;
    use std::time::Duration;

    use ledger_core::{Status, Task};

    use super::LedgerRepository;
    use crate::config::LedgerConfig;

    async fn repository(database_name: &str) -> LedgerRepository {
        let connection_string = env::var("LEDGER_TEST_MONGO_URI")
            .expect("LEDGER_TEST_MONGO_URI must be set for ignored integration tests");

        let config = LedgerConfig {
            connection_string,
            database_name: database_name.to_string(),
            connect_timeout: Duration::from_secs(5),
            stale_task_timeout: Duration::from_secs(1),
        };

        LedgerRepository::initialize(&config)
            .await
            .expect("failed to connect to test MongoDB")
    }

    #[tokio::test]
    #[ignore]
    async fn insert_then_read_returns_the_same_task() {
        let repo = repository("ledger_test_s1_insert").await;
        let task = Task::new("s1-task", "hello", Status::Pending);
        repo.upsert_task(&task).await.unwrap();

        let reloaded = repo.get_by_task_id("s1-task").await.unwrap().unwrap();
        assert_eq!(reloaded.task_id, "s1-task");
        assert_eq!(reloaded.body, "hello");
        assert_eq!(reloaded.status.code(), Status::Pending.code());
        assert_eq!(reloaded.version, 1);
    }

    #[tokio::test]
    #[ignore]
    async fn concurrent_acquire_only_one_worker_wins() {
        let repo = repository("ledger_test_s1").await;
        let task = Task::new("s1-task", "body", Status::Queued);
        repo.upsert_task(&task).await.unwrap();

        let (a, b) = tokio::join!(
            repo.try_acquire_task(Status::Queued, Status::Assigned, "worker-a", chrono::Utc::now()),
            repo.try_acquire_task(Status::Queued, Status::Assigned, "worker-b", chrono::Utc::now()),
        );

        let winners = [a.unwrap(), b.unwrap()].into_iter().flatten().count();
        assert_eq!(winners, 1, "exactly one acquisition should succeed");
    }

    #[tokio::test]
    #[ignore]
    async fn stale_heartbeat_permits_reacquisition() {
        let repo = repository("ledger_test_s2").await;
        let mut task = Task::new("s2-task", "body", Status::Running);
        task.worker_pod_id = Some("worker-a".to_string());
        task.last_heartbeat = Some(chrono::Utc::now() - chrono::Duration::seconds(10));
        repo.upsert_task(&task).await.unwrap();

        let reacquired = repo
            .try_acquire_task(Status::Running, Status::Running, "worker-b", chrono::Utc::now())
            .await
            .unwrap();

        assert!(reacquired.is_some());
        assert_eq!(reacquired.unwrap().worker_pod_id.as_deref(), Some("worker-b"));
    }

    #[tokio::test]
    #[ignore]
    async fn version_mismatch_rejects_stale_write() {
        let repo = repository("ledger_test_s3").await;
        let task = Task::new("s3-task", "body", Status::Running);
        repo.upsert_task(&task).await.unwrap();

        let applied = repo
            .update_status_if_version_matches("s3-task", task.version + 1, Status::Succeeded)
            .await
            .unwrap();

        assert!(!applied, "a stale version must never apply");
    }

    #[tokio::test]
    #[ignore]
    async fn heartbeat_owner_mismatch_is_rejected() {
        let repo = repository("ledger_test_s4").await;
        let mut task = Task::new("s4-task", "body", Status::Running);
        task.worker_pod_id = Some("worker-a".to_string());
        repo.upsert_task(&task).await.unwrap();

        let applied = repo
            .update_heartbeat_if_version_matches("s4-task", task.version, "worker-b", chrono::Utc::now())
            .await
            .unwrap();

        assert!(!applied, "a non-owner must never refresh the heartbeat");
    }

    #[tokio::test]
    #[ignore]
    async fn stalled_tasks_use_asymmetric_thresholds() {
        let repo = repository("ledger_test_s5").await;
        let threshold = Duration::from_secs(1);

        let mut owned = Task::new("s5-owned", "body", Status::Running);
        owned.worker_pod_id = Some("self".to_string());
        owned.last_heartbeat = Some(chrono::Utc::now() - chrono::Duration::milliseconds(1500));
        repo.upsert_task(&owned).await.unwrap();

        let mut foreign = Task::new("s5-foreign", "body", Status::Running);
        foreign.worker_pod_id = Some("other".to_string());
        foreign.last_heartbeat = Some(chrono::Utc::now() - chrono::Duration::milliseconds(1500));
        repo.upsert_task(&foreign).await.unwrap();

        let stalled = repo.get_stalled_tasks(threshold, "self").await.unwrap();
        let ids: Vec<_> = stalled.iter().map(|t| t.task_id.as_str()).collect();

        assert!(ids.contains(&"s5-owned"));
        assert!(!ids.contains(&"s5-foreign"), "foreign task within 2x grace period");
    }

    #[tokio::test]
    #[ignore]
    async fn requeue_clears_ownership() {
        let repo = repository("ledger_test_s6").await;
        let mut task = Task::new("s6-task", "body", Status::Running);
        task.worker_pod_id = Some("worker-a".to_string());
        repo.upsert_task(&task).await.unwrap();

        let requeued = repo.requeue_task("s6-task", Status::Queued, "stalled").await.unwrap();
        assert!(requeued);

        let reloaded = repo.get_by_task_id("s6-task").await.unwrap().unwrap();
        assert!(!reloaded.has_owner());
        assert_eq!(reloaded.status.code(), Status::Queued.code());
    }
}
