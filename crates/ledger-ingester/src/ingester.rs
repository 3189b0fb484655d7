use std::sync::Arc;
use std::time::Instant;

use ledger_bus::{BusError, Message, MessageBus};
use ledger_core::{Metadata, Status, Task, TaskHandler};
use ledger_mongo::LedgerRepository;
use ledger_retry::retry_after;
use ledger_runtime::{ShutdownFlag, ShutdownGuard};
use tokio::sync::Semaphore;

use crate::config::{
    IngesterConfig, MESSAGE_PROCESSING_CAP, MESSAGE_RETRY_ATTEMPTS, RECEIVE_RETRY_ATTEMPTS,
};
use crate::metrics::TickMetrics;

/// The transactional-outbox pull loop: receive, persist-before-ack,
/// (optionally) handle inline, settle.
///
/// One instance runs per configured queue/subscription; `handler` is
/// `None` for store-and-forward deployments where the worker subsystem
/// picks up ingested tasks instead of this loop invoking a handler
/// directly.
pub struct Ingester {
    repository: Arc<LedgerRepository>,
    bus: Arc<dyn MessageBus>,
    handler: Option<Arc<dyn TaskHandler>>,
    config: IngesterConfig,
    shutdown: ShutdownFlag,
}

impl Ingester {
    pub fn new(repository: Arc<LedgerRepository>, bus: Arc<dyn MessageBus>, config: IngesterConfig) -> Self {
        Self {
            repository,
            bus,
            handler: None,
            config,
            shutdown: ShutdownFlag::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Runs ticks until the shutdown flag is raised.
    pub async fn run(&self) -> anyhow::Result<()> {
        let _guard = ShutdownGuard::new(&self.shutdown);
        let mut shutdown = std::pin::pin!(self.shutdown.wait());

        loop {
            tokio::select! {
                biased;

                _ = shutdown.as_mut() => break,
                metrics = self.tick() => {
                    let metrics = metrics?;
                    tracing::info!(
                        total = metrics.total,
                        succeeded = metrics.succeeded,
                        failed = metrics.failed,
                        elapsed_ms = metrics.elapsed.as_millis() as u64,
                        success_rate = metrics.success_rate_percent(),
                        avg_ms = metrics.average_millis_per_message(),
                        "ingester tick complete"
                    );
                }
            }
        }

        Ok(())
    }

    /// One receive-and-settle cycle. Public so hosts can drive it directly
    /// in tests or in a custom scheduling loop.
    pub async fn tick(&self) -> anyhow::Result<TickMetrics> {
        let started = Instant::now();
        let messages = self.receive_with_retry().await?;

        if messages.is_empty() {
            return Ok(TickMetrics {
                elapsed: started.elapsed(),
                ..Default::default()
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut set = tokio::task::JoinSet::new();

        for message in messages {
            let semaphore = semaphore.clone();
            let repository = self.repository.clone();
            let bus = self.bus.clone();
            let handler = self.handler.clone();
            let config = self.config.clone();

            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closes");
                tokio::time::timeout(
                    MESSAGE_PROCESSING_CAP,
                    process_message(repository, bus, handler, config, message),
                )
                .await
                .unwrap_or(false)
            });
        }

        let mut total = 0;
        let mut succeeded = 0;
        let mut failed = 0;

        while let Some(result) = set.join_next().await {
            total += 1;
            match result {
                Ok(true) => succeeded += 1,
                Ok(false) => failed += 1,
                Err(error) => {
                    tracing::error!(%error, "message processing task panicked");
                    failed += 1;
                }
            }
        }

        Ok(TickMetrics {
            total,
            succeeded,
            failed,
            elapsed: started.elapsed(),
        })
    }

    async fn receive_with_retry(&self) -> anyhow::Result<Vec<Message>> {
        let mut attempt = 0;

        loop {
            match self
                .bus
                .receive_messages(self.config.batch_size, self.config.polling_wait)
                .await
            {
                Ok(messages) => return Ok(messages),
                Err(error) if attempt + 1 < RECEIVE_RETRY_ATTEMPTS => {
                    tracing::warn!(%error, attempt, "receive failed, retrying with backoff");
                    tokio::time::sleep(retry_after(attempt, 0.0)).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(anyhow::anyhow!("receive failed after {RECEIVE_RETRY_ATTEMPTS} attempts: {error}"))
                }
            }
        }
    }
}

fn task_metadata(message: &Message, config: &IngesterConfig) -> Metadata {
    let mut metadata: Metadata = message.properties.clone();
    metadata.insert("Source".to_string(), config.source.clone());

    if let Some(topic) = &config.topic_name {
        metadata.insert("TopicName".to_string(), topic.clone());
    }

    let subscription = config
        .subscription_name
        .clone()
        .or_else(|| message.subscription_name.clone());
    if let Some(subscription) = subscription {
        metadata.insert("SubscriptionName".to_string(), subscription);
    }

    metadata
}

/// Persist-before-ack for one message; restarts from the upsert step (not
/// from re-receiving) on transient failure, up to `MESSAGE_RETRY_ATTEMPTS`.
/// Returns whether the message was ultimately handled successfully.
async fn process_message(
    repository: Arc<LedgerRepository>,
    bus: Arc<dyn MessageBus>,
    handler: Option<Arc<dyn TaskHandler>>,
    config: IngesterConfig,
    message: Message,
) -> bool {
    for attempt in 0..MESSAGE_RETRY_ATTEMPTS {
        match try_process_once(&repository, &handler, &config, &message).await {
            Ok(success) => {
                return settle(&bus, &config, &message, success).await;
            }
            Err(error) if attempt + 1 < MESSAGE_RETRY_ATTEMPTS => {
                tracing::warn!(
                    message_id = %message.message_id,
                    %error,
                    attempt,
                    "message processing failed, retrying"
                );
                tokio::time::sleep(retry_after(attempt, 0.0)).await;
            }
            Err(error) => {
                tracing::error!(message_id = %message.message_id, %error, "message processing exhausted retries");
                return settle(&bus, &config, &message, false).await;
            }
        }
    }

    unreachable!("loop always returns on its last iteration")
}

async fn try_process_once(
    repository: &LedgerRepository,
    handler: &Option<Arc<dyn TaskHandler>>,
    config: &IngesterConfig,
    message: &Message,
) -> ledger_core::Result<bool> {
    let mut task = Task::new(message.message_id.clone(), message.body.clone(), Status::Processing);
    task.metadata = task_metadata(message, config);

    repository.upsert_task(&task).await?;

    let success = match handler {
        Some(handler) => handler.handle(&task).await.is_ok(),
        None => true,
    };

    let final_status = if success { Status::Completed } else { Status::Failed };
    repository.try_update_task_status(&task.task_id, final_status).await?;

    Ok(success)
}

async fn settle(bus: &Arc<dyn MessageBus>, config: &IngesterConfig, message: &Message, success: bool) -> bool {
    let result = if success {
        bus.complete(message).await
    } else if config.dead_letter_failed_messages {
        bus.dead_letter(message, "ingester handler or status update failed").await
    } else {
        bus.abandon(message).await
    };

    match result {
        Ok(()) => success,
        Err(BusError::LockLost { message_id }) => {
            tracing::info!(message_id, "lock lost settling message; it will be redelivered");
            success
        }
        Err(error) => {
            tracing::warn!(message_id = %message.message_id, %error, "failed to settle message");
            success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_carries_source_topic_and_subscription_tags() {
        let mut message = Message::new("m1", "body");
        message.properties.insert("customKey".to_string(), "customValue".to_string());
        message.subscription_name = Some("from-message".to_string());

        let config = IngesterConfig {
            source: "service-bus".to_string(),
            topic_name: Some("orders".to_string()),
            subscription_name: None,
            ..IngesterConfig::default()
        };

        let metadata = task_metadata(&message, &config);
        assert_eq!(metadata.get("Source"), Some(&"service-bus".to_string()));
        assert_eq!(metadata.get("TopicName"), Some(&"orders".to_string()));
        assert_eq!(metadata.get("SubscriptionName"), Some(&"from-message".to_string()));
        assert_eq!(metadata.get("customKey"), Some(&"customValue".to_string()));
    }

    #[test]
    fn config_subscription_name_overrides_the_messages_own() {
        let message = Message::new("m1", "body");

        let config = IngesterConfig {
            subscription_name: Some("configured".to_string()),
            ..IngesterConfig::default()
        };

        let metadata = task_metadata(&message, &config);
        assert_eq!(metadata.get("SubscriptionName"), Some(&"configured".to_string()));
    }
}
