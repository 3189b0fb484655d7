use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::bus::MessageBus;
use crate::error::{BusError, Result};
use crate::message::Message;

/// An in-process bus backed by a `VecDeque`, for tests and local demos.
///
/// Completion and abandonment are tracked in side lists rather than
/// mutating the queue in place, so tests can assert on exactly what
/// happened to each message without reaching into internals.
pub struct InMemoryBus {
    queue: Mutex<VecDeque<Message>>,
    completed: Mutex<Vec<String>>,
    abandoned: Mutex<Vec<String>>,
    dead_lettered: Mutex<Vec<(String, String)>>,
    lock_lost: Mutex<Vec<String>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            completed: Mutex::new(Vec::new()),
            abandoned: Mutex::new(Vec::new()),
            dead_lettered: Mutex::new(Vec::new()),
            lock_lost: Mutex::new(Vec::new()),
        }
    }

    pub async fn push(&self, message: Message) {
        self.queue.lock().await.push_back(message);
    }

    /// Mark a message's receipt handle as having an already-expired lock;
    /// the next settlement call against it fails with `LockLost`.
    pub async fn expire_lock(&self, receipt_handle: impl Into<String>) {
        self.lock_lost.lock().await.push(receipt_handle.into());
    }

    pub async fn completed_ids(&self) -> Vec<String> {
        self.completed.lock().await.clone()
    }

    pub async fn abandoned_ids(&self) -> Vec<String> {
        self.abandoned.lock().await.clone()
    }

    pub async fn dead_lettered(&self) -> Vec<(String, String)> {
        self.dead_lettered.lock().await.clone()
    }

    async fn check_lock(&self, message: &Message) -> Result<()> {
        let mut lost = self.lock_lost.lock().await;
        if let Some(pos) = lost.iter().position(|h| h == &message.receipt_handle) {
            lost.remove(pos);
            return Err(BusError::LockLost {
                message_id: message.message_id.clone(),
            });
        }
        Ok(())
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn receive_messages(
        &self,
        max_messages: usize,
        max_wait_time: Duration,
    ) -> Result<Vec<Message>> {
        let drain = async {
            loop {
                {
                    let mut queue = self.queue.lock().await;
                    if !queue.is_empty() {
                        let take = max_messages.min(queue.len());
                        return queue.drain(..take).collect::<Vec<_>>();
                    }
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };

        Ok(timeout(max_wait_time, drain).await.unwrap_or_default())
    }

    async fn complete(&self, message: &Message) -> Result<()> {
        self.check_lock(message).await?;
        self.completed.lock().await.push(message.message_id.clone());
        Ok(())
    }

    async fn abandon(&self, message: &Message) -> Result<()> {
        self.check_lock(message).await?;
        self.abandoned.lock().await.push(message.message_id.clone());
        Ok(())
    }

    async fn dead_letter(&self, message: &Message, reason: &str) -> Result<()> {
        self.check_lock(message).await?;
        self.dead_lettered
            .lock()
            .await
            .push((message.message_id.clone(), reason.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receive_returns_empty_on_timeout_when_queue_is_empty() {
        let bus = InMemoryBus::new();
        let received = bus.receive_messages(10, Duration::from_millis(20)).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn receive_respects_max_messages() {
        let bus = InMemoryBus::new();
        for i in 0..5 {
            bus.push(Message::new(format!("m{i}"), "body")).await;
        }

        let received = bus.receive_messages(3, Duration::from_secs(1)).await.unwrap();
        assert_eq!(received.len(), 3);
    }

    #[tokio::test]
    async fn complete_records_message_id() {
        let bus = InMemoryBus::new();
        let message = Message::new("m1", "body");
        bus.complete(&message).await.unwrap();
        assert_eq!(bus.completed_ids().await, vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn settlement_with_expired_lock_returns_lock_lost() {
        let bus = InMemoryBus::new();
        let mut message = Message::new("m1", "body");
        message.receipt_handle = "rh-1".to_string();
        bus.expire_lock("rh-1").await;

        let result = bus.complete(&message).await;
        assert!(matches!(result, Err(BusError::LockLost { .. })));
    }
}
