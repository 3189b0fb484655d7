use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Message;

/// The capability surface the ingester consumes. Implement this against a
/// concrete broker (Service Bus, SQS, Kafka, ...) to plug in a new source.
///
/// A small `Send` trait object the host constructs once and hands to the
/// pull loop, rather than a generic parameter threaded through every layer.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Receive up to `max_messages`, waiting at most `max_wait_time` for
    /// the first to arrive. Returns an empty vector on timeout, never an
    /// error - a timeout is not a failure.
    async fn receive_messages(
        &self,
        max_messages: usize,
        max_wait_time: Duration,
    ) -> Result<Vec<Message>>;

    /// Acknowledge successful processing; permanently removes the message.
    async fn complete(&self, message: &Message) -> Result<()>;

    /// Release the lock so the message is redelivered.
    async fn abandon(&self, message: &Message) -> Result<()>;

    /// Move the message to a poison store with the given reason.
    async fn dead_letter(&self, message: &Message, reason: &str) -> Result<()>;
}
