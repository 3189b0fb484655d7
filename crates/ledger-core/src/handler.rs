use async_trait::async_trait;

use crate::Task;

/// User-supplied processing logic, invoked by both the ingester (inline
/// processing deployments) and the worker loop.
///
/// A handler that wants to skip the retry budget entirely - a condition it
/// knows is never going to succeed on redelivery - should wrap its error
/// value so that [`crate::TerminalFailure`] is reachable via
/// `std::error::Error::source`; anything else is treated as transient and
/// counts toward `retryCount`.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
