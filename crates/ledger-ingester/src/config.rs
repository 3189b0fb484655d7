use std::time::Duration;

/// Tunables for a single ingester pull loop (one per configured
/// queue/subscription).
#[derive(Clone, Debug)]
pub struct IngesterConfig {
    /// Upper bound on messages received per tick.
    pub batch_size: usize,

    /// How long a single receive call is allowed to wait for the first
    /// message before returning empty.
    pub polling_wait: Duration,

    /// How many messages may be processed concurrently within a tick.
    pub max_concurrency: usize,

    /// On handler/status-update failure, dead-letter the message instead
    /// of abandoning it for redelivery.
    pub dead_letter_failed_messages: bool,

    /// Bus-level tag recorded on every ingested task's metadata.
    pub source: String,
    pub topic_name: Option<String>,
    pub subscription_name: Option<String>,
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            polling_wait: Duration::from_secs(30),
            max_concurrency: 10,
            dead_letter_failed_messages: true,
            source: "bus".to_string(),
            topic_name: None,
            subscription_name: None,
        }
    }
}

/// Hard-coded wall-clock cap on a single message's processing, per tick
/// envelope. Not configurable, matching the fixed 5-minute budget.
pub const MESSAGE_PROCESSING_CAP: Duration = Duration::from_secs(5 * 60);

/// Receive-error retry budget: exponential base-2 backoff, 3 attempts.
pub const RECEIVE_RETRY_ATTEMPTS: u32 = 3;

/// Per-message processing retry budget, restarting from the upsert step
/// rather than re-receiving the message.
pub const MESSAGE_RETRY_ATTEMPTS: u32 = 3;
