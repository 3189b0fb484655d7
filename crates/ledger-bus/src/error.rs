/// Errors a [`crate::MessageBus`] implementation may surface.
///
/// `LockLost` is distinguished deliberately: it is not a fatal error and
/// the ingester must not count it as a processing failure, only log it and
/// let the message redeliver.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// The message's lock had already expired or been released by the
    /// broker when settlement was attempted.
    #[error("lock lost for message {message_id}")]
    LockLost { message_id: String },

    #[error("bus operation failed: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, BusError>;
