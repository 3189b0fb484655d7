use std::fmt;

/// Error kinds raised by the ledger repository and surfaced to its callers.
///
/// `DuplicateKey` and `VersionMismatch` are deliberately absent here: a
/// duplicate key on upsert is swallowed by the repository as
/// success-equivalent, and a version mismatch is signalled through a
/// `bool`/`Option` return rather than an `Err` - neither is ever
/// constructed as a `LedgerError`.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Raised by ledger startup; fatal, the host should terminate.
    #[error("failed to initialize the ledger: {0}")]
    Initialization(String),

    /// A database operation failed for a reason other than unavailability
    /// (a malformed filter, a driver-level decode error, ...). Carries the
    /// original cause so callers never need to pattern-match on driver
    /// types.
    #[error("ledger operation failed: {0}")]
    DatabaseOperation(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The database could not be reached within the configured deadline.
    #[error("ledger is unreachable: {0}")]
    DatabaseUnavailable(String),
}

impl LedgerError {
    pub fn database_operation(
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::DatabaseOperation(Box::new(cause))
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Marker type a `TaskHandler` can wrap its error in to signal that the
/// failure is unrecoverable and retries would not help - the ledger's
/// failure classifier treats this as terminal rather than transient.
///
/// A unit struct whose only job is to be matched on by `downcast_ref`
/// while walking an error's `source()` chain.
#[derive(Copy, Clone, Debug, Default)]
pub struct TerminalFailure;

impl fmt::Display for TerminalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task handler reported an unrecoverable failure")
    }
}

impl std::error::Error for TerminalFailure {}
