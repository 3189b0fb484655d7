use std::time::Duration;

/// Connection and scheduling parameters for the MongoDB-backed ledger.
///
/// Plain struct, no service-locator: callers build one of these and pass it
/// to [`crate::LedgerRepository::initialize`] rather than resolving it from
/// a DI container.
#[derive(Clone, Debug)]
pub struct LedgerConfig {
    /// MongoDB connection URI.
    pub connection_string: String,

    /// Database holding the `tasks` collection.
    pub database_name: String,

    /// How long a database connection attempt is allowed to take during
    /// [`crate::LedgerRepository::initialize`] before it fails with
    /// `InitializationError`.
    pub connect_timeout: Duration,

    /// Heartbeat-expiry threshold used by `TryAcquireTask` to decide
    /// whether a currently-owned task counts as available again.
    pub stale_task_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            database_name: String::new(),
            connect_timeout: Duration::from_secs(10),
            stale_task_timeout: Duration::from_secs(5 * 60),
        }
    }
}
