//! The ingester pull loop: transactional-outbox persistence of inbound bus
//! messages into the ledger, with bounded concurrent fan-out and
//! exponential backoff on receive failures.

mod config;
mod ingester;
mod metrics;

pub use self::config::{IngesterConfig, MESSAGE_PROCESSING_CAP, MESSAGE_RETRY_ATTEMPTS, RECEIVE_RETRY_ATTEMPTS};
pub use self::ingester::Ingester;
pub use self::metrics::TickMetrics;
