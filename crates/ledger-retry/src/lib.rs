//! Backoff timing and failure classification shared by the ingester and
//! worker loops. Pure functions only - no I/O, no retry loop itself, so
//! both call sites can wire their own cancellation around it.

mod backoff;
mod classify;

pub use self::backoff::retry_after;
pub use self::classify::{classify, classify_bus_error, classify_ledger_error, Classification};
