//! MongoDB-backed implementation of the task ledger repository.
//!
//! This crate owns every atomic operation the rest of the workspace needs
//! against the `tasks` collection - acquisition, compare-and-set status
//! transitions, heartbeats, and stalled-task discovery - and nothing else.
//! Callers never see a raw `mongodb::Collection`.

mod config;
mod repository;

pub use self::config::LedgerConfig;
pub use self::repository::LedgerRepository;
