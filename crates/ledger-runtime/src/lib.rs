//! The worker loop: batch acquisition, per-task heartbeats, the failure
//! handling sub-protocol, and stalled-task recovery.
//!
//! No leader election lives here - each worker process acts independently
//! on the ledger's atomic primitives, there is no single elected worker
//! coordinating the others.

mod config;
mod failure;
mod flag;
mod recover;
mod worker;

pub use self::config::{worker_identity, WorkerConfig};
pub use self::failure::handle_failure;
pub use self::flag::{ShutdownFlag, ShutdownGuard};
pub use self::recover::recover_stalled_tasks;
pub use self::worker::{Worker, WorkerBuilder, WorkerHandle};
