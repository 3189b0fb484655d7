//! Host-facing facade over the task ledger: pull in this crate alone to
//! get the repository, the bus abstraction, the worker loop and the
//! ingester.

pub use ledger_bus::{BusError, InMemoryBus, Message, MessageBus};
pub use ledger_core::{LedgerError, Metadata, Status, Task, TaskHandler, TerminalFailure};
pub use ledger_ingester::{Ingester, IngesterConfig, TickMetrics};
pub use ledger_mongo::{LedgerConfig, LedgerRepository};
pub use ledger_retry::{classify, classify_bus_error, classify_ledger_error, retry_after, Classification};
pub use ledger_runtime::{worker_identity, ShutdownFlag, ShutdownGuard, Worker, WorkerBuilder, WorkerConfig, WorkerHandle};
