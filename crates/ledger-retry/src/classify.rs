use std::error::Error as StdError;

use ledger_bus::BusError;
use ledger_core::{LedgerError, TerminalFailure};

/// How a failure should be treated by the caller's retry budget.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Classification {
    /// Counts toward `retryCount`; the task may be requeued.
    Transient,
    /// Skip retry entirely, go straight to `Failed`.
    Terminal,
}

/// Classify a handler or repository failure into [`Classification`].
///
/// A handler signals non-retryable domain failures by wrapping (or
/// downcasting to) [`TerminalFailure`] somewhere in its error chain;
/// everything else - database unavailability, lock-lost, handler errors
/// that don't carry the marker - is treated as transient.
pub fn classify(error: &(dyn StdError + 'static)) -> Classification {
    if has_terminal_marker(error) {
        return Classification::Terminal;
    }

    Classification::Transient
}

fn has_terminal_marker(error: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);

    while let Some(err) = current {
        if err.downcast_ref::<TerminalFailure>().is_some() {
            return true;
        }
        current = err.source();
    }

    false
}

/// `LockLost` is always transient: the bus will redeliver the message.
pub fn classify_bus_error(error: &BusError) -> Classification {
    match error {
        BusError::LockLost { .. } => Classification::Transient,
        BusError::Unavailable(_) | BusError::Other(_) => Classification::Transient,
    }
}

/// Database-unavailability is transient by definition; any other
/// repository error is surfaced as-is by callers, never silently retried
/// at the repository layer (per the no-repository-level-retries rule).
pub fn classify_ledger_error(error: &LedgerError) -> Classification {
    match error {
        LedgerError::DatabaseUnavailable(_) | LedgerError::DatabaseOperation(_) => {
            Classification::Transient
        }
        LedgerError::Initialization(_) => Classification::Terminal,
    }
}
