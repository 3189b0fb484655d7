use serde::{Deserialize, Serialize};

/// Where a task sits in its lifecycle.
///
/// The numeric codes fix wire compatibility for anything that needs to
/// compare statuses across a deploy (e.g. a dashboard built against an
/// older version of this crate); the ledger itself persists the variant's
/// string name, not the code, per the documented wire format.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Status {
    // Ingester lifecycle.
    Pending,
    Created,
    Processing,
    Completed,
    Failed,

    // Worker lifecycle.
    Queued,
    Assigned,
    Running,
    Succeeded,
    Error,
    Retrying,
    Cancelled,
    Timeout,

    // Terminal, advisory only; retention is delegated outside the core.
    Archived,
    Deleted,
}

impl Status {
    /// The fixed numeric code for this status, as tabulated in the wire
    /// compatibility table. Never used for storage, only for callers that
    /// want a stable integer to compare against.
    pub const fn code(self) -> i32 {
        match self {
            Status::Pending => 0,
            Status::Created => 1,
            Status::Processing => 10,
            Status::Completed => 11,
            Status::Failed => 12,
            Status::Queued => 20,
            Status::Assigned => 21,
            Status::Running => 22,
            Status::Succeeded => 23,
            Status::Error => 24,
            Status::Retrying => 25,
            Status::Cancelled => 26,
            Status::Timeout => 27,
            Status::Archived => 90,
            Status::Deleted => 91,
        }
    }

    /// True for statuses that a task never leaves once entered.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Succeeded | Status::Failed | Status::Cancelled | Status::Archived | Status::Deleted
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_compatibility_table() {
        assert_eq!(Status::Pending.code(), 0);
        assert_eq!(Status::Created.code(), 1);
        assert_eq!(Status::Processing.code(), 10);
        assert_eq!(Status::Completed.code(), 11);
        assert_eq!(Status::Failed.code(), 12);
        assert_eq!(Status::Queued.code(), 20);
        assert_eq!(Status::Assigned.code(), 21);
        assert_eq!(Status::Running.code(), 22);
        assert_eq!(Status::Succeeded.code(), 23);
        assert_eq!(Status::Error.code(), 24);
        assert_eq!(Status::Retrying.code(), 25);
        assert_eq!(Status::Cancelled.code(), 26);
        assert_eq!(Status::Timeout.code(), 27);
        assert_eq!(Status::Archived.code(), 90);
        assert_eq!(Status::Deleted.code(), 91);
    }

    #[test]
    fn terminal_classifier_matches_spec() {
        for status in [
            Status::Succeeded,
            Status::Failed,
            Status::Cancelled,
            Status::Archived,
            Status::Deleted,
        ] {
            assert!(status.is_terminal(), "{status:?} should be terminal");
        }

        for status in [
            Status::Pending,
            Status::Created,
            Status::Processing,
            Status::Completed,
            Status::Queued,
            Status::Assigned,
            Status::Running,
            Status::Error,
            Status::Retrying,
            Status::Timeout,
        ] {
            assert!(!status.is_terminal(), "{status:?} should not be terminal");
        }
    }

    #[test]
    fn serializes_as_its_variant_name() {
        let json = serde_json::to_string(&Status::Running).unwrap();
        assert_eq!(json, "\"Running\"");
    }
}
