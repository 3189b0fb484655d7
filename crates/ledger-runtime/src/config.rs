use std::time::Duration;

/// Tunables for a single worker process, all independently overridable.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Idle sleep between batches when nothing was acquired.
    pub polling_interval: Duration,

    /// How often the heartbeat ticker refreshes an in-flight task.
    pub heartbeat_interval: Duration,

    /// Heartbeat-expiry threshold used both for acquisition and for the
    /// per-task processing deadline.
    pub stale_task_timeout: Duration,

    /// Upper bound on tasks acquired per loop iteration.
    pub batch_size: usize,

    /// Retry budget per task before it terminates at `Failed`.
    pub max_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            stale_task_timeout: Duration::from_secs(5 * 60),
            batch_size: 10,
            max_retries: 3,
        }
    }
}

/// Compute the stable worker identity: `"{nodeName}-{podName}-{instanceId}"`,
/// substituting defaults the same way the environment-derived fields do at
/// startup. `instance_id` is a fresh UUID when the environment doesn't pin
/// one.
pub fn worker_identity(node_name: Option<&str>, pod_name: Option<&str>, instance_id: Option<&str>) -> String {
    let node = node_name.filter(|s| !s.is_empty()).unwrap_or("unknown-node");
    let pod = pod_name.filter(|s| !s.is_empty()).unwrap_or("unknown-pod");
    let instance = instance_id
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    format!("{node}-{pod}-{instance}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = WorkerConfig::default();
        assert_eq!(config.polling_interval, Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.stale_task_timeout, Duration::from_secs(300));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn identity_substitutes_unknown_placeholders() {
        let id = worker_identity(None, None, Some("abc"));
        assert_eq!(id, "unknown-node-unknown-pod-abc");
    }

    #[test]
    fn identity_generates_a_fresh_instance_id_when_absent() {
        let a = worker_identity(Some("n"), Some("p"), None);
        let b = worker_identity(Some("n"), Some("p"), None);
        assert_ne!(a, b, "each call without a pinned instance id should differ");
    }
}
