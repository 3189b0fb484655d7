use std::time::Duration;

/// Observable output of one ingester tick. Not used for correctness -
/// purely for the host to log or export.
#[derive(Clone, Debug, Default)]
pub struct TickMetrics {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

impl TickMetrics {
    pub fn success_rate_percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }

        (self.succeeded as f64 / self.total as f64) * 100.0
    }

    pub fn average_millis_per_message(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }

        self.elapsed.as_secs_f64() * 1000.0 / self.total as f64
    }
}
