use std::time::Duration;

use rand::Rng;

/// Exponential backoff, base 2: attempt `k` waits `2^k` seconds.
///
/// `jitter_fraction` scales a uniform random offset added on top of the
/// base delay, as a fraction of it (`0.1` means +/-10%). Pass `0.0` for no
/// jitter, which is the default used by the ingester and worker loops.
pub fn retry_after(attempt: u32, jitter_fraction: f64) -> Duration {
    let base = Duration::from_secs(2u64.saturating_pow(attempt));

    if jitter_fraction <= 0.0 {
        return base;
    }

    let spread = base.as_secs_f64() * jitter_fraction;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    let jittered = (base.as_secs_f64() + offset).max(0.0);

    Duration::from_secs_f64(jittered)
}
