use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;

/// Create a cancellation token that every holder can `.notified()` on and
/// any holder can fire via `.notify_waiters()`. Used to propagate client
/// disconnect, admin kill, or shutdown into a `Runner`/`StreamMultiplexer`.
pub fn cancellation_token() -> Arc<Notify> {
    Arc::new(Notify::new())
}

/// Exponential back-off schedule with jitter: 200ms -> 400ms -> 800ms -> ...,
/// used to compute `retry_after` for rate-limited callers so that many
/// simultaneously-refused clients don't retry in lockstep.
pub fn backoff(attempt: u64) -> Duration {
    let attempt = attempt.clamp(1, 16);
    let base_delay_ms = 200u64 * (1u64 << (attempt - 1));
    let jitter = rand::rng().random_range(0.8..1.2);
    let delay_ms = (base_delay_ms as f64 * jitter) as u64;
    Duration::from_millis(delay_ms)
}
