//! Rate Limiter.
//!
//! Token-bucket admission control keyed by `(user, command)` and
//! independently by `user` alone. Buckets refill from a monotonic clock
//! (`tokio::time::Instant`) without per-request locking: each bucket is an
//! entry behind a `std::sync::Mutex<HashMap<..>>` guard, narrow enough that
//! contention is per-key rather than global.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use hub_protocol::CommandId;
use hub_protocol::UserIdentity;
use tokio::time::Instant;

use crate::config::CoreConfig;
use crate::util::backoff;

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            capacity: capacity as f64,
            tokens: capacity as f64,
            refill_per_sec: refill_per_sec as f64,
            last_refill: Instant::now(),
        }
    }

    fn try_admit(&mut self) -> Result<(), Duration> {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            let wait_secs = if self.refill_per_sec > 0.0 {
                deficit / self.refill_per_sec
            } else {
                f64::MAX
            };
            Err(Duration::from_secs_f64(wait_secs.max(0.0)))
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
enum BucketKey {
    PerUser(uuid::Uuid),
    PerUserCommand(uuid::Uuid, CommandId),
}

/// The single-point gate for per-user fairness.
pub struct RateLimiter {
    capacity: u32,
    refill_per_sec: u32,
    buckets: Mutex<HashMap<BucketKey, Bucket>>,
    retry_attempts: Mutex<HashMap<BucketKey, u64>>,
}

impl RateLimiter {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            capacity: config.rate_limit_capacity,
            refill_per_sec: config.rate_limit_refill_per_sec,
            buckets: Mutex::new(HashMap::new()),
            retry_attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Admit if both the per-(user, command) bucket and the per-user bucket
    /// have a token available; refuse with a jittered `retry_after`
    /// otherwise.
    pub fn try_admit(&self, user: &UserIdentity, command_id: &CommandId) -> Result<(), Duration> {
        let per_command_key = BucketKey::PerUserCommand(user.user_id, command_id.clone());
        let per_user_key = BucketKey::PerUser(user.user_id);

        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        let per_command_result = buckets
            .entry(per_command_key.clone())
            .or_insert_with(|| Bucket::new(self.capacity, self.refill_per_sec))
            .try_admit();
        let per_user_result = buckets
            .entry(per_user_key.clone())
            .or_insert_with(|| Bucket::new(self.capacity, self.refill_per_sec))
            .try_admit();

        match (per_command_result, per_user_result) {
            (Ok(()), Ok(())) => {
                self.reset_attempts(&per_command_key);
                Ok(())
            }
            (Err(wait), _) | (_, Err(wait)) => {
                let attempt = self.bump_attempts(&per_command_key);
                Err(wait.max(backoff(attempt) / 8))
            }
        }
    }

    fn bump_attempts(&self, key: &BucketKey) -> u64 {
        let mut attempts = self.retry_attempts.lock().unwrap_or_else(|e| e.into_inner());
        let counter = attempts.entry(key.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    fn reset_attempts(&self, key: &BucketKey) {
        self.retry_attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_protocol::Scope;

    fn user() -> UserIdentity {
        UserIdentity::new(uuid::Uuid::new_v4(), "acme").with_scopes([Scope::new("x")])
    }

    #[test]
    fn burst_up_to_capacity_is_always_admitted() {
        let config = CoreConfig {
            rate_limit_capacity: 5,
            rate_limit_refill_per_sec: 1,
            ..CoreConfig::default()
        };
        let limiter = RateLimiter::new(&config);
        let user = user();
        let command = CommandId::new("server_enable");
        for _ in 0..5 {
            assert!(limiter.try_admit(&user, &command).is_ok());
        }
        assert!(limiter.try_admit(&user, &command).is_err());
    }

    #[test]
    fn different_users_have_independent_buckets() {
        let config = CoreConfig {
            rate_limit_capacity: 1,
            rate_limit_refill_per_sec: 1,
            ..CoreConfig::default()
        };
        let limiter = RateLimiter::new(&config);
        let command = CommandId::new("server_enable");
        assert!(limiter.try_admit(&user(), &command).is_ok());
        assert!(limiter.try_admit(&user(), &command).is_ok());
    }
}
