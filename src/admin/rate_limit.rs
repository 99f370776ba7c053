use crate::config::RateLimitConfig;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Tokens are tracked in thousandths for sub-token refill precision
const SCALE: u128 = 1000;

/// Per-client-IP token bucket. `average` tokens refill per `period`,
/// holding at most `burst`.
pub struct RateLimiter {
    average: u64,
    burst: u64,
    period: Duration,
    buckets: DashMap<IpAddr, TokenBucket>,
    cleanup_interval: Duration,
}

struct TokenBucket {
    millitokens: u128,
    last_update: Instant,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            average: config.average.max(1),
            burst: config.burst.max(1),
            period: config.period.as_std().max(Duration::from_millis(1)),
            buckets: DashMap::with_capacity(256),
            cleanup_interval: Duration::from_secs(60),
        }
    }

    /// Take one token for `ip`, or return how long until one is available
    pub fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> Result<(), Duration> {
        let max = self.burst as u128 * SCALE;
        let mut bucket = self.buckets.entry(ip).or_insert_with(|| TokenBucket {
            millitokens: max,
            last_update: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_update).as_nanos();
        let refill = elapsed * self.average as u128 * SCALE / self.period.as_nanos();
        if refill > 0 {
            bucket.millitokens = (bucket.millitokens + refill).min(max);
            bucket.last_update = now;
        }

        if bucket.millitokens >= SCALE {
            bucket.millitokens -= SCALE;
            return Ok(());
        }

        let missing = SCALE - bucket.millitokens;
        let wait_nanos = missing * self.period.as_nanos() / (self.average as u128 * SCALE);
        debug!(%ip, "Admin rate limit exceeded");
        Err(Duration::from_nanos(wait_nanos.min(u64::MAX as u128) as u64))
    }

    /// Drop buckets idle for longer than `max_age`
    pub fn cleanup(&self, max_age: Duration) {
        let now = Instant::now();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_update) < max_age);
    }

    /// Start background cleanup task, ending when `shutdown` fires
    pub fn start_cleanup_task(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cleanup_interval = self.cleanup_interval;
        let max_age = self.period.max(Duration::from_secs(120));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => self.cleanup(max_age),
                    _ = shutdown.changed() => {
                        debug!("Rate limiter cleanup stopped");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Duration as ConfigDuration;

    fn limiter(average: u64, burst: u64, period_secs: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            average,
            burst,
            period: ConfigDuration::from_secs(period_secs),
        })
    }

    #[test]
    fn test_allows_burst_then_blocks() {
        let limiter = limiter(1, 2, 1);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let now = Instant::now();

        assert!(limiter.check_at(ip, now).is_ok());
        assert!(limiter.check_at(ip, now).is_ok());

        let wait = limiter.check_at(ip, now).unwrap_err();
        assert_eq!(wait, Duration::from_secs(1));
    }

    #[test]
    fn test_refills_over_period() {
        let limiter = limiter(60, 1, 60);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let now = Instant::now();

        assert!(limiter.check_at(ip, now).is_ok());
        assert!(limiter.check_at(ip, now + Duration::from_millis(500)).is_err());
        assert!(limiter.check_at(ip, now + Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_ips_are_independent() {
        let limiter = limiter(1, 1, 60);
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(limiter.check(a).is_ok());
        assert!(limiter.check(a).is_err());
        assert!(limiter.check(b).is_ok());
    }

    #[test]
    fn test_cleanup_drops_idle_buckets() {
        let limiter = limiter(10, 10, 1);
        limiter.check("10.0.0.1".parse().unwrap()).unwrap();
        assert_eq!(limiter.buckets.len(), 1);

        limiter.cleanup(Duration::ZERO);
        assert_eq!(limiter.buckets.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_stops_on_shutdown() {
        let limiter = Arc::new(limiter(10, 10, 1));
        let (tx, rx) = watch::channel(false);
        let handle = Arc::clone(&limiter).start_cleanup_task(rx);

        // Let a few cleanup ticks pass
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Arc::strong_count(&limiter), 1);
    }
}
