use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn take(&mut self, rate: f64, burst: f64, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(burst);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// 按键的令牌桶限流器
///
/// 桶按需创建；读锁覆盖“桶已存在”的常见路径，
/// 长时间未访问的桶由 `evict_idle` 回收。
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    idle_ttl: Duration,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl RateLimiter {
    pub fn new(rate_per_sec: f64, burst: u32, idle_ttl: Duration) -> Self {
        Self {
            rate: rate_per_sec,
            burst: f64::from(burst.max(1)),
            idle_ttl,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();

        let existing = self
            .buckets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();

        let bucket = match existing {
            Some(bucket) => bucket,
            None => {
                let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
                buckets
                    .entry(key.to_string())
                    .or_insert_with(|| {
                        Arc::new(Mutex::new(Bucket {
                            tokens: self.burst,
                            last_refill: now,
                        }))
                    })
                    .clone()
            }
        };

        let mut bucket = bucket.lock().unwrap_or_else(|e| e.into_inner());
        bucket.take(self.rate, self.burst, now)
    }

    /// 回收空闲超过 idle_ttl 的桶，返回回收数量
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        let before = buckets.len();

        buckets.retain(|_, bucket| {
            let bucket = bucket.lock().unwrap_or_else(|e| e.into_inner());
            now.duration_since(bucket.last_refill) < self.idle_ttl
        });

        let evicted = before - buckets.len();
        if evicted > 0 {
            debug!(evicted, remaining = buckets.len(), "Evicted idle rate limit buckets");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.buckets.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 后台周期回收，限流器被释放后任务自行退出
    pub fn spawn_eviction(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(limiter) => {
                        limiter.evict_idle();
                    }
                    None => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_reject() {
        let limiter = RateLimiter::new(1.0, 3, Duration::from_secs(60));

        assert!(limiter.allow("user:1"));
        assert!(limiter.allow("user:1"));
        assert!(limiter.allow("user:1"));
        assert!(!limiter.allow("user:1"));

        // 不同键互不影响
        assert!(limiter.allow("user:2"));
    }

    #[test]
    fn test_tokens_refill_over_time() {
        let limiter = RateLimiter::new(100.0, 1, Duration::from_secs(60));

        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.allow("k"));
    }

    #[test]
    fn test_idle_buckets_are_evicted() {
        let limiter = RateLimiter::new(1.0, 1, Duration::from_millis(20));
        limiter.allow("a");
        limiter.allow("b");
        assert_eq!(limiter.len(), 2);

        std::thread::sleep(Duration::from_millis(40));
        limiter.allow("b");

        assert_eq!(limiter.evict_idle(), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test]
    async fn test_eviction_task_stops_with_limiter() {
        let limiter = Arc::new(RateLimiter::new(1.0, 1, Duration::from_millis(1)));
        let handle = limiter.spawn_eviction(Duration::from_millis(5));

        drop(limiter);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("eviction task should exit")
            .unwrap();
    }
}
