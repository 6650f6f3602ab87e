use crate::domain::errors::DomainResult;
use crate::ports::distributed_lock_port::DistributedLockPort;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// 进程内租约锁，单实例部署和测试使用
#[derive(Clone, Default)]
pub struct InMemoryDistributedLock {
    leases: Arc<Mutex<HashMap<String, Instant>>>,
}

impl InMemoryDistributedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        let leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases.get(key).is_some_and(|expiry| *expiry > Instant::now())
    }
}

#[async_trait]
impl DistributedLockPort for InMemoryDistributedLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> DomainResult<bool> {
        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());

        // 过期租约视为不存在
        if leases.get(key).is_some_and(|expiry| *expiry > now) {
            debug!(key = %key, "Lock already held");
            return Ok(false);
        }

        leases.insert(key.to_string(), now + ttl);
        Ok(true)
    }

    async fn release(&self, key: &str) -> DomainResult<()> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_fails_until_release() {
        let lock = InMemoryDistributedLock::new();

        assert!(lock.try_acquire("settle:task:7").await.unwrap());
        assert!(!lock.try_acquire("settle:task:7").await.unwrap());
        assert!(lock.try_acquire("settle:task:8").await.unwrap());

        lock.release("settle:task:7").await.unwrap();
        assert!(lock.try_acquire("settle:task:7").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken() {
        let lock = InMemoryDistributedLock::new();

        assert!(lock.acquire("k", Duration::from_millis(20)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(!lock.is_held("k"));
        assert!(lock.acquire("k", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_is_unconditional() {
        let lock = InMemoryDistributedLock::new();
        lock.release("never-held").await.unwrap();

        assert!(lock.try_acquire("k").await.unwrap());
        lock.release("k").await.unwrap();
        assert!(!lock.is_held("k"));
    }
}
