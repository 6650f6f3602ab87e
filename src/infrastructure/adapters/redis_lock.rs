use crate::domain::errors::{DomainError, DomainResult};
use crate::ports::distributed_lock_port::DistributedLockPort;
use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type RedisPool = Pool<RedisConnectionManager>;

/// 锁键统一前缀
const KEY_PREFIX: &str = "payment:lock:";

/// 创建 Redis 连接池
pub async fn init_redis_pool(redis_url: &str, max_connections: u32) -> DomainResult<RedisPool> {
    info!("Initializing Redis lock pool: max_connections={}", max_connections);

    let manager = RedisConnectionManager::new(redis_url).map_err(|e| {
        error!("Failed to create Redis connection manager: {}", e);
        DomainError::LockBackendError(e.to_string())
    })?;

    Pool::builder()
        .max_size(max_connections)
        .connection_timeout(Duration::from_secs(5))
        .build(manager)
        .await
        .map_err(|e| {
            error!("Failed to build Redis connection pool: {}", e);
            DomainError::LockBackendError(e.to_string())
        })
}

/// 基于 Redis `SET NX PX` 的分布式锁
///
/// 释放是无条件 DEL；租约到期由 Redis 负责回收。
#[derive(Clone)]
pub struct RedisDistributedLock {
    pool: RedisPool,
}

impl RedisDistributedLock {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    fn full_key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

#[async_trait]
impl DistributedLockPort for RedisDistributedLock {
    async fn acquire(&self, key: &str, ttl: Duration) -> DomainResult<bool> {
        let mut conn = self.pool.get().await.map_err(|e| {
            error!("Failed to get Redis connection: {}", e);
            DomainError::LockBackendError(e.to_string())
        })?;

        // 值仅用于排查问题
        let token = Uuid::new_v4().to_string();
        let ttl_ms = ttl.as_millis().max(1) as u64;

        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::full_key(key))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut *conn)
            .await
            .map_err(|e| DomainError::LockBackendError(e.to_string()))?;

        let held = reply.is_some();
        if held {
            debug!(key = %key, token = %token, "Lock acquired");
        } else {
            debug!(key = %key, "Lock already held elsewhere");
        }
        Ok(held)
    }

    async fn release(&self, key: &str) -> DomainResult<()> {
        let mut conn = self.pool.get().await.map_err(|e| {
            warn!("Failed to get Redis connection for release: {}", e);
            DomainError::LockBackendError(e.to_string())
        })?;

        let _: i64 = redis::cmd("DEL")
            .arg(Self::full_key(key))
            .query_async(&mut *conn)
            .await
            .map_err(|e| DomainError::LockBackendError(e.to_string()))?;

        debug!(key = %key, "Lock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_namespaced() {
        assert_eq!(
            RedisDistributedLock::full_key("trade:order:SQ1"),
            "payment:lock:trade:order:SQ1"
        );
    }
}
