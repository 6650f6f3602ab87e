use crate::domain::errors::DomainResult;
use async_trait::async_trait;
use std::time::Duration;

/// TryAcquire 使用的默认租约
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);

/// 分布式锁端口接口
///
/// 获取失败表示其他调用方正在处理同一个键，而不是错误；
/// 调用方不应原地死循环重试。
#[async_trait]
pub trait DistributedLockPort: Send + Sync {
    /// 键不存在时设置并附带租约，返回是否持有
    async fn acquire(&self, key: &str, ttl: Duration) -> DomainResult<bool>;

    /// 使用默认租约获取
    async fn try_acquire(&self, key: &str) -> DomainResult<bool> {
        self.acquire(key, DEFAULT_LOCK_TTL).await
    }

    /// 无条件删除
    async fn release(&self, key: &str) -> DomainResult<()>;
}
