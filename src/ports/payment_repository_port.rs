use crate::domain::errors::DomainResult;
use crate::domain::{PayeeAccount, Refund, Settlement, Task, TaskLog, TaskStatus, Trade};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// 交易仓储端口接口
#[async_trait]
pub trait TradeRepository: Send + Sync {
    /// 保存新交易，订单号冲突时返回 DuplicateKey
    async fn insert_trade(&self, trade: &Trade) -> DomainResult<()>;

    /// 根据内部订单号查找
    async fn find_trade_by_order_no(&self, order_no: &str) -> DomainResult<Option<Trade>>;

    /// 带版本校验的更新，成功后递增 trade.version
    async fn update_trade(&self, trade: &mut Trade) -> DomainResult<()>;

    /// 查询已过期但仍待支付的交易
    async fn find_expired_pending(&self, now: DateTime<Utc>, limit: u32)
        -> DomainResult<Vec<Trade>>;
}

/// 退款仓储端口接口
#[async_trait]
pub trait RefundRepository: Send + Sync {
    async fn insert_refund(&self, refund: &Refund) -> DomainResult<()>;

    async fn find_refund_by_no(&self, refund_no: &str) -> DomainResult<Option<Refund>>;

    async fn list_refunds_by_trade(&self, trade_id: Uuid) -> DomainResult<Vec<Refund>>;

    async fn update_refund(&self, refund: &Refund) -> DomainResult<()>;
}

/// 结算仓储端口接口
#[async_trait]
pub trait SettlementRepository: Send + Sync {
    /// 同一任务已有未失败结算时返回 DuplicateKey
    async fn insert_settlement(&self, settlement: &Settlement) -> DomainResult<()>;

    /// 查找任务当前未失败的结算
    async fn find_active_settlement(&self, task_id: u64) -> DomainResult<Option<Settlement>>;

    /// 根据商户侧转账单号查找
    async fn find_settlement_by_transfer_no(
        &self,
        transfer_no: &str,
    ) -> DomainResult<Option<Settlement>>;

    async fn update_settlement(&self, settlement: &Settlement) -> DomainResult<()>;
}

/// 任务读取端口（任务由外部服务拥有）
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn find_task(&self, task_id: u64) -> DomainResult<Option<Task>>;

    async fn find_payee_account(&self, user_id: u64) -> DomainResult<Option<PayeeAccount>>;
}

/// 单个持久化事务，提交前的写入对外不可见
#[async_trait]
pub trait StoreTransaction: Send {
    async fn update_trade(&mut self, trade: &mut Trade) -> DomainResult<()>;

    async fn update_refund(&mut self, refund: &Refund) -> DomainResult<()>;

    async fn update_settlement(&mut self, settlement: &Settlement) -> DomainResult<()>;

    /// 仅当存储中的任务仍处于 expected_status 时更新，否则返回 StateConflict
    async fn update_task(&mut self, task: &Task, expected_status: TaskStatus) -> DomainResult<()>;

    async fn insert_task_log(&mut self, log: &TaskLog) -> DomainResult<()>;

    async fn commit(self: Box<Self>) -> DomainResult<()>;

    async fn rollback(self: Box<Self>) -> DomainResult<()>;
}

/// 事务入口
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn begin(&self) -> DomainResult<Box<dyn StoreTransaction>>;
}

/// 支付引擎需要的全部持久化能力
pub trait PaymentStore:
    TradeRepository + RefundRepository + SettlementRepository + TaskRepository + UnitOfWork
{
}

impl<T> PaymentStore for T where
    T: TradeRepository + RefundRepository + SettlementRepository + TaskRepository + UnitOfWork
{
}

/// 出错回滚、成功提交
pub async fn finish_transaction<T>(
    tx: Box<dyn StoreTransaction>,
    result: DomainResult<T>,
) -> DomainResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!("Transaction rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}
