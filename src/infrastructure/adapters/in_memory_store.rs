use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::{PayeeAccount, Refund, Settlement, Task, TaskLog, TaskStatus, Trade, TradeStatus};
use crate::ports::payment_repository_port::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    trades: HashMap<String, Trade>,
    refunds: HashMap<String, Refund>,
    settlements: Vec<Settlement>,
    tasks: HashMap<u64, Task>,
    payees: HashMap<u64, PayeeAccount>,
    task_logs: Vec<TaskLog>,
}

impl MemoryState {
    fn check_task_status(&self, task_id: u64, expected: TaskStatus) -> DomainResult<()> {
        match self.tasks.get(&task_id) {
            Some(stored) if stored.status == expected => Ok(()),
            Some(stored) => Err(DomainError::StateConflict(format!(
                "Task {} is {}, expected {}",
                task_id, stored.status, expected
            ))),
            None => Err(DomainError::NotFound(format!("task {}", task_id))),
        }
    }

    fn check_trade_version(&self, trade: &Trade, expected: i64) -> DomainResult<()> {
        match self.trades.get(&trade.order_no) {
            Some(stored) if stored.version == expected => Ok(()),
            Some(_) => Err(DomainError::StateConflict(format!(
                "Trade {} was modified concurrently",
                trade.order_no
            ))),
            None => Err(DomainError::NotFound(format!("trade {}", trade.order_no))),
        }
    }
}

/// 线程安全的内存支付存储
///
/// 用于测试与单实例演示；事务写入在提交时一次性应用，
/// 提交前校验交易版本号，任一冲突则整个事务不生效。
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_task(&self, task: Task) {
        self.state.write().await.tasks.insert(task.id, task);
    }

    pub async fn seed_payee(&self, payee: PayeeAccount) {
        self.state.write().await.payees.insert(payee.user_id, payee);
    }

    pub async fn task(&self, task_id: u64) -> Option<Task> {
        self.state.read().await.tasks.get(&task_id).cloned()
    }

    pub async fn trade(&self, order_no: &str) -> Option<Trade> {
        self.state.read().await.trades.get(order_no).cloned()
    }

    pub async fn trades(&self) -> Vec<Trade> {
        self.state.read().await.trades.values().cloned().collect()
    }

    pub async fn task_logs(&self, task_id: u64) -> Vec<TaskLog> {
        self.state
            .read()
            .await
            .task_logs
            .iter()
            .filter(|log| log.task_id == task_id)
            .cloned()
            .collect()
    }

    pub async fn settlements(&self, task_id: u64) -> Vec<Settlement> {
        self.state
            .read()
            .await
            .settlements
            .iter()
            .filter(|s| s.task_id == task_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TradeRepository for InMemoryPaymentStore {
    async fn insert_trade(&self, trade: &Trade) -> DomainResult<()> {
        let mut state = self.state.write().await;
        if state.trades.contains_key(&trade.order_no) {
            return Err(DomainError::DuplicateKey(trade.order_no.clone()));
        }
        state.trades.insert(trade.order_no.clone(), trade.clone());
        Ok(())
    }

    async fn find_trade_by_order_no(&self, order_no: &str) -> DomainResult<Option<Trade>> {
        Ok(self.state.read().await.trades.get(order_no).cloned())
    }

    async fn update_trade(&self, trade: &mut Trade) -> DomainResult<()> {
        let mut state = self.state.write().await;
        state.check_trade_version(trade, trade.version)?;
        trade.version += 1;
        state.trades.insert(trade.order_no.clone(), trade.clone());
        Ok(())
    }

    async fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> DomainResult<Vec<Trade>> {
        let state = self.state.read().await;
        let mut expired: Vec<Trade> = state
            .trades
            .values()
            .filter(|t| t.status == TradeStatus::Pending && t.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|t| t.expire_time);
        expired.truncate(limit as usize);
        Ok(expired)
    }
}

#[async_trait]
impl RefundRepository for InMemoryPaymentStore {
    async fn insert_refund(&self, refund: &Refund) -> DomainResult<()> {
        let mut state = self.state.write().await;
        if state.refunds.contains_key(&refund.refund_no) {
            return Err(DomainError::DuplicateKey(refund.refund_no.clone()));
        }
        state.refunds.insert(refund.refund_no.clone(), refund.clone());
        Ok(())
    }

    async fn find_refund_by_no(&self, refund_no: &str) -> DomainResult<Option<Refund>> {
        Ok(self.state.read().await.refunds.get(refund_no).cloned())
    }

    async fn list_refunds_by_trade(&self, trade_id: Uuid) -> DomainResult<Vec<Refund>> {
        let state = self.state.read().await;
        let mut refunds: Vec<Refund> = state
            .refunds
            .values()
            .filter(|r| r.trade_id == trade_id)
            .cloned()
            .collect();
        refunds.sort_by_key(|r| r.created_at);
        Ok(refunds)
    }

    async fn update_refund(&self, refund: &Refund) -> DomainResult<()> {
        let mut state = self.state.write().await;
        match state.refunds.get_mut(&refund.refund_no) {
            Some(stored) => {
                *stored = refund.clone();
                Ok(())
            }
            None => Err(DomainError::NotFound(format!("refund {}", refund.refund_no))),
        }
    }
}

#[async_trait]
impl SettlementRepository for InMemoryPaymentStore {
    async fn insert_settlement(&self, settlement: &Settlement) -> DomainResult<()> {
        let mut state = self.state.write().await;
        let occupied = state
            .settlements
            .iter()
            .any(|s| s.task_id == settlement.task_id && s.is_active());
        if occupied {
            return Err(DomainError::DuplicateKey(format!(
                "settlement for task {}",
                settlement.task_id
            )));
        }
        state.settlements.push(settlement.clone());
        Ok(())
    }

    async fn find_active_settlement(&self, task_id: u64) -> DomainResult<Option<Settlement>> {
        let state = self.state.read().await;
        Ok(state
            .settlements
            .iter()
            .find(|s| s.task_id == task_id && s.is_active())
            .cloned())
    }

    async fn find_settlement_by_transfer_no(
        &self,
        transfer_no: &str,
    ) -> DomainResult<Option<Settlement>> {
        let state = self.state.read().await;
        Ok(state
            .settlements
            .iter()
            .find(|s| s.transfer_no == transfer_no)
            .cloned())
    }

    async fn update_settlement(&self, settlement: &Settlement) -> DomainResult<()> {
        let mut state = self.state.write().await;
        apply_settlement(&mut state, settlement)
    }
}

fn apply_settlement(state: &mut MemoryState, settlement: &Settlement) -> DomainResult<()> {
    match state.settlements.iter_mut().find(|s| s.id == settlement.id) {
        Some(stored) => {
            *stored = settlement.clone();
            Ok(())
        }
        None => Err(DomainError::NotFound(format!(
            "settlement for task {}",
            settlement.task_id
        ))),
    }
}

#[async_trait]
impl TaskRepository for InMemoryPaymentStore {
    async fn find_task(&self, task_id: u64) -> DomainResult<Option<Task>> {
        Ok(self.state.read().await.tasks.get(&task_id).cloned())
    }

    async fn find_payee_account(&self, user_id: u64) -> DomainResult<Option<PayeeAccount>> {
        Ok(self.state.read().await.payees.get(&user_id).cloned())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryPaymentStore {
    async fn begin(&self) -> DomainResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(InMemoryStoreTransaction {
            state: self.state.clone(),
            writes: Vec::new(),
        }))
    }
}

enum PendingWrite {
    Trade { trade: Trade, expected_version: i64 },
    Refund(Refund),
    Settlement(Settlement),
    Task { task: Task, expected_status: TaskStatus },
    TaskLog(TaskLog),
}

/// 缓冲写入，提交时原子应用
pub struct InMemoryStoreTransaction {
    state: Arc<RwLock<MemoryState>>,
    writes: Vec<PendingWrite>,
}

#[async_trait]
impl StoreTransaction for InMemoryStoreTransaction {
    async fn update_trade(&mut self, trade: &mut Trade) -> DomainResult<()> {
        self.state
            .read()
            .await
            .check_trade_version(trade, trade.version)?;

        let expected_version = trade.version;
        trade.version += 1;
        self.writes.push(PendingWrite::Trade {
            trade: trade.clone(),
            expected_version,
        });
        Ok(())
    }

    async fn update_refund(&mut self, refund: &Refund) -> DomainResult<()> {
        self.writes.push(PendingWrite::Refund(refund.clone()));
        Ok(())
    }

    async fn update_settlement(&mut self, settlement: &Settlement) -> DomainResult<()> {
        self.writes.push(PendingWrite::Settlement(settlement.clone()));
        Ok(())
    }

    async fn update_task(&mut self, task: &Task, expected_status: TaskStatus) -> DomainResult<()> {
        self.state
            .read()
            .await
            .check_task_status(task.id, expected_status)?;
        self.writes.push(PendingWrite::Task {
            task: task.clone(),
            expected_status,
        });
        Ok(())
    }

    async fn insert_task_log(&mut self, log: &TaskLog) -> DomainResult<()> {
        self.writes.push(PendingWrite::TaskLog(log.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DomainResult<()> {
        let InMemoryStoreTransaction { state, writes } = *self;
        let mut state = state.write().await;

        for write in &writes {
            match write {
                PendingWrite::Trade {
                    trade,
                    expected_version,
                } => state.check_trade_version(trade, *expected_version)?,
                PendingWrite::Task {
                    task,
                    expected_status,
                } => state.check_task_status(task.id, *expected_status)?,
                _ => {}
            }
        }

        for write in writes {
            match write {
                PendingWrite::Trade { trade, .. } => {
                    state.trades.insert(trade.order_no.clone(), trade);
                }
                PendingWrite::Refund(refund) => {
                    state.refunds.insert(refund.refund_no.clone(), refund);
                }
                PendingWrite::Settlement(settlement) => {
                    apply_settlement(&mut state, &settlement)?;
                }
                PendingWrite::Task { task, .. } => {
                    state.tasks.insert(task.id, task);
                }
                PendingWrite::TaskLog(log) => state.task_logs.push(log),
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DomainResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Money, OrderType};
    use chrono::Duration;

    fn trade(order_no: &str) -> Trade {
        Trade::new_prepay(
            order_no.to_string(),
            1,
            None,
            OrderType::Deposit,
            Money::from_yuan(5),
            "127.0.0.1".to_string(),
            None,
            Duration::minutes(15),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_order_no_rejected() {
        let store = InMemoryPaymentStore::new();
        store.insert_trade(&trade("SQ1")).await.unwrap();

        let err = store.insert_trade(&trade("SQ1")).await.unwrap_err();
        assert!(matches!(err, DomainError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn test_stale_version_update_conflicts() {
        let store = InMemoryPaymentStore::new();
        store.insert_trade(&trade("SQ1")).await.unwrap();

        let mut first = store.find_trade_by_order_no("SQ1").await.unwrap().unwrap();
        let mut second = first.clone();

        first.mark_as_failed().unwrap();
        store.update_trade(&mut first).await.unwrap();
        assert_eq!(first.version, 1);

        second.remark = Some("late".into());
        let err = store.update_trade(&mut second).await.unwrap_err();
        assert!(matches!(err, DomainError::StateConflict(_)));
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = InMemoryPaymentStore::new();
        store.insert_trade(&trade("SQ1")).await.unwrap();
        let mut loaded = store.find_trade_by_order_no("SQ1").await.unwrap().unwrap();

        let mut tx = store.begin().await.unwrap();
        loaded.mark_as_failed().unwrap();
        tx.update_trade(&mut loaded).await.unwrap();
        tx.rollback().await.unwrap();

        let stored = store.trade("SQ1").await.unwrap();
        assert_eq!(stored.status, TradeStatus::Pending);
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn test_commit_applies_all_writes() {
        let store = InMemoryPaymentStore::new();
        store.insert_trade(&trade("SQ1")).await.unwrap();
        store
            .seed_task(Task {
                id: 3,
                publisher_id: 1,
                taker_id: None,
                title: "t".into(),
                amount: Money::from_yuan(5),
                status: TaskStatus::Draft,
                take_time: None,
                updated_at: Utc::now(),
            })
            .await;

        let mut loaded = store.find_trade_by_order_no("SQ1").await.unwrap().unwrap();
        let mut task = store.find_task(3).await.unwrap().unwrap();

        let mut tx = store.begin().await.unwrap();
        loaded.mark_as_failed().unwrap();
        tx.update_trade(&mut loaded).await.unwrap();
        let old = task.mark_pending_audit().unwrap();
        tx.update_task(&task, old).await.unwrap();
        tx.insert_task_log(&TaskLog::new(&task, 1, "pay_publish", "paid".into(), old))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.trade("SQ1").await.unwrap().status, TradeStatus::Failed);
        assert_eq!(store.task(3).await.unwrap().status, TaskStatus::PendingAudit);
        assert_eq!(store.task_logs(3).await.len(), 1);
    }

    #[tokio::test]
    async fn test_one_active_settlement_per_task() {
        use crate::domain::SettlementSplit;
        use rust_decimal_macros::dec;

        let store = InMemoryPaymentStore::new();
        let split =
            SettlementSplit::from_ratio(Money::from_yuan(100), dec!(0.06), Money::ZERO).unwrap();

        let mut first = Settlement::new(7, 1, 2, split, "TF1".into());
        store.insert_settlement(&first).await.unwrap();
        let second = Settlement::new(7, 1, 2, split, "TF2".into());
        assert!(matches!(
            store.insert_settlement(&second).await,
            Err(DomainError::DuplicateKey(_))
        ));

        first.mark_as_failed("rejected".into()).unwrap();
        store.update_settlement(&first).await.unwrap();
        store.insert_settlement(&second).await.unwrap();
        assert_eq!(store.settlements(7).await.len(), 2);
    }
}
