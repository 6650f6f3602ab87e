use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::{
    Money, PayeeAccount, PaymentEvent, Refund, Settlement, Task, TaskLog, TaskStatus, Trade,
};
use crate::ports::payment_repository_port::*;
use crate::ports::PaymentEventSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlExecutor;
use sqlx::{MySql, Pool, Transaction};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

const TRADE_COLUMNS: &str = r#"
    id, order_no, third_party_trade_no, user_id, task_id, trade_type,
    order_type, amount_cents, status, pay_method, transaction_id,
    pay_url, qr_code, client_ip, remark, pay_time, expire_time,
    created_at, updated_at, version
"#;

const REFUND_COLUMNS: &str = r#"
    id, refund_no, trade_id, order_no, amount_cents, reason, status,
    refund_time, created_at, updated_at
"#;

const SETTLEMENT_COLUMNS: &str = r#"
    id, task_id, publisher_id, taker_id, publisher_amount_cents,
    taker_amount_cents, platform_fee_cents, status, transfer_no,
    gateway_transfer_no, settle_time, remark, created_at, updated_at
"#;

/// 唯一索引冲突转换为 DuplicateKey
fn map_insert_error(err: sqlx::Error, what: &str) -> DomainError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            DomainError::DuplicateKey(what.to_string())
        }
        _ => DomainError::DatabaseError(err),
    }
}

async fn exec_update_trade<'e, E: MySqlExecutor<'e>>(
    executor: E,
    trade: &mut Trade,
) -> DomainResult<()> {
    let query = r#"
        UPDATE trades
        SET third_party_trade_no = ?, status = ?, pay_method = ?, transaction_id = ?,
            pay_url = ?, qr_code = ?, pay_time = ?, updated_at = ?, version = version + 1
        WHERE id = ? AND version = ?
    "#;

    let rows_affected = sqlx::query(query)
        .bind(&trade.third_party_trade_no)
        .bind(trade.status.to_string())
        .bind(&trade.pay_method)
        .bind(&trade.transaction_id)
        .bind(&trade.pay_url)
        .bind(&trade.qr_code)
        .bind(trade.pay_time)
        .bind(trade.updated_at)
        .bind(trade.id)
        .bind(trade.version)
        .execute(executor)
        .await?
        .rows_affected();

    if rows_affected == 0 {
        error!(
            "Trade {} update lost optimistic check at version {}",
            trade.order_no, trade.version
        );
        return Err(DomainError::StateConflict(format!(
            "Trade {} was modified concurrently",
            trade.order_no
        )));
    }

    trade.version += 1;
    debug!("Trade updated: {} -> {}", trade.order_no, trade.status);
    Ok(())
}

async fn exec_update_refund<'e, E: MySqlExecutor<'e>>(
    executor: E,
    refund: &Refund,
) -> DomainResult<()> {
    let rows_affected = sqlx::query(
        "UPDATE refunds SET status = ?, refund_time = ?, updated_at = ? WHERE id = ?",
    )
    .bind(refund.status.to_string())
    .bind(refund.refund_time)
    .bind(refund.updated_at)
    .bind(refund.id)
    .execute(executor)
    .await?
    .rows_affected();

    if rows_affected == 0 {
        return Err(DomainError::NotFound(format!("refund {}", refund.refund_no)));
    }
    Ok(())
}

async fn exec_update_settlement<'e, E: MySqlExecutor<'e>>(
    executor: E,
    settlement: &Settlement,
) -> DomainResult<()> {
    let rows_affected = sqlx::query(
        r#"
        UPDATE settlements
        SET status = ?, gateway_transfer_no = ?, settle_time = ?, remark = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(settlement.status.to_string())
    .bind(&settlement.gateway_transfer_no)
    .bind(settlement.settle_time)
    .bind(&settlement.remark)
    .bind(settlement.updated_at)
    .bind(settlement.id)
    .execute(executor)
    .await?
    .rows_affected();

    if rows_affected == 0 {
        return Err(DomainError::NotFound(format!(
            "settlement for task {}",
            settlement.task_id
        )));
    }
    Ok(())
}

/// MySQL支付存储实现
#[derive(Clone)]
pub struct MySqlPaymentStore {
    pool: Arc<Pool<MySql>>,
}

impl MySqlPaymentStore {
    pub fn new(pool: Arc<Pool<MySql>>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TradeRepository for MySqlPaymentStore {
    async fn insert_trade(&self, trade: &Trade) -> DomainResult<()> {
        let query = format!(
            "INSERT INTO trades ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TRADE_COLUMNS
        );

        sqlx::query(&query)
            .bind(trade.id)
            .bind(&trade.order_no)
            .bind(&trade.third_party_trade_no)
            .bind(trade.user_id)
            .bind(trade.task_id)
            .bind(trade.trade_type.to_string())
            .bind(trade.order_type.to_string())
            .bind(trade.amount.to_cents())
            .bind(trade.status.to_string())
            .bind(&trade.pay_method)
            .bind(&trade.transaction_id)
            .bind(&trade.pay_url)
            .bind(&trade.qr_code)
            .bind(&trade.client_ip)
            .bind(&trade.remark)
            .bind(trade.pay_time)
            .bind(trade.expire_time)
            .bind(trade.created_at)
            .bind(trade.updated_at)
            .bind(trade.version)
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| map_insert_error(e, &trade.order_no))?;

        debug!("Trade saved: {}", trade.order_no);
        Ok(())
    }

    async fn find_trade_by_order_no(&self, order_no: &str) -> DomainResult<Option<Trade>> {
        let query = format!("SELECT {} FROM trades WHERE order_no = ?", TRADE_COLUMNS);

        let row = sqlx::query_as::<_, TradeRow>(&query)
            .bind(order_no)
            .fetch_optional(self.pool.as_ref())
            .await?;

        row.map(TradeRow::into_trade).transpose()
    }

    async fn update_trade(&self, trade: &mut Trade) -> DomainResult<()> {
        exec_update_trade(self.pool.as_ref(), trade).await
    }

    async fn find_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> DomainResult<Vec<Trade>> {
        let query = format!(
            "SELECT {} FROM trades WHERE status = 'pending' AND expire_time < ? ORDER BY expire_time LIMIT ?",
            TRADE_COLUMNS
        );

        let rows = sqlx::query_as::<_, TradeRow>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(self.pool.as_ref())
            .await?;

        rows.into_iter().map(TradeRow::into_trade).collect()
    }
}

#[async_trait]
impl RefundRepository for MySqlPaymentStore {
    async fn insert_refund(&self, refund: &Refund) -> DomainResult<()> {
        let query = format!(
            "INSERT INTO refunds ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            REFUND_COLUMNS
        );

        sqlx::query(&query)
            .bind(refund.id)
            .bind(&refund.refund_no)
            .bind(refund.trade_id)
            .bind(&refund.order_no)
            .bind(refund.amount.to_cents())
            .bind(&refund.reason)
            .bind(refund.status.to_string())
            .bind(refund.refund_time)
            .bind(refund.created_at)
            .bind(refund.updated_at)
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| map_insert_error(e, &refund.refund_no))?;

        debug!("Refund saved: {}", refund.refund_no);
        Ok(())
    }

    async fn find_refund_by_no(&self, refund_no: &str) -> DomainResult<Option<Refund>> {
        let query = format!("SELECT {} FROM refunds WHERE refund_no = ?", REFUND_COLUMNS);

        let row = sqlx::query_as::<_, RefundRow>(&query)
            .bind(refund_no)
            .fetch_optional(self.pool.as_ref())
            .await?;

        row.map(RefundRow::into_refund).transpose()
    }

    async fn list_refunds_by_trade(&self, trade_id: Uuid) -> DomainResult<Vec<Refund>> {
        let query = format!(
            "SELECT {} FROM refunds WHERE trade_id = ? ORDER BY created_at",
            REFUND_COLUMNS
        );

        let rows = sqlx::query_as::<_, RefundRow>(&query)
            .bind(trade_id)
            .fetch_all(self.pool.as_ref())
            .await?;

        rows.into_iter().map(RefundRow::into_refund).collect()
    }

    async fn update_refund(&self, refund: &Refund) -> DomainResult<()> {
        exec_update_refund(self.pool.as_ref(), refund).await
    }
}

#[async_trait]
impl SettlementRepository for MySqlPaymentStore {
    async fn insert_settlement(&self, settlement: &Settlement) -> DomainResult<()> {
        let query = format!(
            "INSERT INTO settlements ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            SETTLEMENT_COLUMNS
        );

        sqlx::query(&query)
            .bind(settlement.id)
            .bind(settlement.task_id)
            .bind(settlement.publisher_id)
            .bind(settlement.taker_id)
            .bind(settlement.publisher_amount.to_cents())
            .bind(settlement.taker_amount.to_cents())
            .bind(settlement.platform_fee.to_cents())
            .bind(settlement.status.to_string())
            .bind(&settlement.transfer_no)
            .bind(&settlement.gateway_transfer_no)
            .bind(settlement.settle_time)
            .bind(&settlement.remark)
            .bind(settlement.created_at)
            .bind(settlement.updated_at)
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| map_insert_error(e, &format!("settlement for task {}", settlement.task_id)))?;

        debug!("Settlement saved for task {}", settlement.task_id);
        Ok(())
    }

    async fn find_active_settlement(&self, task_id: u64) -> DomainResult<Option<Settlement>> {
        let query = format!(
            "SELECT {} FROM settlements WHERE task_id = ? AND status <> 'failed'",
            SETTLEMENT_COLUMNS
        );

        let row = sqlx::query_as::<_, SettlementRow>(&query)
            .bind(task_id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        row.map(SettlementRow::into_settlement).transpose()
    }

    async fn find_settlement_by_transfer_no(
        &self,
        transfer_no: &str,
    ) -> DomainResult<Option<Settlement>> {
        let query = format!(
            "SELECT {} FROM settlements WHERE transfer_no = ?",
            SETTLEMENT_COLUMNS
        );

        let row = sqlx::query_as::<_, SettlementRow>(&query)
            .bind(transfer_no)
            .fetch_optional(self.pool.as_ref())
            .await?;

        row.map(SettlementRow::into_settlement).transpose()
    }

    async fn update_settlement(&self, settlement: &Settlement) -> DomainResult<()> {
        exec_update_settlement(self.pool.as_ref(), settlement).await
    }
}

#[async_trait]
impl TaskRepository for MySqlPaymentStore {
    async fn find_task(&self, task_id: u64) -> DomainResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, publisher_id, taker_id, title, amount_cents, status, take_time, updated_at
            FROM tasks
            WHERE id = ?
            "#,
        )
        .bind(task_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(TaskRow::into_task).transpose()
    }

    async fn find_payee_account(&self, user_id: u64) -> DomainResult<Option<PayeeAccount>> {
        let row = sqlx::query_as::<_, PayeeRow>(
            "SELECT user_id, account_no, real_name, bank_code FROM payee_accounts WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(|row| PayeeAccount {
            user_id: row.user_id,
            account_no: row.account_no,
            real_name: row.real_name,
            bank_code: row.bank_code,
        }))
    }
}

#[async_trait]
impl UnitOfWork for MySqlPaymentStore {
    async fn begin(&self) -> DomainResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(MySqlStoreTransaction { tx }))
    }
}

/// MySQL事务，未提交即丢弃时由 sqlx 回滚
pub struct MySqlStoreTransaction {
    tx: Transaction<'static, MySql>,
}

#[async_trait]
impl StoreTransaction for MySqlStoreTransaction {
    async fn update_trade(&mut self, trade: &mut Trade) -> DomainResult<()> {
        exec_update_trade(&mut *self.tx, trade).await
    }

    async fn update_refund(&mut self, refund: &Refund) -> DomainResult<()> {
        exec_update_refund(&mut *self.tx, refund).await
    }

    async fn update_settlement(&mut self, settlement: &Settlement) -> DomainResult<()> {
        exec_update_settlement(&mut *self.tx, settlement).await
    }

    async fn update_task(&mut self, task: &Task, expected_status: TaskStatus) -> DomainResult<()> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE tasks SET taker_id = ?, status = ?, take_time = ?, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(task.taker_id)
        .bind(task.status.to_string())
        .bind(task.take_time)
        .bind(task.updated_at)
        .bind(task.id)
        .bind(expected_status.to_string())
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(DomainError::StateConflict(format!(
                "Task {} is no longer {}",
                task.id, expected_status
            )));
        }
        Ok(())
    }

    async fn insert_task_log(&mut self, log: &TaskLog) -> DomainResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_logs (task_id, user_id, action, content, old_status, new_status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.task_id)
        .bind(log.user_id)
        .bind(&log.action)
        .bind(&log.content)
        .bind(log.old_status.to_string())
        .bind(log.new_status.to_string())
        .bind(log.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> DomainResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> DomainResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// 审计事件表写入
#[derive(Clone)]
pub struct MySqlPaymentEventSink {
    pool: Arc<Pool<MySql>>,
}

impl MySqlPaymentEventSink {
    pub fn new(pool: Arc<Pool<MySql>>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentEventSink for MySqlPaymentEventSink {
    async fn publish(&self, events: Vec<PaymentEvent>) -> DomainResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut builder = sqlx::QueryBuilder::<MySql>::new(
            "INSERT IGNORE INTO payment_events (event_id, event_type, aggregate_key, payload, occurred_at) ",
        );

        let mut rows = Vec::with_capacity(events.len());
        for event in &events {
            rows.push((
                event.event_id(),
                crate::domain::DomainEvent::event_type(event),
                event.aggregate_key(),
                serde_json::to_value(event)?,
                crate::domain::DomainEvent::occurred_at(event),
            ));
        }

        builder.push_values(rows, |mut b, (id, kind, key, payload, at)| {
            b.push_bind(id)
                .push_bind(kind)
                .push_bind(key)
                .push_bind(payload)
                .push_bind(at);
        });

        builder.build().execute(self.pool.as_ref()).await?;
        debug!("Payment events written: {}", events.len());
        Ok(())
    }
}

/// 数据库行结构体
#[derive(Debug, sqlx::FromRow)]
struct TradeRow {
    id: Uuid,
    order_no: String,
    third_party_trade_no: Option<String>,
    user_id: u64,
    task_id: Option<u64>,
    trade_type: String,
    order_type: String,
    amount_cents: i64,
    status: String,
    pay_method: Option<String>,
    transaction_id: Option<String>,
    pay_url: Option<String>,
    qr_code: Option<String>,
    client_ip: String,
    remark: Option<String>,
    pay_time: Option<DateTime<Utc>>,
    expire_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl TradeRow {
    fn into_trade(self) -> DomainResult<Trade> {
        Ok(Trade {
            id: self.id,
            order_no: self.order_no,
            third_party_trade_no: self.third_party_trade_no,
            user_id: self.user_id,
            task_id: self.task_id,
            trade_type: self.trade_type.parse()?,
            order_type: self.order_type.parse().map_err(|_| {
                DomainError::InternalError(format!("Invalid order type: {}", self.order_type))
            })?,
            amount: Money::from_cents(self.amount_cents),
            status: self.status.parse()?,
            pay_method: self.pay_method,
            transaction_id: self.transaction_id,
            pay_url: self.pay_url,
            qr_code: self.qr_code,
            client_ip: self.client_ip,
            remark: self.remark,
            pay_time: self.pay_time,
            expire_time: self.expire_time,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RefundRow {
    id: Uuid,
    refund_no: String,
    trade_id: Uuid,
    order_no: String,
    amount_cents: i64,
    reason: String,
    status: String,
    refund_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RefundRow {
    fn into_refund(self) -> DomainResult<Refund> {
        Ok(Refund {
            id: self.id,
            refund_no: self.refund_no,
            trade_id: self.trade_id,
            order_no: self.order_no,
            amount: Money::from_cents(self.amount_cents),
            reason: self.reason,
            status: self.status.parse()?,
            refund_time: self.refund_time,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SettlementRow {
    id: Uuid,
    task_id: u64,
    publisher_id: u64,
    taker_id: u64,
    publisher_amount_cents: i64,
    taker_amount_cents: i64,
    platform_fee_cents: i64,
    status: String,
    transfer_no: String,
    gateway_transfer_no: Option<String>,
    settle_time: Option<DateTime<Utc>>,
    remark: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SettlementRow {
    fn into_settlement(self) -> DomainResult<Settlement> {
        Ok(Settlement {
            id: self.id,
            task_id: self.task_id,
            publisher_id: self.publisher_id,
            taker_id: self.taker_id,
            publisher_amount: Money::from_cents(self.publisher_amount_cents),
            taker_amount: Money::from_cents(self.taker_amount_cents),
            platform_fee: Money::from_cents(self.platform_fee_cents),
            status: self.status.parse()?,
            transfer_no: self.transfer_no,
            gateway_transfer_no: self.gateway_transfer_no,
            settle_time: self.settle_time,
            remark: self.remark,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TaskRow {
    id: u64,
    publisher_id: u64,
    taker_id: Option<u64>,
    title: String,
    amount_cents: i64,
    status: String,
    take_time: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn into_task(self) -> DomainResult<Task> {
        Ok(Task {
            id: self.id,
            publisher_id: self.publisher_id,
            taker_id: self.taker_id,
            title: self.title,
            amount: Money::from_cents(self.amount_cents),
            status: self.status.parse()?,
            take_time: self.take_time,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PayeeRow {
    user_id: u64,
    account_no: String,
    real_name: String,
    bank_code: Option<String>,
}
