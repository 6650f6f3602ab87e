use crate::domain::entities::{Refund, Settlement, Trade};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 领域事件trait
pub trait DomainEvent {
    fn event_type(&self) -> &'static str;
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// 预支付订单创建事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentOrderCreated {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub order_no: String,
    pub user_id: u64,
    pub amount: i64,
}

impl PaymentOrderCreated {
    pub fn from_trade(trade: &Trade) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            order_no: trade.order_no.clone(),
            user_id: trade.user_id,
            amount: trade.amount.to_cents(),
        }
    }
}

/// 支付成功事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSucceeded {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub order_no: String,
    pub third_party_trade_no: Option<String>,
    pub task_id: Option<u64>,
    pub amount: i64,
}

impl PaymentSucceeded {
    pub fn from_trade(trade: &Trade) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            order_no: trade.order_no.clone(),
            third_party_trade_no: trade.third_party_trade_no.clone(),
            task_id: trade.task_id,
            amount: trade.amount.to_cents(),
        }
    }
}

/// 支付失败事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub order_no: String,
    pub reason: String,
}

impl PaymentFailed {
    pub fn new(trade: &Trade, reason: String) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            order_no: trade.order_no.clone(),
            reason,
        }
    }
}

/// 退款完成事件（成功或失败）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundCompleted {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub refund_no: String,
    pub order_no: String,
    pub amount: i64,
    pub status: String,
}

impl RefundCompleted {
    pub fn from_refund(refund: &Refund) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            refund_no: refund.refund_no.clone(),
            order_no: refund.order_no.clone(),
            amount: refund.amount.to_cents(),
            status: refund.status.to_string(),
        }
    }
}

/// 结算完成事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementCompleted {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub task_id: u64,
    pub taker_id: u64,
    pub taker_amount: i64,
    pub platform_fee: i64,
    pub status: String,
}

impl SettlementCompleted {
    pub fn from_settlement(settlement: &Settlement) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            task_id: settlement.task_id,
            taker_id: settlement.taker_id,
            taker_amount: settlement.taker_amount.to_cents(),
            platform_fee: settlement.platform_fee.to_cents(),
            status: settlement.status.to_string(),
        }
    }
}

/// 需要人工对账（例如已失败订单收到支付成功通知）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRequired {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub order_no: String,
    pub reason: String,
}

impl ReconciliationRequired {
    pub fn new(order_no: &str, reason: String) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            order_no: order_no.to_string(),
            reason,
        }
    }
}

/// 写入审计流水的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    OrderCreated(PaymentOrderCreated),
    Succeeded(PaymentSucceeded),
    Failed(PaymentFailed),
    Refund(RefundCompleted),
    Settlement(SettlementCompleted),
    Reconciliation(ReconciliationRequired),
}

impl PaymentEvent {
    pub fn event_id(&self) -> Uuid {
        match self {
            PaymentEvent::OrderCreated(e) => e.event_id,
            PaymentEvent::Succeeded(e) => e.event_id,
            PaymentEvent::Failed(e) => e.event_id,
            PaymentEvent::Refund(e) => e.event_id,
            PaymentEvent::Settlement(e) => e.event_id,
            PaymentEvent::Reconciliation(e) => e.event_id,
        }
    }

    /// 事件归属的业务键（订单号或任务）
    pub fn aggregate_key(&self) -> String {
        match self {
            PaymentEvent::OrderCreated(e) => e.order_no.clone(),
            PaymentEvent::Succeeded(e) => e.order_no.clone(),
            PaymentEvent::Failed(e) => e.order_no.clone(),
            PaymentEvent::Refund(e) => e.order_no.clone(),
            PaymentEvent::Settlement(e) => format!("task:{}", e.task_id),
            PaymentEvent::Reconciliation(e) => e.order_no.clone(),
        }
    }
}

impl DomainEvent for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::OrderCreated(_) => "PaymentOrderCreated",
            PaymentEvent::Succeeded(_) => "PaymentSucceeded",
            PaymentEvent::Failed(_) => "PaymentFailed",
            PaymentEvent::Refund(_) => "RefundCompleted",
            PaymentEvent::Settlement(_) => "SettlementCompleted",
            PaymentEvent::Reconciliation(_) => "ReconciliationRequired",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PaymentEvent::OrderCreated(e) => e.occurred_at,
            PaymentEvent::Succeeded(e) => e.occurred_at,
            PaymentEvent::Failed(e) => e.occurred_at,
            PaymentEvent::Refund(e) => e.occurred_at,
            PaymentEvent::Settlement(e) => e.occurred_at,
            PaymentEvent::Reconciliation(e) => e.occurred_at,
        }
    }
}
