use crate::domain::{Money, OrderType, Refund, Settlement, Trade};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 创建预支付订单请求
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePrePayOrderRequest {
    /// 付款用户ID
    pub user_id: u64,

    /// 关联任务ID（任务类订单必填）
    #[serde(default)]
    pub task_id: Option<u64>,

    pub order_type: OrderType,

    /// 支付金额（分）
    pub amount: Money,

    /// 客户端IP
    pub client_ip: String,

    #[serde(default)]
    pub remark: Option<String>,

    /// 商品标题，缺省按订单类型生成
    #[serde(default)]
    pub subject: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// 支付完成后的跳转地址
    #[serde(default)]
    pub return_url: Option<String>,
}

/// 预支付结果：交易记录加上网关支付凭据
#[derive(Debug, Clone, Serialize)]
pub struct PrePayOrderResponse {
    pub order_no: String,
    pub third_party_trade_no: Option<String>,
    /// 支付金额（分）
    pub amount: i64,
    pub status: String,
    pub pay_url: Option<String>,
    pub qr_code: Option<String>,
    pub expire_time: Option<DateTime<Utc>>,
}

impl From<&Trade> for PrePayOrderResponse {
    fn from(trade: &Trade) -> Self {
        Self {
            order_no: trade.order_no.clone(),
            third_party_trade_no: trade.third_party_trade_no.clone(),
            amount: trade.amount.to_cents(),
            status: trade.status.to_string(),
            pay_url: trade.pay_url.clone(),
            qr_code: trade.qr_code.clone(),
            expire_time: trade.expire_time,
        }
    }
}

/// 交易查询响应
#[derive(Debug, Clone, Serialize)]
pub struct TradeResponse {
    pub order_no: String,
    pub third_party_trade_no: Option<String>,
    pub user_id: u64,
    pub task_id: Option<u64>,
    pub order_type: String,
    pub amount: i64,
    pub status: String,
    pub pay_method: Option<String>,
    pub pay_time: Option<DateTime<Utc>>,
    pub expire_time: Option<DateTime<Utc>>,
}

impl From<&Trade> for TradeResponse {
    fn from(trade: &Trade) -> Self {
        Self {
            order_no: trade.order_no.clone(),
            third_party_trade_no: trade.third_party_trade_no.clone(),
            user_id: trade.user_id,
            task_id: trade.task_id,
            order_type: trade.order_type.to_string(),
            amount: trade.amount.to_cents(),
            status: trade.status.to_string(),
            pay_method: trade.pay_method.clone(),
            pay_time: trade.pay_time,
            expire_time: trade.expire_time,
        }
    }
}

/// 退款请求
#[derive(Debug, Clone, Deserialize)]
pub struct RefundOrderRequest {
    pub order_no: String,

    /// 退款金额（分）
    pub amount: Money,

    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundOrderResponse {
    pub refund_no: String,
    pub order_no: String,
    pub amount: i64,
    pub status: String,
    pub refund_time: Option<DateTime<Utc>>,
}

impl From<&Refund> for RefundOrderResponse {
    fn from(refund: &Refund) -> Self {
        Self {
            refund_no: refund.refund_no.clone(),
            order_no: refund.order_no.clone(),
            amount: refund.amount.to_cents(),
            status: refund.status.to_string(),
            refund_time: refund.refund_time,
        }
    }
}

/// 任务结算请求
///
/// 两个金额都给出时按比例校验；只给出发布方金额或都不给时，
/// 平台费按比例计算，剩余部分归接取方。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettleTaskRequest {
    #[serde(default)]
    pub publisher_amount: Option<Money>,

    #[serde(default)]
    pub taker_amount: Option<Money>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementResponse {
    pub task_id: u64,
    pub transfer_no: String,
    pub gateway_transfer_no: Option<String>,
    pub publisher_amount: i64,
    pub taker_amount: i64,
    pub platform_fee: i64,
    pub status: String,
    pub settle_time: Option<DateTime<Utc>>,
}

impl From<&Settlement> for SettlementResponse {
    fn from(settlement: &Settlement) -> Self {
        Self {
            task_id: settlement.task_id,
            transfer_no: settlement.transfer_no.clone(),
            gateway_transfer_no: settlement.gateway_transfer_no.clone(),
            publisher_amount: settlement.publisher_amount.to_cents(),
            taker_amount: settlement.taker_amount.to_cents(),
            platform_fee: settlement.platform_fee.to_cents(),
            status: settlement.status.to_string(),
            settle_time: settlement.settle_time,
        }
    }
}

/// 错误响应
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: String, message: String) -> Self {
        Self { error, message }
    }
}
