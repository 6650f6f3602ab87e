use crate::domain::errors::DomainResult;
use crate::domain::Money;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 预支付请求参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrePayRequest {
    pub order_no: String,
    pub amount: Money,
    pub subject: String,
    pub description: String,
    pub notify_url: String,
    pub return_url: Option<String>,
    /// 订单过期时间（秒）
    pub expire_seconds: i64,
    pub client_ip: String,
    pub extra: String,
}

/// 预支付响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrePayResponse {
    pub order_no: String,
    pub trade_no: String,
    #[serde(default)]
    pub pay_url: Option<String>,
    #[serde(default, rename = "qrcode")]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub expire_time: Option<i64>,
}

/// 支付状态查询
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayStatusQuery {
    pub order_no: String,
    pub trade_no: Option<String>,
}

/// 网关侧交易状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayTradeState {
    Success,
    NotPay,
    Closed,
    Failed,
    Unknown(String),
}

impl GatewayTradeState {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "SUCCESS" | "PAID" => GatewayTradeState::Success,
            "NOTPAY" | "PENDING" | "USERPAYING" => GatewayTradeState::NotPay,
            "CLOSED" | "REVOKED" => GatewayTradeState::Closed,
            "FAILED" | "PAYERROR" => GatewayTradeState::Failed,
            _ => GatewayTradeState::Unknown(raw.to_string()),
        }
    }
}

/// 支付状态查询响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayStatusResponse {
    pub order_no: String,
    #[serde(default)]
    pub trade_no: String,
    pub status: String,
    /// 金额，保持网关原始字符串以便精确比对
    pub amount: String,
    #[serde(default)]
    pub pay_time: Option<String>,
    #[serde(default)]
    pub pay_method: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

impl PayStatusResponse {
    pub fn state(&self) -> GatewayTradeState {
        GatewayTradeState::parse(&self.status)
    }
}

/// 退款请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundRequest {
    pub order_no: String,
    pub refund_no: String,
    pub amount: Money,
    pub reason: String,
    pub notify_url: String,
}

/// 退款响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundResponse {
    pub refund_no: String,
    #[serde(default)]
    pub order_no: String,
    pub amount: String,
    /// SUCCESS / PROCESSING / FAILED
    pub status: String,
    #[serde(default)]
    pub refund_time: Option<String>,
}

/// 转账请求（用于任务结算）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub transfer_no: String,
    pub account_no: String,
    pub real_name: String,
    pub bank_code: Option<String>,
    pub amount: Money,
    pub memo: String,
    pub notify_url: String,
}

/// 转账响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferResponse {
    #[serde(rename = "order_no")]
    pub transfer_no: String,
    #[serde(rename = "transfer_no")]
    pub gateway_transfer_no: String,
    pub status: String,
    pub amount: String,
    #[serde(default)]
    pub transfer_time: Option<String>,
}

/// 支付网关端口接口
#[async_trait]
pub trait PaymentGatewayPort: Send + Sync {
    /// 预支付下单
    async fn pre_pay(&self, request: PrePayRequest) -> DomainResult<PrePayResponse>;

    /// 查询支付状态
    async fn query_status(&self, query: PayStatusQuery) -> DomainResult<PayStatusResponse>;

    /// 退款
    async fn refund(&self, request: RefundRequest) -> DomainResult<RefundResponse>;

    /// 转账
    async fn transfer(&self, request: TransferRequest) -> DomainResult<TransferResponse>;

    /// 验证回调通知签名
    fn verify_notification(&self, params: &HashMap<String, String>) -> bool;
}
