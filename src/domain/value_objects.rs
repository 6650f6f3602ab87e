use crate::domain::errors::{DomainError, DomainResult};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 交易状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    /// 待支付
    Pending,
    /// 已支付
    Paid,
    /// 支付失败（含过期）
    Failed,
    /// 已全额退款
    Refunded,
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Pending => write!(f, "pending"),
            TradeStatus::Paid => write!(f, "paid"),
            TradeStatus::Failed => write!(f, "failed"),
            TradeStatus::Refunded => write!(f, "refunded"),
        }
    }
}

impl FromStr for TradeStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        match s {
            "pending" => Ok(TradeStatus::Pending),
            "paid" => Ok(TradeStatus::Paid),
            "failed" => Ok(TradeStatus::Failed),
            "refunded" => Ok(TradeStatus::Refunded),
            other => Err(DomainError::InternalError(format!(
                "Invalid trade status: {}",
                other
            ))),
        }
    }
}

/// 交易类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    Prepay,
    Settle,
    Refund,
    Penalty,
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeType::Prepay => write!(f, "prepay"),
            TradeType::Settle => write!(f, "settle"),
            TradeType::Refund => write!(f, "refund"),
            TradeType::Penalty => write!(f, "penalty"),
        }
    }
}

impl FromStr for TradeType {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        match s {
            "prepay" => Ok(TradeType::Prepay),
            "settle" => Ok(TradeType::Settle),
            "refund" => Ok(TradeType::Refund),
            "penalty" => Ok(TradeType::Penalty),
            other => Err(DomainError::InternalError(format!(
                "Invalid trade type: {}",
                other
            ))),
        }
    }
}

/// 订单业务类型，决定支付成功后的后续处理
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// 任务发布预缴
    TaskPublish,
    /// 任务接取预缴
    TaskTake,
    /// 保证金
    Deposit,
    /// 服务费
    ServiceFee,
}

impl OrderType {
    /// 该类型的订单是否必须关联任务
    pub fn requires_task(&self) -> bool {
        matches!(self, OrderType::TaskPublish | OrderType::TaskTake)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::TaskPublish => write!(f, "task_publish"),
            OrderType::TaskTake => write!(f, "task_take"),
            OrderType::Deposit => write!(f, "deposit"),
            OrderType::ServiceFee => write!(f, "service_fee"),
        }
    }
}

impl FromStr for OrderType {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        match s {
            "task_publish" => Ok(OrderType::TaskPublish),
            "task_take" => Ok(OrderType::TaskTake),
            "deposit" => Ok(OrderType::Deposit),
            "service_fee" => Ok(OrderType::ServiceFee),
            other => Err(DomainError::ValidationError(format!(
                "Unknown order type: {}",
                other
            ))),
        }
    }
}

/// 退款状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Processing,
    Succeeded,
    Failed,
}

impl RefundStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, RefundStatus::Processing)
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefundStatus::Processing => write!(f, "processing"),
            RefundStatus::Succeeded => write!(f, "succeeded"),
            RefundStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RefundStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        match s {
            "processing" => Ok(RefundStatus::Processing),
            "succeeded" => Ok(RefundStatus::Succeeded),
            "failed" => Ok(RefundStatus::Failed),
            other => Err(DomainError::InternalError(format!(
                "Invalid refund status: {}",
                other
            ))),
        }
    }
}

/// 结算状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementStatus::Pending => write!(f, "pending"),
            SettlementStatus::Completed => write!(f, "completed"),
            SettlementStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for SettlementStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        match s {
            "pending" => Ok(SettlementStatus::Pending),
            "completed" => Ok(SettlementStatus::Completed),
            "failed" => Ok(SettlementStatus::Failed),
            other => Err(DomainError::InternalError(format!(
                "Invalid settlement status: {}",
                other
            ))),
        }
    }
}

/// 任务状态（任务本身由外部服务管理，这里只关心支付相关的迁移）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Draft,
    PendingAudit,
    Open,
    InProgress,
    PendingAcceptance,
    Completed,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Draft => write!(f, "draft"),
            TaskStatus::PendingAudit => write!(f, "pending_audit"),
            TaskStatus::Open => write!(f, "open"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::PendingAcceptance => write!(f, "pending_acceptance"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> DomainResult<Self> {
        match s {
            "draft" => Ok(TaskStatus::Draft),
            "pending_audit" => Ok(TaskStatus::PendingAudit),
            "open" => Ok(TaskStatus::Open),
            "in_progress" => Ok(TaskStatus::InProgress),
            "pending_acceptance" => Ok(TaskStatus::PendingAcceptance),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(DomainError::InternalError(format!(
                "Invalid task status: {}",
                other
            ))),
        }
    }
}

/// 货币金额（分为单位，避免浮点数精度问题）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    /// 金额（分）
    amount_cents: i64,
}

impl Money {
    pub const ZERO: Money = Money { amount_cents: 0 };

    /// 创建新的金额对象（单位：元）
    pub fn from_yuan(amount: i64) -> Self {
        Self {
            amount_cents: amount * 100,
        }
    }

    /// 创建新的金额对象（单位：分）
    pub fn from_cents(cents: i64) -> Self {
        Self { amount_cents: cents }
    }

    /// 从十进制金额（元）创建，小数位超过两位时报错
    pub fn from_decimal(amount: Decimal) -> DomainResult<Self> {
        let cents = amount.checked_mul(Decimal::ONE_HUNDRED).ok_or_else(|| {
            DomainError::ValidationError(format!("Amount {} is out of range", amount))
        })?;
        if cents.fract() != Decimal::ZERO {
            return Err(DomainError::ValidationError(format!(
                "Amount {} has more than two decimal places",
                amount
            )));
        }
        let cents = i64::try_from(cents).map_err(|_| {
            DomainError::ValidationError(format!("Amount {} is out of range", amount))
        })?;
        Ok(Self::from_cents(cents))
    }

    /// 解析网关格式的金额字符串，例如 "100.00"
    pub fn parse(raw: &str) -> DomainResult<Self> {
        Self::from_decimal(Self::parse_decimal(raw)?)
    }

    /// 只解析不取整，用于与网关报告的金额逐位比较
    pub fn parse_decimal(raw: &str) -> DomainResult<Decimal> {
        Decimal::from_str(raw.trim()).map_err(|e| {
            DomainError::ValidationError(format!("Malformed amount '{}': {}", raw, e))
        })
    }

    /// 网关报告的金额是否与本金额完全相等
    pub fn matches_reported(&self, raw: &str) -> DomainResult<bool> {
        Ok(Self::parse_decimal(raw)? == self.to_decimal())
    }

    /// 转换为分
    pub fn to_cents(&self) -> i64 {
        self.amount_cents
    }

    /// 转换为十进制（元）
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.amount_cents, 2)
    }

    /// 网关报文使用的两位小数格式
    pub fn to_wire(&self) -> String {
        format!("{:.2}", self.to_decimal())
    }

    pub fn is_positive(&self) -> bool {
        self.amount_cents > 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.amount_cents.checked_add(other.amount_cents).map(Money::from_cents)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.amount_cents.checked_sub(other.amount_cents).map(Money::from_cents)
    }

    /// 按比例计算金额，四舍五入到分
    pub fn apply_ratio(&self, ratio: Decimal) -> DomainResult<Money> {
        let scaled = (self.to_decimal() * ratio)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Money::from_decimal(scaled)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "¥{}", self.to_wire())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_from_yuan() {
        let money = Money::from_yuan(10);
        assert_eq!(money.to_cents(), 1000);
        assert_eq!(money.to_decimal(), dec!(10.00));
    }

    #[test]
    fn test_money_display() {
        let money = Money::from_yuan(10);
        assert_eq!(format!("{}", money), "¥10.00");
        assert_eq!(Money::from_cents(5).to_wire(), "0.05");
    }

    #[test]
    fn test_parse_is_exact() {
        assert_eq!(Money::parse("100.00").unwrap(), Money::from_cents(10000));
        assert_eq!(Money::parse("0.1").unwrap(), Money::from_cents(10));
        assert_eq!(Money::parse(" 19.99 ").unwrap(), Money::from_cents(1999));
    }

    #[test]
    fn test_parse_rejects_sub_cent_and_garbage() {
        assert!(matches!(
            Money::parse("100.001"),
            Err(DomainError::ValidationError(_))
        ));
        assert!(matches!(
            Money::parse("abc"),
            Err(DomainError::ValidationError(_))
        ));
        assert!(matches!(
            Money::parse("79228162514264337593543950335"),
            Err(DomainError::ValidationError(_))
        ));
    }

    #[test]
    fn test_matches_reported_compares_exact_value() {
        let amount = Money::from_yuan(100);
        assert!(amount.matches_reported("100.00").unwrap());
        assert!(amount.matches_reported("100").unwrap());
        assert!(!amount.matches_reported("100.001").unwrap());
        assert!(!amount.matches_reported("99.99").unwrap());
        assert!(matches!(
            amount.matches_reported("abc"),
            Err(DomainError::ValidationError(_))
        ));
    }

    #[test]
    fn test_apply_ratio_rounds_half_up() {
        // 0.06 * 10.25 = 0.615 -> 0.62
        let fee = Money::from_cents(1025).apply_ratio(dec!(0.06)).unwrap();
        assert_eq!(fee.to_cents(), 62);
        let fee = Money::from_yuan(100).apply_ratio(dec!(0.06)).unwrap();
        assert_eq!(fee.to_cents(), 600);
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            TradeStatus::Pending,
            TradeStatus::Paid,
            TradeStatus::Failed,
            TradeStatus::Refunded,
        ] {
            assert_eq!(status.to_string().parse::<TradeStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<TaskStatus>().is_err());
        assert!(matches!(
            "lottery".parse::<OrderType>(),
            Err(DomainError::ValidationError(_))
        ));
    }
}
