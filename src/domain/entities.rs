use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::value_objects::{
    Money, OrderType, RefundStatus, SettlementStatus, TradeStatus, TradeType,
};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 交易记录（财务审计数据，永不物理删除）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// 交易ID（内部）
    pub id: Uuid,

    /// 内部订单号（全局唯一）
    pub order_no: String,

    /// 网关交易号，网关确认后设置且只设置一次
    pub third_party_trade_no: Option<String>,

    /// 付款用户ID
    pub user_id: u64,

    /// 关联任务ID
    pub task_id: Option<u64>,

    pub trade_type: TradeType,

    /// 订单业务类型
    pub order_type: OrderType,

    /// 交易金额
    pub amount: Money,

    pub status: TradeStatus,

    /// 支付方式（网关回传）
    pub pay_method: Option<String>,

    /// 渠道交易号（网关回传）
    pub transaction_id: Option<String>,

    /// 支付链接
    pub pay_url: Option<String>,

    /// 二维码内容
    pub qr_code: Option<String>,

    /// 客户端IP
    pub client_ip: String,

    /// 备注
    pub remark: Option<String>,

    /// 支付完成时间
    pub pay_time: Option<DateTime<Utc>>,

    /// 过期时间
    pub expire_time: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// 乐观锁版本号
    pub version: i64,
}

/// 网关确认支付时回传的信息
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentDetails {
    pub third_party_trade_no: String,
    pub pay_method: Option<String>,
    pub transaction_id: Option<String>,
    pub pay_time: DateTime<Utc>,
}

impl Trade {
    /// 创建新的预支付交易
    #[allow(clippy::too_many_arguments)]
    pub fn new_prepay(
        order_no: String,
        user_id: u64,
        task_id: Option<u64>,
        order_type: OrderType,
        amount: Money,
        client_ip: String,
        remark: Option<String>,
        expire_after: Duration,
    ) -> DomainResult<Self> {
        if !amount.is_positive() {
            return Err(DomainError::ValidationError(
                "Amount must be greater than 0".to_string(),
            ));
        }

        if order_no.is_empty() || order_no.len() > 64 {
            return Err(DomainError::ValidationError(
                "Order no must be 1-64 characters".to_string(),
            ));
        }

        if order_type.requires_task() && task_id.is_none() {
            return Err(DomainError::ValidationError(format!(
                "Order type {} requires a task id",
                order_type
            )));
        }

        if let Some(remark) = &remark {
            if remark.chars().count() > 500 {
                return Err(DomainError::ValidationError(
                    "Remark must be at most 500 characters".to_string(),
                ));
            }
        }

        let now = Utc::now();

        Ok(Self {
            id: Uuid::new_v4(),
            order_no,
            third_party_trade_no: None,
            user_id,
            task_id,
            trade_type: TradeType::Prepay,
            order_type,
            amount,
            status: TradeStatus::Pending,
            pay_method: None,
            transaction_id: None,
            pay_url: None,
            qr_code: None,
            client_ip,
            remark,
            pay_time: None,
            expire_time: Some(now + expire_after),
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    fn set_third_party_trade_no(&mut self, trade_no: &str) -> DomainResult<()> {
        match &self.third_party_trade_no {
            Some(existing) if existing != trade_no => Err(DomainError::StateConflict(format!(
                "Trade {} already bound to gateway trade {}, refusing {}",
                self.order_no, existing, trade_no
            ))),
            Some(_) => Ok(()),
            None => {
                self.third_party_trade_no = Some(trade_no.to_string());
                Ok(())
            }
        }
    }

    /// 记录网关预下单结果
    pub fn attach_gateway_order(
        &mut self,
        trade_no: &str,
        pay_url: Option<String>,
        qr_code: Option<String>,
    ) -> DomainResult<()> {
        self.set_third_party_trade_no(trade_no)?;
        self.pay_url = pay_url;
        self.qr_code = qr_code;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 标记为已支付
    pub fn mark_as_paid(&mut self, details: PaymentDetails) -> DomainResult<()> {
        if self.status != TradeStatus::Pending {
            return Err(DomainError::StateConflict(format!(
                "Trade {} cannot become paid from {}",
                self.order_no, self.status
            )));
        }

        self.set_third_party_trade_no(&details.third_party_trade_no)?;
        self.status = TradeStatus::Paid;
        self.pay_method = details.pay_method;
        self.transaction_id = details.transaction_id;
        self.pay_time = Some(details.pay_time);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 标记为支付失败
    pub fn mark_as_failed(&mut self) -> DomainResult<()> {
        if self.status != TradeStatus::Pending {
            return Err(DomainError::StateConflict(format!(
                "Trade {} cannot fail from {}",
                self.order_no, self.status
            )));
        }

        self.status = TradeStatus::Failed;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 标记为已全额退款
    pub fn mark_as_refunded(&mut self) -> DomainResult<()> {
        if self.status != TradeStatus::Paid {
            return Err(DomainError::StateConflict(format!(
                "Trade {} cannot be refunded from {}",
                self.order_no, self.status
            )));
        }

        self.status = TradeStatus::Refunded;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 是否已超过支付期限
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_time.is_some_and(|expire| now > expire)
    }

    pub fn is_pending(&self) -> bool {
        self.status == TradeStatus::Pending
    }
}

/// 退款记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: Uuid,

    /// 退款单号（全局唯一）
    pub refund_no: String,

    /// 原交易ID
    pub trade_id: Uuid,

    /// 原订单号
    pub order_no: String,

    pub amount: Money,

    pub reason: String,

    pub status: RefundStatus,

    pub refund_time: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Refund {
    pub fn new(refund_no: String, trade: &Trade, amount: Money, reason: String) -> DomainResult<Self> {
        if !amount.is_positive() {
            return Err(DomainError::ValidationError(
                "Refund amount must be greater than 0".to_string(),
            ));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            refund_no,
            trade_id: trade.id,
            order_no: trade.order_no.clone(),
            amount,
            reason,
            status: RefundStatus::Processing,
            refund_time: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn mark_as_succeeded(&mut self, refund_time: DateTime<Utc>) -> DomainResult<()> {
        self.ensure_processing()?;
        self.status = RefundStatus::Succeeded;
        self.refund_time = Some(refund_time);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_as_failed(&mut self) -> DomainResult<()> {
        self.ensure_processing()?;
        self.status = RefundStatus::Failed;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn ensure_processing(&self) -> DomainResult<()> {
        if self.status != RefundStatus::Processing {
            return Err(DomainError::StateConflict(format!(
                "Refund {} is already {}",
                self.refund_no, self.status
            )));
        }
        Ok(())
    }
}

/// 任务结算金额拆分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSplit {
    pub publisher_amount: Money,
    pub taker_amount: Money,
    pub platform_fee: Money,
}

impl SettlementSplit {
    /// 校验调用方给出的拆分，平台费按配置比例计算
    pub fn checked(
        task_amount: Money,
        fee_ratio: Decimal,
        publisher_amount: Money,
        taker_amount: Money,
    ) -> DomainResult<Self> {
        if publisher_amount.to_cents() < 0 || taker_amount.to_cents() < 0 {
            return Err(DomainError::ValidationError(
                "Settlement amounts must not be negative".to_string(),
            ));
        }

        let platform_fee = task_amount.apply_ratio(fee_ratio)?;
        let split = Self {
            publisher_amount,
            taker_amount,
            platform_fee,
        };

        if split.total() != Some(task_amount) {
            return Err(DomainError::ValidationError(format!(
                "Settlement split {} + {} + fee {} does not equal task amount {}",
                publisher_amount, taker_amount, platform_fee, task_amount
            )));
        }

        Ok(split)
    }

    /// 按比例计算平台费，剩余部分归接取方
    pub fn from_ratio(
        task_amount: Money,
        fee_ratio: Decimal,
        publisher_amount: Money,
    ) -> DomainResult<Self> {
        let platform_fee = task_amount.apply_ratio(fee_ratio)?;
        let taker_amount = task_amount
            .checked_sub(platform_fee)
            .and_then(|rest| rest.checked_sub(publisher_amount))
            .filter(|rest| rest.to_cents() >= 0)
            .ok_or_else(|| {
                DomainError::ValidationError(format!(
                    "Publisher amount {} exceeds what remains of {} after fee {}",
                    publisher_amount, task_amount, platform_fee
                ))
            })?;

        Self::checked(task_amount, fee_ratio, publisher_amount, taker_amount)
    }

    pub fn total(&self) -> Option<Money> {
        self.publisher_amount
            .checked_add(self.taker_amount)?
            .checked_add(self.platform_fee)
    }
}

/// 任务结算记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Uuid,
    pub task_id: u64,
    pub publisher_id: u64,
    pub taker_id: u64,
    pub publisher_amount: Money,
    pub taker_amount: Money,
    pub platform_fee: Money,
    pub status: SettlementStatus,
    /// 转账单号（商户侧）
    pub transfer_no: String,
    /// 网关转账单号
    pub gateway_transfer_no: Option<String>,
    pub settle_time: Option<DateTime<Utc>>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Settlement {
    pub fn new(
        task_id: u64,
        publisher_id: u64,
        taker_id: u64,
        split: SettlementSplit,
        transfer_no: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_id,
            publisher_id,
            taker_id,
            publisher_amount: split.publisher_amount,
            taker_amount: split.taker_amount,
            platform_fee: split.platform_fee,
            status: SettlementStatus::Pending,
            transfer_no,
            gateway_transfer_no: None,
            settle_time: None,
            remark: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_as_completed(
        &mut self,
        gateway_transfer_no: String,
        settle_time: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_pending()?;
        self.status = SettlementStatus::Completed;
        self.gateway_transfer_no = Some(gateway_transfer_no);
        self.settle_time = Some(settle_time);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_as_failed(&mut self, reason: String) -> DomainResult<()> {
        self.ensure_pending()?;
        self.status = SettlementStatus::Failed;
        self.remark = Some(reason);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// 未失败的结算占用该任务的唯一结算名额
    pub fn is_active(&self) -> bool {
        self.status != SettlementStatus::Failed
    }

    fn ensure_pending(&self) -> DomainResult<()> {
        if self.status != SettlementStatus::Pending {
            return Err(DomainError::StateConflict(format!(
                "Settlement for task {} is already {}",
                self.task_id, self.status
            )));
        }
        Ok(())
    }
}
