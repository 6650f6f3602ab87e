use crate::application::dto::{CreatePrePayOrderRequest, RefundOrderRequest, SettleTaskRequest};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::{
    Money, OrderType, PaymentDetails, PaymentEvent, PaymentFailed, PaymentOrderCreated,
    PaymentSucceeded, ReconciliationRequired, Refund, RefundCompleted, RefundStatus, Settlement,
    SettlementCompleted, SettlementSplit, SettlementStatus, Task, TaskLog, TaskStatus, Trade,
    TradeStatus,
};
use crate::infrastructure::concurrency::{
    BatchProcessor, CircuitBreaker, CircuitState, FlushFn, RateLimiter, WorkerPool,
};
use crate::infrastructure::config::{EngineConfig, GatewayConfig};
use crate::ports::payment_gateway_port::{
    GatewayTradeState, PayStatusQuery, PrePayRequest, PrePayResponse, RefundRequest,
    TransferRequest,
};
use crate::ports::{
    finish_transaction, DistributedLockPort, PaymentEventSink, PaymentGatewayPort, PaymentStore,
    StoreTransaction,
};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use rand::Rng;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const PAY_CALLBACK_PATH: &str = "/api/v1/pay/callback";
pub const REFUND_CALLBACK_PATH: &str = "/api/v1/pay/refund_callback";
pub const TRANSFER_CALLBACK_PATH: &str = "/api/v1/pay/transfer_callback";

/// 网关时间字段格式
const GATEWAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 单号冲突时的最大生成次数
const NUMBER_ATTEMPTS: u32 = 3;

const GATEWAY_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// 生成单号：前缀 + 秒级时间戳 + 6位随机十六进制
pub fn generate_order_no(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("{}{}{:06x}", prefix, Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

fn order_lock_key(order_no: &str) -> String {
    format!("trade:order:{}", order_no)
}

fn settle_lock_key(task_id: u64) -> String {
    format!("settle:task:{}", task_id)
}

/// 仅传输层失败值得重试，业务拒绝重试没有意义
fn is_transport_failure(error: &DomainError) -> bool {
    matches!(error, DomainError::HttpError(_)) && error.is_retryable()
}

/// 请求可能已被网关执行但结果未知；资金类操作不能据此判定失败
fn is_outcome_unknown(error: &DomainError) -> bool {
    matches!(
        error,
        DomainError::HttpError(_) | DomainError::SerializationError(_)
    )
}

fn required_field<'a>(params: &'a HashMap<String, String>, name: &str) -> DomainResult<&'a str> {
    params
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DomainError::ValidationError(format!("Missing field: {}", name)))
}

fn optional_field(params: &HashMap<String, String>, name: &str) -> Option<String> {
    params
        .get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// 解析网关时间：`YYYY-MM-DD HH:MM:SS`（网关时区）或 RFC3339
pub fn parse_gateway_time(raw: &str, utc_offset_hours: i32) -> DomainResult<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, GATEWAY_TIME_FORMAT) {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).ok_or_else(|| {
            DomainError::ConfigurationError(format!("Invalid UTC offset: {}", utc_offset_hours))
        })?;
        return offset
            .from_local_datetime(&naive)
            .single()
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| DomainError::ValidationError(format!("Ambiguous time: {}", raw)));
    }

    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| DomainError::ValidationError(format!("Malformed time: {}", raw)))
}

/// 网关报告的支付结果，来自回调或主动查询
#[derive(Debug, Clone)]
struct GatewayPayment {
    order_no: String,
    trade_no: Option<String>,
    state: GatewayTradeState,
    amount: Option<String>,
    pay_time: Option<String>,
    pay_method: Option<String>,
    transaction_id: Option<String>,
}

impl GatewayPayment {
    fn from_callback(params: &HashMap<String, String>) -> DomainResult<Self> {
        Ok(Self {
            order_no: required_field(params, "order_no")?.to_string(),
            trade_no: optional_field(params, "trade_no"),
            state: GatewayTradeState::parse(required_field(params, "status")?),
            amount: optional_field(params, "amount"),
            pay_time: optional_field(params, "pay_time"),
            pay_method: optional_field(params, "pay_method"),
            transaction_id: optional_field(params, "transaction_id"),
        })
    }
}

/// 支付引擎：预下单、回调、退款、结算与状态查询的编排
pub struct PaymentEngine<G, S, L>
where
    G: PaymentGatewayPort + 'static,
    S: PaymentStore + 'static,
    L: DistributedLockPort + 'static,
{
    gateway: Arc<G>,
    store: Arc<S>,
    lock: Arc<L>,
    gateway_config: Arc<GatewayConfig>,
    config: EngineConfig,
    breaker: CircuitBreaker,
    limiter: Arc<RateLimiter>,
    workers: WorkerPool,
    events: Arc<BatchProcessor<PaymentEvent>>,
    eviction: Mutex<Option<JoinHandle<()>>>,
}

impl<G, S, L> PaymentEngine<G, S, L>
where
    G: PaymentGatewayPort + 'static,
    S: PaymentStore + 'static,
    L: DistributedLockPort + 'static,
{
    /// 需要在 tokio 运行时内创建
    pub fn new(
        gateway: Arc<G>,
        store: Arc<S>,
        lock: Arc<L>,
        sink: Arc<dyn PaymentEventSink>,
        gateway_config: Arc<GatewayConfig>,
        config: EngineConfig,
    ) -> Self {
        let flush: FlushFn<PaymentEvent> = Arc::new(
            move |batch: Vec<PaymentEvent>| -> BoxFuture<'static, DomainResult<()>> {
                let sink = sink.clone();
                async move { sink.publish(batch).await }.boxed()
            },
        );

        let limiter = Arc::new(RateLimiter::new(
            config.prepay_rate_per_sec,
            config.prepay_burst,
            config.limiter_idle_ttl,
        ));
        let eviction = limiter.spawn_eviction(config.limiter_idle_ttl);

        Self {
            breaker: CircuitBreaker::new(
                "payment-gateway",
                config.breaker_max_failures,
                config.breaker_reset_timeout,
            ),
            workers: WorkerPool::new(config.worker_count, config.worker_queue_size),
            events: Arc::new(BatchProcessor::new(
                config.batch_size,
                config.batch_flush_interval,
                flush,
            )),
            limiter,
            eviction: Mutex::new(Some(eviction)),
            gateway,
            store,
            lock,
            gateway_config,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// 创建预支付订单
    pub async fn create_prepay_order(
        &self,
        request: CreatePrePayOrderRequest,
    ) -> DomainResult<(Trade, PrePayResponse)> {
        info!(
            user_id = request.user_id,
            order_type = %request.order_type,
            "Creating prepay order for {}", request.amount
        );

        if !self.limiter.allow(&format!("prepay:user:{}", request.user_id)) {
            warn!(user_id = request.user_id, "Prepay rate limit exceeded");
            return Err(DomainError::RateLimited(format!("user {}", request.user_id)));
        }

        if request.client_ip.trim().is_empty() {
            return Err(DomainError::ValidationError("Client IP is required".to_string()));
        }

        if let Some(task_id) = request.task_id.filter(|_| request.order_type.requires_task()) {
            self.check_task_payable(task_id, request.user_id, request.order_type)
                .await?;
        }

        let expire_after = chrono::Duration::from_std(self.config.order_expire).map_err(|e| {
            DomainError::ConfigurationError(format!("Invalid order expiry: {}", e))
        })?;

        let mut trade = self.insert_new_trade(&request, expire_after).await?;
        self.emit(PaymentEvent::OrderCreated(PaymentOrderCreated::from_trade(&trade)))
            .await;

        let prepay = PrePayRequest {
            order_no: trade.order_no.clone(),
            amount: trade.amount,
            subject: request
                .subject
                .clone()
                .unwrap_or_else(|| format!("{} {}", trade.order_type, trade.order_no)),
            description: request.description.clone().unwrap_or_default(),
            notify_url: self.gateway_config.notify_url(PAY_CALLBACK_PATH),
            return_url: request.return_url.clone(),
            expire_seconds: self.config.order_expire.as_secs() as i64,
            client_ip: trade.client_ip.clone(),
            extra: format!(
                "user_id={}&task_id={}",
                trade.user_id,
                trade.task_id.unwrap_or_default()
            ),
        };

        let gateway = self.gateway.as_ref();
        let response = match self
            .call_gateway("pre_pay", || gateway.pre_pay(prepay.clone()))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                // 交易记录保留用于审计
                error!(order_no = %trade.order_no, "Prepay failed: {}", e);
                if trade.mark_as_failed().is_ok() {
                    if let Err(update_err) = self.store.update_trade(&mut trade).await {
                        error!(order_no = %trade.order_no, "Failed to mark trade failed: {}", update_err);
                    }
                    self.emit(PaymentEvent::Failed(PaymentFailed::new(&trade, e.to_string())))
                        .await;
                }
                return Err(e);
            }
        };

        trade.attach_gateway_order(
            &response.trade_no,
            response.pay_url.clone(),
            response.qr_code.clone(),
        )?;

        match self.store.update_trade(&mut trade).await {
            Ok(()) => {}
            Err(DomainError::StateConflict(_)) => {
                // 回调已先于本次更新到达
                debug!(order_no = %trade.order_no, "Trade changed while attaching gateway order");
                trade = self.load_trade(&trade.order_no).await?;
            }
            Err(e) => return Err(e),
        }

        info!(
            order_no = %trade.order_no,
            trade_no = %response.trade_no,
            "Prepay order created"
        );
        Ok((trade, response))
    }

    /// 处理支付回调，可安全重放
    pub async fn process_callback(&self, params: HashMap<String, String>) -> DomainResult<Trade> {
        let order_no = params.get("order_no").cloned().unwrap_or_default();

        if !self.gateway.verify_notification(&params) {
            warn!(order_no = %order_no, "Payment callback signature verification failed");
            return Err(DomainError::SecurityError(
                "Callback signature verification failed".to_string(),
            ));
        }

        let payment = GatewayPayment::from_callback(&params)?;
        info!(
            order_no = %payment.order_no,
            status = ?payment.state,
            "Processing payment callback"
        );

        // 先确认交易存在，再进入加锁区
        self.load_trade(&payment.order_no).await?;

        if matches!(
            payment.state,
            GatewayTradeState::NotPay | GatewayTradeState::Unknown(_)
        ) {
            return Err(DomainError::ValidationError(format!(
                "Unsupported callback status for {}: {:?}",
                payment.order_no, payment.state
            )));
        }

        let key = order_lock_key(&payment.order_no);
        self.acquire_with_retry(&key).await?;
        let result = self.apply_gateway_payment(payment).await;
        self.release_quietly(&key).await;
        result
    }

    /// 查询交易状态，待支付交易会主动向网关核实
    pub async fn query_trade_status(&self, order_no: &str) -> DomainResult<Trade> {
        let trade = self.load_trade(order_no).await?;
        if !trade.is_pending() {
            return Ok(trade);
        }

        let key = order_lock_key(order_no);
        self.acquire_with_retry(&key).await?;
        let result = self.reconcile_pending(order_no).await;
        self.release_quietly(&key).await;
        result
    }

    /// 关闭已过期的待支付交易，返回关闭数量
    pub async fn close_expired_trades(&self, limit: u32) -> DomainResult<usize> {
        let expired = self.store.find_expired_pending(Utc::now(), limit).await?;
        let mut closed = 0;

        for trade in expired {
            let key = order_lock_key(&trade.order_no);
            match self.lock.try_acquire(&key).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(order_no = %trade.order_no, "Skipping expired trade in use");
                    continue;
                }
                Err(e) => {
                    warn!(order_no = %trade.order_no, "Lock backend failed: {}", e);
                    continue;
                }
            }

            let result = self.reconcile_pending(&trade.order_no).await;
            self.release_quietly(&key).await;

            match result {
                Ok(t) if t.status == TradeStatus::Failed => closed += 1,
                Ok(_) => {}
                Err(e) => warn!(order_no = %trade.order_no, "Failed to close expired trade: {}", e),
            }
        }

        if closed > 0 {
            info!(closed, "Closed expired trades");
        }
        Ok(closed)
    }

    /// 发起退款
    pub async fn refund_order(&self, request: RefundOrderRequest) -> DomainResult<Refund> {
        info!(
            order_no = %request.order_no,
            "Refund requested for {}", request.amount
        );

        if !request.amount.is_positive() {
            return Err(DomainError::ValidationError(
                "Refund amount must be greater than 0".to_string(),
            ));
        }
        if request.reason.chars().count() > 200 {
            return Err(DomainError::ValidationError(
                "Refund reason must be at most 200 characters".to_string(),
            ));
        }

        let key = order_lock_key(&request.order_no);
        self.acquire_with_retry(&key).await?;
        let result = self.refund_locked(request).await;
        self.release_quietly(&key).await;
        result
    }

    /// 处理退款结果通知
    pub async fn process_refund_callback(
        &self,
        params: HashMap<String, String>,
    ) -> DomainResult<Refund> {
        let refund_no = params.get("refund_no").cloned().unwrap_or_default();

        if !self.gateway.verify_notification(&params) {
            warn!(refund_no = %refund_no, "Refund callback signature verification failed");
            return Err(DomainError::SecurityError(
                "Callback signature verification failed".to_string(),
            ));
        }

        let refund_no = required_field(&params, "refund_no")?.to_string();
        let status = required_field(&params, "status")?.to_string();

        let refund = self
            .store
            .find_refund_by_no(&refund_no)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("refund {}", refund_no)))?;

        if let Some(amount) = optional_field(&params, "amount") {
            if !refund.amount.matches_reported(&amount)? {
                return Err(DomainError::AmountMismatch {
                    order_no: refund.order_no.clone(),
                    expected: refund.amount.to_wire(),
                    actual: amount,
                });
            }
        }

        let key = order_lock_key(&refund.order_no);
        self.acquire_with_retry(&key).await?;
        let result: DomainResult<Refund> = async {
            let mut refund = self
                .store
                .find_refund_by_no(&refund_no)
                .await?
                .ok_or_else(|| DomainError::NotFound(format!("refund {}", refund_no)))?;

            if refund.status.is_final() {
                if refund.status == RefundStatus::Failed && status.eq_ignore_ascii_case("SUCCESS") {
                    error!(
                        refund_no = %refund_no,
                        order_no = %refund.order_no,
                        "Refund succeeded after it was marked failed, manual reconciliation required"
                    );
                    self.emit(PaymentEvent::Reconciliation(ReconciliationRequired::new(
                        &refund.order_no,
                        format!("refund {} succeeded after it was marked failed", refund_no),
                    )))
                    .await;
                    return Err(DomainError::StateConflict(format!(
                        "Refund {} already failed",
                        refund_no
                    )));
                }
                debug!(refund_no = %refund_no, "Refund already final, ignoring callback");
                return Ok(refund);
            }

            let refund_time = optional_field(&params, "refund_time");
            self.apply_refund_outcome(&mut refund, &status, refund_time.as_deref())
                .await?;
            Ok(refund)
        }
        .await;
        self.release_quietly(&key).await;
        result
    }

    /// 任务结算：向接取方转账并完成任务
    pub async fn settle_task(
        &self,
        task_id: u64,
        request: SettleTaskRequest,
    ) -> DomainResult<Settlement> {
        info!(task_id, "Settlement requested");

        let key = settle_lock_key(task_id);
        self.acquire_with_retry(&key).await?;
        let result = self.settle_locked(task_id, request).await;
        self.release_quietly(&key).await;
        result
    }

    /// 处理转账结果通知
    pub async fn process_transfer_callback(
        &self,
        params: HashMap<String, String>,
    ) -> DomainResult<Settlement> {
        if !self.gateway.verify_notification(&params) {
            warn!(
                transfer_no = %params.get("order_no").cloned().unwrap_or_default(),
                "Transfer callback signature verification failed"
            );
            return Err(DomainError::SecurityError(
                "Callback signature verification failed".to_string(),
            ));
        }

        let transfer_no = required_field(&params, "order_no")?.to_string();
        let status = required_field(&params, "status")?.to_string();

        let settlement = self
            .store
            .find_settlement_by_transfer_no(&transfer_no)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("transfer {}", transfer_no)))?;

        let key = settle_lock_key(settlement.task_id);
        self.acquire_with_retry(&key).await?;
        let result: DomainResult<Settlement> = async {
            let settlement = self
                .store
                .find_settlement_by_transfer_no(&transfer_no)
                .await?
                .ok_or_else(|| DomainError::NotFound(format!("transfer {}", transfer_no)))?;

            if settlement.status == SettlementStatus::Failed && status.eq_ignore_ascii_case("SUCCESS") {
                error!(
                    task_id = settlement.task_id,
                    transfer_no = %transfer_no,
                    "Transfer succeeded after settlement was marked failed, manual reconciliation required"
                );
                self.emit(PaymentEvent::Reconciliation(ReconciliationRequired::new(
                    &transfer_no,
                    format!(
                        "transfer succeeded for task {} after settlement was marked failed",
                        settlement.task_id
                    ),
                )))
                .await;
                return Err(DomainError::StateConflict(format!(
                    "Settlement {} already failed",
                    transfer_no
                )));
            }

            if settlement.status != SettlementStatus::Pending {
                debug!(transfer_no = %transfer_no, "Settlement already final, ignoring callback");
                return Ok(settlement);
            }

            let gateway_transfer_no = optional_field(&params, "transfer_no");
            let transfer_time = optional_field(&params, "transfer_time");
            self.apply_transfer_outcome(
                settlement,
                &status,
                gateway_transfer_no,
                transfer_time.as_deref(),
            )
            .await
        }
        .await;
        self.release_quietly(&key).await;
        result
    }

    /// 停止后台任务：先排空工作队列，再完成最后一次事件落地
    pub async fn shutdown(&self) {
        info!("Shutting down payment engine");
        if let Some(eviction) = self
            .eviction
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            eviction.abort();
        }
        self.workers.stop().await;
        if let Err(e) = self.events.stop().await {
            error!("Payment events could not be recorded during shutdown: {}", e);
        }
    }

    async fn check_task_payable(
        &self,
        task_id: u64,
        user_id: u64,
        order_type: OrderType,
    ) -> DomainResult<()> {
        let task = self.load_task(task_id).await?;
        let payable = match order_type {
            OrderType::TaskPublish => {
                task.publisher_id == user_id
                    && matches!(task.status, TaskStatus::Draft | TaskStatus::PendingAudit)
            }
            OrderType::TaskTake => {
                task.publisher_id != user_id
                    && task.status == TaskStatus::Open
                    && task.taker_id.is_none()
            }
            OrderType::Deposit | OrderType::ServiceFee => true,
        };

        if !payable {
            return Err(DomainError::StateConflict(format!(
                "Task {} in status {} cannot accept a {} payment from user {}",
                task_id, task.status, order_type, user_id
            )));
        }
        Ok(())
    }

    async fn insert_new_trade(
        &self,
        request: &CreatePrePayOrderRequest,
        expire_after: chrono::Duration,
    ) -> DomainResult<Trade> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let trade = Trade::new_prepay(
                generate_order_no("SQ"),
                request.user_id,
                request.task_id,
                request.order_type,
                request.amount,
                request.client_ip.clone(),
                request.remark.clone(),
                expire_after,
            )?;

            match self.store.insert_trade(&trade).await {
                Ok(()) => return Ok(trade),
                Err(DomainError::DuplicateKey(no)) if attempt < NUMBER_ATTEMPTS => {
                    warn!(order_no = %no, "Order number collision, regenerating");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 在订单锁内核实待支付交易
    async fn reconcile_pending(&self, order_no: &str) -> DomainResult<Trade> {
        let mut trade = self.load_trade(order_no).await?;
        if !trade.is_pending() {
            return Ok(trade);
        }

        let query = PayStatusQuery {
            order_no: trade.order_no.clone(),
            trade_no: trade.third_party_trade_no.clone(),
        };
        let gateway = self.gateway.as_ref();
        let status = self
            .call_gateway("query_status", || gateway.query_status(query.clone()))
            .await?;

        let state = status.state();
        debug!(order_no = %order_no, state = ?state, "Gateway reported trade state");

        match state {
            GatewayTradeState::Success | GatewayTradeState::Closed | GatewayTradeState::Failed => {
                let payment = GatewayPayment {
                    order_no: trade.order_no.clone(),
                    trade_no: Some(status.trade_no.clone()).filter(|t| !t.is_empty()),
                    state,
                    amount: Some(status.amount.clone()),
                    pay_time: status.pay_time.clone(),
                    pay_method: status.pay_method.clone(),
                    transaction_id: status.transaction_id.clone(),
                };
                self.apply_gateway_payment(payment).await
            }
            GatewayTradeState::NotPay | GatewayTradeState::Unknown(_) => {
                if trade.is_expired(Utc::now()) {
                    info!(order_no = %order_no, "Pending trade expired");
                    self.fail_trade(&mut trade, "expired".to_string()).await?;
                }
                Ok(trade)
            }
        }
    }

    /// 在订单锁内应用网关结果；回调与主动查询共用
    async fn apply_gateway_payment(&self, payment: GatewayPayment) -> DomainResult<Trade> {
        let mut trade = self.load_trade(&payment.order_no).await?;

        match payment.state {
            GatewayTradeState::Success => self.confirm_paid(trade, &payment).await,
            GatewayTradeState::Closed | GatewayTradeState::Failed => {
                if trade.is_pending() {
                    self.fail_trade(&mut trade, format!("gateway reported {:?}", payment.state))
                        .await?;
                } else {
                    debug!(
                        order_no = %trade.order_no,
                        status = %trade.status,
                        "Ignoring failure notice for settled trade"
                    );
                }
                Ok(trade)
            }
            GatewayTradeState::NotPay | GatewayTradeState::Unknown(_) => Ok(trade),
        }
    }

    async fn confirm_paid(&self, mut trade: Trade, payment: &GatewayPayment) -> DomainResult<Trade> {
        match trade.status {
            TradeStatus::Paid | TradeStatus::Refunded => {
                debug!(order_no = %trade.order_no, "Trade already paid, nothing to do");
                return Ok(trade);
            }
            TradeStatus::Failed => {
                error!(
                    order_no = %trade.order_no,
                    "Payment reported for a failed trade, manual reconciliation required"
                );
                self.emit(PaymentEvent::Reconciliation(ReconciliationRequired::new(
                    &trade.order_no,
                    "payment succeeded after trade failed".to_string(),
                )))
                .await;
                return Err(DomainError::StateConflict(format!(
                    "Trade {} already failed",
                    trade.order_no
                )));
            }
            TradeStatus::Pending => {}
        }

        let raw_amount = payment
            .amount
            .as_deref()
            .ok_or_else(|| DomainError::ValidationError("Missing field: amount".to_string()))?;
        if !trade.amount.matches_reported(raw_amount)? {
            error!(
                order_no = %trade.order_no,
                expected = %trade.amount.to_wire(),
                actual = %raw_amount,
                "Payment amount mismatch"
            );
            self.emit(PaymentEvent::Reconciliation(ReconciliationRequired::new(
                &trade.order_no,
                format!("amount mismatch: expected {}, got {}", trade.amount.to_wire(), raw_amount),
            )))
            .await;
            return Err(DomainError::AmountMismatch {
                order_no: trade.order_no.clone(),
                expected: trade.amount.to_wire(),
                actual: raw_amount.to_string(),
            });
        }

        let pay_time = payment
            .pay_time
            .as_deref()
            .ok_or_else(|| DomainError::ValidationError("Missing field: pay_time".to_string()))
            .and_then(|raw| parse_gateway_time(raw, self.config.gateway_utc_offset_hours))?;

        let trade_no = payment
            .trade_no
            .clone()
            .ok_or_else(|| DomainError::ValidationError("Missing field: trade_no".to_string()))?;

        trade.mark_as_paid(PaymentDetails {
            third_party_trade_no: trade_no,
            pay_method: payment.pay_method.clone(),
            transaction_id: payment.transaction_id.clone(),
            pay_time,
        })?;

        let mut tx = self.store.begin().await?;
        let result = self.record_paid(&mut tx, &mut trade).await;
        finish_transaction(tx, result).await?;

        info!(
            order_no = %trade.order_no,
            order_type = %trade.order_type,
            "Trade paid"
        );
        self.emit(PaymentEvent::Succeeded(PaymentSucceeded::from_trade(&trade)))
            .await;
        Ok(trade)
    }

    /// 交易置为已支付与业务后续处理在同一事务内
    async fn record_paid(
        &self,
        tx: &mut Box<dyn StoreTransaction>,
        trade: &mut Trade,
    ) -> DomainResult<()> {
        tx.update_trade(trade).await?;

        match trade.order_type {
            OrderType::TaskPublish => {
                let mut task = self.load_task(Self::task_id_of(trade)?).await?;
                let old = task.mark_pending_audit()?;
                tx.update_task(&task, old).await?;
                tx.insert_task_log(&TaskLog::new(
                    &task,
                    trade.user_id,
                    "pay_publish",
                    format!("Publish payment {} confirmed", trade.order_no),
                    old,
                ))
                .await?;
            }
            OrderType::TaskTake => {
                let mut task = self.load_task(Self::task_id_of(trade)?).await?;
                let now = trade.pay_time.unwrap_or_else(Utc::now);
                let old = task.assign_taker(trade.user_id, now)?;
                tx.update_task(&task, old).await?;
                tx.insert_task_log(&TaskLog::new(
                    &task,
                    trade.user_id,
                    "pay_take",
                    format!("Take payment {} confirmed", trade.order_no),
                    old,
                ))
                .await?;
            }
            OrderType::Deposit | OrderType::ServiceFee => {}
        }
        Ok(())
    }

    fn task_id_of(trade: &Trade) -> DomainResult<u64> {
        trade.task_id.ok_or_else(|| {
            DomainError::InternalError(format!("Trade {} has no task id", trade.order_no))
        })
    }

    async fn fail_trade(&self, trade: &mut Trade, reason: String) -> DomainResult<()> {
        trade.mark_as_failed()?;
        self.store.update_trade(trade).await?;
        info!(order_no = %trade.order_no, reason = %reason, "Trade failed");
        self.emit(PaymentEvent::Failed(PaymentFailed::new(trade, reason)))
            .await;
        Ok(())
    }

    async fn refund_locked(&self, request: RefundOrderRequest) -> DomainResult<Refund> {
        let trade = self.load_trade(&request.order_no).await?;
        if trade.status != TradeStatus::Paid {
            return Err(DomainError::StateConflict(format!(
                "Trade {} is {}, only paid trades can be refunded",
                trade.order_no, trade.status
            )));
        }

        // 处理中的退款也占用额度
        let reserved = self
            .store
            .list_refunds_by_trade(trade.id)
            .await?
            .iter()
            .filter(|r| r.status != RefundStatus::Failed)
            .try_fold(Money::ZERO, |acc, r| acc.checked_add(r.amount))
            .ok_or_else(|| DomainError::InternalError("Refund total overflow".to_string()))?;

        let refundable = trade.amount.checked_sub(reserved).unwrap_or(Money::ZERO);
        if request.amount > refundable {
            warn!(
                order_no = %trade.order_no,
                requested = %request.amount,
                refundable = %refundable,
                "Refund exceeds refundable balance"
            );
            return Err(DomainError::ValidationError(format!(
                "Refund amount {} exceeds refundable balance {}",
                request.amount, refundable
            )));
        }

        let mut refund = self.insert_new_refund(&trade, &request).await?;

        let refund_request = RefundRequest {
            order_no: trade.order_no.clone(),
            refund_no: refund.refund_no.clone(),
            amount: refund.amount,
            reason: refund.reason.clone(),
            notify_url: self.gateway_config.notify_url(REFUND_CALLBACK_PATH),
        };

        let gateway = self.gateway.as_ref();
        match self
            .call_gateway("refund", || gateway.refund(refund_request.clone()))
            .await
        {
            Ok(response) => {
                self.apply_refund_outcome(
                    &mut refund,
                    &response.status,
                    response.refund_time.as_deref(),
                )
                .await?;
                Ok(refund)
            }
            Err(e) if is_outcome_unknown(&e) => {
                // 保持处理中，继续占用可退额度，等待退款通知
                warn!(
                    refund_no = %refund.refund_no,
                    "Refund outcome unknown, awaiting gateway notice: {}", e
                );
                Ok(refund)
            }
            Err(e) => {
                error!(refund_no = %refund.refund_no, "Refund request failed: {}", e);
                refund.mark_as_failed()?;
                self.store.update_refund(&refund).await?;
                self.emit(PaymentEvent::Refund(RefundCompleted::from_refund(&refund)))
                    .await;
                Err(e)
            }
        }
    }

    async fn insert_new_refund(
        &self,
        trade: &Trade,
        request: &RefundOrderRequest,
    ) -> DomainResult<Refund> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let refund = Refund::new(
                generate_order_no("RF"),
                trade,
                request.amount,
                request.reason.clone(),
            )?;

            match self.store.insert_refund(&refund).await {
                Ok(()) => return Ok(refund),
                Err(DomainError::DuplicateKey(no)) if attempt < NUMBER_ATTEMPTS => {
                    warn!(refund_no = %no, "Refund number collision, regenerating");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 在订单锁内应用退款结果；同步响应与退款通知共用
    async fn apply_refund_outcome(
        &self,
        refund: &mut Refund,
        status: &str,
        refund_time: Option<&str>,
    ) -> DomainResult<()> {
        match status.to_ascii_uppercase().as_str() {
            "SUCCESS" => {
                let time = match refund_time {
                    Some(raw) => parse_gateway_time(raw, self.config.gateway_utc_offset_hours)?,
                    None => Utc::now(),
                };
                refund.mark_as_succeeded(time)?;

                let mut trade = self.load_trade(&refund.order_no).await?;
                let succeeded = self
                    .store
                    .list_refunds_by_trade(trade.id)
                    .await?
                    .iter()
                    .filter(|r| r.refund_no != refund.refund_no && r.status == RefundStatus::Succeeded)
                    .try_fold(refund.amount, |acc, r| acc.checked_add(r.amount))
                    .ok_or_else(|| DomainError::InternalError("Refund total overflow".to_string()))?;

                let mut tx = self.store.begin().await?;
                let result: DomainResult<()> = async {
                    tx.update_refund(refund).await?;
                    if succeeded >= trade.amount && trade.status == TradeStatus::Paid {
                        trade.mark_as_refunded()?;
                        tx.update_trade(&mut trade).await?;
                    }
                    Ok(())
                }
                .await;
                finish_transaction(tx, result).await?;

                info!(
                    refund_no = %refund.refund_no,
                    order_no = %refund.order_no,
                    trade_status = %trade.status,
                    "Refund succeeded"
                );
            }
            "FAILED" | "CLOSED" => {
                refund.mark_as_failed()?;
                self.store.update_refund(refund).await?;
                warn!(refund_no = %refund.refund_no, "Refund rejected by gateway");
            }
            other => {
                // 等待退款通知给出最终结果
                info!(refund_no = %refund.refund_no, status = %other, "Refund still processing");
                return Ok(());
            }
        }

        self.emit(PaymentEvent::Refund(RefundCompleted::from_refund(refund)))
            .await;
        Ok(())
    }

    async fn settle_locked(
        &self,
        task_id: u64,
        request: SettleTaskRequest,
    ) -> DomainResult<Settlement> {
        let task = self.load_task(task_id).await?;
        if !task.is_settleable() {
            return Err(DomainError::StateConflict(format!(
                "Task {} in status {} cannot be settled",
                task_id, task.status
            )));
        }

        if self.store.find_active_settlement(task_id).await?.is_some() {
            return Err(DomainError::StateConflict(format!(
                "Task {} already has an active settlement",
                task_id
            )));
        }

        let ratio = self.config.service_fee_ratio;
        let split = match (request.publisher_amount, request.taker_amount) {
            (Some(publisher), Some(taker)) => {
                SettlementSplit::checked(task.amount, ratio, publisher, taker)?
            }
            (publisher, None) => {
                SettlementSplit::from_ratio(task.amount, ratio, publisher.unwrap_or(Money::ZERO))?
            }
            (None, Some(_)) => {
                return Err(DomainError::ValidationError(
                    "Taker amount requires a publisher amount".to_string(),
                ));
            }
        };

        if !split.taker_amount.is_positive() {
            return Err(DomainError::ValidationError(format!(
                "Taker amount must be greater than 0 for task {}",
                task_id
            )));
        }

        let taker_id = task.taker_id.ok_or_else(|| {
            DomainError::StateConflict(format!("Task {} has no taker", task_id))
        })?;
        let payee = self
            .store
            .find_payee_account(taker_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("payee account for user {}", taker_id)))?;

        let mut settlement = self
            .insert_new_settlement(&task, taker_id, split)
            .await?;
        info!(
            task_id,
            transfer_no = %settlement.transfer_no,
            taker_amount = %split.taker_amount,
            platform_fee = %split.platform_fee,
            "Settlement created"
        );

        let transfer = TransferRequest {
            transfer_no: settlement.transfer_no.clone(),
            account_no: payee.account_no.clone(),
            real_name: payee.real_name.clone(),
            bank_code: payee.bank_code.clone(),
            amount: split.taker_amount,
            memo: format!("Task {} settlement", task_id),
            notify_url: self.gateway_config.notify_url(TRANSFER_CALLBACK_PATH),
        };

        let gateway = self.gateway.as_ref();
        match self
            .call_gateway("transfer", || gateway.transfer(transfer.clone()))
            .await
        {
            Ok(response) => {
                let outcome = self
                    .apply_transfer_outcome(
                        settlement,
                        &response.status,
                        Some(response.gateway_transfer_no.clone()),
                        response.transfer_time.as_deref(),
                    )
                    .await?;
                if outcome.status == SettlementStatus::Failed {
                    return Err(DomainError::GatewayError(format!(
                        "Transfer {} rejected: {}",
                        outcome.transfer_no, response.status
                    )));
                }
                Ok(outcome)
            }
            Err(e) if is_outcome_unknown(&e) => {
                // 保持待定，继续占用结算名额，等待转账通知
                warn!(
                    task_id,
                    transfer_no = %settlement.transfer_no,
                    "Transfer outcome unknown, awaiting gateway notice: {}", e
                );
                Ok(settlement)
            }
            Err(e) => {
                error!(task_id, "Transfer failed: {}", e);
                settlement.mark_as_failed(e.to_string())?;
                self.store.update_settlement(&settlement).await?;
                self.emit(PaymentEvent::Settlement(SettlementCompleted::from_settlement(
                    &settlement,
                )))
                .await;
                Err(e)
            }
        }
    }

    async fn insert_new_settlement(
        &self,
        task: &Task,
        taker_id: u64,
        split: SettlementSplit,
    ) -> DomainResult<Settlement> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let settlement = Settlement::new(
                task.id,
                task.publisher_id,
                taker_id,
                split,
                generate_order_no("TF"),
            );

            match self.store.insert_settlement(&settlement).await {
                Ok(()) => return Ok(settlement),
                Err(DomainError::DuplicateKey(_)) => {
                    if self.store.find_active_settlement(task.id).await?.is_some() {
                        return Err(DomainError::StateConflict(format!(
                            "Task {} already has an active settlement",
                            task.id
                        )));
                    }
                    if attempt >= NUMBER_ATTEMPTS {
                        return Err(DomainError::DuplicateKey(settlement.transfer_no));
                    }
                    warn!(transfer_no = %settlement.transfer_no, "Transfer number collision, regenerating");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 在结算锁内应用转账结果；同步响应与转账通知共用
    async fn apply_transfer_outcome(
        &self,
        mut settlement: Settlement,
        status: &str,
        gateway_transfer_no: Option<String>,
        transfer_time: Option<&str>,
    ) -> DomainResult<Settlement> {
        match status.to_ascii_uppercase().as_str() {
            "SUCCESS" => {
                let time = match transfer_time {
                    Some(raw) => parse_gateway_time(raw, self.config.gateway_utc_offset_hours)?,
                    None => Utc::now(),
                };
                settlement.mark_as_completed(gateway_transfer_no.unwrap_or_default(), time)?;

                let mut task = self.load_task(settlement.task_id).await?;
                let mut tx = self.store.begin().await?;
                let result: DomainResult<()> = async {
                    tx.update_settlement(&settlement).await?;
                    let old = task.mark_completed()?;
                    tx.update_task(&task, old).await?;
                    tx.insert_task_log(&TaskLog::new(
                        &task,
                        settlement.publisher_id,
                        "settle",
                        format!(
                            "Settled {} to taker {}, platform fee {}",
                            settlement.taker_amount, settlement.taker_id, settlement.platform_fee
                        ),
                        old,
                    ))
                    .await
                }
                .await;

                if let Err(e) = finish_transaction(tx, result).await {
                    // 资金已转出但本地未落库
                    error!(
                        task_id = settlement.task_id,
                        transfer_no = %settlement.transfer_no,
                        "Transfer succeeded but settlement could not be recorded: {}", e
                    );
                    self.emit(PaymentEvent::Reconciliation(ReconciliationRequired::new(
                        &settlement.transfer_no,
                        format!("transfer succeeded for task {} but recording failed", settlement.task_id),
                    )))
                    .await;
                    return Err(e);
                }

                info!(
                    task_id = settlement.task_id,
                    transfer_no = %settlement.transfer_no,
                    "Settlement completed"
                );
            }
            "FAILED" | "CLOSED" => {
                settlement.mark_as_failed(format!("gateway reported {}", status))?;
                self.store.update_settlement(&settlement).await?;
                warn!(task_id = settlement.task_id, "Transfer rejected by gateway");
            }
            other => {
                info!(
                    task_id = settlement.task_id,
                    status = %other,
                    "Transfer still processing"
                );
                return Ok(settlement);
            }
        }

        self.emit(PaymentEvent::Settlement(SettlementCompleted::from_settlement(
            &settlement,
        )))
        .await;
        Ok(settlement)
    }

    async fn load_trade(&self, order_no: &str) -> DomainResult<Trade> {
        self.store
            .find_trade_by_order_no(order_no)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("trade {}", order_no)))
    }

    async fn load_task(&self, task_id: u64) -> DomainResult<Task> {
        self.store
            .find_task(task_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("task {}", task_id)))
    }

    /// 有限次数获取锁，之后返回“处理中，稍后重试”
    async fn acquire_with_retry(&self, key: &str) -> DomainResult<()> {
        let attempts = self.config.lock_retry_attempts.max(1);
        let mut backoff = self.config.lock_retry_backoff;

        for attempt in 1..=attempts {
            if self.lock.acquire(key, self.config.lock_ttl).await? {
                return Ok(());
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        warn!(key = %key, attempts, "Lock contention");
        Err(DomainError::LockContention(key.to_string()))
    }

    async fn release_quietly(&self, key: &str) {
        if let Err(e) = self.lock.release(key).await {
            // 租约到期后自动释放
            warn!(key = %key, "Failed to release lock: {}", e);
        }
    }

    /// 经熔断器调用网关，传输失败有限次重试
    async fn call_gateway<T, F, Fut>(&self, operation: &str, mut call: F) -> DomainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let max_retries = self.gateway_config.max_retries;
        let mut attempt = 0;

        loop {
            match self.breaker.call(|| call()).await {
                Ok(value) => return Ok(value),
                Err(e) if is_transport_failure(&e) && attempt < max_retries => {
                    attempt += 1;
                    warn!(operation, attempt, "Gateway transport failure, retrying: {}", e);
                    tokio::time::sleep(GATEWAY_RETRY_BACKOFF * attempt).await;
                }
                Err(e) => {
                    error!(operation, "Gateway call failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// 事件交给工作池写入批处理器，队列满时同步写入
    async fn emit(&self, event: PaymentEvent) {
        let events = self.events.clone();
        let queued = event.clone();
        let submitted = self.workers.submit(async move {
            if let Err(e) = events.add(queued).await {
                warn!("Failed to record payment event: {}", e);
            }
        });

        if !submitted {
            warn!(event_id = %event.event_id(), "Event queue full, recording synchronously");
            if let Err(e) = self.events.add(event).await {
                warn!("Failed to record payment event: {}", e);
            }
        }
    }
}
