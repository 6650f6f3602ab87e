#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use task_payment_engine::application::{CreatePrePayOrderRequest, PaymentEngine};
use task_payment_engine::domain::errors::{DomainError, DomainResult};
use task_payment_engine::domain::{Money, OrderType, PayeeAccount, Task, TaskStatus};
use task_payment_engine::infrastructure::adapters::{
    InMemoryDistributedLock, InMemoryPaymentStore, SignatureCodec, TracingEventSink,
};
use task_payment_engine::infrastructure::config::{EngineConfig, GatewayConfig};
use task_payment_engine::ports::payment_gateway_port::*;

pub const SECRET: &str = "test-secret";
pub const PAY_TIME: &str = "2024-01-01 12:00:00";

/// 网关单次调用的脚本结果
#[derive(Debug, Clone)]
pub enum Scripted {
    /// 网关正常受理
    Accept,
    /// 网关返回业务错误码
    Reject,
    /// 连接失败
    Transport,
}

#[derive(Debug, Clone)]
struct Script {
    prepay: Vec<Scripted>,
    query_status: String,
    query_amount: Option<String>,
    refund_status: String,
    refund_transport: bool,
    transfer_status: String,
    transfer_transport: bool,
    transfer_delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            prepay: Vec::new(),
            query_status: "NOTPAY".to_string(),
            query_amount: None,
            refund_status: "SUCCESS".to_string(),
            refund_transport: false,
            transfer_status: "SUCCESS".to_string(),
            transfer_transport: false,
            transfer_delay: Duration::ZERO,
        }
    }
}

/// 脚本化网关：用真实签名算法签发通知，记录调用次数
#[derive(Default)]
pub struct FakeGateway {
    codec: Option<SignatureCodec>,
    script: Mutex<Script>,
    pub prepay_calls: AtomicU32,
    pub query_calls: AtomicU32,
    pub refund_calls: AtomicU32,
    pub transfer_calls: AtomicU32,
    pub prepay_requests: Mutex<Vec<PrePayRequest>>,
}

async fn transport_failure() -> DomainError {
    // 端口 1 上没有服务，得到真实的连接错误
    match reqwest::Client::new()
        .get("http://127.0.0.1:1/")
        .timeout(Duration::from_secs(2))
        .send()
        .await
    {
        Ok(_) => DomainError::InternalError("unexpected response on port 1".to_string()),
        Err(e) => DomainError::HttpError(e),
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            codec: Some(SignatureCodec::new(SECRET)),
            ..Self::default()
        }
    }

    /// 按顺序消耗的预下单结果，用完后一律受理
    pub fn script_prepay(&self, outcomes: Vec<Scripted>) {
        self.script.lock().unwrap().prepay = outcomes;
    }

    pub fn set_query_status(&self, status: &str, amount: Option<&str>) {
        let mut script = self.script.lock().unwrap();
        script.query_status = status.to_string();
        script.query_amount = amount.map(str::to_string);
    }

    pub fn set_refund_status(&self, status: &str) {
        self.script.lock().unwrap().refund_status = status.to_string();
    }

    /// 退款请求在连接层失败，网关是否执行未知
    pub fn fail_refunds_in_transport(&self, on: bool) {
        self.script.lock().unwrap().refund_transport = on;
    }

    pub fn fail_transfers_in_transport(&self, on: bool) {
        self.script.lock().unwrap().transfer_transport = on;
    }

    pub fn set_transfer(&self, status: &str, delay: Duration) {
        let mut script = self.script.lock().unwrap();
        script.transfer_status = status.to_string();
        script.transfer_delay = delay;
    }

    pub fn calls(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }

    pub fn sign(&self, mut params: HashMap<String, String>) -> HashMap<String, String> {
        if let Some(codec) = &self.codec {
            codec.sign_into(&mut params);
        }
        params
    }

    /// 支付回调参数（已签名）
    pub fn pay_notice(&self, order_no: &str, status: &str, amount: &str) -> HashMap<String, String> {
        let params = HashMap::from([
            ("order_no".to_string(), order_no.to_string()),
            ("trade_no".to_string(), format!("T-{}", order_no)),
            ("status".to_string(), status.to_string()),
            ("amount".to_string(), amount.to_string()),
            ("pay_time".to_string(), PAY_TIME.to_string()),
            ("pay_method".to_string(), "wechat".to_string()),
        ]);
        self.sign(params)
    }

    pub fn refund_notice(&self, refund_no: &str, status: &str, amount: &str) -> HashMap<String, String> {
        let params = HashMap::from([
            ("refund_no".to_string(), refund_no.to_string()),
            ("status".to_string(), status.to_string()),
            ("amount".to_string(), amount.to_string()),
            ("refund_time".to_string(), PAY_TIME.to_string()),
        ]);
        self.sign(params)
    }

    pub fn transfer_notice(&self, transfer_no: &str, status: &str) -> HashMap<String, String> {
        let params = HashMap::from([
            ("order_no".to_string(), transfer_no.to_string()),
            ("transfer_no".to_string(), format!("G-{}", transfer_no)),
            ("status".to_string(), status.to_string()),
            ("transfer_time".to_string(), PAY_TIME.to_string()),
        ]);
        self.sign(params)
    }
}

#[async_trait]
impl PaymentGatewayPort for FakeGateway {
    async fn pre_pay(&self, request: PrePayRequest) -> DomainResult<PrePayResponse> {
        self.prepay_calls.fetch_add(1, Ordering::SeqCst);
        self.prepay_requests.lock().unwrap().push(request.clone());

        let outcome = {
            let mut script = self.script.lock().unwrap();
            if script.prepay.is_empty() {
                Scripted::Accept
            } else {
                script.prepay.remove(0)
            }
        };

        match outcome {
            Scripted::Accept => Ok(PrePayResponse {
                order_no: request.order_no.clone(),
                trade_no: format!("T-{}", request.order_no),
                pay_url: Some(format!("https://pay.example/{}", request.order_no)),
                qr_code: None,
                expire_time: None,
            }),
            Scripted::Reject => Err(DomainError::GatewayError("code 500: busy".to_string())),
            Scripted::Transport => Err(transport_failure().await),
        }
    }

    async fn query_status(&self, query: PayStatusQuery) -> DomainResult<PayStatusResponse> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let script = self.script.lock().unwrap().clone();

        Ok(PayStatusResponse {
            order_no: query.order_no.clone(),
            trade_no: format!("T-{}", query.order_no),
            status: script.query_status,
            amount: script.query_amount.unwrap_or_else(|| "0.00".to_string()),
            pay_time: Some(PAY_TIME.to_string()),
            pay_method: Some("alipay".to_string()),
            transaction_id: None,
        })
    }

    async fn refund(&self, request: RefundRequest) -> DomainResult<RefundResponse> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        let (status, transport) = {
            let script = self.script.lock().unwrap();
            (script.refund_status.clone(), script.refund_transport)
        };
        if transport {
            return Err(transport_failure().await);
        }

        Ok(RefundResponse {
            refund_no: request.refund_no,
            order_no: request.order_no,
            amount: request.amount.to_wire(),
            status,
            refund_time: Some(PAY_TIME.to_string()),
        })
    }

    async fn transfer(&self, request: TransferRequest) -> DomainResult<TransferResponse> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        let (status, delay, transport) = {
            let script = self.script.lock().unwrap();
            (
                script.transfer_status.clone(),
                script.transfer_delay,
                script.transfer_transport,
            )
        };
        if transport {
            return Err(transport_failure().await);
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        Ok(TransferResponse {
            gateway_transfer_no: format!("G-{}", request.transfer_no),
            transfer_no: request.transfer_no,
            status,
            amount: request.amount.to_wire(),
            transfer_time: Some(PAY_TIME.to_string()),
        })
    }

    fn verify_notification(&self, params: &HashMap<String, String>) -> bool {
        self.codec.as_ref().is_some_and(|codec| codec.verify(params))
    }
}

pub type TestEngine = PaymentEngine<FakeGateway, InMemoryPaymentStore, InMemoryDistributedLock>;

pub struct Harness {
    pub engine: Arc<TestEngine>,
    pub gateway: Arc<FakeGateway>,
    pub store: Arc<InMemoryPaymentStore>,
    pub lock: Arc<InMemoryDistributedLock>,
    pub sink: Arc<TracingEventSink>,
}

pub fn gateway_config() -> Arc<GatewayConfig> {
    Arc::new(GatewayConfig {
        app_id: "app".to_string(),
        merchant_no: "M100".to_string(),
        secret_key: SECRET.to_string(),
        api_url: "http://127.0.0.1:1".to_string(),
        sandbox_url: "http://127.0.0.1:1".to_string(),
        sandbox: false,
        notify_base_url: "https://engine.example".to_string(),
        timeout: Duration::from_secs(2),
        max_retries: 2,
    })
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        lock_retry_backoff: Duration::from_millis(20),
        batch_flush_interval: Duration::from_millis(20),
        breaker_reset_timeout: Duration::from_millis(100),
        ..EngineConfig::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(engine_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let gateway = Arc::new(FakeGateway::new());
        let store = Arc::new(InMemoryPaymentStore::new());
        let lock = Arc::new(InMemoryDistributedLock::new());
        let sink = Arc::new(TracingEventSink::new());

        let engine = Arc::new(PaymentEngine::new(
            gateway.clone(),
            store.clone(),
            lock.clone(),
            sink.clone(),
            gateway_config(),
            config,
        ));

        Self {
            engine,
            gateway,
            store,
            lock,
            sink,
        }
    }

    /// 停止引擎并返回已落地事件的类型
    pub async fn drain_events(&self) -> Vec<String> {
        use task_payment_engine::domain::DomainEvent;
        self.engine.shutdown().await;
        self.sink
            .events()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }
}

pub fn task(id: u64, status: TaskStatus, taker_id: Option<u64>) -> Task {
    Task {
        id,
        publisher_id: 1,
        taker_id,
        title: format!("task {}", id),
        amount: Money::from_yuan(100),
        status,
        take_time: None,
        updated_at: Utc::now(),
    }
}

pub fn payee(user_id: u64) -> PayeeAccount {
    PayeeAccount {
        user_id,
        account_no: format!("6222{:08}", user_id),
        real_name: "Taker".to_string(),
        bank_code: None,
    }
}

pub fn prepay_request(user_id: u64, task_id: Option<u64>, order_type: OrderType, amount: Money) -> CreatePrePayOrderRequest {
    CreatePrePayOrderRequest {
        user_id,
        task_id,
        order_type,
        amount,
        client_ip: "10.0.0.1".to_string(),
        remark: None,
        subject: None,
        description: None,
        return_url: None,
    }
}

/// 发布方为任务 7 支付 100.00 的预支付订单
pub async fn publish_order(h: &Harness) -> String {
    h.store.seed_task(task(7, TaskStatus::Draft, None)).await;
    let (trade, _) = h
        .engine
        .create_prepay_order(prepay_request(1, Some(7), OrderType::TaskPublish, Money::from_yuan(100)))
        .await
        .unwrap();
    trade.order_no
}

/// 已支付的保证金订单
pub async fn paid_deposit(h: &Harness, amount: Money) -> String {
    let (trade, _) = h
        .engine
        .create_prepay_order(prepay_request(5, None, OrderType::Deposit, amount))
        .await
        .unwrap();
    h.engine
        .process_callback(h.gateway.pay_notice(&trade.order_no, "SUCCESS", &amount.to_wire()))
        .await
        .unwrap();
    trade.order_no
}
