use crate::application::{
    CreatePrePayOrderRequest, ErrorResponse, PaymentEngine, PrePayOrderResponse,
    RefundOrderRequest, RefundOrderResponse, SettleTaskRequest, SettlementResponse, TradeResponse,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::ports::{DistributedLockPort, PaymentGatewayPort, PaymentStore};
use axum::{
    extract::{Form, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// 应用状态
pub struct AppState<G, S, L>
where
    G: PaymentGatewayPort + 'static,
    S: PaymentStore + 'static,
    L: DistributedLockPort + 'static,
{
    pub engine: Arc<PaymentEngine<G, S, L>>,
}

impl<G, S, L> Clone for AppState<G, S, L>
where
    G: PaymentGatewayPort + 'static,
    S: PaymentStore + 'static,
    L: DistributedLockPort + 'static,
{
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

/// 错误类型到HTTP状态码
pub fn status_for(error: &DomainError) -> StatusCode {
    match error {
        DomainError::ValidationError(_)
        | DomainError::SecurityError(_)
        | DomainError::AmountMismatch { .. } => StatusCode::BAD_REQUEST,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::StateConflict(_)
        | DomainError::LockContention(_)
        | DomainError::DuplicateKey(_) => StatusCode::CONFLICT,
        DomainError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        DomainError::GatewayError(_) | DomainError::HttpError(_) => StatusCode::BAD_GATEWAY,
        DomainError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: DomainError) -> ApiError {
    let status = status_for(&e);
    if status.is_server_error() {
        error!("Request failed: {}", e);
    } else {
        warn!("Request rejected: {}", e);
    }
    (
        status,
        Json(ErrorResponse::new(e.code().to_string(), e.to_string())),
    )
}

/// 在独立任务中执行，客户端断开不会中断已开始的资金操作
async fn run_detached<T, F>(operation: F) -> DomainResult<T>
where
    T: Send + 'static,
    F: Future<Output = DomainResult<T>> + Send + 'static,
{
    tokio::spawn(operation)
        .await
        .map_err(|e| DomainError::InternalError(format!("Engine task aborted: {}", e)))?
}

/// 创建预支付订单
pub async fn create_prepay<G, S, L>(
    State(state): State<AppState<G, S, L>>,
    Json(request): Json<CreatePrePayOrderRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    G: PaymentGatewayPort + 'static,
    S: PaymentStore + 'static,
    L: DistributedLockPort + 'static,
{
    info!(user_id = request.user_id, "Received prepay request");

    let engine = state.engine.clone();
    run_detached(async move { engine.create_prepay_order(request).await })
        .await
        .map(|(trade, gateway)| {
            let mut response = PrePayOrderResponse::from(&trade);
            response.pay_url = response.pay_url.or(gateway.pay_url);
            response.qr_code = response.qr_code.or(gateway.qr_code);
            (StatusCode::CREATED, Json(response))
        })
        .map_err(error_response)
}

/// 查询交易状态
pub async fn query_trade<G, S, L>(
    State(state): State<AppState<G, S, L>>,
    Path(order_no): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    G: PaymentGatewayPort + 'static,
    S: PaymentStore + 'static,
    L: DistributedLockPort + 'static,
{
    let engine = state.engine.clone();
    run_detached(async move { engine.query_trade_status(&order_no).await })
        .await
        .map(|trade| Json(TradeResponse::from(&trade)))
        .map_err(error_response)
}

/// 网关要求的回调应答：处理成功返回 `success`，否则 `fail` 以便网关重发
fn callback_ack<T>(kind: &str, result: DomainResult<T>) -> (StatusCode, &'static str) {
    match result {
        Ok(_) => (StatusCode::OK, "success"),
        Err(e) => {
            warn!(kind, "Callback not processed: {}", e);
            (status_for(&e), "fail")
        }
    }
}

/// 支付结果回调
pub async fn pay_callback<G, S, L>(
    State(state): State<AppState<G, S, L>>,
    Form(params): Form<HashMap<String, String>>,
) -> impl IntoResponse
where
    G: PaymentGatewayPort + 'static,
    S: PaymentStore + 'static,
    L: DistributedLockPort + 'static,
{
    let engine = state.engine.clone();
    let result = run_detached(async move { engine.process_callback(params).await }).await;
    callback_ack("pay", result)
}

pub async fn refund_callback<G, S, L>(
    State(state): State<AppState<G, S, L>>,
    Form(params): Form<HashMap<String, String>>,
) -> impl IntoResponse
where
    G: PaymentGatewayPort + 'static,
    S: PaymentStore + 'static,
    L: DistributedLockPort + 'static,
{
    let engine = state.engine.clone();
    let result = run_detached(async move { engine.process_refund_callback(params).await }).await;
    callback_ack("refund", result)
}

pub async fn transfer_callback<G, S, L>(
    State(state): State<AppState<G, S, L>>,
    Form(params): Form<HashMap<String, String>>,
) -> impl IntoResponse
where
    G: PaymentGatewayPort + 'static,
    S: PaymentStore + 'static,
    L: DistributedLockPort + 'static,
{
    let engine = state.engine.clone();
    let result =
        run_detached(async move { engine.process_transfer_callback(params).await }).await;
    callback_ack("transfer", result)
}

/// 发起退款
pub async fn create_refund<G, S, L>(
    State(state): State<AppState<G, S, L>>,
    Json(request): Json<RefundOrderRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    G: PaymentGatewayPort + 'static,
    S: PaymentStore + 'static,
    L: DistributedLockPort + 'static,
{
    info!(order_no = %request.order_no, "Received refund request");

    let engine = state.engine.clone();
    run_detached(async move { engine.refund_order(request).await })
        .await
        .map(|refund| (StatusCode::CREATED, Json(RefundOrderResponse::from(&refund))))
        .map_err(error_response)
}

/// 任务结算
pub async fn settle_task<G, S, L>(
    State(state): State<AppState<G, S, L>>,
    Path(task_id): Path<u64>,
    request: Option<Json<SettleTaskRequest>>,
) -> Result<impl IntoResponse, ApiError>
where
    G: PaymentGatewayPort + 'static,
    S: PaymentStore + 'static,
    L: DistributedLockPort + 'static,
{
    info!(task_id, "Received settlement request");

    let request = request.map(|Json(r)| r).unwrap_or_default();
    let engine = state.engine.clone();
    run_detached(async move { engine.settle_task(task_id, request).await })
        .await
        .map(|settlement| Json(SettlementResponse::from(&settlement)))
        .map_err(error_response)
}

/// 健康检查
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&DomainError::AmountMismatch {
                order_no: "SQ1".into(),
                expected: "100.00".into(),
                actual: "99.00".into(),
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&DomainError::LockContention("k".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&DomainError::RateLimited("u".into())),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&DomainError::CircuitOpen),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&DomainError::GatewayError("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&DomainError::InternalError("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_callback_ack() {
        assert_eq!(callback_ack("pay", Ok(())), (StatusCode::OK, "success"));
        let (status, body) =
            callback_ack::<()>("pay", Err(DomainError::SecurityError("bad".into())));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "fail");
    }
}
