use super::handlers::*;
use crate::application::{PAY_CALLBACK_PATH, REFUND_CALLBACK_PATH, TRANSFER_CALLBACK_PATH};
use crate::ports::{DistributedLockPort, PaymentGatewayPort, PaymentStore};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub fn create_router<G, S, L>(state: AppState<G, S, L>) -> Router
where
    G: PaymentGatewayPort + 'static,
    S: PaymentStore + 'static,
    L: DistributedLockPort + 'static,
{
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/pay/prepay", post(create_prepay::<G, S, L>))
        .route("/api/v1/pay/status/:order_no", get(query_trade::<G, S, L>))
        .route(PAY_CALLBACK_PATH, post(pay_callback::<G, S, L>))
        .route(REFUND_CALLBACK_PATH, post(refund_callback::<G, S, L>))
        .route(TRANSFER_CALLBACK_PATH, post(transfer_callback::<G, S, L>))
        .route("/api/v1/pay/refunds", post(create_refund::<G, S, L>))
        .route("/api/v1/tasks/:task_id/settlement", post(settle_task::<G, S, L>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
