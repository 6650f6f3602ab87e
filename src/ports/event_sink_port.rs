use crate::domain::errors::DomainResult;
use crate::domain::PaymentEvent;
use async_trait::async_trait;

/// 审计事件落地端口，由批处理器按批调用
#[async_trait]
pub trait PaymentEventSink: Send + Sync {
    async fn publish(&self, events: Vec<PaymentEvent>) -> DomainResult<()>;
}
