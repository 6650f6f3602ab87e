use crate::domain::errors::DomainResult;
use crate::domain::{DomainEvent, PaymentEvent};
use crate::ports::event_sink_port::PaymentEventSink;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::info;

/// 将审计事件写入日志，并保留一份内存副本便于检查
#[derive(Clone, Default)]
pub struct TracingEventSink {
    published: Arc<Mutex<Vec<PaymentEvent>>>,
}

impl TracingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已落地的事件
    pub fn events(&self) -> Vec<PaymentEvent> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl PaymentEventSink for TracingEventSink {
    async fn publish(&self, events: Vec<PaymentEvent>) -> DomainResult<()> {
        for event in &events {
            info!(
                event_type = event.event_type(),
                event_id = %event.event_id(),
                key = %event.aggregate_key(),
                "Payment event"
            );
        }
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(events);
        Ok(())
    }
}
