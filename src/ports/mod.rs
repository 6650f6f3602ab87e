pub mod distributed_lock_port;
pub mod event_sink_port;
pub mod payment_gateway_port;
pub mod payment_repository_port;

pub use distributed_lock_port::{DistributedLockPort, DEFAULT_LOCK_TTL};
pub use event_sink_port::PaymentEventSink;
pub use payment_gateway_port::PaymentGatewayPort;
pub use payment_repository_port::{
    finish_transaction, PaymentStore, RefundRepository, SettlementRepository, StoreTransaction,
    TaskRepository, TradeRepository, UnitOfWork,
};
