pub mod in_memory_lock;
pub mod in_memory_store;
pub mod mysql_payment_store;
pub mod redis_lock;
pub mod shouqianba_adapter;
pub mod signature_codec;
pub mod tracing_event_sink;

pub use in_memory_lock::InMemoryDistributedLock;
pub use in_memory_store::InMemoryPaymentStore;
pub use mysql_payment_store::{MySqlPaymentEventSink, MySqlPaymentStore};
pub use redis_lock::RedisDistributedLock;
pub use shouqianba_adapter::ShouqianbaAdapter;
pub use signature_codec::SignatureCodec;
pub use tracing_event_sink::TracingEventSink;
