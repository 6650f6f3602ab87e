pub mod batch_processor;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod worker_pool;

pub use batch_processor::{BatchProcessor, FlushFn};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limiter::RateLimiter;
pub use worker_pool::WorkerPool;
