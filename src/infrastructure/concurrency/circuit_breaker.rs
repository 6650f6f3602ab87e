use crate::domain::errors::{DomainError, DomainResult};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    /// 半开状态下正在进行的探测调用
    probe_started: Option<Instant>,
}

/// 下游调用熔断器，每个下游依赖一个实例
///
/// 连续失败达到阈值后打开，冷却结束后只放行一次探测调用；
/// 探测成功回到关闭，失败则重新打开并重置计时。
pub struct CircuitBreaker {
    name: String,
    max_failures: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, max_failures: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            max_failures: max_failures.max(1),
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                probe_started: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failures(&self) -> u32 {
        self.lock().failures
    }

    /// 通过熔断器执行调用
    pub async fn call<F, Fut, T>(&self, f: F) -> DomainResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        self.before_call()?;

        let result = f().await;
        match &result {
            Ok(_) => self.on_success(),
            Err(e) => self.on_failure(e),
        }
        result
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn before_call(&self) -> DomainResult<()> {
        let now = Instant::now();
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_none_or(|opened| now.duration_since(opened) >= self.reset_timeout);
                if !cooled {
                    return Err(DomainError::CircuitOpen);
                }
                info!(breaker = %self.name, "Circuit half-open, allowing probe");
                inner.state = CircuitState::HalfOpen;
                inner.probe_started = Some(now);
                Ok(())
            }
            CircuitState::HalfOpen => {
                // 探测被取消时不会回报结果，超过冷却时间后允许新的探测
                let probe_stuck = inner
                    .probe_started
                    .is_none_or(|started| now.duration_since(started) >= self.reset_timeout);
                if probe_stuck {
                    inner.probe_started = Some(now);
                    Ok(())
                } else {
                    Err(DomainError::CircuitOpen)
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(breaker = %self.name, "Circuit closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.probe_started = None;
    }

    fn on_failure(&self, error: &DomainError) {
        let mut inner = self.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.probe_started = None;

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failures >= self.max_failures,
            CircuitState::Open => false,
        };

        if should_open {
            warn!(
                breaker = %self.name,
                failures = inner.failures,
                "Circuit opened: {}", error
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}
