use super::parsed_env;
use crate::domain::errors::{DomainError, DomainResult};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

/// 支付引擎运行参数
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 预支付订单有效期
    pub order_expire: Duration,

    /// 平台服务费比例
    pub service_fee_ratio: Decimal,

    /// 订单/任务锁租约
    pub lock_ttl: Duration,

    /// 获取锁的最大尝试次数
    pub lock_retry_attempts: u32,

    /// 首次重试等待，之后翻倍
    pub lock_retry_backoff: Duration,

    /// 熔断阈值（连续失败次数）
    pub breaker_max_failures: u32,

    /// 熔断冷却时间
    pub breaker_reset_timeout: Duration,

    /// 每用户预支付速率（每秒）
    pub prepay_rate_per_sec: f64,

    pub prepay_burst: u32,

    /// 空闲令牌桶回收时间
    pub limiter_idle_ttl: Duration,

    pub worker_count: usize,

    pub worker_queue_size: usize,

    pub batch_size: usize,

    pub batch_flush_interval: Duration,

    /// 网关时间字段所在时区（相对UTC的小时数）
    pub gateway_utc_offset_hours: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            order_expire: Duration::from_secs(15 * 60),
            service_fee_ratio: Decimal::new(6, 2),
            lock_ttl: Duration::from_secs(30),
            lock_retry_attempts: 3,
            lock_retry_backoff: Duration::from_millis(50),
            breaker_max_failures: 5,
            breaker_reset_timeout: Duration::from_secs(30),
            prepay_rate_per_sec: 5.0,
            prepay_burst: 10,
            limiter_idle_ttl: Duration::from_secs(600),
            worker_count: 4,
            worker_queue_size: 256,
            batch_size: 50,
            batch_flush_interval: Duration::from_secs(2),
            gateway_utc_offset_hours: 8,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> DomainResult<Self> {
        let defaults = Self::default();

        let ratio_raw: String = parsed_env(
            "ENGINE_SERVICE_FEE_RATIO",
            defaults.service_fee_ratio.to_string(),
        )?;
        let service_fee_ratio = Decimal::from_str(&ratio_raw).map_err(|_| {
            DomainError::ConfigurationError(format!(
                "ENGINE_SERVICE_FEE_RATIO has an invalid value: {}",
                ratio_raw
            ))
        })?;

        let config = Self {
            order_expire: Duration::from_secs(parsed_env(
                "ENGINE_ORDER_EXPIRE_SECS",
                defaults.order_expire.as_secs(),
            )?),
            service_fee_ratio,
            lock_ttl: Duration::from_secs(parsed_env(
                "ENGINE_LOCK_TTL_SECS",
                defaults.lock_ttl.as_secs(),
            )?),
            lock_retry_attempts: parsed_env(
                "ENGINE_LOCK_RETRY_ATTEMPTS",
                defaults.lock_retry_attempts,
            )?,
            lock_retry_backoff: Duration::from_millis(parsed_env(
                "ENGINE_LOCK_RETRY_BACKOFF_MS",
                defaults.lock_retry_backoff.as_millis() as u64,
            )?),
            breaker_max_failures: parsed_env(
                "ENGINE_BREAKER_MAX_FAILURES",
                defaults.breaker_max_failures,
            )?,
            breaker_reset_timeout: Duration::from_secs(parsed_env(
                "ENGINE_BREAKER_RESET_SECS",
                defaults.breaker_reset_timeout.as_secs(),
            )?),
            prepay_rate_per_sec: parsed_env(
                "ENGINE_PREPAY_RATE_PER_SEC",
                defaults.prepay_rate_per_sec,
            )?,
            prepay_burst: parsed_env("ENGINE_PREPAY_BURST", defaults.prepay_burst)?,
            limiter_idle_ttl: Duration::from_secs(parsed_env(
                "ENGINE_LIMITER_IDLE_SECS",
                defaults.limiter_idle_ttl.as_secs(),
            )?),
            worker_count: parsed_env("ENGINE_WORKER_COUNT", defaults.worker_count)?,
            worker_queue_size: parsed_env(
                "ENGINE_WORKER_QUEUE_SIZE",
                defaults.worker_queue_size,
            )?,
            batch_size: parsed_env("ENGINE_BATCH_SIZE", defaults.batch_size)?,
            batch_flush_interval: Duration::from_millis(parsed_env(
                "ENGINE_BATCH_FLUSH_MS",
                defaults.batch_flush_interval.as_millis() as u64,
            )?),
            gateway_utc_offset_hours: parsed_env(
                "ENGINE_GATEWAY_UTC_OFFSET_HOURS",
                defaults.gateway_utc_offset_hours,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.service_fee_ratio < Decimal::ZERO || self.service_fee_ratio >= Decimal::ONE {
            return Err(DomainError::ConfigurationError(format!(
                "Service fee ratio must be in [0, 1), got {}",
                self.service_fee_ratio
            )));
        }
        if self.lock_retry_attempts == 0 {
            return Err(DomainError::ConfigurationError(
                "Lock retry attempts must be at least 1".to_string(),
            ));
        }
        if self.breaker_max_failures == 0 {
            return Err(DomainError::ConfigurationError(
                "Breaker max failures must be at least 1".to_string(),
            ));
        }
        if self.prepay_rate_per_sec <= 0.0 || self.prepay_burst == 0 {
            return Err(DomainError::ConfigurationError(
                "Prepay rate and burst must be positive".to_string(),
            ));
        }
        if self.worker_count == 0 || self.worker_queue_size == 0 || self.batch_size == 0 {
            return Err(DomainError::ConfigurationError(
                "Worker and batch sizes must be positive".to_string(),
            ));
        }
        if !(-12..=14).contains(&self.gateway_utc_offset_hours) {
            return Err(DomainError::ConfigurationError(format!(
                "Gateway UTC offset out of range: {}",
                self.gateway_utc_offset_hours
            )));
        }
        Ok(())
    }
}
