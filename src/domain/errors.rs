use thiserror::Error;

/// 领域层错误类型
#[derive(Error, Debug)]
pub enum DomainError {
    /// 调用方输入缺失或格式错误
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// 签名验证失败
    #[error("Security error: {0}")]
    SecurityError(String),

    /// 订单/任务/交易不存在
    #[error("Not found: {0}")]
    NotFound(String),

    /// 当前状态不允许该操作
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// 回调金额与订单金额不一致，需要人工对账
    #[error("Amount mismatch for {order_no}: expected {expected}, got {actual}")]
    AmountMismatch {
        order_no: String,
        expected: String,
        actual: String,
    },

    /// 网关调用失败或返回非成功码
    #[error("Gateway error: {0}")]
    GatewayError(String),

    /// 熔断器打开，调用未发出
    #[error("Gateway unavailable: circuit breaker is open")]
    CircuitOpen,

    /// 在重试预算内未能获取锁
    #[error("Operation in progress, retry later: {0}")]
    LockContention(String),

    /// 请求频率超限
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// 唯一索引冲突
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// 数据库错误
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// 序列化错误
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// HTTP请求错误
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// 锁存储错误
    #[error("Lock backend error: {0}")]
    LockBackendError(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl DomainError {
    /// 稳定的机器可读错误码，供客户端决定是否重试
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::ValidationError(_) => "VALIDATION_ERROR",
            DomainError::SecurityError(_) => "SIGNATURE_INVALID",
            DomainError::NotFound(_) => "NOT_FOUND",
            DomainError::StateConflict(_) => "STATE_CONFLICT",
            DomainError::AmountMismatch { .. } => "AMOUNT_MISMATCH",
            DomainError::GatewayError(_) | DomainError::HttpError(_) => "GATEWAY_ERROR",
            DomainError::CircuitOpen => "GATEWAY_UNAVAILABLE",
            DomainError::LockContention(_) => "OPERATION_IN_PROGRESS",
            DomainError::RateLimited(_) => "RATE_LIMITED",
            DomainError::DuplicateKey(_) => "DUPLICATE",
            DomainError::DatabaseError(_)
            | DomainError::SerializationError(_)
            | DomainError::LockBackendError(_)
            | DomainError::ConfigurationError(_)
            | DomainError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// 传输层失败，可以在有限次数内重试
    pub fn is_retryable(&self) -> bool {
        match self {
            DomainError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            DomainError::LockContention(_) | DomainError::RateLimited(_) => true,
            _ => false,
        }
    }
}

/// 领域结果类型
pub type DomainResult<T> = Result<T, DomainError>;
