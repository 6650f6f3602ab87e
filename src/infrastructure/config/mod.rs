pub mod engine_config;
pub mod gateway_config;

pub use engine_config::EngineConfig;
pub use gateway_config::GatewayConfig;

use crate::domain::errors::{DomainError, DomainResult};
use std::str::FromStr;

/// 读取必填环境变量
pub(crate) fn required_env(name: &str) -> DomainResult<String> {
    std::env::var(name)
        .map_err(|_| DomainError::ConfigurationError(format!("{} must be set", name)))
}

/// 读取可选环境变量并解析，缺省时使用默认值
pub(crate) fn parsed_env<T: FromStr>(name: &str, default: T) -> DomainResult<T> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            DomainError::ConfigurationError(format!("{} has an invalid value: {}", name, raw))
        }),
        Err(_) => Ok(default),
    }
}
