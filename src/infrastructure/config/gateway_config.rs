use super::{parsed_env, required_env};
use crate::domain::errors::DomainResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// 支付网关配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// 应用ID
    pub app_id: String,

    /// 商户号
    pub merchant_no: String,

    /// 签名密钥
    pub secret_key: String,

    /// API基础URL
    pub api_url: String,

    /// 沙箱URL
    pub sandbox_url: String,

    /// 是否使用沙箱
    pub sandbox: bool,

    /// 本服务对外地址，用于拼接回调URL
    pub notify_base_url: String,

    /// 单次请求超时
    pub timeout: Duration,

    /// 传输失败时的最大重试次数
    pub max_retries: u32,
}

impl GatewayConfig {
    pub fn from_env() -> DomainResult<Arc<Self>> {
        Ok(Arc::new(Self {
            app_id: required_env("GATEWAY_APP_ID")?,
            merchant_no: required_env("GATEWAY_MERCHANT_NO")?,
            secret_key: required_env("GATEWAY_SECRET_KEY")?,
            api_url: parsed_env(
                "GATEWAY_API_URL",
                "https://api.shouqianba.com".to_string(),
            )?,
            sandbox_url: parsed_env(
                "GATEWAY_SANDBOX_URL",
                "https://sandbox.shouqianba.com".to_string(),
            )?,
            sandbox: parsed_env("GATEWAY_SANDBOX", false)?,
            notify_base_url: parsed_env(
                "GATEWAY_NOTIFY_BASE_URL",
                "http://localhost:3000".to_string(),
            )?,
            timeout: Duration::from_secs(parsed_env("GATEWAY_TIMEOUT_SECS", 30)?),
            max_retries: parsed_env("GATEWAY_MAX_RETRIES", 2)?,
        }))
    }

    /// 当前生效的网关地址
    pub fn base_url(&self) -> &str {
        if self.sandbox {
            &self.sandbox_url
        } else {
            &self.api_url
        }
    }

    pub fn notify_url(&self, path: &str) -> String {
        format!("{}{}", self.notify_base_url.trim_end_matches('/'), path)
    }
}
