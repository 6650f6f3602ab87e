use crate::domain::errors::{DomainError, DomainResult};
use crate::infrastructure::adapters::signature_codec::SignatureCodec;
use crate::infrastructure::config::GatewayConfig;
use crate::ports::payment_gateway_port::*;
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// 网关约定的成功码
pub const SUCCESS_CODE: &str = "200";

/// 网关响应信封
#[derive(Debug, Deserialize)]
struct GatewayEnvelope<T> {
    code: String,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

/// 解析 `{code, message, data}` 响应，非成功码视为失败
pub fn decode_envelope<T: DeserializeOwned>(body: &str) -> DomainResult<T> {
    let envelope: GatewayEnvelope<T> = serde_json::from_str(body)?;

    if envelope.code != SUCCESS_CODE {
        return Err(DomainError::GatewayError(format!(
            "code {}: {}",
            envelope.code, envelope.message
        )));
    }

    envelope
        .data
        .ok_or_else(|| DomainError::GatewayError("Missing data in gateway response".to_string()))
}

/// 收钱吧网关适配器实现
#[derive(Clone)]
pub struct ShouqianbaAdapter {
    config: Arc<GatewayConfig>,
    codec: SignatureCodec,
    client: Client,
}

impl ShouqianbaAdapter {
    pub fn new(config: Arc<GatewayConfig>) -> DomainResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                DomainError::ConfigurationError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            codec: SignatureCodec::new(config.secret_key.clone()),
            config,
            client,
        })
    }

    /// 生成随机字符串
    fn generate_nonce_str() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    }

    /// 补齐公共参数并签名
    fn signed_params(&self, fields: Vec<(&str, String)>) -> HashMap<String, String> {
        let mut params: HashMap<String, String> = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        params.insert("appid".to_string(), self.config.app_id.clone());
        params.insert("mch_no".to_string(), self.config.merchant_no.clone());
        params.insert(
            "timestamp".to_string(),
            chrono::Utc::now().timestamp().to_string(),
        );
        params.insert("nonce_str".to_string(), Self::generate_nonce_str());
        self.codec.sign_into(&mut params);
        params
    }

    /// 发送表单POST并解析响应
    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        params: HashMap<String, String>,
    ) -> DomainResult<T> {
        let url = format!("{}{}", self.config.base_url(), path);
        debug!("Gateway request: POST {}", url);

        let response = self.client.post(&url).form(&params).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            error!("Gateway API error: {} - {}", status, body);
            return Err(DomainError::GatewayError(format!(
                "API returned {}: {}",
                status, body
            )));
        }

        debug!("Gateway response for {}: {}", path, body);
        decode_envelope(&body)
    }
}

#[async_trait]
impl PaymentGatewayPort for ShouqianbaAdapter {
    /// 预支付
    async fn pre_pay(&self, request: PrePayRequest) -> DomainResult<PrePayResponse> {
        let params = self.signed_params(vec![
            ("order_no", request.order_no),
            ("amount", request.amount.to_wire()),
            ("subject", request.subject),
            ("description", request.description),
            ("notify_url", request.notify_url),
            ("return_url", request.return_url.unwrap_or_default()),
            ("expire_time", request.expire_seconds.to_string()),
            ("client_ip", request.client_ip),
            ("extra", request.extra),
        ]);

        self.post_form("/api/pay/prepay", params).await
    }

    /// 查询支付状态
    async fn query_status(&self, query: PayStatusQuery) -> DomainResult<PayStatusResponse> {
        let params = self.signed_params(vec![
            ("order_no", query.order_no),
            ("trade_no", query.trade_no.unwrap_or_default()),
        ]);

        self.post_form("/api/pay/query", params).await
    }

    /// 退款
    async fn refund(&self, request: RefundRequest) -> DomainResult<RefundResponse> {
        let params = self.signed_params(vec![
            ("order_no", request.order_no),
            ("refund_no", request.refund_no),
            ("amount", request.amount.to_wire()),
            ("reason", request.reason),
            ("notify_url", request.notify_url),
        ]);

        self.post_form("/api/pay/refund", params).await
    }

    /// 转账
    async fn transfer(&self, request: TransferRequest) -> DomainResult<TransferResponse> {
        let params = self.signed_params(vec![
            ("order_no", request.transfer_no),
            ("account_no", request.account_no),
            ("amount", request.amount.to_wire()),
            ("real_name", request.real_name),
            ("bank_code", request.bank_code.unwrap_or_default()),
            ("memo", request.memo),
            ("notify_url", request.notify_url),
        ]);

        self.post_form("/api/pay/transfer", params).await
    }

    /// 验证回调通知签名
    fn verify_notification(&self, params: &HashMap<String, String>) -> bool {
        self.codec.verify(params)
    }
}
