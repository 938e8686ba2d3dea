// JSON-RPC 客户端
// 传输失败按固定间隔重试，节点返回的 error 对象直接上抛（重试无意义）

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    config::RpcConfig,
    error::{CoreError, CoreResult},
    infrastructure::rpc_validator::validate_rpc_response,
};

/// 链提供方使用的 JSON-RPC 通道
#[async_trait]
pub trait JsonRpcClient: Send + Sync {
    /// 发送请求并返回 result 字段
    async fn request(&self, method: &str, params: Value) -> CoreResult<Value>;

    /// 节点地址（日志用）
    fn endpoint(&self) -> &str;
}

pub struct HttpJsonRpcClient {
    http_client: reqwest::Client,
    url: String,
    max_retries: u32,
    retry_delay: Duration,
    next_id: AtomicU64,
}

impl HttpJsonRpcClient {
    pub fn new(url: impl Into<String>, config: &RpcConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client: client,
            url: url.into(),
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            next_id: AtomicU64::new(1),
        }
    }

    async fn send_once(&self, method: &str, params: &Value) -> Result<Value, TransportOutcome> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id
        });

        let response = self
            .http_client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| TransportOutcome::Retryable(format!("Failed to send RPC request: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportOutcome::Retryable(format!("Failed to read response body: {}", e)))?;

        if status.is_server_error() {
            return Err(TransportOutcome::Retryable(format!(
                "RPC request failed with status {}: {}",
                status, body
            )));
        }
        if !status.is_success() {
            return Err(TransportOutcome::Fatal(CoreError::Rpc {
                method: method.to_string(),
                code: Some(i64::from(status.as_u16())),
                message: body,
            }));
        }

        let json: Value = serde_json::from_str(&body).map_err(|e| {
            TransportOutcome::Fatal(CoreError::invalid_response(
                method,
                format!("Failed to parse JSON response: {}", e),
            ))
        })?;

        validate_rpc_response(method, json).map_err(TransportOutcome::Fatal)
    }
}

enum TransportOutcome {
    Retryable(String),
    Fatal(CoreError),
}

#[async_trait]
impl JsonRpcClient for HttpJsonRpcClient {
    async fn request(&self, method: &str, params: Value) -> CoreResult<Value> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries {
            tracing::debug!(
                attempt = attempt,
                endpoint = %self.url,
                method = %method,
                "Sending JSON-RPC request"
            );

            match self.send_once(method, &params).await {
                Ok(result) => return Ok(result),
                Err(TransportOutcome::Fatal(err)) => {
                    tracing::debug!(error = %err, method = %method, "JSON-RPC request rejected");
                    return Err(err);
                }
                Err(TransportOutcome::Retryable(message)) => {
                    tracing::warn!(
                        error = %message,
                        endpoint = %self.url,
                        attempt = attempt,
                        "JSON-RPC attempt failed"
                    );
                    last_error = message;
                    if attempt < self.max_retries {
                        tokio::time::sleep(self.retry_delay * attempt).await;
                    }
                }
            }
        }

        Err(CoreError::Rpc {
            method: method.to_string(),
            code: None,
            message: format!("failed after {} attempts: {}", self.max_retries, last_error),
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_endpoint_exhausts_retries() {
        let config = RpcConfig {
            timeout_secs: 1,
            connect_timeout_secs: 1,
            max_retries: 2,
            retry_delay_ms: 1,
        };
        let client = HttpJsonRpcClient::new("http://127.0.0.1:9", &config);
        let err = client.request("eth_blockNumber", json!([])).await.unwrap_err();
        match err {
            CoreError::Rpc { code, message, .. } => {
                assert_eq!(code, None);
                assert!(message.contains("after 2 attempts"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
