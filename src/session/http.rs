use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::SessionManager;
use crate::error::{AppError, Result};

#[derive(Debug, Deserialize)]
struct StartSessionResponse {
    endpoint: String,
}

/// 通过 HTTP 调用外部会话服务
///
/// - `POST {base}/sessions/{device_id}` 返回 `{ "endpoint": "..." }`
/// - `DELETE {base}/sessions/{device_id}` 以状态码表示结果
pub struct HttpSessionManager {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSessionManager {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Session(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn session_url(&self, device_id: &str) -> String {
        format!("{}/sessions/{}", self.base_url, device_id)
    }
}

#[async_trait]
impl SessionManager for HttpSessionManager {
    async fn start_session(&self, device_id: &str) -> Result<String> {
        let url = self.session_url(device_id);
        debug!(device_id, "启动会话: {}", url);

        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| AppError::Session(format!("请求会话服务失败: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Session(format!(
                "会话服务返回 {} (设备: {})",
                response.status(),
                device_id
            )));
        }

        let body: StartSessionResponse = response
            .json()
            .await
            .map_err(|e| AppError::Session(format!("解析会话响应失败: {}", e)))?;

        Ok(body.endpoint)
    }

    async fn stop_session(&self, device_id: &str) -> Result<bool> {
        let url = self.session_url(device_id);
        debug!(device_id, "停止会话: {}", url);

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| AppError::Session(format!("请求会话服务失败: {}", e)))?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(true);
        }

        warn!(device_id, "停止会话失败: {}", status);
        Ok(false)
    }
}
