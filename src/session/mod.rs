//! 自动化会话模块
//!
//! Appium 类型预约需要为每台设备启动/停止自动化会话，会话进程本身由外部服务管理

mod http;

use async_trait::async_trait;

use crate::error::{AppError, Result};

pub use http::HttpSessionManager;

/// 自动化会话管理接口
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// 为设备启动会话，返回会话地址
    async fn start_session(&self, device_id: &str) -> Result<String>;

    /// 停止设备会话，返回是否已停止
    async fn stop_session(&self, device_id: &str) -> Result<bool>;
}

/// 未配置会话服务时使用
#[derive(Debug, Default, Clone)]
pub struct DisabledSessionManager;

#[async_trait]
impl SessionManager for DisabledSessionManager {
    async fn start_session(&self, device_id: &str) -> Result<String> {
        Err(AppError::Session(format!("未配置会话服务，无法为设备 {} 启动会话", device_id)))
    }

    async fn stop_session(&self, _device_id: &str) -> Result<bool> {
        Ok(true)
    }
}
