use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::models::Device;

/// 预约调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    /// 两轮分配之间的间隔（毫秒）
    pub refresh_interval_ms: u64,

    /// 存储不可达时的重连间隔（毫秒）
    pub reconnect_interval_ms: u64,

    /// 设置后重连间隔按指数增长，直到该上限（毫秒）
    pub reconnect_max_interval_ms: Option<u64>,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 1000,
            reconnect_interval_ms: 5000,
            reconnect_max_interval_ms: None,
        }
    }
}

/// 健康检查配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,

    /// 检查间隔（毫秒）
    pub check_interval_ms: u64,

    /// 通过 ADB 检查 Android 设备
    pub android: bool,

    /// 通过 idevice_id 检查 iOS 设备
    pub ios: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_ms: 10_000,
            android: true,
            ios: false,
        }
    }
}

/// 管理 API 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,

    /// 同一资源并发操作的最长等待（毫秒）
    pub lock_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            lock_timeout_ms: 20_000,
        }
    }
}

impl ApiConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// 自动化会话服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 未设置时 Appium 类型预约无法锁定
    pub base_url: Option<String>,

    pub timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_ms: 60_000,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 默认过滤规则，`RUST_LOG` 优先
    pub filter: String,

    /// 设置后额外按天滚动写入该目录
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "devpool_rs=debug,axum=info".to_string(),
            log_dir: None,
        }
    }
}

/// 完整的服务配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub reservation: ReservationConfig,
    pub health: HealthConfig,
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,

    /// 启动时注册到设备池的设备
    pub devices: Vec<Device>,
}

impl ManagerConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ManagerConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载，并使用环境变量覆盖
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// 使用环境变量覆盖
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("DEVPOOL_API_BIND") {
            self.api.bind = bind;
        }

        if let Some(url) = lookup("DEVPOOL_SESSION_URL") {
            self.session.base_url = Some(url);
        }

        if let Some(value) = lookup("DEVPOOL_REFRESH_MS") {
            self.reservation.refresh_interval_ms = parse_ms("DEVPOOL_REFRESH_MS", &value)?;
        }

        if let Some(value) = lookup("DEVPOOL_RECONNECT_MS") {
            self.reservation.reconnect_interval_ms = parse_ms("DEVPOOL_RECONNECT_MS", &value)?;
        }

        self.validate()
    }

    /// 保存到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.reservation.refresh_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "reservation.refresh_interval_ms 必须大于 0".to_string(),
            ));
        }

        if self.reservation.reconnect_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "reservation.reconnect_interval_ms 必须大于 0".to_string(),
            ));
        }

        if self.health.enabled && self.health.check_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "health.check_interval_ms 必须大于 0".to_string(),
            ));
        }

        let mut ids = std::collections::HashSet::new();
        for device in &self.devices {
            if !ids.insert(device.id.as_str()) {
                return Err(ConfigError::ValidationError(format!("设备 ID 重复: {}", device.id)));
            }
        }

        Ok(())
    }
}

fn parse_ms(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{} 不是有效的毫秒数: {}", key, value)))
}

/// 配置错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO 错误: {0}")]
    IoError(String),

    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("序列化错误: {0}")]
    SerializeError(String),

    #[error("验证错误: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceStatus, DeviceType};

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.reservation.refresh_interval_ms, 1000);
        assert_eq!(config.reservation.reconnect_interval_ms, 5000);
        assert_eq!(config.api.bind, "0.0.0.0:3000");
        assert!(config.session.base_url.is_none());
    }

    #[test]
    fn test_serialize_config() {
        let config = ManagerConfig::default();
        let toml_str = toml::to_string_pretty(&config);
        assert!(toml_str.is_ok());
    }

    #[test]
    fn test_parse_devices_and_partial_sections() {
        let content = r#"
            [reservation]
            refresh_interval_ms = 250

            [[devices]]
            id = "emulator-5554"
            name = "Pixel 7"
            type = "Android"
            status = "Online"
            available = true
            properties = [ { key = "ProductVersion", value = "13.4" } ]
        "#;

        let config = ManagerConfig::from_toml(content).unwrap();
        assert_eq!(config.reservation.refresh_interval_ms, 250);
        assert_eq!(config.reservation.reconnect_interval_ms, 5000);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].device_type, DeviceType::Android);
        assert_eq!(config.devices[0].status, DeviceStatus::Online);
        assert_eq!(config.devices[0].properties[0].value, "13.4");
    }

    #[test]
    fn test_rejects_zero_interval() {
        let result = ManagerConfig::from_toml("[reservation]\nrefresh_interval_ms = 0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ManagerConfig::default();
        config
            .apply_env(|key| match key {
                "DEVPOOL_SESSION_URL" => Some("http://appium-hub:4000".to_string()),
                "DEVPOOL_REFRESH_MS" => Some("300".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.session.base_url.as_deref(), Some("http://appium-hub:4000"));
        assert_eq!(config.reservation.refresh_interval_ms, 300);

        let bad = config.apply_env(|key| (key == "DEVPOOL_RECONNECT_MS").then(|| "soon".to_string()));
        assert!(bad.is_err());
    }
}
