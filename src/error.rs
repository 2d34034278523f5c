use thiserror::Error;

/// 应用程序统一错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 设备未找到
    #[error("设备未找到: {0}")]
    DeviceNotFound(String),

    /// 预约未找到
    #[error("预约未找到: {0}")]
    ReservationNotFound(String),

    /// 设备已匹配但不可用
    #[error("设备不可用: {0}")]
    DeviceUnavailable(String),

    /// 设备处于锁定状态，拒绝修改
    #[error("设备已锁定: {0}")]
    DeviceLocked(String),

    /// 锁定设备失败
    #[error("锁定设备失败: {device_id}: {reason}")]
    LockFailure { device_id: String, reason: String },

    /// 解锁设备失败
    #[error("解锁设备失败: {0}")]
    UnlockFailure(String),

    /// 自动化会话错误
    #[error("会话错误: {0}")]
    Session(String),

    /// 后端存储不可达
    #[error("存储连接失败: {0}")]
    Connectivity(String),

    /// 请求校验失败
    #[error("校验错误: {0}")]
    Validation(String),

    /// 等待资源锁超时
    #[error("等待资源锁超时: {0}")]
    LockTimeout(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// IO 错误
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    JsonError(#[from] serde_json::Error),

    /// 未知错误
    #[error("未知错误: {0}")]
    Unknown(String),
}

/// AppError 的 Result 类型别名
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn lock_failure(device_id: &str, reason: impl std::fmt::Display) -> Self {
        AppError::LockFailure {
            device_id: device_id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// 是否为存储连接类错误（不计入预约失败次数）
    pub fn is_connectivity(&self) -> bool {
        matches!(self, AppError::Connectivity(_))
    }

    /// 将错误转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::DeviceNotFound(_) => 404,
            AppError::ReservationNotFound(_) => 404,
            AppError::DeviceUnavailable(_) => 409,
            AppError::DeviceLocked(_) => 423,
            AppError::LockFailure { .. } => 500,
            AppError::UnlockFailure(_) => 500,
            AppError::Session(_) => 502,
            AppError::Connectivity(_) => 503,
            AppError::Validation(_) => 400,
            AppError::LockTimeout(_) => 423,
            AppError::Config(_) => 500,
            AppError::IoError(_) => 500,
            AppError::JsonError(_) => 400,
            AppError::Unknown(_) => 500,
        }
    }
}
