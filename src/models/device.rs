//! 设备相关的类型定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 设备平台类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeviceType {
    Android,
    #[serde(rename = "iOS", alias = "IOS")]
    Ios,
    #[default]
    Unspecified,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Android => write!(f, "Android"),
            DeviceType::Ios => write!(f, "iOS"),
            DeviceType::Unspecified => write!(f, "Unspecified"),
        }
    }
}

/// 设备状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// 在线且可被预约
    Online,
    /// 离线
    #[default]
    Offline,
    /// 已被预约锁定
    Locked,
    /// 已被预约锁定，但设备当前不可达
    LockedOffline,
    /// 初始化失败
    FailedToInitialize,
}

impl DeviceStatus {
    /// 是否处于锁定状态（包括锁定但离线）
    pub fn is_locked(&self) -> bool {
        matches!(self, DeviceStatus::Locked | DeviceStatus::LockedOffline)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "在线"),
            DeviceStatus::Offline => write!(f, "离线"),
            DeviceStatus::Locked => write!(f, "已锁定"),
            DeviceStatus::LockedOffline => write!(f, "已锁定(离线)"),
            DeviceStatus::FailedToInitialize => write!(f, "初始化失败"),
        }
    }
}

/// 设备属性（键可重复）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperty {
    pub key: String,
    pub value: String,
}

impl DeviceProperty {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// 设备记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// 稳定的硬件/模拟器标识
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub device_type: DeviceType,

    #[serde(default)]
    pub status: DeviceStatus,

    #[serde(default)]
    pub available: bool,

    /// 未运行会话时为空
    #[serde(default)]
    pub appium_endpoint: String,

    #[serde(default)]
    pub properties: Vec<DeviceProperty>,
}

impl Device {
    /// 创建新的设备记录（离线、不可用）
    pub fn new(id: impl Into<String>, name: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            device_type,
            status: DeviceStatus::Offline,
            available: false,
            appium_endpoint: String::new(),
            properties: Vec::new(),
        }
    }

    /// 标记为在线可用
    pub fn online(mut self) -> Self {
        self.status = DeviceStatus::Online;
        self.available = true;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push(DeviceProperty::new(key, value));
        self
    }
}
