//! 预约相关的类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::device::{Device, DeviceProperty, DeviceType};

/// 预约类型，决定锁定/解锁流程
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReservationType {
    #[default]
    Appium,
    XcuiTest,
    Manual,
}

impl fmt::Display for ReservationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationType::Appium => write!(f, "Appium"),
            ReservationType::XcuiTest => write!(f, "XcuiTest"),
            ReservationType::Manual => write!(f, "Manual"),
        }
    }
}

/// 客户端请求的设备约束
///
/// 匹配优先级固定为 id → 类型 → 名称 → 属性。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedDevice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(default)]
    pub device_type: DeviceType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,

    /// 值可以包含 `*` / `?` 通配符
    #[serde(default)]
    pub properties: Vec<DeviceProperty>,
}

impl RequestedDevice {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            device_id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn by_type(device_type: DeviceType) -> Self {
        Self {
            device_type,
            ..Default::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn by_properties(properties: Vec<DeviceProperty>) -> Self {
        Self {
            properties,
            ..Default::default()
        }
    }
}

/// 队列中的预约
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    #[serde(default = "generate_reservation_id")]
    pub id: String,

    #[serde(default = "Utc::now")]
    pub date_created: DateTime<Utc>,

    #[serde(default)]
    pub requested_devices: Vec<RequestedDevice>,

    /// 分配协议中止的次数
    #[serde(default)]
    pub failed_to_apply: u32,

    #[serde(default)]
    pub reservation_type: ReservationType,
}

/// 生成 24 位预约 ID
pub(crate) fn generate_reservation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..24].to_string()
}

impl Reservation {
    /// 创建新的预约
    pub fn new(requested_devices: Vec<RequestedDevice>, reservation_type: ReservationType) -> Self {
        Self {
            id: generate_reservation_id(),
            date_created: Utc::now(),
            requested_devices,
            failed_to_apply: 0,
            reservation_type,
        }
    }

    /// 是否为多设备预约（需要资格预检）
    pub fn is_multi_device(&self) -> bool {
        self.requested_devices.len() > 1
    }
}

/// 锁定成功时的设备快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservedDevice {
    pub device_id: String,

    #[serde(default)]
    pub device_name: String,

    #[serde(default)]
    pub device_type: DeviceType,

    #[serde(default)]
    pub appium_endpoint: String,
}

impl From<&Device> for ReservedDevice {
    fn from(device: &Device) -> Self {
        Self {
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            device_type: device.device_type,
            appium_endpoint: device.appium_endpoint.clone(),
        }
    }
}

/// 已生效的预约
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationApplied {
    /// 与原预约 ID 相同
    pub id: String,

    pub reserved_devices: Vec<ReservedDevice>,

    pub date_created: DateTime<Utc>,

    #[serde(default)]
    pub reservation_type: ReservationType,
}

impl ReservationApplied {
    pub fn from_reservation(reservation: &Reservation, reserved_devices: Vec<ReservedDevice>) -> Self {
        Self {
            id: reservation.id.clone(),
            reserved_devices,
            date_created: reservation.date_created,
            reservation_type: reservation.reservation_type,
        }
    }
}
