//! 设备健康检查模块
//!
//! 将当前可达的设备与存储中的设备状态对账，推进设备状态机

mod discovery;
mod monitor;
mod service;

pub use discovery::{AdbDiscovery, DeviceDiscovery, IdeviceDiscovery};
pub use monitor::{DeviceTransition, check_devices_online, next_state};
pub use service::HealthService;
