//! 设备池数据模型
//!
//! 设备、预约队列条目以及已生效预约的定义

mod device;
mod reservation;

pub use device::{Device, DeviceProperty, DeviceStatus, DeviceType};
pub use reservation::{
    RequestedDevice, Reservation, ReservationApplied, ReservationType, ReservedDevice,
};
