use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Device, Reservation, ReservationApplied};

/// 设备存储
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// 按 ID 获取设备，不存在时返回 `None`
    async fn get_device(&self, id: &str) -> Result<Option<Device>>;

    async fn list_devices(&self) -> Result<Vec<Device>>;

    /// 注册设备，ID 已存在时返回校验错误
    async fn add_device(&self, device: Device) -> Result<Device>;

    /// 按 ID 覆盖写入，返回写入后的记录
    async fn update_device(&self, device: Device) -> Result<Device>;

    /// 从设备池移除，只由管理接口调用
    async fn delete_device(&self, id: &str) -> Result<()>;
}

/// 预约队列存储，`list_reservations` 按入队顺序返回
#[async_trait]
pub trait ReservationQueueStore: Send + Sync {
    async fn get_reservation(&self, id: &str) -> Result<Option<Reservation>>;

    async fn list_reservations(&self) -> Result<Vec<Reservation>>;

    async fn add_reservation(&self, reservation: Reservation) -> Result<Reservation>;

    async fn update_reservation(&self, reservation: Reservation) -> Result<Reservation>;

    async fn delete_reservation(&self, id: &str) -> Result<()>;
}

/// 已生效预约存储
#[async_trait]
pub trait AppliedReservationStore: Send + Sync {
    async fn get_applied_reservation(&self, id: &str) -> Result<Option<ReservationApplied>>;

    async fn list_applied_reservations(&self) -> Result<Vec<ReservationApplied>>;

    async fn add_applied_reservation(&self, applied: ReservationApplied) -> Result<ReservationApplied>;

    async fn delete_applied_reservation(&self, id: &str) -> Result<()>;
}

/// 后端连接探测
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn try_connect(&self) -> bool;
}

/// 调度器所需的全部存储能力
pub trait Store: DeviceStore + ReservationQueueStore + AppliedReservationStore + Connectivity {}

impl<T> Store for T where T: DeviceStore + ReservationQueueStore + AppliedReservationStore + Connectivity {}
