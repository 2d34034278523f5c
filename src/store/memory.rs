//! 内存存储实现
//!
//! 单进程部署下的默认后端，所有集合都由 `RwLock` 保护

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::traits::{AppliedReservationStore, Connectivity, DeviceStore, ReservationQueueStore};
use crate::error::{AppError, Result};
use crate::models::{Device, DeviceStatus, Reservation, ReservationApplied};

#[derive(Default)]
struct Collections {
    /// 按注册顺序保存
    devices: Vec<Device>,
    /// 按入队顺序保存
    queue: Vec<Reservation>,
    applied: Vec<ReservationApplied>,
}

/// 注入的设备写入故障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    /// 所有写入失败
    Always,
    /// 写入指定状态时失败
    OnStatus(DeviceStatus),
    /// 写入指定状态时报告存储掉线
    DisconnectOnStatus(DeviceStatus),
}

/// 内存存储
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Collections>>,
    reachable: Arc<AtomicBool>,
    write_faults: Arc<std::sync::RwLock<HashMap<String, WriteFault>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Collections::default())),
            reachable: Arc::new(AtomicBool::new(true)),
            write_faults: Arc::new(std::sync::RwLock::new(HashMap::new())),
        }
    }

    /// 使用初始设备列表创建
    pub fn with_devices(devices: Vec<Device>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Collections {
                devices,
                ..Default::default()
            })),
            ..Self::new()
        }
    }

    /// 模拟后端掉线或恢复
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// 让指定设备的后续写入失败（用于故障演练）
    pub fn fail_updates_for(&self, device_id: &str) {
        self.inject_write_fault(device_id, WriteFault::Always);
    }

    pub fn inject_write_fault(&self, device_id: &str, fault: WriteFault) {
        if let Ok(mut faults) = self.write_faults.write() {
            faults.insert(device_id.to_string(), fault);
        }
    }

    /// 恢复指定设备的写入
    pub fn restore_updates_for(&self, device_id: &str) {
        if let Ok(mut faults) = self.write_faults.write() {
            faults.remove(device_id);
        }
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::Connectivity("内存存储已被标记为不可达".to_string()))
        }
    }

    fn check_write_fault(&self, device: &Device) -> Result<()> {
        let fault = self
            .write_faults
            .read()
            .ok()
            .and_then(|faults| faults.get(&device.id).copied());

        match fault {
            Some(WriteFault::Always) => Err(AppError::Unknown(format!("写入设备失败: {}", device.id))),
            Some(WriteFault::OnStatus(status)) if device.status == status => {
                Err(AppError::Unknown(format!("写入设备 {} 状态 {} 失败", device.id, status)))
            }
            Some(WriteFault::DisconnectOnStatus(status)) if device.status == status => Err(
                AppError::Connectivity(format!("写入设备 {} 状态 {} 时连接中断", device.id, status)),
            ),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn get_device(&self, id: &str) -> Result<Option<Device>> {
        self.ensure_reachable()?;
        let inner = self.inner.read().await;
        Ok(inner.devices.iter().find(|d| d.id == id).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>> {
        self.ensure_reachable()?;
        Ok(self.inner.read().await.devices.clone())
    }

    async fn add_device(&self, device: Device) -> Result<Device> {
        self.ensure_reachable()?;
        let mut inner = self.inner.write().await;
        if inner.devices.iter().any(|d| d.id == device.id) {
            return Err(AppError::Validation(format!("设备已存在: {}", device.id)));
        }
        debug!(device_id = %device.id, "注册设备");
        inner.devices.push(device.clone());
        Ok(device)
    }

    async fn update_device(&self, device: Device) -> Result<Device> {
        self.ensure_reachable()?;
        self.check_write_fault(&device)?;
        let mut inner = self.inner.write().await;
        let slot = inner
            .devices
            .iter_mut()
            .find(|d| d.id == device.id)
            .ok_or_else(|| AppError::DeviceNotFound(device.id.clone()))?;
        *slot = device.clone();
        Ok(device)
    }

    async fn delete_device(&self, id: &str) -> Result<()> {
        self.ensure_reachable()?;
        let mut inner = self.inner.write().await;
        let before = inner.devices.len();
        inner.devices.retain(|d| d.id != id);
        if inner.devices.len() == before {
            return Err(AppError::DeviceNotFound(id.to_string()));
        }
        debug!(device_id = id, "设备已移除");
        Ok(())
    }
}

#[async_trait]
impl ReservationQueueStore for MemoryStore {
    async fn get_reservation(&self, id: &str) -> Result<Option<Reservation>> {
        self.ensure_reachable()?;
        let inner = self.inner.read().await;
        Ok(inner.queue.iter().find(|r| r.id == id).cloned())
    }

    async fn list_reservations(&self) -> Result<Vec<Reservation>> {
        self.ensure_reachable()?;
        Ok(self.inner.read().await.queue.clone())
    }

    async fn add_reservation(&self, reservation: Reservation) -> Result<Reservation> {
        self.ensure_reachable()?;
        let mut inner = self.inner.write().await;
        if inner.queue.iter().any(|r| r.id == reservation.id) {
            return Err(AppError::Validation(format!("预约已存在: {}", reservation.id)));
        }
        inner.queue.push(reservation.clone());
        Ok(reservation)
    }

    async fn update_reservation(&self, reservation: Reservation) -> Result<Reservation> {
        self.ensure_reachable()?;
        let mut inner = self.inner.write().await;
        let slot = inner
            .queue
            .iter_mut()
            .find(|r| r.id == reservation.id)
            .ok_or_else(|| AppError::ReservationNotFound(reservation.id.clone()))?;
        *slot = reservation.clone();
        Ok(reservation)
    }

    async fn delete_reservation(&self, id: &str) -> Result<()> {
        self.ensure_reachable()?;
        let mut inner = self.inner.write().await;
        let before = inner.queue.len();
        inner.queue.retain(|r| r.id != id);
        if inner.queue.len() == before {
            return Err(AppError::ReservationNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AppliedReservationStore for MemoryStore {
    async fn get_applied_reservation(&self, id: &str) -> Result<Option<ReservationApplied>> {
        self.ensure_reachable()?;
        let inner = self.inner.read().await;
        Ok(inner.applied.iter().find(|r| r.id == id).cloned())
    }

    async fn list_applied_reservations(&self) -> Result<Vec<ReservationApplied>> {
        self.ensure_reachable()?;
        Ok(self.inner.read().await.applied.clone())
    }

    async fn add_applied_reservation(&self, applied: ReservationApplied) -> Result<ReservationApplied> {
        self.ensure_reachable()?;
        let mut inner = self.inner.write().await;
        if inner.applied.iter().any(|r| r.id == applied.id) {
            return Err(AppError::Validation(format!("已生效预约已存在: {}", applied.id)));
        }
        inner.applied.push(applied.clone());
        Ok(applied)
    }

    async fn delete_applied_reservation(&self, id: &str) -> Result<()> {
        self.ensure_reachable()?;
        let mut inner = self.inner.write().await;
        let before = inner.applied.len();
        inner.applied.retain(|r| r.id != id);
        if inner.applied.len() == before {
            return Err(AppError::ReservationNotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Connectivity for MemoryStore {
    async fn try_connect(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}
