//! 按预约类型分派的锁定/解锁流程
//!
//! 三种预约类型共用同一套步骤，区别只在于是否需要启动自动化会话

use tracing::{debug, error};

use crate::error::{AppError, Result};
use crate::models::{Device, DeviceStatus, ReservationType};
use crate::session::SessionManager;
use crate::store::DeviceStore;

/// 单一预约类型的锁定流程
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockProcedure {
    pub reservation_type: ReservationType,

    /// 锁定时启动会话、解锁时停止会话
    pub manages_session: bool,
}

const APPIUM: LockProcedure = LockProcedure {
    reservation_type: ReservationType::Appium,
    manages_session: true,
};

const XCUITEST: LockProcedure = LockProcedure {
    reservation_type: ReservationType::XcuiTest,
    manages_session: false,
};

const MANUAL: LockProcedure = LockProcedure {
    reservation_type: ReservationType::Manual,
    manages_session: false,
};

/// 预约类型 → 锁定流程
pub fn procedure_for(reservation_type: ReservationType) -> &'static LockProcedure {
    match reservation_type {
        ReservationType::Appium => &APPIUM,
        ReservationType::XcuiTest => &XCUITEST,
        ReservationType::Manual => &MANUAL,
    }
}

impl LockProcedure {
    /// 锁定设备，返回写入后的设备记录
    ///
    /// 任一步骤失败都会立即对该设备执行解锁，再把错误返回给调用方。
    pub async fn lock<S>(&self, store: &S, sessions: &dyn SessionManager, device_id: &str) -> Result<Device>
    where
        S: DeviceStore + ?Sized,
    {
        let mut device = fetch_device(store, device_id).await?;

        debug!(
            device_id,
            "[{}] 锁定设备，可用状态 {} → false",
            self.reservation_type, device.available
        );
        device.available = false;

        if self.manages_session {
            debug!(device_id, "[{}] 启动会话", self.reservation_type);
            match sessions.start_session(device_id).await {
                Ok(endpoint) => device.appium_endpoint = endpoint,
                Err(e) => {
                    error!(device_id, "启动会话失败: {}", e);
                    self.unlock_after_failed_lock(store, sessions, device_id).await;
                    return Err(AppError::lock_failure(device_id, e));
                }
            }
        }

        debug!(device_id, "设备状态 {} → {}", device.status, DeviceStatus::Locked);
        device.status = DeviceStatus::Locked;

        match store.update_device(device).await {
            Ok(updated) => Ok(updated),
            Err(e) => {
                error!(device_id, "写入锁定状态失败: {}", e);
                self.unlock_after_failed_lock(store, sessions, device_id).await;
                // 连接类错误原样返回，调度循环据此中止本轮
                if e.is_connectivity() {
                    Err(e)
                } else {
                    Err(AppError::lock_failure(device_id, e))
                }
            }
        }
    }

    /// 解锁设备，重复调用结果一致
    pub async fn unlock<S>(&self, store: &S, sessions: &dyn SessionManager, device_id: &str) -> Result<Device>
    where
        S: DeviceStore + ?Sized,
    {
        let mut device = fetch_device(store, device_id).await?;

        debug!(
            device_id,
            "[{}] 解锁设备，可用状态 {} → true",
            self.reservation_type, device.available
        );
        device.available = true;

        if self.manages_session {
            debug!(device_id, "[{}] 停止会话", self.reservation_type);
            if !sessions.stop_session(device_id).await? {
                return Err(AppError::UnlockFailure(format!("会话未能停止: {}", device_id)));
            }
            device.appium_endpoint.clear();
        }

        debug!(device_id, "设备状态 {} → {}", device.status, DeviceStatus::Offline);
        device.status = DeviceStatus::Offline;

        let updated = store.update_device(device).await?;
        if !updated.available {
            return Err(AppError::UnlockFailure(device_id.to_string()));
        }

        Ok(updated)
    }

    async fn unlock_after_failed_lock<S>(&self, store: &S, sessions: &dyn SessionManager, device_id: &str)
    where
        S: DeviceStore + ?Sized,
    {
        if let Err(e) = self.unlock(store, sessions, device_id).await {
            error!(device_id, "锁定失败后的解锁也失败: {}", e);
        }
    }
}

async fn fetch_device<S>(store: &S, device_id: &str) -> Result<Device>
where
    S: DeviceStore + ?Sized,
{
    store
        .get_device(device_id)
        .await?
        .ok_or_else(|| AppError::DeviceNotFound(device_id.to_string()))
}
