use std::collections::HashSet;
use tracing::{debug, error};

use crate::error::Result;
use crate::models::{Device, DeviceStatus, DeviceType};
use crate::store::DeviceStore;

/// 一次状态变更
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTransition {
    pub device_id: String,
    pub from: DeviceStatus,
    pub to: DeviceStatus,
    pub available: bool,
}

/// 根据可达性计算设备的下一个 (状态, 可用性)，无需变更时返回 `None`
///
/// | 可达 | 当前状态          | 结果                    |
/// |------|-------------------|-------------------------|
/// | 否   | 非 Locked/LockedOffline | Offline，不可用   |
/// | 否   | Locked            | LockedOffline，可用性不变 |
/// | 是   | LockedOffline     | Locked，不可用          |
/// | 是   | Offline           | Online，可用            |
pub fn next_state(device: &Device, reachable: bool) -> Option<(DeviceStatus, bool)> {
    match (reachable, device.status) {
        (false, DeviceStatus::Locked) => Some((DeviceStatus::LockedOffline, device.available)),
        (false, DeviceStatus::LockedOffline) => None,
        // 已经离线且不可用时不再重复写入
        (false, DeviceStatus::Offline) if !device.available => None,
        (false, _) => Some((DeviceStatus::Offline, false)),
        (true, DeviceStatus::LockedOffline) => Some((DeviceStatus::Locked, false)),
        (true, DeviceStatus::Offline) => Some((DeviceStatus::Online, true)),
        (true, _) => None,
    }
}

/// 对账指定类型的所有设备，每个变更单独写入
///
/// 列表只用来确定设备 ID，每台设备在计算状态前重新读取，避免用旧快照覆盖
/// 期间被锁定的设备。单台设备写入失败只记录日志，不影响其它设备。
pub async fn check_devices_online<S>(
    store: &S,
    reachable_ids: &HashSet<String>,
    device_type: DeviceType,
) -> Result<Vec<DeviceTransition>>
where
    S: DeviceStore + ?Sized,
{
    let ids: Vec<String> = store
        .list_devices()
        .await?
        .into_iter()
        .filter(|d| d.device_type == device_type)
        .map(|d| d.id)
        .collect();
    let mut transitions = Vec::new();

    for id in ids {
        let Some(mut device) = store.get_device(&id).await? else {
            continue;
        };
        let reachable = reachable_ids.contains(&device.id);
        let Some((status, available)) = next_state(&device, reachable) else {
            continue;
        };

        debug!(
            device_id = %device.id,
            "设备状态 [{}] → [{}]",
            device.status, status
        );

        let transition = DeviceTransition {
            device_id: device.id.clone(),
            from: device.status,
            to: status,
            available,
        };

        device.status = status;
        device.available = available;

        match store.update_device(device).await {
            Ok(_) => transitions.push(transition),
            Err(e) if e.is_connectivity() => return Err(e),
            Err(e) => error!(device_id = %transition.device_id, "写入设备状态失败: {}", e),
        }
    }

    Ok(transitions)
}
