use std::collections::HashSet;
use tracing::info;

use crate::error::{AppError, Result};
use crate::matcher::find_matching_device;
use crate::models::{Device, Reservation};
use crate::store::{DeviceStore, ReservationQueueStore};

/// 校验客户端提交的预约
///
/// - 至少请求一台设备
/// - 指定的设备 ID 不能重复
/// - 每个请求都必须能在设备池中匹配到设备（不要求当前可用）
pub fn validate_reservation(reservation: &Reservation, pool: &[Device]) -> Result<()> {
    if reservation.requested_devices.is_empty() {
        return Err(AppError::Validation("requestedDevices 为空".to_string()));
    }

    let mut seen = HashSet::new();
    for id in reservation
        .requested_devices
        .iter()
        .filter_map(|r| r.device_id.as_deref())
    {
        if !seen.insert(id) {
            return Err(AppError::Validation(format!("requestedDevices 包含重复的 deviceId: {}", id)));
        }
    }

    let unmatched: Vec<String> = reservation
        .requested_devices
        .iter()
        .filter(|r| find_matching_device(r, pool).is_none())
        .map(|r| serde_json::to_string(r).unwrap_or_else(|_| format!("{:?}", r)))
        .collect();

    if !unmatched.is_empty() {
        return Err(AppError::Validation(format!(
            "设备池中未找到请求的设备: [{}]",
            unmatched.join(", ")
        )));
    }

    Ok(())
}

/// 校验并加入预约队列
pub async fn submit_reservation<S>(store: &S, reservation: Reservation) -> Result<Reservation>
where
    S: DeviceStore + ReservationQueueStore + ?Sized,
{
    let pool = store.list_devices().await?;
    validate_reservation(&reservation, &pool)?;

    let queued = store.add_reservation(reservation).await?;
    info!(
        reservation_id = %queued.id,
        reservation_type = %queued.reservation_type,
        "新预约已入队 ({} 台设备)",
        queued.requested_devices.len()
    );
    Ok(queued)
}
