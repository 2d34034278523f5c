use tracing::{debug, error, info, warn};

use super::lock::procedure_for;
use crate::error::{AppError, Result};
use crate::session::SessionManager;
use crate::store::Store;

/// 释放已生效预约：逐台解锁后删除记录
///
/// 任一设备解锁失败时保留记录，调用方可重试。设备已从池中移除时跳过该设备。
pub async fn release_applied_reservation<S>(store: &S, sessions: &dyn SessionManager, id: &str) -> Result<()>
where
    S: Store + ?Sized,
{
    let applied = store
        .get_applied_reservation(id)
        .await?
        .ok_or_else(|| AppError::ReservationNotFound(id.to_string()))?;

    let procedure = procedure_for(applied.reservation_type);

    for reserved in &applied.reserved_devices {
        debug!(reservation_id = id, device_id = %reserved.device_id, "释放设备");
        match procedure.unlock(store, sessions, &reserved.device_id).await {
            Ok(_) => {}
            Err(AppError::DeviceNotFound(device_id)) => {
                warn!(reservation_id = id, "设备已不在设备池中: {}", device_id);
            }
            Err(e) => {
                error!(reservation_id = id, device_id = %reserved.device_id, "解锁设备失败: {}", e);
                return Err(e);
            }
        }
    }

    store.delete_applied_reservation(id).await?;
    info!(reservation_id = id, "已生效预约已释放");
    Ok(())
}
