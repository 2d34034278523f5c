//! 预约分配协议
//!
//! 单条预约的流程：
//! 1. 多设备预约先做资格预检，对每台匹配设备做临时占用（`try_hold_all`），
//!    任一设备不满足即全部释放（`release_all`），本轮跳过；
//! 2. 按预约类型逐台锁定；
//! 3. 全部锁定成功则写入已生效预约并移出队列，否则回滚已锁定的设备并累加失败次数。
//!
//! 回滚失败的设备记入待清理列表，在下一轮开始时重试。

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::lock::procedure_for;
use crate::error::{AppError, Result};
use crate::matcher::find_matching_device;
use crate::models::{Device, RequestedDevice, Reservation, ReservationApplied, ReservationType, ReservedDevice};
use crate::session::SessionManager;
use crate::store::Store;

/// 资格预检结果
#[derive(Debug)]
pub enum HoldOutcome {
    /// 所有请求设备均已被临时占用，顺序与请求一致
    Held(Vec<Device>),
    /// 至少一台设备未匹配或不可用，临时占用已全部释放
    NotEligible(String),
}

/// 单条预约的处理结果
#[derive(Debug)]
pub enum ApplyOutcome {
    Applied(ReservationApplied),
    /// 本轮不满足条件，预约原样留在队列
    NotEligible,
    /// 锁定失败，已回滚并累加失败次数
    Failed,
}

/// 回滚失败、等待重试的设备
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingCleanup {
    /// 撤销临时占用
    Release(String),
    /// 按预约类型解锁
    Unlock(ReservationType, String),
}

/// 预约分配器
pub struct ReservationAllocator {
    store: Arc<dyn Store>,
    sessions: Arc<dyn SessionManager>,
    pending: Mutex<Vec<PendingCleanup>>,
}

impl ReservationAllocator {
    pub fn new(store: Arc<dyn Store>, sessions: Arc<dyn SessionManager>) -> Self {
        Self {
            store,
            sessions,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// 对整个队列快照执行一轮分配，按加载顺序处理
    ///
    /// 单条预约的错误只记录日志；存储不可达时中止本轮。
    pub async fn apply_available_reservations(&self) -> Result<Vec<ReservationApplied>> {
        self.retry_pending_cleanup().await;

        let queue = self.store.list_reservations().await?;
        let mut applied = Vec::new();

        for reservation in queue {
            debug!(reservation_id = %reservation.id, "处理队列中的预约");
            match self.apply_reservation(reservation).await {
                Ok(ApplyOutcome::Applied(record)) => applied.push(record),
                Ok(_) => {}
                Err(e) if e.is_connectivity() => return Err(e),
                Err(e) => error!("处理预约失败: {}", e),
            }
        }

        info!("本轮生效预约数: {}", applied.len());
        Ok(applied)
    }

    /// 处理单条预约
    pub async fn apply_reservation(&self, reservation: Reservation) -> Result<ApplyOutcome> {
        if reservation.requested_devices.is_empty() {
            return Err(AppError::Validation(format!(
                "预约 {} 未包含请求设备",
                reservation.id
            )));
        }

        if self
            .store
            .get_applied_reservation(&reservation.id)
            .await?
            .is_some()
        {
            // 上一轮已生效但未能移出队列
            warn!(reservation_id = %reservation.id, "预约已生效，移出队列");
            self.dequeue(&reservation.id).await?;
            return Ok(ApplyOutcome::NotEligible);
        }

        let targets = if reservation.is_multi_device() {
            match self.try_hold_all(&reservation).await? {
                HoldOutcome::Held(devices) => devices,
                HoldOutcome::NotEligible(reason) => {
                    debug!(reservation_id = %reservation.id, "预约不满足条件: {}", reason);
                    return Ok(ApplyOutcome::NotEligible);
                }
            }
        } else {
            match self.match_single(&reservation.requested_devices[0]).await? {
                Some(device) => vec![device],
                None => return Ok(ApplyOutcome::NotEligible),
            }
        };

        let (locked, failure) = self.lock_all(&reservation, &targets).await;

        if failure.is_none() && locked.len() == reservation.requested_devices.len() {
            let record = ReservationApplied::from_reservation(&reservation, locked.clone());
            match self.store.add_applied_reservation(record).await {
                Ok(record) => {
                    info!(reservation_id = %reservation.id, "所有设备已锁定，预约生效");
                    self.dequeue(&reservation.id).await?;
                    return Ok(ApplyOutcome::Applied(record));
                }
                Err(e) => {
                    error!(reservation_id = %reservation.id, "写入已生效预约失败: {}", e);
                    let ids: Vec<String> = locked.iter().map(|d| d.device_id.clone()).collect();
                    self.rollback(reservation.reservation_type, &ids).await;
                    self.record_failure(reservation).await?;
                    return if e.is_connectivity() { Err(e) } else { Ok(ApplyOutcome::Failed) };
                }
            }
        }

        error!(
            reservation_id = %reservation.id,
            "未能锁定所有设备 ({}/{})",
            locked.len(),
            reservation.requested_devices.len()
        );

        // 已锁定的设备与锁定失败的那台都走解锁流程，其余设备仍处于临时占用状态
        let mut attempted: Vec<String> = locked.iter().map(|d| d.device_id.clone()).collect();
        if let Some(device) = targets.get(locked.len()) {
            attempted.push(device.id.clone());
        }
        if reservation.is_multi_device() && attempted.len() < targets.len() {
            self.release_all(&targets[attempted.len()..]).await;
        }
        self.rollback(reservation.reservation_type, &attempted).await;
        self.record_failure(reservation).await?;

        match failure {
            Some(e) if e.is_connectivity() => Err(e),
            _ => Ok(ApplyOutcome::Failed),
        }
    }

    /// 资格预检：逐台匹配并临时占用（`available = false`）
    ///
    /// 任一设备未匹配或不可用时，释放本轮已占用的设备。
    pub async fn try_hold_all(&self, reservation: &Reservation) -> Result<HoldOutcome> {
        debug!(reservation_id = %reservation.id, "多设备预约资格预检");

        let mut pool = self.store.list_devices().await?;
        let mut held: Vec<Device> = Vec::new();
        let mut held_ids: HashSet<String> = HashSet::new();

        for requested in &reservation.requested_devices {
            let candidates: Vec<Device> = pool
                .iter()
                .filter(|d| !held_ids.contains(&d.id))
                .cloned()
                .collect();

            let reason = match find_matching_device(requested, &candidates) {
                None => Some(format!("未找到匹配设备: {}", describe(requested))),
                Some(device) if !device.available => Some(format!("设备不可用: {}", device.id)),
                Some(mut device) => {
                    device.available = false;
                    match self.store.update_device(device).await {
                        Ok(updated) => {
                            debug!(device_id = %updated.id, "设备已临时占用");
                            if let Some(slot) = pool.iter_mut().find(|d| d.id == updated.id) {
                                *slot = updated.clone();
                            }
                            held_ids.insert(updated.id.clone());
                            held.push(updated);
                            None
                        }
                        Err(e) => {
                            self.release_all(&held).await;
                            return Err(e);
                        }
                    }
                }
            };

            if let Some(reason) = reason {
                self.release_all(&held).await;
                return Ok(HoldOutcome::NotEligible(reason));
            }
        }

        Ok(HoldOutcome::Held(held))
    }

    /// 释放临时占用（`available = true`），失败的设备留待下一轮重试
    pub async fn release_all(&self, held: &[Device]) {
        for device in held {
            match self.release_one(&device.id).await {
                Ok(_) => debug!(device_id = %device.id, "已释放临时占用"),
                Err(AppError::DeviceNotFound(_)) => warn!(device_id = %device.id, "设备已不在设备池中"),
                Err(e) => {
                    error!(device_id = %device.id, "释放临时占用失败: {}", e);
                    self.defer(PendingCleanup::Release(device.id.clone())).await;
                }
            }
        }
    }

    async fn release_one(&self, device_id: &str) -> Result<Device> {
        let mut current = self
            .store
            .get_device(device_id)
            .await?
            .ok_or_else(|| AppError::DeviceNotFound(device_id.to_string()))?;
        current.available = true;
        self.store.update_device(current).await
    }

    /// 重试之前回滚失败的设备，返回仍未完成的数量
    pub(crate) async fn retry_pending_cleanup(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock().await);
        if pending.is_empty() {
            return 0;
        }

        info!("重试 {} 台设备的回滚", pending.len());
        let mut remaining = Vec::new();
        for item in pending {
            let result = match &item {
                PendingCleanup::Release(id) => self.release_one(id).await,
                PendingCleanup::Unlock(reservation_type, id) => {
                    procedure_for(*reservation_type)
                        .unlock(&*self.store, &*self.sessions, id)
                        .await
                }
            };

            match result {
                Ok(device) => info!(device_id = %device.id, "回滚重试成功"),
                Err(AppError::DeviceNotFound(id)) => warn!(device_id = %id, "设备已不在设备池中，放弃回滚"),
                Err(e) => {
                    warn!("回滚重试失败: {:?}: {}", item, e);
                    remaining.push(item);
                }
            }
        }

        let left = remaining.len();
        self.pending.lock().await.extend(remaining);
        left
    }

    async fn defer(&self, item: PendingCleanup) {
        let mut pending = self.pending.lock().await;
        if !pending.contains(&item) {
            pending.push(item);
        }
    }

    /// 单设备预约：匹配并检查可用性
    async fn match_single(&self, requested: &RequestedDevice) -> Result<Option<Device>> {
        let device = match &requested.device_id {
            Some(id) => self.store.get_device(id).await?,
            None => {
                let pool = self.store.list_devices().await?;
                find_matching_device(requested, &pool)
            }
        };

        let Some(device) = device else {
            error!("未找到匹配设备: {}", describe(requested));
            return Ok(None);
        };

        let current = self.store.get_device(&device.id).await?;
        match current {
            Some(current) if current.available => Ok(Some(current)),
            _ => {
                debug!(device_id = %device.id, "设备不可用");
                Ok(None)
            }
        }
    }

    /// 逐台锁定，遇到第一个失败即停止
    async fn lock_all(&self, reservation: &Reservation, targets: &[Device]) -> (Vec<ReservedDevice>, Option<AppError>) {
        let procedure = procedure_for(reservation.reservation_type);
        let mut locked = Vec::new();

        for device in targets {
            debug!(
                reservation_id = %reservation.id,
                device_id = %device.id,
                "[{}] 锁定设备",
                reservation.reservation_type
            );
            match procedure.lock(&*self.store, &*self.sessions, &device.id).await {
                Ok(updated) if !updated.available => locked.push(ReservedDevice::from(&updated)),
                Ok(updated) => {
                    warn!(device_id = %updated.id, "锁定后设备仍为可用状态");
                    return (locked, Some(AppError::lock_failure(&updated.id, "锁定未生效")));
                }
                Err(e) => {
                    error!(reservation_id = %reservation.id, "锁定设备失败: {}", e);
                    return (locked, Some(e));
                }
            }
        }

        (locked, None)
    }

    /// 解锁本轮尝试过锁定的设备，失败的设备留待下一轮重试
    async fn rollback(&self, reservation_type: ReservationType, device_ids: &[String]) {
        let procedure = procedure_for(reservation_type);
        for device_id in device_ids {
            debug!(device_id = %device_id, "回滚锁定");
            match procedure.unlock(&*self.store, &*self.sessions, device_id).await {
                Ok(_) => {}
                Err(AppError::DeviceNotFound(_)) => warn!(device_id = %device_id, "设备已不在设备池中"),
                Err(e) => {
                    error!(device_id = %device_id, "回滚解锁失败: {}", e);
                    self.defer(PendingCleanup::Unlock(reservation_type, device_id.clone())).await;
                }
            }
        }
    }

    /// 预约已生效，移出队列；预约已被客户端取消时只记录日志
    async fn dequeue(&self, id: &str) -> Result<()> {
        match self.store.delete_reservation(id).await {
            Ok(()) => Ok(()),
            Err(AppError::ReservationNotFound(_)) => {
                warn!(reservation_id = id, "预约已不在队列中");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn record_failure(&self, mut reservation: Reservation) -> Result<()> {
        reservation.failed_to_apply += 1;
        warn!(
            reservation_id = %reservation.id,
            failed_to_apply = reservation.failed_to_apply,
            "预约分配失败，保留在队列中"
        );
        match self.store.update_reservation(reservation).await {
            Ok(_) => Ok(()),
            Err(AppError::ReservationNotFound(id)) => {
                warn!(reservation_id = %id, "预约已不在队列中，失败次数未记录");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn describe(requested: &RequestedDevice) -> String {
    serde_json::to_string(requested).unwrap_or_else(|_| format!("{:?}", requested))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceProperty, DeviceStatus, DeviceType, ReservationType};
    use crate::store::{AppliedReservationStore, DeviceStore, MemoryStore, ReservationQueueStore, WriteFault};
    use crate::testing::{FakeSessions, android, ios, store_with};

    fn allocator(store: &MemoryStore, sessions: &Arc<FakeSessions>) -> ReservationAllocator {
        ReservationAllocator::new(Arc::new(store.clone()), sessions.clone())
    }

    async fn device(store: &MemoryStore, id: &str) -> Device {
        store.get_device(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_single_android_reservation_is_applied() {
        let store = store_with(vec![android("dev-1")]);
        let sessions = Arc::new(FakeSessions::new());
        let reservation = Reservation::new(
            vec![RequestedDevice::by_type(DeviceType::Android)],
            ReservationType::Appium,
        );
        store.add_reservation(reservation.clone()).await.unwrap();

        let applied = allocator(&store, &sessions)
            .apply_available_reservations()
            .await
            .unwrap();

        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].id, reservation.id);
        assert_eq!(applied[0].reserved_devices.len(), 1);
        assert_eq!(applied[0].reserved_devices[0].device_id, "dev-1");
        assert!(!applied[0].reserved_devices[0].appium_endpoint.is_empty());

        let dev = device(&store, "dev-1").await;
        assert_eq!(dev.status, DeviceStatus::Locked);
        assert!(!dev.available);
        assert!(store.list_reservations().await.unwrap().is_empty());
        assert!(store.get_applied_reservation(&reservation.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_multi_device_with_one_unavailable_is_not_eligible() {
        let mut busy = android("dev-2");
        busy.available = false;
        let store = store_with(vec![android("dev-1"), busy]);
        let sessions = Arc::new(FakeSessions::new());
        let reservation = Reservation::new(
            vec![RequestedDevice::by_id("dev-1"), RequestedDevice::by_id("dev-2")],
            ReservationType::Manual,
        );
        store.add_reservation(reservation.clone()).await.unwrap();

        let applied = allocator(&store, &sessions)
            .apply_available_reservations()
            .await
            .unwrap();

        assert!(applied.is_empty());
        let queued = store.get_reservation(&reservation.id).await.unwrap().unwrap();
        assert_eq!(queued.failed_to_apply, 0);
        assert!(device(&store, "dev-1").await.available);
        assert_eq!(device(&store, "dev-1").await.status, DeviceStatus::Online);
    }

    #[tokio::test]
    async fn test_single_device_lock_failure_counts_and_unlocks() {
        let store = store_with(vec![android("dev-1")]);
        let sessions = Arc::new(FakeSessions::new());
        sessions.fail_start_for("dev-1");
        let reservation = Reservation::new(vec![RequestedDevice::by_id("dev-1")], ReservationType::Appium);
        store.add_reservation(reservation.clone()).await.unwrap();

        let applied = allocator(&store, &sessions)
            .apply_available_reservations()
            .await
            .unwrap();

        assert!(applied.is_empty());
        let queued = store.get_reservation(&reservation.id).await.unwrap().unwrap();
        assert_eq!(queued.failed_to_apply, 1);

        let dev = device(&store, "dev-1").await;
        assert!(dev.available);
        assert_eq!(dev.status, DeviceStatus::Offline);
        assert!(store.list_applied_reservations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_multi_device_partial_lock_rolls_back_everything() {
        let store = store_with(vec![android("dev-1"), android("dev-2"), android("dev-3")]);
        let sessions = Arc::new(FakeSessions::new());
        sessions.fail_start_for("dev-2");
        let reservation = Reservation::new(
            vec![
                RequestedDevice::by_id("dev-1"),
                RequestedDevice::by_id("dev-2"),
                RequestedDevice::by_id("dev-3"),
            ],
            ReservationType::Appium,
        );
        store.add_reservation(reservation.clone()).await.unwrap();

        let outcome = allocator(&store, &sessions)
            .apply_reservation(reservation.clone())
            .await
            .unwrap();
        assert!(matches!(outcome, ApplyOutcome::Failed));

        for id in ["dev-1", "dev-2", "dev-3"] {
            let dev = device(&store, id).await;
            assert!(dev.available, "{} 应已释放", id);
            assert!(!sessions.is_running(id));
        }
        assert_eq!(sessions.started(), vec!["dev-1".to_string(), "dev-2".to_string()]);
        assert!(store.list_applied_reservations().await.unwrap().is_empty());
        let queued = store.get_reservation(&reservation.id).await.unwrap().unwrap();
        assert_eq!(queued.failed_to_apply, 1);
    }

    #[tokio::test]
    async fn test_multi_device_reservation_locks_all() {
        let store = store_with(vec![android("dev-1"), ios("ios-1")]);
        let sessions = Arc::new(FakeSessions::new());
        let reservation = Reservation::new(
            vec![
                RequestedDevice::by_type(DeviceType::Ios),
                RequestedDevice::by_id("dev-1"),
            ],
            ReservationType::XcuiTest,
        );
        store.add_reservation(reservation.clone()).await.unwrap();

        let applied = allocator(&store, &sessions)
            .apply_available_reservations()
            .await
            .unwrap();

        assert_eq!(applied.len(), 1);
        let ids: Vec<&str> = applied[0]
            .reserved_devices
            .iter()
            .map(|d| d.device_id.as_str())
            .collect();
        assert_eq!(ids, vec!["ios-1", "dev-1"]);
        for id in ["dev-1", "ios-1"] {
            assert_eq!(device(&store, id).await.status, DeviceStatus::Locked);
        }
        assert!(sessions.started().is_empty());
    }

    #[tokio::test]
    async fn test_two_devices_of_same_type_pick_distinct_devices() {
        let store = store_with(vec![android("dev-1"), android("dev-2")]);
        let sessions = Arc::new(FakeSessions::new());
        let reservation = Reservation::new(
            vec![
                RequestedDevice::by_type(DeviceType::Android),
                RequestedDevice::by_type(DeviceType::Android),
            ],
            ReservationType::Manual,
        );

        let outcome = allocator(&store, &sessions)
            .apply_reservation(reservation)
            .await
            .unwrap();

        let ApplyOutcome::Applied(record) = outcome else {
            panic!("预约应当生效");
        };
        let mut ids: Vec<String> = record.reserved_devices.into_iter().map(|d| d.device_id).collect();
        ids.sort();
        assert_eq!(ids, vec!["dev-1".to_string(), "dev-2".to_string()]);
    }

    #[tokio::test]
    async fn test_hold_releases_on_missing_match() {
        let store = store_with(vec![android("dev-1")]);
        let sessions = Arc::new(FakeSessions::new());
        let reservation = Reservation::new(
            vec![
                RequestedDevice::by_id("dev-1"),
                RequestedDevice::by_properties(vec![DeviceProperty::new("ProductVersion", "17.*")]),
            ],
            ReservationType::Manual,
        );

        let outcome = allocator(&store, &sessions)
            .try_hold_all(&reservation)
            .await
            .unwrap();

        assert!(matches!(outcome, HoldOutcome::NotEligible(_)));
        assert!(device(&store, "dev-1").await.available);
    }

    #[tokio::test]
    async fn test_single_unavailable_device_waits_unchanged() {
        let mut busy = android("dev-1");
        busy.available = false;
        busy.status = DeviceStatus::Locked;
        let store = store_with(vec![busy]);
        let sessions = Arc::new(FakeSessions::new());
        let reservation = Reservation::new(vec![RequestedDevice::by_id("dev-1")], ReservationType::Appium);
        store.add_reservation(reservation.clone()).await.unwrap();

        allocator(&store, &sessions)
            .apply_available_reservations()
            .await
            .unwrap();

        let queued = store.get_reservation(&reservation.id).await.unwrap().unwrap();
        assert_eq!(queued.failed_to_apply, 0);
        assert_eq!(device(&store, "dev-1").await.status, DeviceStatus::Locked);
        assert!(sessions.started().is_empty());
    }

    #[tokio::test]
    async fn test_queue_is_processed_in_order() {
        let store = store_with(vec![android("dev-1")]);
        let sessions = Arc::new(FakeSessions::new());
        let first = Reservation::new(vec![RequestedDevice::by_id("dev-1")], ReservationType::Manual);
        let second = Reservation::new(
            vec![RequestedDevice::by_type(DeviceType::Android)],
            ReservationType::Manual,
        );
        store.add_reservation(first.clone()).await.unwrap();
        store.add_reservation(second.clone()).await.unwrap();

        let applied = allocator(&store, &sessions)
            .apply_available_reservations()
            .await
            .unwrap();

        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].id, first.id);
        let remaining = store.list_reservations().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, second.id);
        assert_eq!(remaining[0].failed_to_apply, 0);
    }

    #[tokio::test]
    async fn test_sweep_aborts_when_store_unreachable() {
        let store = store_with(vec![android("dev-1")]);
        let sessions = Arc::new(FakeSessions::new());
        store.set_reachable(false);

        let result = allocator(&store, &sessions).apply_available_reservations().await;
        assert!(result.unwrap_err().is_connectivity());
    }

    #[tokio::test]
    async fn test_already_applied_reservation_is_dequeued() {
        let store = store_with(vec![android("dev-1")]);
        let sessions = Arc::new(FakeSessions::new());
        let reservation = Reservation::new(vec![RequestedDevice::by_id("dev-1")], ReservationType::Manual);
        store.add_reservation(reservation.clone()).await.unwrap();
        store
            .add_applied_reservation(ReservationApplied::from_reservation(&reservation, vec![]))
            .await
            .unwrap();

        let outcome = allocator(&store, &sessions)
            .apply_reservation(reservation.clone())
            .await
            .unwrap();

        assert!(matches!(outcome, ApplyOutcome::NotEligible));
        assert!(store.get_reservation(&reservation.id).await.unwrap().is_none());
        assert!(device(&store, "dev-1").await.available);
    }

    #[tokio::test]
    async fn test_disconnect_while_locking_releases_every_device() {
        let store = store_with(vec![android("dev-1"), android("dev-2")]);
        let sessions = Arc::new(FakeSessions::new());
        store.inject_write_fault("dev-1", WriteFault::DisconnectOnStatus(DeviceStatus::Locked));
        let reservation = Reservation::new(
            vec![RequestedDevice::by_id("dev-1"), RequestedDevice::by_id("dev-2")],
            ReservationType::Appium,
        );
        store.add_reservation(reservation.clone()).await.unwrap();

        let result = allocator(&store, &sessions)
            .apply_reservation(reservation.clone())
            .await;
        assert!(result.unwrap_err().is_connectivity());

        let dev1 = device(&store, "dev-1").await;
        assert!(dev1.available);
        assert_eq!(dev1.status, DeviceStatus::Offline);
        assert!(!sessions.is_running("dev-1"));

        let dev2 = device(&store, "dev-2").await;
        assert!(dev2.available);
        assert_eq!(dev2.status, DeviceStatus::Online);

        assert!(store.list_applied_reservations().await.unwrap().is_empty());
        let queued = store.get_reservation(&reservation.id).await.unwrap().unwrap();
        assert_eq!(queued.failed_to_apply, 1);
    }

    #[tokio::test]
    async fn test_disconnect_on_second_device_unlocks_first() {
        let store = store_with(vec![android("dev-1"), android("dev-2")]);
        let sessions = Arc::new(FakeSessions::new());
        store.inject_write_fault("dev-2", WriteFault::DisconnectOnStatus(DeviceStatus::Locked));
        let reservation = Reservation::new(
            vec![RequestedDevice::by_id("dev-1"), RequestedDevice::by_id("dev-2")],
            ReservationType::Appium,
        );
        store.add_reservation(reservation.clone()).await.unwrap();

        assert!(
            allocator(&store, &sessions)
                .apply_reservation(reservation)
                .await
                .is_err()
        );

        for id in ["dev-1", "dev-2"] {
            let dev = device(&store, id).await;
            assert!(dev.available, "{} 应已释放", id);
            assert_eq!(dev.status, DeviceStatus::Offline);
            assert!(dev.appium_endpoint.is_empty());
            assert!(!sessions.is_running(id));
        }
    }

    #[tokio::test]
    async fn test_failed_unlock_keeps_reservation_counted_and_retries_later() {
        let store = store_with(vec![android("dev-1"), android("dev-2")]);
        let sessions = Arc::new(FakeSessions::new());
        sessions.fail_start_for("dev-2");
        sessions.fail_stop_for("dev-1");
        let reservation = Reservation::new(
            vec![RequestedDevice::by_id("dev-1"), RequestedDevice::by_id("dev-2")],
            ReservationType::Appium,
        );
        store.add_reservation(reservation.clone()).await.unwrap();
        let allocator = allocator(&store, &sessions);

        let outcome = allocator.apply_reservation(reservation.clone()).await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Failed));

        let queued = store.get_reservation(&reservation.id).await.unwrap().unwrap();
        assert_eq!(queued.failed_to_apply, 1);
        assert!(store.list_applied_reservations().await.unwrap().is_empty());

        // 会话停止失败，设备保持锁定
        let dev1 = device(&store, "dev-1").await;
        assert_eq!(dev1.status, DeviceStatus::Locked);
        assert!(!dev1.available);
        assert!(device(&store, "dev-2").await.available);

        sessions.restore_stop_for("dev-1");
        assert_eq!(allocator.retry_pending_cleanup().await, 0);

        let dev1 = device(&store, "dev-1").await;
        assert!(dev1.available);
        assert_eq!(dev1.status, DeviceStatus::Offline);
        assert!(!sessions.is_running("dev-1"));
    }

    #[tokio::test]
    async fn test_persist_failure_on_second_device_without_sessions() {
        for reservation_type in [ReservationType::XcuiTest, ReservationType::Manual] {
            let store = store_with(vec![android("dev-1"), android("dev-2")]);
            let sessions = Arc::new(FakeSessions::new());
            store.inject_write_fault("dev-2", WriteFault::OnStatus(DeviceStatus::Locked));
            let reservation = Reservation::new(
                vec![RequestedDevice::by_id("dev-1"), RequestedDevice::by_id("dev-2")],
                reservation_type,
            );
            store.add_reservation(reservation.clone()).await.unwrap();

            let outcome = allocator(&store, &sessions)
                .apply_reservation(reservation.clone())
                .await
                .unwrap();
            assert!(matches!(outcome, ApplyOutcome::Failed));

            let queued = store.get_reservation(&reservation.id).await.unwrap().unwrap();
            assert_eq!(queued.failed_to_apply, 1, "{}", reservation_type);
            assert!(store.list_applied_reservations().await.unwrap().is_empty());

            for id in ["dev-1", "dev-2"] {
                let dev = device(&store, id).await;
                assert!(dev.available, "[{}] {} 应已释放", reservation_type, id);
                assert_eq!(dev.status, DeviceStatus::Offline);
            }
            assert!(sessions.started().is_empty());
        }
    }

    #[tokio::test]
    async fn test_reservation_cancelled_mid_sweep_is_still_applied() {
        let store = store_with(vec![android("dev-1")]);
        let sessions = Arc::new(FakeSessions::new());
        // 未入队，模拟分配期间被客户端取消
        let reservation = Reservation::new(vec![RequestedDevice::by_id("dev-1")], ReservationType::Manual);

        let outcome = allocator(&store, &sessions)
            .apply_reservation(reservation.clone())
            .await
            .unwrap();

        assert!(matches!(outcome, ApplyOutcome::Applied(_)));
        assert!(store.get_applied_reservation(&reservation.id).await.unwrap().is_some());
        assert_eq!(device(&store, "dev-1").await.status, DeviceStatus::Locked);
    }
}
