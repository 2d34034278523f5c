use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::discovery::DeviceDiscovery;
use super::monitor::{DeviceTransition, check_devices_online};
use crate::models::DeviceType;
use crate::reservation::ServiceHandle;
use crate::reservation::service::sleep_or_cancel;
use crate::store::DeviceStore;
use crate::utils::{PoolLock, pool_lock};

/// 周期性健康检查服务
pub struct HealthService {
    store: Arc<dyn DeviceStore>,
    sources: Vec<Arc<dyn DeviceDiscovery>>,
    interval: Duration,
    pool_lock: PoolLock,
}

impl HealthService {
    pub fn new(store: Arc<dyn DeviceStore>, sources: Vec<Arc<dyn DeviceDiscovery>>, interval: Duration) -> Self {
        Self {
            store,
            sources,
            interval,
            pool_lock: pool_lock(),
        }
    }

    /// 与预约调度共用的设备池锁
    pub fn with_pool_lock(mut self, pool_lock: PoolLock) -> Self {
        self.pool_lock = pool_lock;
        self
    }

    /// 对每个发现来源执行一次对账
    ///
    /// 某个来源查询失败时跳过该类型，避免把整类设备误判为离线。
    /// 设备发现在加锁前完成，写入阶段持有设备池锁。
    pub async fn check_once(&self) -> Vec<DeviceTransition> {
        let mut reports: Vec<(DeviceType, HashSet<String>)> = Vec::new();
        for source in &self.sources {
            let device_type = source.device_type();
            match source.reachable_ids().await {
                Ok(ids) => reports.push((device_type, ids.into_iter().collect())),
                Err(e) => warn!("[{}] 设备发现失败，跳过本轮: {}", device_type, e),
            }
        }

        let _pool = self.pool_lock.lock().await;
        let mut all = Vec::new();

        for (device_type, reachable) in reports {
            match check_devices_online(&*self.store, &reachable, device_type).await {
                Ok(transitions) => {
                    if !transitions.is_empty() {
                        info!("[{}] {} 台设备状态变更", device_type, transitions.len());
                    }
                    all.extend(transitions);
                }
                Err(e) => warn!("[{}] 设备对账失败: {}", device_type, e),
            }
        }

        all
    }

    pub async fn run(&self, cancel: CancellationToken) {
        info!("设备健康检查服务已启动，间隔 {:?}", self.interval);
        while !cancel.is_cancelled() {
            self.check_once().await;
            if sleep_or_cancel(&cancel, self.interval).await {
                break;
            }
        }
        info!("设备健康检查服务已停止");
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> ServiceHandle {
        let token = cancel.clone();
        let join = tokio::spawn(async move { self.run(token).await });
        ServiceHandle::new(cancel, join)
    }
}
