//! 预约调度服务
//!
//! 单一后台循环：探测存储 → 执行一轮分配 → 等待刷新间隔。
//! 存储不可达时按重连策略无限重试。取消只在等待期间生效，进行中的分配会先完成。

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::allocation::ReservationAllocator;
use super::backoff::ReconnectBackoff;
use crate::models::ReservationApplied;
use crate::session::SessionManager;
use crate::store::Store;
use crate::utils::{PoolLock, pool_lock};

/// 调度间隔来源，每轮读取一次
#[async_trait]
pub trait SchedulerSettings: Send + Sync {
    async fn refresh_interval_ms(&self) -> u64;

    async fn reconnect_interval_ms(&self) -> u64;
}

/// 可在运行时修改的调度间隔
#[derive(Clone)]
pub struct StaticSettings {
    intervals: Arc<RwLock<(u64, u64)>>,
}

impl StaticSettings {
    pub fn new(refresh_interval_ms: u64, reconnect_interval_ms: u64) -> Self {
        Self {
            intervals: Arc::new(RwLock::new((refresh_interval_ms, reconnect_interval_ms))),
        }
    }

    pub async fn set_refresh_interval_ms(&self, value: u64) {
        self.intervals.write().await.0 = value;
    }

    pub async fn set_reconnect_interval_ms(&self, value: u64) {
        self.intervals.write().await.1 = value;
    }
}

#[async_trait]
impl SchedulerSettings for StaticSettings {
    async fn refresh_interval_ms(&self) -> u64 {
        self.intervals.read().await.0
    }

    async fn reconnect_interval_ms(&self) -> u64 {
        self.intervals.read().await.1
    }
}

/// 预约调度服务
pub struct ReservationService {
    store: Arc<dyn Store>,
    allocator: ReservationAllocator,
    settings: Arc<dyn SchedulerSettings>,
    backoff: ReconnectBackoff,
    pool_lock: PoolLock,
}

/// 运行中的调度服务句柄
pub struct ServiceHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl ServiceHandle {
    pub fn new(cancel: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { cancel, join }
    }

    /// 请求停止并等待进行中的一轮结束
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            error!("后台服务退出异常: {:?}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl ReservationService {
    pub fn new(
        store: Arc<dyn Store>,
        sessions: Arc<dyn SessionManager>,
        settings: Arc<dyn SchedulerSettings>,
        backoff: ReconnectBackoff,
    ) -> Self {
        Self {
            allocator: ReservationAllocator::new(Arc::clone(&store), sessions),
            store,
            settings,
            backoff,
            pool_lock: pool_lock(),
        }
    }

    /// 与健康检查共用的设备池锁
    pub fn with_pool_lock(mut self, pool_lock: PoolLock) -> Self {
        self.pool_lock = pool_lock;
        self
    }

    /// 执行一轮分配，错误只记录日志并视为没有生效的预约
    pub async fn sweep(&self) -> Vec<ReservationApplied> {
        let _pool = self.pool_lock.lock().await;
        info!("ApplyAvailableReservations [START]");
        let applied = match self.allocator.apply_available_reservations().await {
            Ok(applied) => applied,
            Err(e) => {
                error!("ApplyAvailableReservations 失败: {}", e);
                Vec::new()
            }
        };
        info!("ApplyAvailableReservations: {} [STOP]", !applied.is_empty());
        applied
    }

    /// 运行调度循环直到被取消
    pub async fn run(&self, cancel: CancellationToken) {
        info!("预约调度服务已启动");
        let mut reconnect_attempt: u32 = 0;

        while !cancel.is_cancelled() {
            let delay = if self.store.try_connect().await {
                reconnect_attempt = 0;
                self.sweep().await;
                Duration::from_millis(self.settings.refresh_interval_ms().await)
            } else {
                let base = self.settings.reconnect_interval_ms().await;
                let delay = self.backoff.next_delay(base, reconnect_attempt);
                reconnect_attempt = reconnect_attempt.saturating_add(1);
                error!(
                    attempt = reconnect_attempt,
                    "无法连接存储，{:?} 后重试",
                    delay
                );
                delay
            };

            if sleep_or_cancel(&cancel, delay).await {
                break;
            }
        }

        info!("预约调度服务已停止");
    }

    /// 在 tokio 上启动调度循环
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> ServiceHandle {
        let token = cancel.clone();
        let join = tokio::spawn(async move { self.run(token).await });
        ServiceHandle::new(cancel, join)
    }
}

/// 等待指定时长，期间被取消时返回 true
pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("等待期间收到取消信号");
            true
        }
        _ = tokio::time::sleep(delay) => false,
    }
}
