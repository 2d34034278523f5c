pub mod keyed_lock;

pub use keyed_lock::{KeyedLock, KeyedLockGuard};

/// 设备池写入互斥：分配轮次、健康检查轮次与管理接口的设备改写互不交错
pub type PoolLock = std::sync::Arc<tokio::sync::Mutex<()>>;

pub fn pool_lock() -> PoolLock {
    PoolLock::default()
}
