//! 按名称加锁的互斥工具
//!
//! 同一个键同一时刻只有一个持有者，等待超过超时时间则失败

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{AppError, Result};

/// 持有期间键处于锁定状态，drop 时释放
pub struct KeyedLockGuard {
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl KeyedLockGuard {
    #[cfg(test)]
    pub(crate) fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedLockGuard {
    fn drop(&mut self) {
        debug!(key = %self.key, "释放资源锁");
    }
}

/// 键控互斥锁
#[derive(Clone, Default)]
pub struct KeyedLock {
    slots: Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取键对应的锁，最多等待 `timeout`
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<KeyedLockGuard> {
        let slot = self.slot(key)?;

        match tokio::time::timeout(timeout, slot.lock_owned()).await {
            Ok(guard) => {
                debug!(key, "已获取资源锁");
                Ok(KeyedLockGuard {
                    key: key.to_string(),
                    _guard: guard,
                })
            }
            Err(_) => Err(AppError::LockTimeout(format!("{} ({:?})", key, timeout))),
        }
    }

    /// 键当前是否被持有
    #[cfg(test)]
    pub(crate) fn is_locked(&self, key: &str) -> bool {
        self.slots
            .lock()
            .ok()
            .and_then(|slots| slots.get(key).map(|slot| slot.try_lock().is_err()))
            .unwrap_or(false)
    }

    fn slot(&self, key: &str) -> Result<Arc<Mutex<()>>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| AppError::Unknown("资源锁表已损坏".to_string()))?;

        // 清理无人引用的空闲槽位
        slots.retain(|k, slot| k == key || Arc::strong_count(slot) > 1);

        Ok(Arc::clone(
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        ))
    }
}
