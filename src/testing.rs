//! 单元测试共用的替身实现

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{Device, DeviceType};
use crate::session::SessionManager;
use crate::store::MemoryStore;

/// 可编排的会话管理器
#[derive(Default)]
pub struct FakeSessions {
    failing: Mutex<HashSet<String>>,
    stuck: Mutex<HashSet<String>>,
    running: Mutex<HashSet<String>>,
    started: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
}

impl FakeSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让指定设备的会话启动失败
    pub fn fail_start_for(&self, device_id: &str) {
        self.failing.lock().unwrap().insert(device_id.to_string());
    }

    /// 让指定设备的会话停止返回 false
    pub fn fail_stop_for(&self, device_id: &str) {
        self.stuck.lock().unwrap().insert(device_id.to_string());
    }

    pub fn restore_stop_for(&self, device_id: &str) {
        self.stuck.lock().unwrap().remove(device_id);
    }

    pub fn is_running(&self, device_id: &str) -> bool {
        self.running.lock().unwrap().contains(device_id)
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionManager for FakeSessions {
    async fn start_session(&self, device_id: &str) -> Result<String> {
        self.started.lock().unwrap().push(device_id.to_string());
        if self.failing.lock().unwrap().contains(device_id) {
            return Err(AppError::Session(format!("会话启动失败: {}", device_id)));
        }
        self.running.lock().unwrap().insert(device_id.to_string());
        Ok(format!("http://127.0.0.1:4723/{}/wd/hub", device_id))
    }

    async fn stop_session(&self, device_id: &str) -> Result<bool> {
        self.stopped.lock().unwrap().push(device_id.to_string());
        if self.stuck.lock().unwrap().contains(device_id) {
            return Ok(false);
        }
        self.running.lock().unwrap().remove(device_id);
        Ok(true)
    }
}

pub fn android(id: &str) -> Device {
    Device::new(id, format!("Android {}", id), DeviceType::Android).online()
}

pub fn ios(id: &str) -> Device {
    Device::new(id, format!("iPhone {}", id), DeviceType::Ios).online()
}

pub fn store_with(devices: Vec<Device>) -> MemoryStore {
    MemoryStore::with_devices(devices)
}
