//! 设备发现
//!
//! 提供当前物理可达的设备标识，Android 走 ADB 服务，iOS 走 libimobiledevice

use adb_client::server::ADBServer;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::DeviceType;

/// 设备发现接口
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// 本来源负责的设备类型
    fn device_type(&self) -> DeviceType;

    /// 当前可达的设备标识
    async fn reachable_ids(&self) -> Result<Vec<String>>;
}

/// 通过 ADB 服务发现 Android 设备
#[derive(Debug, Default, Clone)]
pub struct AdbDiscovery;

impl AdbDiscovery {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeviceDiscovery for AdbDiscovery {
    fn device_type(&self) -> DeviceType {
        DeviceType::Android
    }

    async fn reachable_ids(&self) -> Result<Vec<String>> {
        // adb_client 为同步接口
        let devices = tokio::task::spawn_blocking(|| {
            let mut adb_server = ADBServer::default();
            adb_server.devices()
        })
        .await
        .map_err(|e| AppError::Unknown(format!("ADB 查询任务异常: {}", e)))?
        .map_err(|e| AppError::Unknown(format!("获取 ADB 设备列表失败: {:?}", e)))?;

        let ids = devices
            .iter()
            .filter_map(|device| {
                let state = device.state.to_string();
                debug!("ADB 设备: {} - 状态: {}", device.identifier, state);
                is_adb_ready(&state).then(|| device.identifier.clone())
            })
            .collect();

        Ok(ids)
    }
}

/// 只有 `device` 状态视为可用（排除 offline / unauthorized 等）
fn is_adb_ready(state: &str) -> bool {
    state.trim().eq_ignore_ascii_case("device")
}

/// 通过 `idevice_id -l` 发现 iOS 设备
#[derive(Debug, Clone)]
pub struct IdeviceDiscovery {
    program: String,
}

impl Default for IdeviceDiscovery {
    fn default() -> Self {
        Self {
            program: "idevice_id".to_string(),
        }
    }
}

impl IdeviceDiscovery {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DeviceDiscovery for IdeviceDiscovery {
    fn device_type(&self) -> DeviceType {
        DeviceType::Ios
    }

    async fn reachable_ids(&self) -> Result<Vec<String>> {
        let output = tokio::process::Command::new(&self.program)
            .arg("-l")
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("{} 执行失败: {}", self.program, stderr.trim());
            return Err(AppError::Unknown(format!("{} 退出码 {}", self.program, output.status)));
        }

        Ok(parse_idevice_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn parse_idevice_output(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        // 新版本输出形如 "<udid> (USB)"
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adb_state_filter() {
        assert!(is_adb_ready("device"));
        assert!(is_adb_ready("Device"));
        assert!(!is_adb_ready("offline"));
        assert!(!is_adb_ready("unauthorized"));
    }

    #[test]
    fn test_parse_idevice_output() {
        let stdout = "00008030-001A2C3E0C38802E (USB)\n\n 9b2e4c1f7a8d3e6b5c4a1f2e3d4c5b6a7f8e9d0c \n";
        assert_eq!(
            parse_idevice_output(stdout),
            vec![
                "00008030-001A2C3E0C38802E".to_string(),
                "9b2e4c1f7a8d3e6b5c4a1f2e3d4c5b6a7f8e9d0c".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_idevice_binary() {
        let discovery = IdeviceDiscovery::new("definitely-not-a-real-idevice-binary");
        assert!(discovery.reachable_ids().await.is_err());
    }
}
