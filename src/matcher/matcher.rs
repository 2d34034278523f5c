//! 设备匹配实现
//!
//! 纯函数：根据请求约束在设备快照中挑选设备，不检查可用性，也不加锁

use rand::seq::IndexedRandom;
use regex::Regex;
use tracing::{debug, warn};

use crate::models::{Device, DeviceProperty, DeviceType, RequestedDevice};

/// 在设备池快照中查找匹配的设备
///
/// 依次尝试 id、类型、名称、属性，命中第一个非空的判别条件后即返回。
/// 按 id 请求时直接返回该设备，即使它当前不可用。
pub fn find_matching_device(requested: &RequestedDevice, pool: &[Device]) -> Option<Device> {
    if let Some(device_id) = &requested.device_id {
        return pool.iter().find(|d| &d.id == device_id).cloned();
    }

    if requested.device_type != DeviceType::Unspecified {
        let matching: Vec<&Device> = pool
            .iter()
            .filter(|d| d.device_type == requested.device_type)
            .collect();
        return select_random_device(&matching);
    }

    if let Some(name) = requested.device_name.as_deref().filter(|n| !n.is_empty()) {
        let matching: Vec<&Device> = pool.iter().filter(|d| d.name == name).collect();
        return select_random_device(&matching);
    }

    if !requested.properties.is_empty() {
        let matching: Vec<&Device> = pool
            .iter()
            .filter(|d| {
                requested
                    .properties
                    .iter()
                    .all(|wanted| property_matches(wanted, &d.properties))
            })
            .collect();
        debug!("属性匹配到 {} 台设备", matching.len());
        return select_random_device(&matching);
    }

    None
}

/// 设备属性中是否存在满足请求属性的条目
pub fn property_matches(wanted: &DeviceProperty, properties: &[DeviceProperty]) -> bool {
    let mut candidates = properties.iter().filter(|p| p.key == wanted.key);

    if !is_wildcard(&wanted.value) {
        return candidates.any(|p| p.value == wanted.value);
    }

    let regex = match Regex::new(&glob_to_regex(&wanted.value)) {
        Ok(r) => r,
        Err(e) => {
            warn!("通配符转换失败: {} ({})", wanted.value, e);
            return false;
        }
    };

    candidates.any(|p| regex.is_match(&p.value))
}

/// 通配符转正则：`*` → `.*`，`?` → `.`，整串锚定
pub fn glob_to_regex(pattern: &str) -> String {
    let escaped = regex::escape(pattern)
        .replace(r"\?", ".")
        .replace(r"\*", ".*");
    format!("^{}$", escaped)
}

/// 在候选设备中均匀随机选择一台
pub fn select_random_device(devices: &[&Device]) -> Option<Device> {
    devices.choose(&mut rand::rng()).map(|d| (*d).clone())
}

fn is_wildcard(value: &str) -> bool {
    value.contains('*') || value.contains('?')
}
