//! 设备匹配模块

mod matcher;

pub use matcher::{find_matching_device, glob_to_regex, property_matches, select_random_device};
