use std::time::Duration;

/// 存储不可达时的重连等待策略
///
/// 重连没有次数上限，策略只决定两次尝试之间等待多久。
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectBackoff {
    /// 每次都等待配置的重连间隔
    Fixed,

    /// 以重连间隔为起点指数增长，不超过上限
    Exponential { max_delay_ms: u64, multiplier: f64 },
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::Fixed
    }
}

impl ReconnectBackoff {
    /// 创建指数退避策略
    pub fn exponential(max_delay_ms: u64, multiplier: f64) -> Self {
        Self::Exponential {
            max_delay_ms,
            multiplier,
        }
    }

    /// 获取第 `attempt` 次连续失败后的等待时间（从 0 开始）
    pub fn next_delay(&self, base_delay_ms: u64, attempt: u32) -> Duration {
        match self {
            ReconnectBackoff::Fixed => Duration::from_millis(base_delay_ms),
            ReconnectBackoff::Exponential {
                max_delay_ms,
                multiplier,
            } => {
                let exponent = attempt.min(32) as i32;
                let delay = (base_delay_ms as f64 * multiplier.powi(exponent)) as u64;
                let delay = delay.min(*max_delay_ms).max(base_delay_ms.min(*max_delay_ms));
                Duration::from_millis(delay)
            }
        }
    }
}
