//! Supervisor 配置
//!
//! 所有周期和超时都有默认值；可以从 TOML 字符串覆盖其中一部分。
//!
//! ```toml
//! operator_period_ms = 50
//! heartbeat_timeout_ms = 1500
//! ```

use crate::error::ControlError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Supervisor 与任务调度配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// 手动控制任务周期（毫秒）
    pub operator_period_ms: u64,
    /// 遥测发送任务周期（毫秒）
    pub telemetry_period_ms: u64,
    /// 心跳超时（毫秒），超过后强制禁止运动
    pub heartbeat_timeout_ms: u64,
    /// 单次总线事务等待应答的上限（毫秒）
    pub bus_timeout_ms: u64,
    /// 总线时钟（kHz）
    pub bus_clock_khz: u32,
    /// 关闭时等待每个任务线程退出的上限（毫秒）
    pub join_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            operator_period_ms: 75,
            telemetry_period_ms: 100,
            heartbeat_timeout_ms: 2000,
            bus_timeout_ms: 200,
            bus_clock_khz: 100,
            join_timeout_ms: 500,
        }
    }
}

impl SupervisorConfig {
    /// 从 TOML 字符串解析，缺失的键使用默认值
    pub fn from_toml_str(text: &str) -> Result<Self, ControlError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 周期和超时必须为正
    pub fn validate(&self) -> Result<(), ControlError> {
        let fields = [
            ("operator_period_ms", self.operator_period_ms),
            ("telemetry_period_ms", self.telemetry_period_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("bus_timeout_ms", self.bus_timeout_ms),
            ("bus_clock_khz", u64::from(self.bus_clock_khz)),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(ControlError::InvalidConfig(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn operator_period(&self) -> Duration {
        Duration::from_millis(self.operator_period_ms)
    }

    pub fn telemetry_period(&self) -> Duration {
        Duration::from_millis(self.telemetry_period_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn bus_timeout(&self) -> Duration {
        Duration::from_millis(self.bus_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.operator_period(), Duration::from_millis(75));
        assert_eq!(config.telemetry_period(), Duration::from_millis(100));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(2));
        assert_eq!(config.bus_timeout(), Duration::from_millis(200));
        assert_eq!(config.bus_clock_khz, 100);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SupervisorConfig::from_toml_str("operator_period_ms = 50\nheartbeat_timeout_ms = 1500\n").unwrap();
        assert_eq!(config.operator_period_ms, 50);
        assert_eq!(config.heartbeat_timeout_ms, 1500);
        assert_eq!(config.telemetry_period_ms, 100);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(SupervisorConfig::from_toml_str("").unwrap(), SupervisorConfig::default());
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(matches!(
            SupervisorConfig::from_toml_str("operator_period_ms = \"fast\""),
            Err(ControlError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_zero_period_rejected() {
        assert!(matches!(
            SupervisorConfig::from_toml_str("telemetry_period_ms = 0"),
            Err(ControlError::InvalidConfig(_))
        ));
    }
}
