//! 控制层错误类型定义

use pier_driver::DriverError;
use pier_hal::HalError;
use thiserror::Error;

/// 控制层错误类型
#[derive(Error, Debug)]
pub enum ControlError {
    /// 驱动层错误（总线、链路、协议）
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// 硬件层错误（引脚、传感器输入、链路拆分）
    #[error("HAL error: {0}")]
    Hal(#[from] HalError),

    /// 配置解析失败
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// 配置值非法
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// 构建 Robot 时缺少必需组件
    #[error("Missing component: {0}")]
    MissingComponent(&'static str),

    /// 任务线程启动失败
    #[error("Failed to spawn task {name}: {source}")]
    TaskSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
