//! PiER SDK - 教学机器人控制器核心
//!
//! 分层架构，从底层到高层：
//!
//! - **协议层** (`protocol`): 无线帧的解帧/组帧、校验和、负载布局
//! - **硬件抽象层** (`hal`): 串口链路、共享总线、引脚和输入通道的 trait
//! - **驱动层** (`driver`): 遥测通道、总线仲裁器、心跳看门狗
//! - **控制层** (`control`): 任务调度、Supervisor、执行器/传感器、Robot 上下文
//!
//! # 快速开始
//!
//! ```rust,ignore
//! use pier_sdk::prelude::*;
//!
//! pier_sdk::init_logger("pier=info");
//! let mut robot = Robot::builder("team-7")
//!     .link(UdpLink::connect("0.0.0.0:9000", "10.0.0.2:9000")?)
//!     .bus(my_bus)
//!     .build()?;
//! let left = PolarBear::new(&mut robot, 0x0B);
//! Supervisor::new(MyCode { robot, left }).run()?;
//! ```

pub use pier_control as control;
pub use pier_driver as driver;
pub use pier_hal as hal;
pub use pier_protocol as protocol;

pub mod prelude;

// 常用类型
pub use pier_control::{ControlError, PolarBear, Robot, RobotBuilder, RobotCode, Supervisor, SupervisorConfig};
pub use pier_driver::{ControlSnapshot, DriverError, RadioConfig, TelemetryChannel};
pub use pier_hal::{HalError, UdpLink};
pub use pier_protocol::ProtocolError;

use tracing_subscriber::EnvFilter;

/// 安装全局日志订阅器
///
/// `RUST_LOG` 优先；未设置时使用 `default_directive`（例如 `"pier=info"`）。
/// `log` crate 的记录也会转发到 `tracing`。重复调用时保留第一次的设置。
pub fn init_logger(default_directive: &str) {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
