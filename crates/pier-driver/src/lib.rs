//! # PiER Driver
//!
//! IO 层：无线遥测通道、共享总线仲裁和心跳看门狗。
//!
//! ## 模块
//!
//! - `radio`: 遥测通道（轮询解帧、提交状态、发送下行遥测）
//! - `bus`: 总线仲裁器
//! - `heartbeat`: 链路丢失检测
//! - `clock`: 单调时钟抽象
//! - `state`: 控制快照
//! - `metrics`: 链路指标

pub mod bus;
pub mod clock;
pub mod error;
pub mod heartbeat;
pub mod metrics;
pub mod radio;
pub mod state;

pub use bus::{BusArbiter, DEFAULT_BUS_TIMEOUT};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::DriverError;
pub use heartbeat::{DEFAULT_HEARTBEAT_TIMEOUT, HeartbeatWatchdog};
pub use metrics::{LinkMetrics, LinkMetricsSnapshot};
pub use radio::{ChecksumPolicy, PeerPolicy, RadioConfig, TelemetryChannel};
pub use state::ControlSnapshot;

#[cfg(feature = "mock")]
pub use pier_hal::mock;
