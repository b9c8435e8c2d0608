//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use pier_sdk::prelude::*;
//! ```

// 控制层（推荐使用）
pub use pier_control::{
    Actuator, AnalogSensor, DigitalSensor, PolarBear, Robot, RobotBuilder, RobotCode, Sensor, ShutdownHandle,
    Supervisor, SupervisorConfig,
};

// 驱动层
pub use pier_driver::{ChecksumPolicy, ControlSnapshot, PeerPolicy, RadioConfig};

// 硬件抽象层（常用 Trait）
pub use pier_hal::{AnalogInput, BusDevice, DigitalInput, OutputPin, SplittableLink, UdpLink};

// 错误类型
pub use pier_control::ControlError;
pub use pier_driver::DriverError;
pub use pier_hal::HalError;
pub use pier_protocol::ProtocolError;
