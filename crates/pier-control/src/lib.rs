//! # PiER Control
//!
//! 调度与安全核心：任务调度器、Supervisor、Robot 上下文、执行器/传感器注册表，
//! 以及 PolarBear 电机执行器。
//!
//! ```text
//!  PollTask ──► TelemetryChannel ──► Supervisor::tick ──► ActuatorRegistry ──► BusArbiter
//!                     ▲                     │
//!  OperatorTask / AutonomousTask            └──► MotionGate（有效 can_move）
//!  （只修改执行器期望状态）
//! ```
//!
//! # 示例
//!
//! ```rust,ignore
//! use pier_control::{PolarBear, Robot, RobotCode, Supervisor};
//!
//! struct MyCode {
//!     robot: Robot,
//!     left: Arc<PolarBear>,
//! }
//!
//! impl RobotCode for MyCode {
//!     fn robot(&self) -> &Robot { &self.robot }
//!     fn user_controlled_code(&mut self, input: &ControlSnapshot) {
//!         let stick = input.analog(0).unwrap_or(127) as i32;
//!         self.left.set_velocity((stick - 127) * 2);
//!     }
//!     fn autonomous_code(&mut self, _input: &ControlSnapshot) {}
//! }
//!
//! Supervisor::new(code).run()?;
//! ```

pub mod actuator;
pub mod config;
pub mod error;
pub mod metrics;
pub mod motor;
pub mod robot;
pub mod sensor;
pub mod supervisor;
pub mod task;

pub use actuator::{Actuator, ActuatorRegistry};
pub use config::SupervisorConfig;
pub use error::ControlError;
pub use metrics::{SupervisorMetrics, SupervisorMetricsSnapshot};
pub use motor::{DriveMode, MotorCommand, MotorState, PolarBear};
pub use robot::{MotionGate, Robot, RobotBuilder, RobotCode, TeamIndicator};
pub use sensor::{AnalogSensor, DigitalSensor, Sensor, SensorRegistry, SensorValues};
pub use supervisor::{Actuation, Supervisor, TickReport};
pub use task::{Cadence, Scheduler, ShutdownHandle, ShutdownSignal, TaskPriority, TaskSpec, TaskStats, TaskStatsSnapshot};
