//! PolarBear 电机控制器
//!
//! 总线上的单地址电机驱动板。每次提交写一个 3 字节事务：
//!
//! ```text
//! [0x01, mode, magnitude]
//!   mode: 0 = 反转, 1 = 正转, 2 = 制动
//! ```

use crate::actuator::Actuator;
use crate::error::ControlError;
use crate::robot::{MotionGate, Robot};
use num_enum::IntoPrimitive;
use parking_lot::Mutex;
use pier_driver::BusArbiter;
use pier_hal::{BusTransaction, DeviceConfig};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 电机命令子命令字节
pub const MOTOR_SUBCOMMAND: u8 = 0x01;

/// 速度上限（绝对值）
pub const MAX_VELOCITY: i16 = 255;

/// 制动力度上限
pub const MAX_BRAKE: u8 = 255;

/// 驱动模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive)]
#[repr(u8)]
pub enum DriveMode {
    Reverse = 0,
    Forward = 1,
    Brake = 2,
}

/// 一次总线写入的内容
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorCommand {
    pub mode: DriveMode,
    pub magnitude: u8,
}

impl MotorCommand {
    /// 全力制动，停止状态下使用
    pub const FULL_BRAKE: Self = Self {
        mode: DriveMode::Brake,
        magnitude: MAX_BRAKE,
    };

    pub fn to_bytes(self) -> [u8; 3] {
        [MOTOR_SUBCOMMAND, self.mode.into(), self.magnitude]
    }
}

/// 电机的期望状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorState {
    /// 期望速度，`[-255, 255]`
    pub velocity: i16,
    /// 速度为零时的制动力度
    pub brake_amount: u8,
    /// 反转安装方向
    pub reverse: bool,
    pub live: bool,
}

impl Default for MotorState {
    fn default() -> Self {
        Self {
            velocity: 0,
            brake_amount: 0,
            reverse: false,
            live: true,
        }
    }
}

impl MotorState {
    /// 当前状态对应的总线命令
    pub fn command(&self) -> MotorCommand {
        if !self.live {
            return MotorCommand::FULL_BRAKE;
        }
        let actual = if self.reverse { -self.velocity } else { self.velocity };
        match actual {
            v if v > 0 => MotorCommand {
                mode: DriveMode::Forward,
                magnitude: v.unsigned_abs().min(u16::from(MAX_BRAKE)) as u8,
            },
            v if v < 0 => MotorCommand {
                mode: DriveMode::Reverse,
                magnitude: v.unsigned_abs().min(u16::from(MAX_BRAKE)) as u8,
            },
            _ => MotorCommand {
                mode: DriveMode::Brake,
                magnitude: self.brake_amount,
            },
        }
    }
}

/// PolarBear 电机执行器
pub struct PolarBear {
    name: String,
    device: DeviceConfig,
    bus: Arc<BusArbiter>,
    gate: MotionGate,
    timeout: Duration,
    state: Mutex<MotorState>,
}

impl PolarBear {
    /// 创建并注册到机器人的执行器列表，初始为 Live
    pub fn new(robot: &mut Robot, address: u16) -> Arc<Self> {
        let motor = Arc::new(Self {
            name: format!("PolarBear@0x{:02X}", address),
            device: DeviceConfig::new(address).with_clock(robot.config().bus_clock_khz),
            bus: robot.bus().clone(),
            gate: robot.motion_gate().clone(),
            timeout: robot.bus_timeout(),
            state: Mutex::new(MotorState::default()),
        });
        robot.register_actuator(motor.clone());
        motor
    }

    pub fn address(&self) -> u16 {
        self.device.address
    }

    /// 设置期望速度，超出 `[-255, 255]` 时截断
    pub fn set_velocity(&self, velocity: i32) {
        let clamped = velocity.clamp(-i32::from(MAX_VELOCITY), i32::from(MAX_VELOCITY));
        if clamped != velocity {
            warn!("{}: velocity {} out of range, clamped to {}", self.name, velocity, clamped);
        }
        self.state.lock().velocity = clamped as i16;
    }

    /// 设置制动力度，超出 `[0, 255]` 时截断
    pub fn set_brake_amount(&self, amount: i32) {
        let clamped = amount.clamp(0, i32::from(MAX_BRAKE));
        if clamped != amount {
            warn!("{}: brake amount {} out of range, clamped to {}", self.name, amount, clamped);
        }
        self.state.lock().brake_amount = clamped as u8;
    }

    pub fn set_reverse(&self, reverse: bool) {
        self.state.lock().reverse = reverse;
    }

    pub fn velocity(&self) -> i16 {
        self.state.lock().velocity
    }

    pub fn state(&self) -> MotorState {
        *self.state.lock()
    }

    pub fn command(&self) -> MotorCommand {
        self.state.lock().command()
    }

    fn send(&self, command: MotorCommand) -> Result<(), ControlError> {
        let transaction = BusTransaction::write(command.to_bytes());
        self.bus.execute(&[transaction], self.timeout, self.device)?;
        Ok(())
    }
}

impl Actuator for PolarBear {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&self) -> Result<(), ControlError> {
        // 锁只用于复制状态，总线 IO 在锁外进行
        let command = self.command();
        self.send(command)
    }

    fn kill(&self) -> Result<(), ControlError> {
        {
            let mut state = self.state.lock();
            if !state.live {
                return Ok(());
            }
            state.velocity = 0;
            state.live = false;
        }
        debug!("{} killed", self.name);
        self.send(MotorCommand::FULL_BRAKE)
    }

    fn revive(&self) {
        if !self.gate.can_move() {
            return;
        }
        let mut state = self.state.lock();
        if !state.live {
            state.live = true;
            debug!("{} revived", self.name);
        }
    }

    fn is_live(&self) -> bool {
        self.state.lock().live
    }
}

impl fmt::Debug for PolarBear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolarBear")
            .field("device", &self.device)
            .field("state", &self.state())
            .finish()
    }
}
