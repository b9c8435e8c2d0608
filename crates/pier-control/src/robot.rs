//! 机器人上下文
//!
//! `Robot` 在启动时构造一次，持有遥测通道、总线仲裁器、时钟、
//! 执行器/传感器注册表和队伍指示灯，作为显式上下文传给需要它的组件。

use crate::actuator::{Actuator, ActuatorRegistry};
use crate::config::SupervisorConfig;
use crate::error::ControlError;
use crate::sensor::{Sensor, SensorRegistry};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use pier_driver::{BusArbiter, Clock, ControlSnapshot, MonotonicClock, RadioConfig, TelemetryChannel};
use pier_hal::{BusDevice, HalError, OutputPin, SerialRx, SerialTx, SplittableLink};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// 运动闸门
// ============================================================================

/// Supervisor 每个 tick 发布的有效控制状态
///
/// 其中 `can_move` 已经过心跳检查。执行器的 `revive()` 和用户代码通过它
/// 读取系统级的运动许可，无需加锁。
#[derive(Clone)]
pub struct MotionGate {
    effective: Arc<ArcSwap<ControlSnapshot>>,
}

impl MotionGate {
    pub fn new() -> Self {
        Self {
            effective: Arc::new(ArcSwap::from_pointee(ControlSnapshot::default())),
        }
    }

    /// 有效的运动许可
    pub fn can_move(&self) -> bool {
        self.effective.load().can_move
    }

    pub fn is_autonomous(&self) -> bool {
        self.effective.load().is_autonomous
    }

    /// 最近一次发布的有效状态
    pub fn load(&self) -> Arc<ControlSnapshot> {
        self.effective.load_full()
    }

    pub(crate) fn publish(&self, snapshot: ControlSnapshot) {
        self.effective.store(Arc::new(snapshot));
    }
}

impl Default for MotionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MotionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MotionGate").field("can_move", &self.can_move()).finish()
    }
}

// ============================================================================
// 队伍指示灯
// ============================================================================

struct IndicatorPins {
    blue: Box<dyn OutputPin>,
    gold: Box<dyn OutputPin>,
}

/// 两个互斥的队伍指示输出
#[derive(Clone)]
pub struct TeamIndicator {
    pins: Arc<Mutex<IndicatorPins>>,
}

impl TeamIndicator {
    pub fn new(blue: impl OutputPin + 'static, gold: impl OutputPin + 'static) -> Self {
        Self {
            pins: Arc::new(Mutex::new(IndicatorPins {
                blue: Box::new(blue),
                gold: Box::new(gold),
            })),
        }
    }

    /// 蓝方点亮蓝灯，否则点亮金灯
    pub fn show(&self, is_blue: bool) -> Result<(), HalError> {
        let mut pins = self.pins.lock();
        pins.blue.set_state(is_blue)?;
        pins.gold.set_state(!is_blue)
    }
}

impl fmt::Debug for TeamIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TeamIndicator")
    }
}

// ============================================================================
// 用户代码契约
// ============================================================================

/// 用户控制代码
///
/// 两个回调都不能阻塞或长时间休眠。它们只修改执行器的期望状态，
/// 是否真正写到总线由 Supervisor 决定。
pub trait RobotCode: Send + 'static {
    fn robot(&self) -> &Robot;

    /// 手动控制阶段，按固定周期调用
    fn user_controlled_code(&mut self, input: &ControlSnapshot);

    /// 自动阶段，在循环中持续调用
    fn autonomous_code(&mut self, input: &ControlSnapshot);
}

// ============================================================================
// Robot
// ============================================================================

/// 机器人上下文
pub struct Robot {
    team_id: String,
    radio: Arc<TelemetryChannel>,
    bus: Arc<BusArbiter>,
    clock: Arc<dyn Clock>,
    config: SupervisorConfig,
    actuators: ActuatorRegistry,
    sensors: SensorRegistry,
    indicator: Option<TeamIndicator>,
    gate: MotionGate,
}

impl Robot {
    pub fn builder(team_id: impl Into<String>) -> RobotBuilder {
        RobotBuilder::new(team_id)
    }

    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    pub fn radio(&self) -> &Arc<TelemetryChannel> {
        &self.radio
    }

    pub fn bus(&self) -> &Arc<BusArbiter> {
        &self.bus
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn bus_timeout(&self) -> Duration {
        self.config.bus_timeout()
    }

    pub fn motion_gate(&self) -> &MotionGate {
        &self.gate
    }

    /// 经过心跳检查的运动许可
    pub fn can_move(&self) -> bool {
        self.gate.can_move()
    }

    /// 通道中最近一次提交的原始控制状态
    pub fn field_state(&self) -> ControlSnapshot {
        self.radio.snapshot()
    }

    pub fn team_indicator(&self) -> Option<&TeamIndicator> {
        self.indicator.as_ref()
    }

    pub fn actuators(&self) -> &ActuatorRegistry {
        &self.actuators
    }

    pub fn sensors(&self) -> &SensorRegistry {
        &self.sensors
    }

    /// 注册执行器
    ///
    /// 只在构造 Supervisor 之前生效；Supervisor 构造时复制一份注册表。
    pub fn register_actuator(&mut self, actuator: Arc<dyn Actuator>) {
        self.actuators.register(actuator);
    }

    pub fn register_sensor(&mut self, sensor: Arc<dyn Sensor>) {
        self.sensors.register(sensor);
    }

    /// 刷新全部传感器，返回失败个数
    pub fn update_sensors(&self) -> usize {
        self.sensors.update_all()
    }

    /// 停止全部执行器，返回失败个数
    pub fn kill_actuators(&self) -> usize {
        self.actuators.kill_all()
    }

    pub fn revive_actuators(&self) {
        self.actuators.revive_all();
    }
}

impl fmt::Debug for Robot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Robot")
            .field("team_id", &self.team_id)
            .field("actuators", &self.actuators)
            .field("sensors", &self.sensors)
            .field("gate", &self.gate)
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

type LinkHalves = (Box<dyn SerialRx + Send>, Box<dyn SerialTx + Send>);
type LinkFactory = Box<dyn FnOnce() -> Result<LinkHalves, HalError>>;

/// Robot 构建器
///
/// # 示例
///
/// ```rust,ignore
/// let robot = Robot::builder("team-7")
///     .link(UdpLink::connect("0.0.0.0:9000", "10.0.0.2:9000")?)
///     .bus(my_i2c_bus)
///     .team_indicator(blue_led, gold_led)
///     .build()?;
/// ```
pub struct RobotBuilder {
    team_id: String,
    config: SupervisorConfig,
    radio_config: RadioConfig,
    clock: Option<Arc<dyn Clock>>,
    link: Option<LinkFactory>,
    bus: Option<Box<dyn BusDevice>>,
    indicator: Option<TeamIndicator>,
}

impl RobotBuilder {
    pub fn new(team_id: impl Into<String>) -> Self {
        Self {
            team_id: team_id.into(),
            config: SupervisorConfig::default(),
            radio_config: RadioConfig::default(),
            clock: None,
            link: None,
            bus: None,
            indicator: None,
        }
    }

    /// 无线链路（构建时拆分为收发两端）
    pub fn link<L>(mut self, link: L) -> Self
    where
        L: SplittableLink + 'static,
    {
        self.link = Some(Box::new(move || {
            let (rx, tx) = link.split()?;
            Ok((Box::new(rx) as Box<dyn SerialRx + Send>, Box::new(tx) as Box<dyn SerialTx + Send>))
        }));
        self
    }

    /// 共享总线设备
    pub fn bus(mut self, device: impl BusDevice + 'static) -> Self {
        self.bus = Some(Box::new(device));
        self
    }

    pub fn team_indicator(mut self, blue: impl OutputPin + 'static, gold: impl OutputPin + 'static) -> Self {
        self.indicator = Some(TeamIndicator::new(blue, gold));
        self
    }

    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn radio_config(mut self, config: RadioConfig) -> Self {
        self.radio_config = config;
        self
    }

    /// 替换时钟（测试中使用 `ManualClock`）
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Robot, ControlError> {
        self.config.validate()?;
        let link = self.link.ok_or(ControlError::MissingComponent("radio link"))?;
        let bus = self.bus.ok_or(ControlError::MissingComponent("bus device"))?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock));

        let (rx, tx) = link()?;
        let radio = TelemetryChannel::from_halves(rx, tx, self.radio_config, clock.clone());

        Ok(Robot {
            team_id: self.team_id,
            radio: Arc::new(radio),
            bus: Arc::new(BusArbiter::new(bus)),
            clock,
            config: self.config,
            actuators: ActuatorRegistry::new(),
            sensors: SensorRegistry::default(),
            indicator: self.indicator,
            gate: MotionGate::new(),
        })
    }
}
