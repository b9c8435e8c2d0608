//! 安全监督器
//!
//! Supervisor 是唯一决定命令能否到达硬件的地方。每个 tick：
//!
//! 1. 记住上一个 tick 的 `can_move`
//! 2. 从遥测通道复制一份控制快照
//! 3. 心跳检查：超时则强制 `can_move = false`
//! 4. 发布有效快照，驱动队伍指示灯
//! 5. `can_move` 从假变真的那个 tick 上 revive 所有执行器（边沿触发）
//! 6. `can_move` 为真时 write 所有执行器，否则 kill 所有执行器（电平驱动，每个 tick 都执行）
//!
//! 手动/自动任务只修改执行器的期望状态，从不写总线。

use crate::actuator::ActuatorRegistry;
use crate::config::SupervisorConfig;
use crate::error::ControlError;
use crate::metrics::{SupervisorMetrics, SupervisorMetricsSnapshot};
use crate::robot::{MotionGate, RobotCode, TeamIndicator};
use crate::task::{Scheduler, ShutdownHandle, TaskPriority, TaskSpec};
use parking_lot::Mutex;
use pier_driver::{HeartbeatWatchdog, TelemetryChannel};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

/// 本 tick 对执行器做了什么
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actuation {
    Write,
    Kill,
}

/// 单个 tick 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// 经过心跳检查的 can_move
    pub can_move: bool,
    pub heartbeat_expired: bool,
    /// 本 tick 是否为 revive 上升沿
    pub revived: bool,
    pub actuation: Actuation,
    /// write/kill 失败的执行器个数
    pub failures: usize,
}

/// 安全监督器
pub struct Supervisor<R: RobotCode> {
    code: Arc<Mutex<R>>,
    radio: Arc<TelemetryChannel>,
    actuators: ActuatorRegistry,
    indicator: Option<TeamIndicator>,
    watchdog: HeartbeatWatchdog,
    gate: MotionGate,
    config: SupervisorConfig,

    previous_can_move: bool,
    /// 上一个 tick 的心跳状态，启动时视为超时
    was_expired: bool,
    indicator_failing: bool,
    /// 每个执行器上一次 write/kill 是否失败，用于边沿日志
    failing: Vec<bool>,

    metrics: Arc<SupervisorMetrics>,
    shutdown: ShutdownHandle,
}

impl<R: RobotCode> Supervisor<R> {
    /// 接管用户代码
    ///
    /// 执行器注册表在这里复制一份；之后注册的执行器不受监督。
    pub fn new(code: R) -> Self {
        let robot = code.robot();
        let config = robot.config().clone();
        let actuators = robot.actuators().clone();
        let watchdog = HeartbeatWatchdog::new(config.heartbeat_timeout(), robot.clock().clone());
        let radio = robot.radio().clone();
        let indicator = robot.team_indicator().cloned();
        let gate = robot.motion_gate().clone();

        Self {
            radio,
            indicator,
            gate,
            failing: vec![false; actuators.len()],
            actuators,
            watchdog,
            config,
            previous_can_move: false,
            was_expired: true,
            indicator_failing: false,
            metrics: Arc::new(SupervisorMetrics::new()),
            shutdown: ShutdownHandle::new(),
            code: Arc::new(Mutex::new(code)),
        }
    }

    pub fn code(&self) -> &Arc<Mutex<R>> {
        &self.code
    }

    pub fn watchdog(&self) -> &HeartbeatWatchdog {
        &self.watchdog
    }

    pub fn motion_gate(&self) -> &MotionGate {
        &self.gate
    }

    /// 关闭句柄，可交给信号处理器
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn metrics(&self) -> SupervisorMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// 执行一次监督循环
    pub fn tick(&mut self) -> TickReport {
        let previous = self.previous_can_move;

        let mut snapshot = self.radio.snapshot();
        // 本 tick 只读一次时钟
        let now = self.watchdog.now();
        let expired = self.watchdog.is_expired_at(snapshot.last_update, now);
        snapshot.can_move = self
            .watchdog
            .effective_can_move_at(snapshot.can_move, snapshot.last_update, now);
        let can_move = snapshot.can_move;
        let is_blue = snapshot.is_blue;

        if expired != self.was_expired {
            if expired {
                info!("Heartbeat lost (no frame within {:?}), motion disabled", self.watchdog.timeout());
            } else {
                info!("Heartbeat established");
            }
            self.was_expired = expired;
        }

        // 先发布再 revive，执行器的 revive 读到的是本 tick 的许可
        self.gate.publish(snapshot);
        self.show_team(is_blue);

        let revived = !previous && can_move;
        if revived {
            info!("Motion enabled, reviving {} actuators", self.actuators.len());
            self.actuators.revive_all();
            SupervisorMetrics::incr(&self.metrics.revive_edges);
        } else if previous && !can_move {
            info!("Motion disabled");
        }

        let actuation = if can_move { Actuation::Write } else { Actuation::Kill };
        let failures = actuate(&self.actuators, &mut self.failing, actuation);

        self.previous_can_move = can_move;

        SupervisorMetrics::incr(&self.metrics.ticks);
        match actuation {
            Actuation::Write => SupervisorMetrics::incr(&self.metrics.write_passes),
            Actuation::Kill => SupervisorMetrics::incr(&self.metrics.kill_passes),
        }
        if expired {
            SupervisorMetrics::incr(&self.metrics.heartbeat_expired_ticks);
        }
        if failures > 0 {
            self.metrics.actuator_failures.fetch_add(failures as u64, Ordering::Relaxed);
        }

        TickReport {
            can_move,
            heartbeat_expired: expired,
            revived,
            actuation,
            failures,
        }
    }

    fn show_team(&mut self, is_blue: bool) {
        let Some(indicator) = &self.indicator else {
            return;
        };
        match indicator.show(is_blue) {
            Ok(()) => self.indicator_failing = false,
            Err(e) => {
                if !self.indicator_failing {
                    warn!("Failed to drive team indicator: {}", e);
                }
                self.indicator_failing = true;
            },
        }
    }

    /// 启动四个后台任务：手动、自动、接收、遥测
    pub fn spawn_tasks(&self) -> Result<Scheduler, ControlError> {
        let mut scheduler = Scheduler::new(self.shutdown.clone(), self.config.join_timeout());

        let (code, radio) = (self.code.clone(), self.radio.clone());
        scheduler.spawn(TaskSpec::periodic(
            "pier-operator",
            self.config.operator_period(),
            move || {
                let input = radio.snapshot();
                if !input.is_autonomous {
                    code.lock().user_controlled_code(&input);
                }
            },
        ))?;

        let (code, radio) = (self.code.clone(), self.radio.clone());
        scheduler.spawn(
            TaskSpec::continuous("pier-autonomous", move || {
                let input = radio.snapshot();
                if input.is_autonomous {
                    code.lock().autonomous_code(&input);
                }
            })
            .with_priority(TaskPriority::BelowNormal),
        )?;

        let radio = self.radio.clone();
        scheduler.spawn(
            TaskSpec::continuous("pier-poll", move || {
                radio.poll_incoming();
            })
            .with_priority(TaskPriority::AboveNormal),
        )?;

        let radio = self.radio.clone();
        let mut send_failing = false;
        scheduler.spawn(TaskSpec::periodic(
            "pier-telemetry",
            self.config.telemetry_period(),
            move || match radio.send_outgoing() {
                Ok(()) => {
                    if send_failing {
                        info!("Telemetry send recovered");
                    }
                    send_failing = false;
                },
                Err(e) => {
                    if !send_failing {
                        warn!("Telemetry send failed: {}", e);
                    }
                    send_failing = true;
                },
            },
        ))?;

        Ok(scheduler)
    }

    /// 启动后台任务并在当前线程循环 tick，直到关闭句柄被触发
    ///
    /// 退出前 kill 所有执行器一次，再等待后台任务结束。
    pub fn run(mut self) -> Result<(), ControlError> {
        let mut scheduler = self.spawn_tasks()?;
        info!(
            "Supervisor running: {} actuators, heartbeat timeout {:?}",
            self.actuators.len(),
            self.watchdog.timeout()
        );

        while !self.shutdown.is_triggered() {
            self.tick();
            std::thread::yield_now();
        }

        info!("Shutdown requested, stopping all actuators");
        let failures = self.actuators.kill_all();
        if failures > 0 {
            warn!("{} actuators failed to stop cleanly", failures);
        }

        let stuck = scheduler.join();
        if stuck > 0 {
            warn!("{} tasks did not exit in time", stuck);
        }
        for (name, stats) in scheduler.stats() {
            debug!("Task {}: {:?}", name, stats);
        }
        info!("Supervisor stopped: {:?}", self.metrics.snapshot());
        Ok(())
    }
}

/// 对每个执行器执行 write 或 kill，返回失败个数
///
/// 失败只在从成功转为失败时 `warn!`，持续失败降为 `debug!`。
fn actuate(actuators: &ActuatorRegistry, failing: &mut [bool], actuation: Actuation) -> usize {
    let mut failures = 0;
    for (actuator, was_failing) in actuators.iter().zip(failing.iter_mut()) {
        let result = match actuation {
            Actuation::Write => actuator.write(),
            Actuation::Kill => actuator.kill(),
        };
        match result {
            Ok(()) => {
                if *was_failing {
                    info!("Actuator {} recovered", actuator.name());
                }
                *was_failing = false;
            },
            Err(e) => {
                if *was_failing {
                    debug!("Actuator {} {:?} still failing: {}", actuator.name(), actuation, e);
                } else {
                    warn!("Actuator {} {:?} failed: {}", actuator.name(), actuation, e);
                }
                *was_failing = true;
                failures += 1;
            },
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::Actuator;
    use crate::actuator::testing::{Call, RecordingActuator};
    use crate::robot::Robot;
    use crate::robot::testing::test_robot;
    use pier_driver::ControlSnapshot;
    use pier_hal::mock::ConsoleEnd;
    use pier_protocol::{IncomingControlState, PayloadLayout, PeerAddress, encode_data_frame};
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    const CONSOLE: PeerAddress = PeerAddress::new([0, 0x13, 0xA2, 0, 0x40, 0x0A, 0x01, 0x02]);

    struct TestCode {
        robot: Robot,
    }

    impl RobotCode for TestCode {
        fn robot(&self) -> &Robot {
            &self.robot
        }

        fn user_controlled_code(&mut self, _input: &ControlSnapshot) {}

        fn autonomous_code(&mut self, _input: &ControlSnapshot) {}
    }

    /// 按运行模式计数的用户代码
    struct CountingCode {
        robot: Robot,
        operator: Arc<AtomicUsize>,
        autonomous: Arc<AtomicUsize>,
    }

    impl RobotCode for CountingCode {
        fn robot(&self) -> &Robot {
            &self.robot
        }

        fn user_controlled_code(&mut self, _input: &ControlSnapshot) {
            self.operator.fetch_add(1, Ordering::SeqCst);
        }

        fn autonomous_code(&mut self, _input: &ControlSnapshot) {
            self.autonomous.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    fn send_control(console: &ConsoleEnd, can_move: bool, is_blue: bool) {
        send_state(console, can_move, false, is_blue);
    }

    fn send_state(console: &ConsoleEnd, can_move: bool, is_autonomous: bool, is_blue: bool) {
        let mut state = IncomingControlState::disabled(&PayloadLayout::INCOMING);
        state.can_move = can_move;
        state.is_autonomous = is_autonomous;
        state.is_blue = is_blue;
        let payload = state.encode(&PayloadLayout::INCOMING).unwrap();
        console.send(&encode_data_frame(&CONSOLE, 0x28, 0, &payload).unwrap());
    }

    fn setup() -> (
        Supervisor<TestCode>,
        Arc<RecordingActuator>,
        ConsoleEnd,
        Arc<pier_driver::ManualClock>,
    ) {
        let (mut robot, console, _bus, clock) = test_robot();
        let actuator = RecordingActuator::new("drive");
        robot.register_actuator(actuator.clone());
        let supervisor = Supervisor::new(TestCode { robot });
        (supervisor, actuator, console, clock)
    }

    #[test]
    fn test_no_link_kills_every_tick() {
        let (mut supervisor, actuator, _console, _clock) = setup();
        for _ in 0..3 {
            let report = supervisor.tick();
            assert!(!report.can_move);
            assert!(report.heartbeat_expired);
            assert_eq!(report.actuation, Actuation::Kill);
        }
        assert_eq!(actuator.calls(), vec![Call::Kill; 3]);
    }

    #[test]
    fn test_revive_fires_only_on_rising_edge() {
        let (mut supervisor, actuator, console, _clock) = setup();
        supervisor.tick();
        actuator.clear();

        send_control(&console, true, false);
        supervisor.radio.poll_incoming();

        let first = supervisor.tick();
        assert!(first.revived);
        let second = supervisor.tick();
        assert!(!second.revived);

        assert_eq!(actuator.calls(), vec![Call::Revive, Call::Write, Call::Write]);
        assert_eq!(supervisor.metrics().revive_edges, 1);
    }

    #[test]
    fn test_gate_is_published_before_revive() {
        let (mut supervisor, _actuator, console, _clock) = setup();
        send_control(&console, true, false);
        supervisor.radio.poll_incoming();

        assert!(!supervisor.motion_gate().can_move());
        supervisor.tick();
        assert!(supervisor.motion_gate().can_move());
    }

    #[test]
    fn test_heartbeat_expiry_overrides_field_value() {
        let (mut supervisor, actuator, console, clock) = setup();
        send_control(&console, true, false);
        supervisor.radio.poll_incoming();

        assert!(supervisor.tick().can_move);

        clock.advance(Duration::from_millis(2100));
        let report = supervisor.tick();
        assert!(!report.can_move);
        assert!(report.heartbeat_expired);
        assert_eq!(report.actuation, Actuation::Kill);
        assert!(!actuator.is_live());
        // 原始快照中 can_move 仍为真
        assert!(supervisor.radio.snapshot().can_move);
    }

    #[test]
    fn test_fresh_frame_passes_field_value_through() {
        let (mut supervisor, _actuator, console, clock) = setup();
        send_control(&console, false, false);
        supervisor.radio.poll_incoming();
        clock.advance(Duration::from_millis(1999));

        let report = supervisor.tick();
        assert!(!report.heartbeat_expired);
        assert!(!report.can_move);
    }

    #[test]
    fn test_report_is_consistent_at_heartbeat_boundary() {
        let (mut supervisor, _actuator, console, clock) = setup();
        send_control(&console, true, false);
        supervisor.radio.poll_incoming();

        clock.advance(supervisor.watchdog().timeout());
        let report = supervisor.tick();
        assert!(!report.heartbeat_expired);
        assert!(report.can_move);
        assert_eq!(report.actuation, Actuation::Write);

        clock.advance(Duration::from_micros(1));
        let report = supervisor.tick();
        assert!(report.heartbeat_expired);
        assert!(!report.can_move);
        assert_eq!(report.actuation, Actuation::Kill);
    }

    #[test]
    fn test_tasks_route_user_code_by_mode() {
        let (robot, console, _bus, _clock) = test_robot();
        let operator = Arc::new(AtomicUsize::new(0));
        let autonomous = Arc::new(AtomicUsize::new(0));
        let supervisor = Supervisor::new(CountingCode {
            robot,
            operator: operator.clone(),
            autonomous: autonomous.clone(),
        });
        let mut scheduler = supervisor.spawn_tasks().unwrap();
        let settle = supervisor.config.operator_period() * 3;

        // 手动模式：只有手动代码运行
        send_state(&console, true, false, false);
        assert!(wait_until(Duration::from_secs(2), || operator.load(Ordering::SeqCst) > 0));
        assert_eq!(autonomous.load(Ordering::SeqCst), 0);

        // 切到自动：手动代码最多再完成一次已在途的调用
        send_state(&console, true, true, false);
        assert!(wait_until(Duration::from_secs(2), || autonomous.load(Ordering::SeqCst) > 0));
        let operator_at_switch = operator.load(Ordering::SeqCst);
        std::thread::sleep(settle);
        assert!(operator.load(Ordering::SeqCst) <= operator_at_switch + 1);

        // 切回手动：自动代码停止
        send_state(&console, true, false, false);
        let resumed = operator.load(Ordering::SeqCst);
        assert!(wait_until(Duration::from_secs(2), || operator.load(Ordering::SeqCst) > resumed + 1));
        let autonomous_at_switch = autonomous.load(Ordering::SeqCst);
        std::thread::sleep(settle);
        assert!(autonomous.load(Ordering::SeqCst) <= autonomous_at_switch + 1);

        assert_eq!(scheduler.join(), 0);
    }

    #[test]
    fn test_failures_are_counted_and_ticking_continues() {
        let (mut supervisor, actuator, console, _clock) = setup();
        send_control(&console, true, false);
        supervisor.radio.poll_incoming();
        actuator.fail_writes.store(true, Ordering::Relaxed);

        for _ in 0..3 {
            assert_eq!(supervisor.tick().failures, 1);
        }
        assert_eq!(supervisor.metrics().actuator_failures, 3);

        actuator.fail_writes.store(false, Ordering::Relaxed);
        assert_eq!(supervisor.tick().failures, 0);
        assert_eq!(supervisor.metrics().write_passes, 4);
    }

    #[test]
    fn test_late_registration_is_not_supervised() {
        let (mut robot, _console, _bus, _clock) = test_robot();
        let early = RecordingActuator::new("early");
        robot.register_actuator(early.clone());
        let mut supervisor = Supervisor::new(TestCode { robot });

        let late = RecordingActuator::new("late");
        supervisor.code().lock().robot.register_actuator(late.clone());

        supervisor.tick();
        assert_eq!(early.count(Call::Kill), 1);
        assert!(late.calls().is_empty());
    }

    #[test]
    fn test_run_stops_on_shutdown_and_kills() {
        let (supervisor, actuator, _console, _clock) = setup();
        let shutdown = supervisor.shutdown_handle();

        let runner = std::thread::spawn(move || supervisor.run());
        std::thread::sleep(Duration::from_millis(20));
        shutdown.trigger();

        runner.join().unwrap().unwrap();
        assert!(actuator.count(Call::Kill) >= 1);
        assert!(!actuator.is_live());
    }
}
