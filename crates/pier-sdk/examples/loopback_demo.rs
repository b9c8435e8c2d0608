//! 回环演示
//!
//! 在一台机器上跑完整的控制核心：内存链路代替无线模块，内存总线代替电机驱动板。
//! 控制台线程先以 20 Hz 发送允许运动的控制帧，两秒后停止发送，
//! Supervisor 在心跳超时后强制停止电机。按 Ctrl-C 或等待结束。

use anyhow::Result;
use pier_sdk::hal::mock::{ConsoleEnd, MockBus, MockLink};
use pier_sdk::prelude::*;
use pier_sdk::protocol::{IncomingControlState, PayloadLayout, PeerAddress, encode_data_frame};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const MOTOR_ADDRESS: u16 = 0x0B;
const CONSOLE: PeerAddress = PeerAddress::new([0x00, 0x13, 0xA2, 0x00, 0x40, 0x0A, 0x01, 0x02]);

struct DemoCode {
    robot: Robot,
    drive: Arc<PolarBear>,
}

impl RobotCode for DemoCode {
    fn robot(&self) -> &Robot {
        &self.robot
    }

    fn user_controlled_code(&mut self, input: &ControlSnapshot) {
        // 摇杆 0..=255，中位 127
        let stick = i32::from(input.analog(0).unwrap_or(127));
        self.drive.set_velocity((stick - 127) * 2);
    }

    fn autonomous_code(&mut self, _input: &ControlSnapshot) {
        self.drive.set_velocity(0);
        thread::sleep(Duration::from_millis(5));
    }
}

fn control_frame(can_move: bool, stick: u8) -> Result<Vec<u8>> {
    let mut state = IncomingControlState::disabled(&PayloadLayout::INCOMING);
    state.can_move = can_move;
    state.is_blue = true;
    state.analog[0] = stick;
    let payload = state.encode(&PayloadLayout::INCOMING)?;
    Ok(encode_data_frame(&CONSOLE, 0x28, 0, &payload)?.to_vec())
}

fn run_console(console: ConsoleEnd, bus: MockBus, shutdown: ShutdownHandle) -> Result<()> {
    let started = Instant::now();
    let mut stick: u8 = 127;

    while !shutdown.is_triggered() {
        let elapsed = started.elapsed();
        if elapsed < Duration::from_secs(2) {
            stick = stick.wrapping_add(8);
            console.send(&control_frame(true, stick)?);
        } else if elapsed > Duration::from_secs(5) {
            break;
        }

        let telemetry = console.take_sent();
        if !telemetry.is_empty() {
            println!("📡 收到遥测 {} 字节", telemetry.len());
        }
        if let Some(command) = bus.last_write_to(MOTOR_ADDRESS) {
            println!("⚙️  t={:>5} ms 电机命令 {:02X?}", elapsed.as_millis(), command);
        }
        thread::sleep(Duration::from_millis(50));
    }

    shutdown.trigger();
    Ok(())
}

fn main() -> Result<()> {
    pier_sdk::init_logger("pier=info");

    println!("🤖 PiER 回环演示");
    println!("=========================\n");

    let (link, console) = MockLink::pair();
    let bus = MockBus::new();

    let mut robot = Robot::builder("demo").link(link).bus(bus.clone()).build()?;
    let drive = PolarBear::new(&mut robot, MOTOR_ADDRESS);

    let supervisor = Supervisor::new(DemoCode { robot, drive });
    let shutdown = supervisor.shutdown_handle();

    let ctrlc_shutdown = shutdown.clone();
    ctrlc::set_handler(move || {
        println!("\n🛑 收到 Ctrl-C，正在停止...");
        ctrlc_shutdown.trigger();
    })?;

    let console_thread = thread::spawn(move || run_console(console, bus, shutdown));

    supervisor.run()?;

    match console_thread.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("console thread panicked"),
    }

    println!("\n✅ 演示结束");
    Ok(())
}
