//! Mock 硬件（无硬件依赖，用于测试）
//!
//! 每个 mock 都是共享内部状态的句柄：一份交给被测代码，
//! 克隆出的另一份留在测试中用于注入数据和检查结果。

use crate::{
    AnalogInput, BusDevice, DeviceConfig, DigitalInput, HalError, OutputPin, SerialRx, SerialTx, SplittableLink,
};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::time::Duration;

// ============================================================================
// 链路
// ============================================================================

#[derive(Debug, Default)]
struct LinkShared {
    to_robot: VecDeque<u8>,
    from_robot: Vec<u8>,
    max_chunk: Option<usize>,
    fail_reads: bool,
    fail_writes: bool,
}

/// 机器人侧的内存链路
#[derive(Debug, Clone)]
pub struct MockLink {
    shared: Arc<Mutex<LinkShared>>,
}

/// 控制台侧的句柄
#[derive(Debug, Clone)]
pub struct ConsoleEnd {
    shared: Arc<Mutex<LinkShared>>,
}

impl MockLink {
    /// 创建一对相连的链路端点
    pub fn pair() -> (MockLink, ConsoleEnd) {
        let shared = Arc::new(Mutex::new(LinkShared::default()));
        (
            MockLink {
                shared: shared.clone(),
            },
            ConsoleEnd { shared },
        )
    }
}

impl SerialRx for MockLink {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, HalError> {
        let mut shared = self.shared.lock();
        if shared.fail_reads {
            return Err(HalError::Device("injected read failure".to_string()));
        }
        let limit = shared.max_chunk.unwrap_or(usize::MAX);
        let n = buf.len().min(shared.to_robot.len()).min(limit);
        for (slot, byte) in buf.iter_mut().zip(shared.to_robot.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl SerialTx for MockLink {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), HalError> {
        let mut shared = self.shared.lock();
        if shared.fail_writes {
            return Err(HalError::Closed);
        }
        shared.from_robot.extend_from_slice(bytes);
        Ok(())
    }
}

impl SplittableLink for MockLink {
    type Rx = MockLink;
    type Tx = MockLink;

    fn split(self) -> Result<(MockLink, MockLink), HalError> {
        Ok((self.clone(), self))
    }
}

impl ConsoleEnd {
    /// 向机器人发送字节
    pub fn send(&self, bytes: &[u8]) {
        self.shared.lock().to_robot.extend(bytes.iter().copied());
    }

    /// 取走机器人发出的全部字节
    pub fn take_sent(&self) -> Vec<u8> {
        std::mem::take(&mut self.shared.lock().from_robot)
    }

    /// 尚未被机器人读走的字节数
    pub fn pending_to_robot(&self) -> usize {
        self.shared.lock().to_robot.len()
    }

    /// 限制单次读取的最大字节数（模拟串口分段到达）
    pub fn set_max_chunk(&self, max_chunk: Option<usize>) {
        self.shared.lock().max_chunk = max_chunk;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.shared.lock().fail_reads = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.lock().fail_writes = fail;
    }
}

// ============================================================================
// 总线
// ============================================================================

/// 总线上发生的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Configure(DeviceConfig),
    Write { address: u16, bytes: Vec<u8> },
}

#[derive(Debug, Default)]
struct BusShared {
    events: Vec<BusEvent>,
    current: Option<DeviceConfig>,
    nack: HashSet<u16>,
    write_delay: Duration,
}

/// 记录所有配置和写入的 mock 总线
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    shared: Arc<Mutex<BusShared>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部事件（按发生顺序）
    pub fn events(&self) -> Vec<BusEvent> {
        self.shared.lock().events.clone()
    }

    /// 写入某地址的全部数据
    pub fn writes_to(&self, address: u16) -> Vec<Vec<u8>> {
        self.shared
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                BusEvent::Write { address: a, bytes } if *a == address => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_write_to(&self, address: u16) -> Option<Vec<u8>> {
        self.writes_to(address).pop()
    }

    pub fn clear(&self) {
        self.shared.lock().events.clear();
    }

    /// 让某地址的写入返回 NACK
    pub fn set_nack(&self, address: u16, nack: bool) {
        let mut shared = self.shared.lock();
        if nack {
            shared.nack.insert(address);
        } else {
            shared.nack.remove(&address);
        }
    }

    /// 每次写入前的延迟（在内部锁之外等待）
    pub fn set_write_delay(&self, delay: Duration) {
        self.shared.lock().write_delay = delay;
    }
}

impl BusDevice for MockBus {
    fn configure(&mut self, config: DeviceConfig) -> Result<(), HalError> {
        let mut shared = self.shared.lock();
        shared.current = Some(config);
        shared.events.push(BusEvent::Configure(config));
        Ok(())
    }

    fn write(&mut self, bytes: &[u8], _timeout: Duration) -> Result<(), HalError> {
        let delay = self.shared.lock().write_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut shared = self.shared.lock();
        let Some(config) = shared.current else {
            return Err(HalError::Device("bus not configured".to_string()));
        };
        if shared.nack.contains(&config.address) {
            return Err(HalError::Nack {
                address: config.address,
            });
        }
        shared.events.push(BusEvent::Write {
            address: config.address,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }
}

// ============================================================================
// 引脚
// ============================================================================

/// 记录电平和写入次数的输出引脚
#[derive(Debug, Clone, Default)]
pub struct MockPin {
    state: Arc<AtomicBool>,
    writes: Arc<AtomicU64>,
}

impl MockPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_high(&self) -> bool {
        self.state.load(Ordering::Acquire)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl OutputPin for MockPin {
    fn set_state(&mut self, high: bool) -> Result<(), HalError> {
        self.state.store(high, Ordering::Release);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// 可由测试设置读数的模拟输入
#[derive(Debug, Clone, Default)]
pub struct MockAnalogInput {
    raw: Arc<AtomicU16>,
}

impl MockAnalogInput {
    pub fn new(raw: u16) -> Self {
        Self {
            raw: Arc::new(AtomicU16::new(raw)),
        }
    }

    pub fn set(&self, raw: u16) {
        self.raw.store(raw, Ordering::Release);
    }
}

impl AnalogInput for MockAnalogInput {
    fn read_raw(&mut self) -> Result<u16, HalError> {
        Ok(self.raw.load(Ordering::Acquire))
    }
}

/// 可由测试设置电平的数字输入
#[derive(Debug, Clone, Default)]
pub struct MockDigitalInput {
    high: Arc<AtomicBool>,
}

impl MockDigitalInput {
    pub fn new(high: bool) -> Self {
        Self {
            high: Arc::new(AtomicBool::new(high)),
        }
    }

    pub fn set(&self, high: bool) {
        self.high.store(high, Ordering::Release);
    }
}

impl DigitalInput for MockDigitalInput {
    fn is_high(&mut self) -> Result<bool, HalError> {
        Ok(self.high.load(Ordering::Acquire))
    }
}
