//! # PiER Hardware Abstraction Layer
//!
//! 硬件抽象层：无线串口链路、共享总线设备、输出引脚和输入通道的统一接口。

use std::time::Duration;
use thiserror::Error;

pub mod udp;

pub use udp::UdpLink;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// 硬件层统一错误类型
#[derive(Error, Debug)]
pub enum HalError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Bus transaction timeout after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },
    #[error("No acknowledge from device 0x{address:02X}")]
    Nack { address: u16 },
    #[error("Device Error: {0}")]
    Device(String),
    #[error("Link closed")]
    Closed,
}

// ============================================================================
// 无线串口链路
// ============================================================================

/// 链路接收端
pub trait SerialRx {
    /// 非阻塞读取：把当前可用的字节写入 `buf`，返回字节数
    ///
    /// 没有可用数据时立即返回 `Ok(0)`。
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, HalError>;
}

/// 链路发送端
pub trait SerialTx {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), HalError>;
}

/// 可拆分为独立收发两端的链路
///
/// 拆分后接收端和发送端可以分别交给不同线程，互不阻塞。
pub trait SplittableLink {
    type Rx: SerialRx + Send + 'static;
    type Tx: SerialTx + Send + 'static;
    fn split(self) -> Result<(Self::Rx, Self::Tx), HalError>;
}

// ============================================================================
// 共享总线
// ============================================================================

/// 单次事务前应用的设备配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// 设备地址
    pub address: u16,
    /// 时钟频率（kHz）
    pub clock_rate_khz: u32,
}

impl DeviceConfig {
    /// 默认总线时钟
    pub const DEFAULT_CLOCK_KHZ: u32 = 100;

    pub fn new(address: u16) -> Self {
        Self {
            address,
            clock_rate_khz: Self::DEFAULT_CLOCK_KHZ,
        }
    }

    pub fn with_clock(mut self, clock_rate_khz: u32) -> Self {
        self.clock_rate_khz = clock_rate_khz;
        self
    }
}

/// 一次写事务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusTransaction {
    bytes: Vec<u8>,
}

impl BusTransaction {
    pub fn write(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// 共享总线设备
///
/// 不做任何互斥；调用方负责保证同一时刻只有一个批次在执行。
pub trait BusDevice: Send {
    /// 切换到目标设备配置
    fn configure(&mut self, config: DeviceConfig) -> Result<(), HalError>;
    /// 向当前设备写入，`timeout` 是等待应答的上限
    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), HalError>;
}

// ============================================================================
// 引脚
// ============================================================================

pub trait OutputPin: Send {
    fn set_state(&mut self, high: bool) -> Result<(), HalError>;
}

/// 模拟输入（原始读数 0..=1023）
pub trait AnalogInput: Send {
    fn read_raw(&mut self) -> Result<u16, HalError>;
}

pub trait DigitalInput: Send {
    fn is_high(&mut self) -> Result<bool, HalError>;
}

// ============================================================================
// Box 转发
// ============================================================================

impl<T: SerialRx + ?Sized> SerialRx for Box<T> {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, HalError> {
        (**self).read_available(buf)
    }
}

impl<T: SerialTx + ?Sized> SerialTx for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), HalError> {
        (**self).write_all(bytes)
    }
}

impl<T: BusDevice + ?Sized> BusDevice for Box<T> {
    fn configure(&mut self, config: DeviceConfig) -> Result<(), HalError> {
        (**self).configure(config)
    }

    fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<(), HalError> {
        (**self).write(bytes, timeout)
    }
}

impl<T: OutputPin + ?Sized> OutputPin for Box<T> {
    fn set_state(&mut self, high: bool) -> Result<(), HalError> {
        (**self).set_state(high)
    }
}
