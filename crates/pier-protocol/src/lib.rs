//! # PiER Protocol
//!
//! 场地控制台与机器人之间的无线帧协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `frame`: 帧常量、帧类型、对端地址、校验和、帧编码
//! - `decoder`: 可重同步的字节流解帧状态机
//! - `payload`: 上行控制状态 / 下行遥测状态的负载布局与位打包
//!
//! ## 字节序
//!
//! 帧长度字段使用大端字节序（高位在前）。
//! 单字节内的位域（标志位、数字量）统一为 LSB first。

pub mod decoder;
pub mod frame;
pub mod payload;

// 重新导出常用类型
pub use decoder::*;
pub use frame::*;
pub use payload::*;

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid payload length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Identifier tag mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    IdentMismatch { expected: u8, actual: u8 },

    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Invalid frame id: {id} (max {max})")]
    InvalidFrameId { id: u8, max: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: usize },
}
