//! 驱动层错误类型定义

use pier_hal::HalError;
use pier_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// 硬件层错误
    #[error("HAL error: {0}")]
    Hal(#[from] HalError),

    /// 协议编解码错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 总线批次中的某个事务失败，后续事务未执行
    #[error("Bus transaction {index} to device 0x{address:02X} failed: {source}")]
    Bus {
        address: u16,
        index: usize,
        #[source]
        source: HalError,
    },

    /// 无效输入（如空事务批次）
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
