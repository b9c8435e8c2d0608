//! 帧级定义：常量、帧类型、对端地址、校验和与帧编码
//!
//! 线上帧格式（长度字段为大端）：
//!
//! ```text
//! 上行（控制台 → 机器人，类型 0x80）:
//!   7E | LEN_H LEN_L | 80 | SRC[8] | QUALITY | OPTIONS | PAYLOAD... | CK
//! 下行（机器人 → 控制台）:
//!   7E | LEN_H LEN_L | 00 | FRAME_ID | DEST[8] | 00 | PAYLOAD... | CK
//! ```
//!
//! 两种方向的 `LEN` 都等于 `payload.len() + 11`。
//! `CK = 0xFF - (LEN_H 到负载末尾所有字节之和 mod 256)`。

use crate::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

// ============================================================================
// 协议常量
// ============================================================================

/// 帧起始定界符
pub const START_DELIMITER: u8 = 0x7E;

/// 长度字段中除负载外的固定字节数（类型/保留 + 地址 + 两个单字节字段 + 帧 id）
pub const FRAME_OVERHEAD: usize = 11;

/// 声明长度上限（与接收缓冲区大小一致），超过视为线路噪声
pub const MAX_DECLARED_LEN: usize = 512;

/// 单帧负载上限
pub const MAX_PAYLOAD_LEN: usize = MAX_DECLARED_LEN - FRAME_OVERHEAD;

/// 帧 id 的最大值，之后回绕到 0
pub const FRAME_ID_MAX: u8 = 126;

/// 下行帧中的保留字节
const RESERVED: u8 = 0x00;

// ============================================================================
// 帧类型
// ============================================================================

/// 帧类型字节
///
/// 只有 `Rx64` 携带控制负载；其余类型可识别但会被跳过。
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum FrameType {
    /// 发送请求（下行帧使用的保留字节）
    TxRequest = 0x00,
    /// 带 64 位源地址的数据帧
    Rx64 = 0x80,
    /// 带 16 位源地址的数据帧（不使用）
    Rx16 = 0x81,
    /// 发送状态回报（不使用）
    TxStatus = 0x89,
}

impl FrameType {
    /// 该类型的帧是否携带控制负载
    pub fn carries_control(self) -> bool {
        matches!(self, FrameType::Rx64)
    }
}

// ============================================================================
// 对端地址
// ============================================================================

/// 8 字节无线对端地址
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerAddress(pub [u8; 8]);

impl PeerAddress {
    /// 全零地址（尚未锁定对端时的下行目的地址）
    pub const UNSET: PeerAddress = PeerAddress([0; 8]);

    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl From<[u8; 8]> for PeerAddress {
    fn from(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

// ============================================================================
// 校验和
// ============================================================================

/// 计算校验字节：`0xFF - (sum(bytes) mod 256)`
///
/// `bytes` 应覆盖从长度高字节到负载末尾的全部内容。
pub fn checksum(bytes: &[u8]) -> u8 {
    0xFF - bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

// ============================================================================
// 帧 id 序列
// ============================================================================

/// 下行帧 id 生成器，取值 `0..=126`，之后回绕到 0
#[derive(Debug, Clone, Default)]
pub struct FrameIdSequence {
    next: u8,
}

impl FrameIdSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从指定 id 开始（超出范围返回错误）
    pub fn starting_at(id: u8) -> Result<Self, ProtocolError> {
        if id > FRAME_ID_MAX {
            return Err(ProtocolError::InvalidFrameId {
                id,
                max: FRAME_ID_MAX,
            });
        }
        Ok(Self { next: id })
    }

    /// 返回当前 id 并前进
    pub fn next_id(&mut self) -> u8 {
        let id = self.next;
        self.next = if id >= FRAME_ID_MAX { 0 } else { id + 1 };
        id
    }

    /// 下一次将要使用的 id（不前进）
    pub fn peek(&self) -> u8 {
        self.next
    }
}

// ============================================================================
// 已解出的帧
// ============================================================================

/// 解帧器输出的完整数据帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioFrame {
    pub frame_type: FrameType,
    /// 源地址
    pub source: PeerAddress,
    /// 信号质量字节
    pub quality: u8,
    /// 选项字节
    pub options: u8,
    pub payload: Vec<u8>,
    /// 线上收到的校验字节
    pub checksum: u8,
    /// 根据收到的内容重新计算的校验字节
    pub computed_checksum: u8,
}

impl RadioFrame {
    pub fn checksum_valid(&self) -> bool {
        self.checksum == self.computed_checksum
    }
}

// ============================================================================
// 编码
// ============================================================================

fn check_payload_len(payload: &[u8]) -> Result<u16, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    Ok((payload.len() + FRAME_OVERHEAD) as u16)
}

fn finish(mut buf: BytesMut) -> Bytes {
    let ck = checksum(&buf[1..]);
    buf.put_u8(ck);
    buf.freeze()
}

/// 编码下行帧（机器人 → 控制台）
///
/// # 参数
/// - `dest`: 目的地址（未锁定对端时传 [`PeerAddress::UNSET`]）
/// - `frame_id`: 帧 id，取值 `0..=126`
/// - `payload`: 负载字节
///
/// # 示例
///
/// ```rust
/// use pier_protocol::{encode_frame, PeerAddress};
///
/// let frame = encode_frame(&PeerAddress::UNSET, 3, &[0xFD, 1, 2]).unwrap();
/// assert_eq!(&frame[..5], &[0x7E, 0x00, 14, 0x00, 3]);
/// ```
pub fn encode_frame(dest: &PeerAddress, frame_id: u8, payload: &[u8]) -> Result<Bytes, ProtocolError> {
    if frame_id > FRAME_ID_MAX {
        return Err(ProtocolError::InvalidFrameId {
            id: frame_id,
            max: FRAME_ID_MAX,
        });
    }
    let len = check_payload_len(payload)?;

    let mut buf = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD + 4);
    buf.put_u8(START_DELIMITER);
    buf.put_u16(len);
    buf.put_u8(RESERVED);
    buf.put_u8(frame_id);
    buf.put_slice(dest.as_bytes());
    buf.put_u8(RESERVED);
    buf.put_slice(payload);
    Ok(finish(buf))
}

/// 编码上行数据帧（控制台 → 机器人，类型 `Rx64`）
///
/// 机器人自身不发送此类帧；用于控制台模拟器和测试。
pub fn encode_data_frame(
    source: &PeerAddress,
    quality: u8,
    options: u8,
    payload: &[u8],
) -> Result<Bytes, ProtocolError> {
    let len = check_payload_len(payload)?;

    let mut buf = BytesMut::with_capacity(payload.len() + FRAME_OVERHEAD + 4);
    buf.put_u8(START_DELIMITER);
    buf.put_u16(len);
    buf.put_u8(FrameType::Rx64.into());
    buf.put_slice(source.as_bytes());
    buf.put_u8(quality);
    buf.put_u8(options);
    buf.put_slice(payload);
    Ok(finish(buf))
}
