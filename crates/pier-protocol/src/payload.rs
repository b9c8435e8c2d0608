//! 负载布局：上行控制状态与下行遥测状态
//!
//! ```text
//! 上行: [0]=标识 0xFE | [1]=场地时间 | [2]=标志位 | [3..4]=保留 | 模拟量[A] | 数字量[D]
//! 下行: [0]=标识 0xFD | 模拟量[A] | 数字量[D]
//! ```
//!
//! 数字量按 LSB first 打包：每个字节的 Bit 0 是该组的第一个布尔值。

use crate::ProtocolError;
use bilge::prelude::*;
use smallvec::SmallVec;

/// 上行负载标识
pub const INCOMING_IDENT: u8 = 0xFE;
/// 下行负载标识
pub const OUTGOING_IDENT: u8 = 0xFD;
/// 默认模拟量个数
pub const DEFAULT_ANALOG_COUNT: usize = 7;
/// 默认数字量字节数（8 个布尔值）
pub const DEFAULT_DIGITAL_BYTES: usize = 1;

/// 上行负载中模拟量之前的字节数（标识、场地时间、标志位、2 字节保留）
const INCOMING_HEADER_LEN: usize = 5;

/// 模拟量序列（默认 7 个，栈上存储）
pub type AnalogValues = SmallVec<[u8; 8]>;
/// 数字量序列（默认 8 个，栈上存储）
pub type DigitalValues = SmallVec<[bool; 16]>;

// ============================================================================
// 布局
// ============================================================================

/// 一个方向上的负载布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PayloadLayout {
    /// 负载标识字节
    pub ident: u8,
    /// 模拟量字节数
    pub analog_count: usize,
    /// 数字量字节数（每字节 8 个布尔值）
    pub digital_bytes: usize,
}

impl PayloadLayout {
    pub const INCOMING: PayloadLayout = PayloadLayout {
        ident: INCOMING_IDENT,
        analog_count: DEFAULT_ANALOG_COUNT,
        digital_bytes: DEFAULT_DIGITAL_BYTES,
    };

    pub const OUTGOING: PayloadLayout = PayloadLayout {
        ident: OUTGOING_IDENT,
        analog_count: DEFAULT_ANALOG_COUNT,
        digital_bytes: DEFAULT_DIGITAL_BYTES,
    };

    /// 数字量布尔值个数
    pub fn digital_count(&self) -> usize {
        self.digital_bytes * 8
    }

    /// 上行负载长度
    pub fn incoming_len(&self) -> usize {
        INCOMING_HEADER_LEN + self.analog_count + self.digital_bytes
    }

    /// 下行负载长度
    pub fn outgoing_len(&self) -> usize {
        1 + self.analog_count + self.digital_bytes
    }
}

// ============================================================================
// 位打包
// ============================================================================

/// 把布尔序列按 LSB first 打包为 `ceil(N/8)` 字节
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// 从字节中按 LSB first 解出 `count` 个布尔值
///
/// `count` 超出 `bytes.len() * 8` 的部分补 `false`。
pub fn unpack_bits(bytes: &[u8], count: usize) -> DigitalValues {
    (0..count)
        .map(|i| bytes.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0))
        .collect()
}

// ============================================================================
// 上行控制状态
// ============================================================================

/// 控制标志位（上行负载 Byte 2）
///
/// - Bit 0: 允许运动
/// - Bit 1: 自动模式
/// - Bit 2: 蓝方
/// - Bit 3-7: 保留
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct ControlFlags {
    pub can_move: bool,      // Bit 0
    pub is_autonomous: bool, // Bit 1
    pub is_blue: bool,       // Bit 2
    pub reserved: u5,        // Bit 3-7: 保留
}

/// 控制台发来的控制状态
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IncomingControlState {
    /// 负载标识
    pub ident: u8,
    /// 场地时间（秒）
    pub field_time: u8,
    pub can_move: bool,
    pub is_autonomous: bool,
    pub is_blue: bool,
    pub analog: AnalogValues,
    pub digital: DigitalValues,
}

impl IncomingControlState {
    /// 按布局生成全零、禁止运动的状态
    pub fn disabled(layout: &PayloadLayout) -> Self {
        Self {
            ident: layout.ident,
            field_time: 0,
            can_move: false,
            is_autonomous: false,
            is_blue: false,
            analog: SmallVec::from_elem(0, layout.analog_count),
            digital: SmallVec::from_elem(false, layout.digital_count()),
        }
    }

    /// 解析上行负载
    ///
    /// 标识不匹配或长度不足时返回错误，调用方应保留旧状态。
    /// 超出布局长度的尾部字节被忽略。
    pub fn decode(payload: &[u8], layout: &PayloadLayout) -> Result<Self, ProtocolError> {
        let expected = layout.incoming_len();
        let Some(&ident) = payload.first() else {
            return Err(ProtocolError::InvalidLength {
                expected,
                actual: 0,
            });
        };
        if ident != layout.ident {
            return Err(ProtocolError::IdentMismatch {
                expected: layout.ident,
                actual: ident,
            });
        }
        if payload.len() < expected {
            return Err(ProtocolError::InvalidLength {
                expected,
                actual: payload.len(),
            });
        }

        let flags = ControlFlags::from(u8::new(payload[2]));
        let analog_end = INCOMING_HEADER_LEN + layout.analog_count;
        let digital_end = analog_end + layout.digital_bytes;

        Ok(Self {
            ident,
            field_time: payload[1],
            can_move: flags.can_move(),
            is_autonomous: flags.is_autonomous(),
            is_blue: flags.is_blue(),
            analog: SmallVec::from_slice(&payload[INCOMING_HEADER_LEN..analog_end]),
            digital: unpack_bits(&payload[analog_end..digital_end], layout.digital_count()),
        })
    }

    /// 编码为上行负载（控制台侧使用，保留字节填 0）
    pub fn encode(&self, layout: &PayloadLayout) -> Result<Vec<u8>, ProtocolError> {
        check_counts(&self.analog, &self.digital, layout)?;

        let mut flags = ControlFlags::from(u8::new(0));
        flags.set_can_move(self.can_move);
        flags.set_is_autonomous(self.is_autonomous);
        flags.set_is_blue(self.is_blue);

        let mut payload = Vec::with_capacity(layout.incoming_len());
        payload.extend_from_slice(&[self.ident, self.field_time, u8::from(flags).value(), 0, 0]);
        payload.extend_from_slice(&self.analog);
        payload.extend(pack_bits(&self.digital));
        Ok(payload)
    }
}

fn check_counts(analog: &[u8], digital: &[bool], layout: &PayloadLayout) -> Result<(), ProtocolError> {
    if analog.len() != layout.analog_count {
        return Err(ProtocolError::InvalidLength {
            expected: layout.analog_count,
            actual: analog.len(),
        });
    }
    if digital.len() != layout.digital_count() {
        return Err(ProtocolError::InvalidLength {
            expected: layout.digital_count(),
            actual: digital.len(),
        });
    }
    Ok(())
}

// ============================================================================
// 下行遥测状态
// ============================================================================

/// 回传给控制台显示的遥测状态
///
/// 每次接受新的上行状态时，模拟量和数字量会被覆盖为收到的值；
/// 两次接收之间，用户代码可以自行修改。
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OutgoingTelemetryState {
    pub ident: u8,
    pub analog: AnalogValues,
    pub digital: DigitalValues,
}

impl OutgoingTelemetryState {
    pub fn new(layout: &PayloadLayout) -> Self {
        Self {
            ident: layout.ident,
            analog: SmallVec::from_elem(0, layout.analog_count),
            digital: SmallVec::from_elem(false, layout.digital_count()),
        }
    }

    /// 把上行状态的模拟量和数字量回显到本状态（按重叠长度复制）
    pub fn mirror(&mut self, incoming: &IncomingControlState) {
        for (dst, src) in self.analog.iter_mut().zip(&incoming.analog) {
            *dst = *src;
        }
        for (dst, src) in self.digital.iter_mut().zip(&incoming.digital) {
            *dst = *src;
        }
    }

    /// 设置单个模拟量，索引越界返回 `false`
    pub fn set_analog(&mut self, index: usize, value: u8) -> bool {
        match self.analog.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            },
            None => false,
        }
    }

    /// 设置单个数字量，索引越界返回 `false`
    pub fn set_digital(&mut self, index: usize, value: bool) -> bool {
        match self.digital.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            },
            None => false,
        }
    }

    /// 生成下行负载：标识 + 模拟量 + 打包后的数字量
    pub fn to_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(1 + self.analog.len() + self.digital.len().div_ceil(8));
        payload.push(self.ident);
        payload.extend_from_slice(&self.analog);
        payload.extend(pack_bits(&self.digital));
        payload
    }

    /// 解析下行负载（控制台侧使用）
    pub fn from_payload(payload: &[u8], layout: &PayloadLayout) -> Result<Self, ProtocolError> {
        let expected = layout.outgoing_len();
        if payload.len() < expected {
            return Err(ProtocolError::InvalidLength {
                expected,
                actual: payload.len(),
            });
        }
        if payload[0] != layout.ident {
            return Err(ProtocolError::IdentMismatch {
                expected: layout.ident,
                actual: payload[0],
            });
        }
        let analog_end = 1 + layout.analog_count;
        Ok(Self {
            ident: payload[0],
            analog: SmallVec::from_slice(&payload[1..analog_end]),
            digital: unpack_bits(&payload[analog_end..expected], layout.digital_count()),
        })
    }
}
