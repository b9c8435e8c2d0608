//! 字节流解帧状态机
//!
//! 串口读到的数据块与帧边界无关：一次调用可能只包含半个长度字段，
//! 也可能包含多个完整帧。解帧器在调用之间保存全部中间状态，
//! 遇到无法解释的字节时回到 `Idle` 并等待下一个定界符。

use crate::frame::{FRAME_OVERHEAD, FrameType, MAX_DECLARED_LEN, PeerAddress, RadioFrame, START_DELIMITER};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// 待取走的完整帧队列上限，超出时丢弃最旧的帧
pub const MAX_PENDING_FRAMES: usize = 16;

/// 解帧器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecoderState {
    /// 等待起始定界符
    #[default]
    Idle,
    /// 读取 2 字节大端长度
    Length,
    /// 读取帧类型字节
    Type,
    /// 读取 8 字节源地址
    SourceAddr,
    /// 读取信号质量字节
    Quality,
    /// 读取选项字节
    Options,
    /// 读取负载
    Payload,
    /// 读取校验字节
    Checksum,
    /// 跳过不关心的帧
    IgnoreUnknown,
}

/// 解帧统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// 组装完成的数据帧
    pub frames_completed: u64,
    /// 跳过的非数据帧（含未知类型）
    pub frames_ignored: u64,
    /// 因长度非法回到 Idle 的次数
    pub resyncs: u64,
    /// Idle 状态下丢弃的非定界符字节
    pub bytes_discarded: u64,
    /// 队列满时丢弃的旧帧
    pub frames_overflowed: u64,
}

/// 可重同步的解帧器
///
/// # 示例
///
/// ```rust
/// use pier_protocol::{encode_data_frame, FrameDecoder, PeerAddress};
///
/// let bytes = encode_data_frame(&PeerAddress::new([1; 8]), 0x28, 0, &[0xFE, 0x01]).unwrap();
/// let mut decoder = FrameDecoder::new();
///
/// assert!(!decoder.push_bytes(&bytes[..3]));
/// assert!(decoder.push_bytes(&bytes[3..]));
/// let frame = decoder.pop_frame().unwrap();
/// assert_eq!(frame.payload, vec![0xFE, 0x01]);
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    state: DecoderState,
    /// 多字节字段内的偏移
    field_pos: usize,
    len_high: u8,
    declared_len: usize,
    payload_len: usize,
    /// 从长度高字节开始的累加和
    running_sum: u8,
    source: [u8; 8],
    quality: u8,
    options: u8,
    payload: Vec<u8>,
    ignore_remaining: usize,
    peer: Option<PeerAddress>,
    completed: VecDeque<RadioFrame>,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前状态
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// 第一个完整源地址字段的值
    ///
    /// 在校验和检查之前记录，可能来自损坏的帧；链路层只用已提交的帧锁定对端。
    pub fn peer(&self) -> Option<PeerAddress> {
        self.peer
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// 已完成但尚未取走的帧数
    pub fn pending(&self) -> usize {
        self.completed.len()
    }

    /// 取走最早完成的帧
    pub fn pop_frame(&mut self) -> Option<RadioFrame> {
        self.completed.pop_front()
    }

    /// 按完成顺序取走所有帧
    pub fn drain_frames(&mut self) -> impl Iterator<Item = RadioFrame> + '_ {
        self.completed.drain(..)
    }

    /// 丢弃半帧，回到 Idle（保留已锁定的对端地址和待取走的帧）
    pub fn reset(&mut self) {
        self.state = DecoderState::Idle;
        self.field_pos = 0;
        self.payload.clear();
        self.ignore_remaining = 0;
    }

    /// 送入任意长度的数据块
    ///
    /// 返回本次调用中是否组装出至少一个完整帧。
    pub fn push_bytes(&mut self, chunk: &[u8]) -> bool {
        let mut completed = false;
        for &byte in chunk {
            completed |= self.push_byte(byte);
        }
        completed
    }

    /// 送入单个字节，返回该字节是否完成了一帧
    pub fn push_byte(&mut self, byte: u8) -> bool {
        match self.state {
            DecoderState::Idle => {
                if byte == START_DELIMITER {
                    self.state = DecoderState::Length;
                    self.field_pos = 0;
                    self.running_sum = 0;
                } else {
                    self.stats.bytes_discarded += 1;
                }
            },
            DecoderState::Length => {
                self.accumulate(byte);
                if self.field_pos == 0 {
                    self.len_high = byte;
                    self.field_pos = 1;
                } else {
                    self.declared_len = u16::from_be_bytes([self.len_high, byte]) as usize;
                    if self.declared_len > MAX_DECLARED_LEN {
                        debug!("Declared frame length {} exceeds {}, resyncing", self.declared_len, MAX_DECLARED_LEN);
                        self.resync();
                    } else {
                        self.state = DecoderState::Type;
                    }
                }
            },
            DecoderState::Type => {
                self.accumulate(byte);
                self.on_type(byte);
            },
            DecoderState::SourceAddr => {
                self.accumulate(byte);
                self.source[self.field_pos] = byte;
                self.field_pos += 1;
                if self.field_pos == self.source.len() {
                    if self.peer.is_none() {
                        let addr = PeerAddress::new(self.source);
                        debug!("Pinned radio peer {}", addr);
                        self.peer = Some(addr);
                    }
                    self.state = DecoderState::Quality;
                }
            },
            DecoderState::Quality => {
                self.accumulate(byte);
                self.quality = byte;
                self.state = DecoderState::Options;
            },
            DecoderState::Options => {
                self.accumulate(byte);
                self.options = byte;
                // 空负载直接进入校验字节
                self.state = if self.payload_len == 0 {
                    DecoderState::Checksum
                } else {
                    DecoderState::Payload
                };
            },
            DecoderState::Payload => {
                self.accumulate(byte);
                self.payload.push(byte);
                if self.payload.len() == self.payload_len {
                    self.state = DecoderState::Checksum;
                }
            },
            DecoderState::Checksum => {
                self.complete(byte);
                self.state = DecoderState::Idle;
                return true;
            },
            DecoderState::IgnoreUnknown => {
                self.ignore_remaining = self.ignore_remaining.saturating_sub(1);
                if self.ignore_remaining == 0 {
                    self.state = DecoderState::Idle;
                }
            },
        }
        false
    }

    fn accumulate(&mut self, byte: u8) {
        self.running_sum = self.running_sum.wrapping_add(byte);
    }

    fn on_type(&mut self, byte: u8) {
        match FrameType::try_from(byte) {
            Ok(frame_type) if frame_type.carries_control() => {
                if self.declared_len < FRAME_OVERHEAD {
                    debug!("Data frame declares {} bytes, header needs {}", self.declared_len, FRAME_OVERHEAD);
                    self.resync();
                    return;
                }
                self.payload_len = self.declared_len - FRAME_OVERHEAD;
                self.payload.clear();
                self.payload.reserve(self.payload_len);
                self.field_pos = 0;
                self.state = DecoderState::SourceAddr;
            },
            other => {
                // 可识别但不关心的类型与未知类型一样跳过
                trace!("Skipping frame type 0x{:02X} ({:?}), {} bytes", byte, other.ok(), self.declared_len);
                self.stats.frames_ignored += 1;
                self.ignore_remaining = self.declared_len;
                self.state = if self.declared_len == 0 {
                    DecoderState::Idle
                } else {
                    DecoderState::IgnoreUnknown
                };
            },
        }
    }

    fn complete(&mut self, checksum: u8) {
        let frame = RadioFrame {
            frame_type: FrameType::Rx64,
            source: PeerAddress::new(self.source),
            quality: self.quality,
            options: self.options,
            payload: std::mem::take(&mut self.payload),
            checksum,
            computed_checksum: 0xFF - self.running_sum,
        };
        trace!("Frame complete: {} payload bytes from {}", frame.payload.len(), frame.source);

        if self.completed.len() == MAX_PENDING_FRAMES {
            self.completed.pop_front();
            self.stats.frames_overflowed += 1;
        }
        self.completed.push_back(frame);
        self.stats.frames_completed += 1;
    }

    fn resync(&mut self) {
        self.stats.resyncs += 1;
        self.reset();
    }
}
