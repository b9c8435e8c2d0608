//! 无线遥测通道
//!
//! 持有链路收发两端和解帧器，维护最近一次提交的控制状态与下行遥测镜像。
//!
//! # 锁
//!
//! - `rx`：只有轮询任务使用，持有期间会读链路
//! - `tx`：只有遥测任务使用，持有期间会写链路
//! - `state`：提交、快照、镜像读写共用，只在复制进出时持有，从不跨 IO

use crate::clock::Clock;
use crate::error::DriverError;
use crate::metrics::{LinkMetrics, LinkMetricsSnapshot};
use crate::state::{ControlSnapshot, LinkState};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use pier_hal::{SerialRx, SerialTx, SplittableLink};
use pier_protocol::{
    DecoderStats, FrameDecoder, FrameIdSequence, IncomingControlState, OutgoingTelemetryState, PayloadLayout,
    PeerAddress, ProtocolError, RadioFrame, encode_frame,
};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// 接收缓冲区大小
pub const DEFAULT_READ_BUFFER_SIZE: usize = 512;

/// 校验和处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumPolicy {
    /// 校验失败的帧被丢弃并计数
    #[default]
    Verify,
    /// 不校验，全部接受
    Ignore,
}

/// 对端隔离策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerPolicy {
    /// 锁定第一个发送方作为下行目的地址，但接受所有发送方的帧
    #[default]
    PinFirst,
    /// 锁定第一个发送方，丢弃其他发送方的帧
    Strict,
}

/// 遥测通道配置
#[derive(Debug, Clone)]
pub struct RadioConfig {
    /// 上行负载布局
    pub incoming: PayloadLayout,
    /// 下行负载布局
    pub outgoing: PayloadLayout,
    pub checksum_policy: ChecksumPolicy,
    pub peer_policy: PeerPolicy,
    /// 单次读取的缓冲区大小
    pub read_buffer_size: usize,
    /// 单次轮询最多读取次数，防止持续到达的数据让轮询不返回
    pub max_reads_per_poll: usize,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            incoming: PayloadLayout::INCOMING,
            outgoing: PayloadLayout::OUTGOING,
            checksum_policy: ChecksumPolicy::default(),
            peer_policy: PeerPolicy::default(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_reads_per_poll: 8,
        }
    }
}

struct RxSide {
    link: Box<dyn SerialRx + Send>,
    decoder: FrameDecoder,
    buf: Vec<u8>,
}

struct TxSide {
    link: Box<dyn SerialTx + Send>,
    frame_ids: FrameIdSequence,
}

/// 无线遥测通道
pub struct TelemetryChannel {
    config: RadioConfig,
    rx: Mutex<RxSide>,
    tx: Mutex<TxSide>,
    state: Mutex<LinkState>,
    peer: ArcSwapOption<PeerAddress>,
    clock: Arc<dyn Clock>,
    metrics: LinkMetrics,
}

impl TelemetryChannel {
    /// 拆分链路并创建通道
    pub fn new<L: SplittableLink>(link: L, config: RadioConfig, clock: Arc<dyn Clock>) -> Result<Self, DriverError> {
        let (rx, tx) = link.split()?;
        Ok(Self::from_halves(rx, tx, config, clock))
    }

    /// 用已拆分的收发两端创建通道
    pub fn from_halves(
        rx: impl SerialRx + Send + 'static,
        tx: impl SerialTx + Send + 'static,
        config: RadioConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = LinkState::new(&config.incoming, &config.outgoing);
        let buf = vec![0u8; config.read_buffer_size.max(1)];
        Self {
            rx: Mutex::new(RxSide {
                link: Box::new(rx),
                decoder: FrameDecoder::new(),
                buf,
            }),
            tx: Mutex::new(TxSide {
                link: Box::new(tx),
                frame_ids: FrameIdSequence::new(),
            }),
            state: Mutex::new(state),
            peer: ArcSwapOption::empty(),
            clock,
            metrics: LinkMetrics::new(),
            config,
        }
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ========================================================================
    // 接收
    // ========================================================================

    /// 读取链路上当前可用的全部字节并解帧
    ///
    /// 没有数据时立即返回。解码失败只计数和记录日志，不向调用方传播。
    /// 返回本次提交的帧数。
    pub fn poll_incoming(&self) -> usize {
        let mut rx = self.rx.lock();
        let RxSide { link, decoder, buf } = &mut *rx;

        for _ in 0..self.config.max_reads_per_poll.max(1) {
            match link.read_available(buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.metrics.rx_bytes.fetch_add(n as u64, std::sync::atomic::Ordering::Relaxed);
                    decoder.push_bytes(&buf[..n]);
                },
                Err(e) => {
                    LinkMetrics::incr(&self.metrics.rx_errors);
                    warn!("Radio read failed: {}", e);
                    break;
                },
            }
        }

        let mut committed = 0;
        for frame in decoder.drain_frames() {
            if self.accept(frame) {
                committed += 1;
            }
        }
        committed
    }

    fn accept(&self, frame: RadioFrame) -> bool {
        LinkMetrics::incr(&self.metrics.frames_decoded);

        if self.config.checksum_policy == ChecksumPolicy::Verify && !frame.checksum_valid() {
            LinkMetrics::incr(&self.metrics.checksum_errors);
            debug!(
                "Dropping frame with bad checksum: got 0x{:02X}, expected 0x{:02X}",
                frame.checksum, frame.computed_checksum
            );
            return false;
        }

        if self.config.peer_policy == PeerPolicy::Strict
            && let Some(peer) = self.peer()
            && frame.source != peer
        {
            LinkMetrics::incr(&self.metrics.foreign_frames);
            debug!("Dropping frame from foreign sender {}", frame.source);
            return false;
        }

        match IncomingControlState::decode(&frame.payload, &self.config.incoming) {
            Ok(incoming) => {
                let now = self.clock.now();
                self.state.lock().commit(incoming, now);
                LinkMetrics::incr(&self.metrics.frames_committed);
                // 只有提交成功的帧才能锁定对端
                if self.peer.load().is_none() {
                    info!("Radio peer pinned: {}", frame.source);
                    self.peer.store(Some(Arc::new(frame.source)));
                }
                trace!("Committed control state at {:?}", now);
                true
            },
            Err(e @ ProtocolError::IdentMismatch { .. }) => {
                LinkMetrics::incr(&self.metrics.ident_mismatches);
                debug!("Dropping frame: {}", e);
                false
            },
            Err(e) => {
                LinkMetrics::incr(&self.metrics.malformed_payloads);
                debug!("Dropping frame: {}", e);
                false
            },
        }
    }

    // ========================================================================
    // 发送
    // ========================================================================

    /// 把当前下行遥测编码成帧发给对端
    ///
    /// 尚未锁定对端时发往全零地址。
    pub fn send_outgoing(&self) -> Result<(), DriverError> {
        let payload = self.state.lock().outgoing.to_payload();
        let dest = self.peer().unwrap_or(PeerAddress::UNSET);

        let mut tx = self.tx.lock();
        let frame_id = tx.frame_ids.next_id();
        let bytes = encode_frame(&dest, frame_id, &payload)?;
        match tx.link.write_all(&bytes) {
            Ok(()) => {
                LinkMetrics::incr(&self.metrics.tx_frames);
                trace!("Sent telemetry frame {} to {}", frame_id, dest);
                Ok(())
            },
            Err(e) => {
                LinkMetrics::incr(&self.metrics.tx_errors);
                Err(e.into())
            },
        }
    }

    // ========================================================================
    // 状态访问
    // ========================================================================

    /// 最近一次提交的控制状态的独立副本
    pub fn snapshot(&self) -> ControlSnapshot {
        self.state.lock().snapshot()
    }

    /// 下行遥测镜像的副本
    pub fn outgoing(&self) -> OutgoingTelemetryState {
        self.state.lock().outgoing.clone()
    }

    /// 在锁内修改下行遥测镜像
    ///
    /// 闭包内不要做 IO 或耗时操作。
    pub fn with_outgoing<R>(&self, f: impl FnOnce(&mut OutgoingTelemetryState) -> R) -> R {
        f(&mut self.state.lock().outgoing)
    }

    /// 已锁定的对端地址
    pub fn peer(&self) -> Option<PeerAddress> {
        self.peer.load().as_deref().copied()
    }

    pub fn metrics(&self) -> LinkMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.rx.lock().decoder.stats()
    }
}

impl std::fmt::Debug for TelemetryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryChannel")
            .field("config", &self.config)
            .field("peer", &self.peer())
            .field("metrics", &self.metrics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use pier_hal::mock::{ConsoleEnd, MockLink};
    use pier_protocol::{encode_data_frame, FrameDecoder as ConsoleDecoder};
    use std::time::Duration;

    const CONSOLE: PeerAddress = PeerAddress::new([0x00, 0x13, 0xA2, 0x00, 0x40, 0x0A, 0x01, 0x02]);

    fn channel_with(config: RadioConfig) -> (TelemetryChannel, ConsoleEnd, Arc<ManualClock>) {
        let (link, console) = MockLink::pair();
        let clock = Arc::new(ManualClock::new());
        let channel = TelemetryChannel::new(link, config, clock.clone()).unwrap();
        (channel, console, clock)
    }

    fn channel() -> (TelemetryChannel, ConsoleEnd, Arc<ManualClock>) {
        channel_with(RadioConfig::default())
    }

    fn control_payload(can_move: bool, analog0: u8) -> Vec<u8> {
        let mut state = IncomingControlState::disabled(&PayloadLayout::INCOMING);
        state.can_move = can_move;
        state.is_blue = true;
        state.field_time = 12;
        state.analog[0] = analog0;
        state.digital[2] = true;
        state.encode(&PayloadLayout::INCOMING).unwrap()
    }

    fn frame_from(source: &PeerAddress, payload: &[u8]) -> Vec<u8> {
        encode_data_frame(source, 0x28, 0, payload).unwrap().to_vec()
    }

    #[test]
    fn test_poll_without_data_returns_immediately() {
        let (channel, _console, _clock) = channel();
        assert_eq!(channel.poll_incoming(), 0);
        assert_eq!(channel.snapshot(), ControlSnapshot::default());
    }

    #[test]
    fn test_poll_commits_and_stamps() {
        let (channel, console, clock) = channel();
        clock.set(Duration::from_millis(500));
        console.send(&frame_from(&CONSOLE, &control_payload(true, 77)));

        assert_eq!(channel.poll_incoming(), 1);
        let snapshot = channel.snapshot();
        assert!(snapshot.can_move);
        assert!(snapshot.is_blue);
        assert_eq!(snapshot.field_time, 12);
        assert_eq!(snapshot.analog(0), Some(77));
        assert_eq!(snapshot.digital(2), Some(true));
        assert_eq!(snapshot.last_update, Some(Duration::from_millis(500)));
        assert_eq!(channel.peer(), Some(CONSOLE));
    }

    #[test]
    fn test_commit_mirrors_into_outgoing() {
        let (channel, console, _clock) = channel();
        console.send(&frame_from(&CONSOLE, &control_payload(false, 33)));
        channel.poll_incoming();

        let outgoing = channel.outgoing();
        assert_eq!(outgoing.ident, 0xFD);
        assert_eq!(outgoing.analog[0], 33);
        assert!(outgoing.digital[2]);
    }

    #[test]
    fn test_ident_mismatch_keeps_state_unchanged() {
        let (channel, console, clock) = channel();
        console.send(&frame_from(&CONSOLE, &control_payload(true, 10)));
        channel.poll_incoming();
        let before = channel.snapshot();
        let outgoing_before = channel.outgoing();

        clock.advance(Duration::from_millis(100));
        let mut payload = control_payload(false, 200);
        payload[0] = 0x55;
        console.send(&frame_from(&CONSOLE, &payload));

        assert_eq!(channel.poll_incoming(), 0);
        assert_eq!(channel.snapshot(), before);
        assert_eq!(channel.outgoing(), outgoing_before);
        assert_eq!(channel.metrics().ident_mismatches, 1);
    }

    #[test]
    fn test_short_payload_dropped() {
        let (channel, console, _clock) = channel();
        console.send(&frame_from(&CONSOLE, &[0xFE, 1, 1]));
        assert_eq!(channel.poll_incoming(), 0);
        assert_eq!(channel.metrics().malformed_payloads, 1);
        assert!(!channel.snapshot().has_link());
    }

    #[test]
    fn test_frame_split_across_polls() {
        let (channel, console, _clock) = channel();
        let bytes = frame_from(&CONSOLE, &control_payload(true, 1));

        console.send(&bytes[..3]);
        assert_eq!(channel.poll_incoming(), 0);
        console.send(&bytes[3..10]);
        assert_eq!(channel.poll_incoming(), 0);
        console.send(&bytes[10..]);
        assert_eq!(channel.poll_incoming(), 1);
        assert!(channel.snapshot().can_move);
    }

    #[test]
    fn test_small_reads_are_reassembled() {
        let (channel, console, _clock) = channel();
        console.set_max_chunk(Some(1));
        console.send(&frame_from(&CONSOLE, &control_payload(true, 1)));

        let mut committed = 0;
        for _ in 0..10 {
            committed += channel.poll_incoming();
        }
        assert_eq!(committed, 1);
    }

    #[test]
    fn test_bad_checksum_dropped_when_verifying() {
        let (channel, console, _clock) = channel();
        let mut bytes = frame_from(&CONSOLE, &control_payload(true, 1));
        let last = bytes.len() - 1;
        bytes[last] = bytes[last].wrapping_add(1);
        console.send(&bytes);

        assert_eq!(channel.poll_incoming(), 0);
        assert_eq!(channel.metrics().checksum_errors, 1);
    }

    #[test]
    fn test_bad_checksum_accepted_when_ignoring() {
        let (channel, console, _clock) = channel_with(RadioConfig {
            checksum_policy: ChecksumPolicy::Ignore,
            ..Default::default()
        });
        let mut bytes = frame_from(&CONSOLE, &control_payload(true, 1));
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        console.send(&bytes);

        assert_eq!(channel.poll_incoming(), 1);
    }

    #[test]
    fn test_pin_first_accepts_other_senders() {
        let (channel, console, _clock) = channel();
        let other = PeerAddress::new([7; 8]);
        console.send(&frame_from(&CONSOLE, &control_payload(false, 1)));
        console.send(&frame_from(&other, &control_payload(true, 2)));

        assert_eq!(channel.poll_incoming(), 2);
        assert_eq!(channel.peer(), Some(CONSOLE));
        assert_eq!(channel.snapshot().analog(0), Some(2));
    }

    #[test]
    fn test_strict_peer_drops_other_senders() {
        let (channel, console, _clock) = channel_with(RadioConfig {
            peer_policy: PeerPolicy::Strict,
            ..Default::default()
        });
        let other = PeerAddress::new([7; 8]);
        console.send(&frame_from(&CONSOLE, &control_payload(false, 1)));
        console.send(&frame_from(&other, &control_payload(true, 2)));

        assert_eq!(channel.poll_incoming(), 1);
        assert_eq!(channel.snapshot().analog(0), Some(1));
        assert_eq!(channel.metrics().foreign_frames, 1);
    }

    #[test]
    fn test_rejected_first_frame_does_not_pin_peer() {
        let (channel, console, _clock) = channel_with(RadioConfig {
            peer_policy: PeerPolicy::Strict,
            ..Default::default()
        });
        // 源地址字节损坏，校验和不再匹配
        let mut bad = frame_from(&CONSOLE, &control_payload(true, 9));
        bad[5] ^= 0xFF;
        console.send(&bad);
        console.send(&frame_from(&CONSOLE, &control_payload(true, 1)));

        assert_eq!(channel.poll_incoming(), 1);
        assert_eq!(channel.peer(), Some(CONSOLE));
        assert_eq!(channel.snapshot().analog(0), Some(1));
        assert_eq!(channel.metrics().checksum_errors, 1);
        assert_eq!(channel.metrics().foreign_frames, 0);
    }

    #[test]
    fn test_ident_mismatch_does_not_pin_peer() {
        let (channel, console, _clock) = channel();
        let other = PeerAddress::new([7; 8]);
        let mut payload = control_payload(true, 9);
        payload[0] = 0xAA;
        console.send(&frame_from(&other, &payload));
        assert_eq!(channel.poll_incoming(), 0);
        assert_eq!(channel.peer(), None);

        console.send(&frame_from(&CONSOLE, &control_payload(true, 1)));
        assert_eq!(channel.poll_incoming(), 1);
        assert_eq!(channel.peer(), Some(CONSOLE));
    }

    #[test]
    fn test_send_outgoing_before_peer_uses_unset_address() {
        let (channel, console, _clock) = channel();
        channel.send_outgoing().unwrap();

        let sent = console.take_sent();
        assert_eq!(sent[0], 0x7E);
        assert_eq!(sent[4], 0);
        assert_eq!(&sent[5..13], PeerAddress::UNSET.as_bytes());
    }

    #[test]
    fn test_send_outgoing_addresses_peer_and_advances_id() {
        let (channel, console, _clock) = channel();
        console.send(&frame_from(&CONSOLE, &control_payload(true, 42)));
        channel.poll_incoming();
        channel.with_outgoing(|out| out.set_analog(1, 9));

        channel.send_outgoing().unwrap();
        channel.send_outgoing().unwrap();
        let sent = console.take_sent();

        let frame_len = sent.len() / 2;
        let (first, second) = sent.split_at(frame_len);
        assert_eq!(first[4], 0);
        assert_eq!(second[4], 1);
        assert_eq!(&first[5..13], CONSOLE.as_bytes());

        // 负载：标识 + 7 个模拟量 + 1 字节数字量
        let payload = &first[14..first.len() - 1];
        assert_eq!(payload.len(), 9);
        assert_eq!(payload[0], 0xFD);
        assert_eq!(payload[1], 42);
        assert_eq!(payload[2], 9);
        assert_eq!(payload[8], 0b0000_0100);
        assert_eq!(channel.metrics().tx_frames, 2);

        // 下行帧对解帧器不可见
        let mut decoder = ConsoleDecoder::new();
        assert!(!decoder.push_bytes(&sent));
    }

    #[test]
    fn test_send_failure_is_reported_and_counted() {
        let (channel, console, _clock) = channel();
        console.set_fail_writes(true);
        assert!(matches!(channel.send_outgoing(), Err(DriverError::Hal(_))));
        assert_eq!(channel.metrics().tx_errors, 1);
    }

    #[test]
    fn test_read_failure_is_contained() {
        let (channel, console, _clock) = channel();
        console.set_fail_reads(true);
        assert_eq!(channel.poll_incoming(), 0);
        assert_eq!(channel.metrics().rx_errors, 1);
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let (channel, console, _clock) = channel();
        console.send(&frame_from(&CONSOLE, &control_payload(true, 5)));
        channel.poll_incoming();

        let mut snapshot = channel.snapshot();
        snapshot.analog[0] = 250;
        snapshot.can_move = false;
        assert_eq!(channel.snapshot().analog(0), Some(5));
        assert!(channel.snapshot().can_move);
    }
}
