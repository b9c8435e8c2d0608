//! 无线链路指标
//!
//! 零开销的原子计数器，可以在任何线程安全地读取，不会引入锁竞争。

use std::sync::atomic::{AtomicU64, Ordering};

/// 链路实时指标
#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// 从链路读到的字节数
    pub rx_bytes: AtomicU64,
    /// 解帧器组装出的数据帧
    pub frames_decoded: AtomicU64,
    /// 被接受并提交的帧
    pub frames_committed: AtomicU64,
    /// 负载标识不匹配被丢弃的帧
    pub ident_mismatches: AtomicU64,
    /// 负载长度不足被丢弃的帧
    pub malformed_payloads: AtomicU64,
    /// 校验和错误被丢弃的帧
    pub checksum_errors: AtomicU64,
    /// 来自非锁定对端、被严格模式丢弃的帧
    pub foreign_frames: AtomicU64,
    /// 链路读错误
    pub rx_errors: AtomicU64,
    /// 发送成功的下行帧
    pub tx_frames: AtomicU64,
    /// 发送失败的下行帧
    pub tx_errors: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LinkMetricsSnapshot {
        LinkMetricsSnapshot {
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_committed: self.frames_committed.load(Ordering::Relaxed),
            ident_mismatches: self.ident_mismatches.load(Ordering::Relaxed),
            malformed_payloads: self.malformed_payloads.load(Ordering::Relaxed),
            checksum_errors: self.checksum_errors.load(Ordering::Relaxed),
            foreign_frames: self.foreign_frames.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        for counter in [
            &self.rx_bytes,
            &self.frames_decoded,
            &self.frames_committed,
            &self.ident_mismatches,
            &self.malformed_payloads,
            &self.checksum_errors,
            &self.foreign_frames,
            &self.rx_errors,
            &self.tx_frames,
            &self.tx_errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkMetricsSnapshot {
    pub rx_bytes: u64,
    pub frames_decoded: u64,
    pub frames_committed: u64,
    pub ident_mismatches: u64,
    pub malformed_payloads: u64,
    pub checksum_errors: u64,
    pub foreign_frames: u64,
    pub rx_errors: u64,
    pub tx_frames: u64,
    pub tx_errors: u64,
}

impl LinkMetricsSnapshot {
    /// 解出但未提交的帧
    pub fn frames_dropped(&self) -> u64 {
        self.ident_mismatches + self.malformed_payloads + self.checksum_errors + self.foreign_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = LinkMetrics::new();
        LinkMetrics::incr(&metrics.frames_decoded);
        LinkMetrics::incr(&metrics.checksum_errors);
        LinkMetrics::incr(&metrics.ident_mismatches);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_decoded, 1);
        assert_eq!(snapshot.frames_dropped(), 2);

        metrics.reset();
        assert_eq!(metrics.snapshot(), LinkMetricsSnapshot::default());
    }
}
