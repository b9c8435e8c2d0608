//! Supervisor 指标

use std::sync::atomic::{AtomicU64, Ordering};

/// Supervisor 实时指标
#[derive(Debug, Default)]
pub struct SupervisorMetrics {
    /// 执行过的 tick 数
    pub ticks: AtomicU64,
    /// 触发 revive 的上升沿次数
    pub revive_edges: AtomicU64,
    /// 执行 write 的 tick 数
    pub write_passes: AtomicU64,
    /// 执行 kill 的 tick 数
    pub kill_passes: AtomicU64,
    /// 执行器 write/kill 失败总数
    pub actuator_failures: AtomicU64,
    /// 心跳超时状态下的 tick 数
    pub heartbeat_expired_ticks: AtomicU64,
}

impl SupervisorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SupervisorMetricsSnapshot {
        SupervisorMetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            revive_edges: self.revive_edges.load(Ordering::Relaxed),
            write_passes: self.write_passes.load(Ordering::Relaxed),
            kill_passes: self.kill_passes.load(Ordering::Relaxed),
            actuator_failures: self.actuator_failures.load(Ordering::Relaxed),
            heartbeat_expired_ticks: self.heartbeat_expired_ticks.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.ticks,
            &self.revive_edges,
            &self.write_passes,
            &self.kill_passes,
            &self.actuator_failures,
            &self.heartbeat_expired_ticks,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorMetricsSnapshot {
    pub ticks: u64,
    pub revive_edges: u64,
    pub write_passes: u64,
    pub kill_passes: u64,
    pub actuator_failures: u64,
    pub heartbeat_expired_ticks: u64,
}

impl SupervisorMetricsSnapshot {
    /// 运动被禁止的 tick 占比
    pub fn disabled_ratio(&self) -> f64 {
        if self.ticks == 0 {
            return 0.0;
        }
        self.kill_passes as f64 / self.ticks as f64
    }
}
