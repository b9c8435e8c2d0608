//! 链路状态与控制快照

use pier_protocol::{AnalogValues, DigitalValues, IncomingControlState, OutgoingTelemetryState, PayloadLayout};
use std::time::Duration;

/// 最近一次提交的控制状态的独立副本
///
/// 在通道锁内一次性复制出来，之后无锁使用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlSnapshot {
    /// 场地时间（秒）
    pub field_time: u8,
    pub can_move: bool,
    pub is_autonomous: bool,
    pub is_blue: bool,
    pub analog: AnalogValues,
    pub digital: DigitalValues,
    /// 最近一次接受帧的时间戳，从未收到时为 `None`
    pub last_update: Option<Duration>,
}

impl ControlSnapshot {
    /// 尚未收到任何帧时的状态
    pub fn disabled(layout: &PayloadLayout) -> Self {
        Self::from_state(&IncomingControlState::disabled(layout), None)
    }

    pub(crate) fn from_state(state: &IncomingControlState, last_update: Option<Duration>) -> Self {
        Self {
            field_time: state.field_time,
            can_move: state.can_move,
            is_autonomous: state.is_autonomous,
            is_blue: state.is_blue,
            analog: state.analog.clone(),
            digital: state.digital.clone(),
            last_update,
        }
    }

    /// 是否收到过至少一帧
    pub fn has_link(&self) -> bool {
        self.last_update.is_some()
    }

    pub fn analog(&self, index: usize) -> Option<u8> {
        self.analog.get(index).copied()
    }

    pub fn digital(&self, index: usize) -> Option<bool> {
        self.digital.get(index).copied()
    }
}

impl Default for ControlSnapshot {
    fn default() -> Self {
        Self::disabled(&PayloadLayout::INCOMING)
    }
}

/// 通道锁保护的全部状态
#[derive(Debug)]
pub(crate) struct LinkState {
    pub(crate) incoming: IncomingControlState,
    pub(crate) last_update: Option<Duration>,
    pub(crate) outgoing: OutgoingTelemetryState,
}

impl LinkState {
    pub(crate) fn new(incoming: &PayloadLayout, outgoing: &PayloadLayout) -> Self {
        Self {
            incoming: IncomingControlState::disabled(incoming),
            last_update: None,
            outgoing: OutgoingTelemetryState::new(outgoing),
        }
    }

    /// 提交新的上行状态，并回显到下行遥测
    pub(crate) fn commit(&mut self, incoming: IncomingControlState, now: Duration) {
        self.outgoing.mirror(&incoming);
        self.incoming = incoming;
        self.last_update = Some(now);
    }

    pub(crate) fn snapshot(&self) -> ControlSnapshot {
        ControlSnapshot::from_state(&self.incoming, self.last_update)
    }
}
