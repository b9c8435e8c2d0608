//! 执行器契约与注册表
//!
//! 执行器有两个状态：`Live` 和 `Killed`。
//!
//! ```text
//! Live   --kill()-->   Killed
//! Killed --revive()--> Live     （仅当系统级 can_move 为真时生效）
//! ```
//!
//! `write()` 在两个状态下都可以调用；`kill()` 必须是幂等的。

use crate::error::ControlError;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// 执行器
///
/// 用户代码只修改执行器的期望状态；真正写总线的只有 Supervisor。
pub trait Actuator: Send + Sync {
    /// 用于日志的名称
    fn name(&self) -> &str;

    /// 把当前期望状态提交到总线（Killed 状态下提交安全停止命令）
    fn write(&self) -> Result<(), ControlError>;

    /// 强制安全停止，已停止时不做任何事
    fn kill(&self) -> Result<(), ControlError>;

    /// 从停止状态恢复
    fn revive(&self);

    fn is_live(&self) -> bool;
}

/// 按插入顺序保存执行器句柄，只追加不删除
#[derive(Clone, Default)]
pub struct ActuatorRegistry {
    entries: Vec<Arc<dyn Actuator>>,
}

impl ActuatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, actuator: Arc<dyn Actuator>) {
        self.entries.push(actuator);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Actuator>> {
        self.entries.iter()
    }

    /// 停止所有执行器，返回失败个数
    pub fn kill_all(&self) -> usize {
        self.entries
            .iter()
            .filter(|actuator| match actuator.kill() {
                Ok(()) => false,
                Err(e) => {
                    warn!("Kill failed for {}: {}", actuator.name(), e);
                    true
                },
            })
            .count()
    }

    pub fn revive_all(&self) {
        for actuator in &self.entries {
            actuator.revive();
        }
    }
}

impl fmt::Debug for ActuatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|a| a.name())).finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 记录调用次数的测试执行器

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Call {
        Write,
        Kill,
        Revive,
    }

    #[derive(Default)]
    pub struct RecordingActuator {
        pub name: String,
        pub calls: Mutex<Vec<Call>>,
        pub live: AtomicBool,
        pub fail_writes: AtomicBool,
        pub writes: AtomicUsize,
    }

    impl RecordingActuator {
        pub fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                live: AtomicBool::new(true),
                ..Default::default()
            })
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn count(&self, call: Call) -> usize {
            self.calls.lock().iter().filter(|c| **c == call).count()
        }

        pub fn clear(&self) {
            self.calls.lock().clear();
        }
    }

    impl Actuator for RecordingActuator {
        fn name(&self) -> &str {
            &self.name
        }

        fn write(&self) -> Result<(), ControlError> {
            self.calls.lock().push(Call::Write);
            self.writes.fetch_add(1, Ordering::Relaxed);
            if self.fail_writes.load(Ordering::Relaxed) {
                return Err(ControlError::InvalidConfig("injected write failure".to_string()));
            }
            Ok(())
        }

        fn kill(&self) -> Result<(), ControlError> {
            self.calls.lock().push(Call::Kill);
            self.live.store(false, Ordering::Relaxed);
            Ok(())
        }

        fn revive(&self) {
            self.calls.lock().push(Call::Revive);
            self.live.store(true, Ordering::Relaxed);
        }

        fn is_live(&self) -> bool {
            self.live.load(Ordering::Relaxed)
        }
    }
}
