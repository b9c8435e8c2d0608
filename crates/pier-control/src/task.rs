//! 任务抽象与调度器
//!
//! 每个任务是 `{cadence, body}`：
//! - `Cadence::Periodic(period)`：按固定周期执行，任务内串行。body 超时时
//!   记一次 overrun，跳过错过的触发点，不会重入。
//! - `Cadence::Continuous`：循环执行，每轮之后 `yield_now()`。
//!
//! 每个任务独占一个线程。body 中的 panic 被捕获、记录并计数，任务继续运行。
//! 关闭信号基于 crossbeam channel：周期任务在 `recv_timeout` 上等待，
//! 触发关闭时立即被唤醒。

use crate::error::ControlError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

// ============================================================================
// 任务描述
// ============================================================================

/// 任务节奏
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// 固定周期
    Periodic(Duration),
    /// 紧循环，每轮让出一次 CPU
    Continuous,
}

/// 任务优先级（仅在启用 `realtime` feature 时映射到线程优先级）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskPriority {
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
}

/// 任务体
pub type TaskBody = Box<dyn FnMut() + Send + 'static>;

/// 待启动的任务
pub struct TaskSpec {
    pub name: String,
    pub cadence: Cadence,
    pub priority: TaskPriority,
    pub body: TaskBody,
}

impl TaskSpec {
    pub fn periodic(name: impl Into<String>, period: Duration, body: impl FnMut() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            cadence: Cadence::Periodic(period),
            priority: TaskPriority::Normal,
            body: Box::new(body),
        }
    }

    pub fn continuous(name: impl Into<String>, body: impl FnMut() + Send + 'static) -> Self {
        Self {
            name: name.into(),
            cadence: Cadence::Continuous,
            priority: TaskPriority::Normal,
            body: Box::new(body),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("cadence", &self.cadence)
            .field("priority", &self.priority)
            .finish()
    }
}

// ============================================================================
// 任务统计
// ============================================================================

/// 单个任务的运行统计
#[derive(Debug, Default)]
pub struct TaskStats {
    /// 正常完成的执行次数
    pub runs: AtomicU64,
    /// 周期任务执行时间超过周期的次数
    pub overruns: AtomicU64,
    /// 捕获到的 panic 次数
    pub panics: AtomicU64,
}

impl TaskStats {
    pub fn snapshot(&self) -> TaskStatsSnapshot {
        TaskStatsSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStatsSnapshot {
    pub runs: u64,
    pub overruns: u64,
    pub panics: u64,
}

// ============================================================================
// 关闭信号
// ============================================================================

/// 关闭句柄
///
/// 可以克隆并交给其他线程（例如 Ctrl-C 处理器）。`trigger()` 之后
/// 所有等待中的周期任务立即醒来并退出。
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            sender: Arc::new(Mutex::new(Some(tx))),
            receiver: rx,
        }
    }

    /// 触发关闭（可重复调用）
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        // 丢弃唯一的 Sender，接收端随即 Disconnected
        self.sender.lock().take();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            flag: self.flag.clone(),
            receiver: self.receiver.clone(),
        }
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandle").field("triggered", &self.is_triggered()).finish()
    }
}

/// 任务线程持有的关闭信号接收端
#[derive(Clone)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    receiver: Receiver<()>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// 最多等待 `timeout`，期间收到关闭信号返回 `true`
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => self.is_triggered(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

// ============================================================================
// 调度器
// ============================================================================

/// Extension trait for timeout-capable thread joins
trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);

        // Watchdog thread joins the target and reports back
        std::thread::spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "Thread panicked during join",
            ))),
        }
    }
}

struct RunningTask {
    name: String,
    handle: Option<JoinHandle<()>>,
    stats: Arc<TaskStats>,
}

/// 线程调度器
///
/// 任务一旦启动就运行到关闭信号触发为止。
pub struct Scheduler {
    shutdown: ShutdownHandle,
    tasks: Vec<RunningTask>,
    join_timeout: Duration,
}

impl Scheduler {
    pub fn new(shutdown: ShutdownHandle, join_timeout: Duration) -> Self {
        Self {
            shutdown,
            tasks: Vec::new(),
            join_timeout,
        }
    }

    pub fn shutdown_handle(&self) -> &ShutdownHandle {
        &self.shutdown
    }

    /// 在独立线程中启动任务
    pub fn spawn(&mut self, spec: TaskSpec) -> Result<Arc<TaskStats>, ControlError> {
        let TaskSpec {
            name,
            cadence,
            priority,
            mut body,
        } = spec;
        let stats = Arc::new(TaskStats::default());
        let signal = self.shutdown.signal();

        let thread_name = name.clone();
        let thread_stats = stats.clone();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                #[cfg(feature = "realtime")]
                apply_priority(&thread_name, priority);

                debug!("Task {} started ({:?}, {:?})", thread_name, cadence, priority);
                match cadence {
                    Cadence::Periodic(period) => {
                        periodic_loop(&thread_name, period, &mut body, &thread_stats, &signal)
                    },
                    Cadence::Continuous => continuous_loop(&thread_name, &mut body, &thread_stats, &signal),
                }
                debug!("Task {} stopped", thread_name);
            })
            .map_err(|source| ControlError::TaskSpawn {
                name: name.clone(),
                source,
            })?;

        self.tasks.push(RunningTask {
            name,
            handle: Some(handle),
            stats: stats.clone(),
        });
        Ok(stats)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 各任务的统计快照，按启动顺序
    pub fn stats(&self) -> Vec<(String, TaskStatsSnapshot)> {
        self.tasks.iter().map(|t| (t.name.clone(), t.stats.snapshot())).collect()
    }

    /// 触发关闭并等待所有任务退出，返回未能按时退出的任务数
    pub fn join(&mut self) -> usize {
        self.shutdown.trigger();
        let timeout = self.join_timeout;
        let mut stuck = 0;
        for task in &mut self.tasks {
            if let Some(handle) = task.handle.take()
                && let Err(_e) = handle.join_timeout(timeout)
            {
                error!("Task {} failed to shut down within {:?}", task.name, timeout);
                stuck += 1;
            }
        }
        stuck
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.tasks.iter().any(|t| t.handle.is_some()) {
            self.join();
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.tasks.iter().map(|t| t.name.as_str()).collect::<Vec<_>>())
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

// ============================================================================
// 任务循环
// ============================================================================

fn periodic_loop(name: &str, period: Duration, body: &mut TaskBody, stats: &TaskStats, signal: &ShutdownSignal) {
    let mut next = Instant::now();
    while !signal.is_triggered() {
        run_once(name, body, stats);

        next += period;
        let now = Instant::now();
        if now >= next {
            // 跳过错过的触发点
            stats.overruns.fetch_add(1, Ordering::Relaxed);
            trace!("Task {} overran its period of {:?}", name, period);
            while next <= now {
                next += period;
            }
        }

        if signal.wait_timeout(next - now) {
            break;
        }
    }
}

fn continuous_loop(name: &str, body: &mut TaskBody, stats: &TaskStats, signal: &ShutdownSignal) {
    while !signal.is_triggered() {
        run_once(name, body, stats);
        std::thread::yield_now();
    }
}

fn run_once(name: &str, body: &mut TaskBody, stats: &TaskStats) {
    match catch_unwind(AssertUnwindSafe(|| body())) {
        Ok(()) => {
            stats.runs.fetch_add(1, Ordering::Relaxed);
        },
        Err(payload) => {
            stats.panics.fetch_add(1, Ordering::Relaxed);
            error!("Task {} panicked: {}", name, panic_message(payload.as_ref()));
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(feature = "realtime")]
fn apply_priority(name: &str, priority: TaskPriority) {
    use thread_priority::*;
    use tracing::{info, warn};

    let level = match priority {
        TaskPriority::Normal => return,
        TaskPriority::BelowNormal => ThreadPriority::Min,
        TaskPriority::AboveNormal => ThreadPriority::Max,
    };
    match set_current_thread_priority(level) {
        Ok(_) => {
            info!("Task {} priority set to {:?}", name, priority);
        },
        Err(e) => {
            warn!(
                "Failed to set priority of task {}: {:?}. \
                On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                name, e
            );
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_shutdown_signal_wakes_waiters() {
        let handle = ShutdownHandle::new();
        let signal = handle.signal();
        assert!(!signal.wait_timeout(Duration::from_millis(1)));

        handle.trigger();
        handle.trigger();
        assert!(signal.is_triggered());
        assert!(signal.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn test_continuous_task_runs_until_shutdown() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let mut scheduler = Scheduler::new(ShutdownHandle::new(), Duration::from_secs(2));
        let stats = scheduler
            .spawn(TaskSpec::continuous("spin", move || {
                c.fetch_add(1, Ordering::Relaxed);
            }))
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || counter.load(Ordering::Relaxed) > 10));
        assert_eq!(scheduler.join(), 0);

        let after = counter.load(Ordering::Relaxed);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(counter.load(Ordering::Relaxed), after);
        assert_eq!(stats.snapshot().runs, after as u64);
    }

    #[test]
    fn test_periodic_task_is_woken_by_shutdown() {
        let mut scheduler = Scheduler::new(ShutdownHandle::new(), Duration::from_secs(2));
        let stats = scheduler.spawn(TaskSpec::periodic("slow", Duration::from_secs(60), || {})).unwrap();

        assert!(wait_until(Duration::from_secs(2), || stats.snapshot().runs == 1));
        let started = Instant::now();
        assert_eq!(scheduler.join(), 0);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(stats.snapshot().runs, 1);
    }

    #[test]
    fn test_periodic_overrun_is_counted_not_reentered() {
        let running = Arc::new(AtomicBool::new(false));
        let reentered = Arc::new(AtomicBool::new(false));
        let (r, re) = (running.clone(), reentered.clone());

        let mut scheduler = Scheduler::new(ShutdownHandle::new(), Duration::from_secs(2));
        let stats = scheduler
            .spawn(TaskSpec::periodic("busy", Duration::from_millis(1), move || {
                if r.swap(true, Ordering::AcqRel) {
                    re.store(true, Ordering::Release);
                }
                std::thread::sleep(Duration::from_millis(5));
                r.store(false, Ordering::Release);
            }))
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || stats.snapshot().overruns >= 2));
        scheduler.join();
        assert!(!reentered.load(Ordering::Acquire));
    }

    #[test]
    fn test_panicking_body_is_contained() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let mut scheduler = Scheduler::new(ShutdownHandle::new(), Duration::from_secs(2));
        let stats = scheduler
            .spawn(TaskSpec::continuous("flaky", move || {
                if c.fetch_add(1, Ordering::Relaxed) % 2 == 0 {
                    panic!("student code bug");
                }
            }))
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            let s = stats.snapshot();
            s.panics >= 3 && s.runs >= 3
        }));
        assert_eq!(scheduler.join(), 0);
    }

    #[test]
    fn test_stats_listed_in_spawn_order() {
        let mut scheduler = Scheduler::new(ShutdownHandle::new(), Duration::from_secs(2));
        scheduler
            .spawn(TaskSpec::periodic("a", Duration::from_millis(10), || {}).with_priority(TaskPriority::AboveNormal))
            .unwrap();
        scheduler
            .spawn(TaskSpec::continuous("b", || {}).with_priority(TaskPriority::BelowNormal))
            .unwrap();
        let names: Vec<_> = scheduler.stats().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(boxed.as_ref()), "<non-string panic payload>");
    }
}
