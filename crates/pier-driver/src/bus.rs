//! 共享总线仲裁
//!
//! 所有执行器的写入都经过同一个临界区：配置设备地址和时钟，
//! 然后在同一个独占窗口内按顺序执行整批事务。
//! 不排队、不做公平性保证，调用方阻塞到前一个批次完成。

use crate::error::DriverError;
use parking_lot::Mutex;
use pier_hal::{BusDevice, BusTransaction, DeviceConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// 总线事务默认超时
pub const DEFAULT_BUS_TIMEOUT: Duration = Duration::from_millis(200);

/// 总线仲裁器
pub struct BusArbiter {
    device: Mutex<Box<dyn BusDevice>>,
    batches: AtomicU64,
    failures: AtomicU64,
}

impl BusArbiter {
    pub fn new(device: impl BusDevice + 'static) -> Self {
        Self {
            device: Mutex::new(Box::new(device)),
            batches: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// 在独占窗口内执行一批事务
    ///
    /// 某个事务失败时停止执行后续事务（部分原子性），并返回失败事务的序号。
    pub fn execute(
        &self,
        transactions: &[BusTransaction],
        timeout: Duration,
        config: DeviceConfig,
    ) -> Result<(), DriverError> {
        if transactions.is_empty() {
            return Err(DriverError::InvalidInput("empty bus transaction batch".to_string()));
        }

        let mut device = self.device.lock();
        self.batches.fetch_add(1, Ordering::Relaxed);

        if let Err(source) = device.configure(config) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            return Err(DriverError::Bus {
                address: config.address,
                index: 0,
                source,
            });
        }

        for (index, transaction) in transactions.iter().enumerate() {
            if let Err(source) = device.write(transaction.bytes(), timeout) {
                self.failures.fetch_add(1, Ordering::Relaxed);
                return Err(DriverError::Bus {
                    address: config.address,
                    index,
                    source,
                });
            }
        }
        trace!("Bus batch of {} to 0x{:02X} done", transactions.len(), config.address);
        Ok(())
    }

    /// 已执行的批次数
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// 失败的批次数
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BusArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusArbiter")
            .field("batches", &self.batches())
            .field("failures", &self.failures())
            .finish()
    }
}
