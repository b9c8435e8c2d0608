//! 传感器契约、注册表和两个通用传感器

use crate::error::ControlError;
use crate::robot::Robot;
use parking_lot::Mutex;
use pier_hal::{AnalogInput, DigitalInput};
use smallvec::{SmallVec, smallvec};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// 传感器读数序列
pub type SensorValues = SmallVec<[f64; 4]>;

/// 模拟输入原始读数上限
pub const ANALOG_RAW_MAX: u16 = 1023;

/// 传感器
pub trait Sensor: Send + Sync {
    fn name(&self) -> &str;
    /// 刷新内部读数
    fn update(&self) -> Result<(), ControlError>;
    /// 最近一次读数
    fn values(&self) -> SensorValues;
}

/// 按插入顺序保存传感器句柄
#[derive(Clone, Default)]
pub struct SensorRegistry {
    entries: Vec<Arc<dyn Sensor>>,
}

impl SensorRegistry {
    pub fn register(&mut self, sensor: Arc<dyn Sensor>) {
        self.entries.push(sensor);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Sensor>> {
        self.entries.iter()
    }

    /// 刷新全部传感器，返回失败个数
    pub fn update_all(&self) -> usize {
        let mut failures = 0;
        for sensor in &self.entries {
            if let Err(e) = sensor.update() {
                warn!("Sensor {} update failed: {}", sensor.name(), e);
                failures += 1;
            }
        }
        failures
    }
}

impl fmt::Debug for SensorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|s| s.name())).finish()
    }
}

// ============================================================================
// 模拟量传感器
// ============================================================================

/// 模拟量传感器，原始读数 `0..=1023` 线性映射到 `[low, high]`
pub struct AnalogSensor {
    name: String,
    input: Mutex<Box<dyn AnalogInput>>,
    scale: (f64, f64),
    value: Mutex<f64>,
}

impl AnalogSensor {
    /// 创建并注册到机器人的传感器列表
    pub fn new(robot: &mut Robot, name: impl Into<String>, input: impl AnalogInput + 'static) -> Arc<Self> {
        Self::with_scale(robot, name, input, 0.0, f64::from(ANALOG_RAW_MAX))
    }

    pub fn with_scale(
        robot: &mut Robot,
        name: impl Into<String>,
        input: impl AnalogInput + 'static,
        low: f64,
        high: f64,
    ) -> Arc<Self> {
        let sensor = Arc::new(Self {
            name: name.into(),
            input: Mutex::new(Box::new(input)),
            scale: (low, high),
            value: Mutex::new(low),
        });
        robot.register_sensor(sensor.clone());
        sensor
    }

    pub fn value(&self) -> f64 {
        *self.value.lock()
    }

    fn scaled(&self, raw: u16) -> f64 {
        let (low, high) = self.scale;
        let ratio = f64::from(raw.min(ANALOG_RAW_MAX)) / f64::from(ANALOG_RAW_MAX);
        low + ratio * (high - low)
    }
}

impl Sensor for AnalogSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&self) -> Result<(), ControlError> {
        let raw = self.input.lock().read_raw()?;
        *self.value.lock() = self.scaled(raw);
        Ok(())
    }

    fn values(&self) -> SensorValues {
        smallvec![self.value()]
    }
}

// ============================================================================
// 数字量传感器
// ============================================================================

/// 数字量传感器，读数为 1.0（高）或 0.0（低）
pub struct DigitalSensor {
    name: String,
    input: Mutex<Box<dyn DigitalInput>>,
    high: Mutex<bool>,
}

impl DigitalSensor {
    /// 创建并注册到机器人的传感器列表
    pub fn new(robot: &mut Robot, name: impl Into<String>, input: impl DigitalInput + 'static) -> Arc<Self> {
        let sensor = Arc::new(Self {
            name: name.into(),
            input: Mutex::new(Box::new(input)),
            high: Mutex::new(false),
        });
        robot.register_sensor(sensor.clone());
        sensor
    }

    pub fn is_high(&self) -> bool {
        *self.high.lock()
    }
}

impl Sensor for DigitalSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&self) -> Result<(), ControlError> {
        let high = self.input.lock().is_high()?;
        *self.high.lock() = high;
        Ok(())
    }

    fn values(&self) -> SensorValues {
        smallvec![if self.is_high() { 1.0 } else { 0.0 }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::testing::test_robot;
    use pier_hal::mock::{MockAnalogInput, MockDigitalInput};

    #[test]
    fn test_analog_sensor_registers_once_and_scales() {
        let (mut robot, _console, _bus, _clock) = test_robot();
        let input = MockAnalogInput::new(0);
        let sensor = AnalogSensor::with_scale(&mut robot, "arm_pot", input.clone(), 0.0, 100.0);
        assert_eq!(robot.sensors().len(), 1);

        // 未刷新前返回下限
        assert_eq!(sensor.values().as_slice(), &[0.0]);

        input.set(1023);
        sensor.update().unwrap();
        assert!((sensor.value() - 100.0).abs() < 1e-9);

        // 超出范围的原始读数被截断
        input.set(4000);
        sensor.update().unwrap();
        assert!((sensor.value() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_scale_is_raw() {
        let (mut robot, _console, _bus, _clock) = test_robot();
        let input = MockAnalogInput::new(512);
        let sensor = AnalogSensor::new(&mut robot, "line", input);
        sensor.update().unwrap();
        assert!((sensor.value() - 512.0).abs() < 1e-9);
    }

    #[test]
    fn test_digital_sensor_values() {
        let (mut robot, _console, _bus, _clock) = test_robot();
        let input = MockDigitalInput::new(false);
        let sensor = DigitalSensor::new(&mut robot, "limit", input.clone());

        input.set(true);
        assert_eq!(robot.update_sensors(), 0);
        assert!(sensor.is_high());
        assert_eq!(sensor.values().as_slice(), &[1.0]);
    }
}
