// LSM6DS six-axis IMU over I2C
//
// Each axis is a little-endian register pair read one byte at a time.
// Any failed byte invalidates the whole sample.

use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use tracing::{debug, info};

use super::classifier::RawImuSample;
use crate::hardware::{InertialSensor, SensorError};

/// Default 7-bit address (SDO/SA0 low)
pub const DEFAULT_ADDRESS: u8 = 0x6A;

const CTRL1_XL: u8 = 0x10;
const CTRL2_G: u8 = 0x11;
/// 104 Hz output rate, default full scale
const ODR_104HZ: u8 = 0x60;

const STARTUP_SETTLE: Duration = Duration::from_secs(1);

/// (low, high) register pairs for gyro X, Y, Z
const GYRO_REGISTERS: [(u8, u8); 3] = [(0x22, 0x23), (0x24, 0x25), (0x26, 0x27)];
/// (low, high) register pairs for accel X, Y, Z
const ACCEL_REGISTERS: [(u8, u8); 3] = [(0x28, 0x29), (0x2A, 0x2B), (0x2C, 0x2D)];

pub struct Lsm6ds<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Lsm6ds<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Enable accelerometer and gyroscope, then wait for the first samples
    pub fn init(&mut self, delay: &mut impl DelayNs) -> Result<(), SensorError> {
        self.write_register(CTRL1_XL, ODR_104HZ)?;
        self.write_register(CTRL2_G, ODR_104HZ)?;
        delay.delay_ms(STARTUP_SETTLE.as_millis() as u32);
        info!("IMU at 0x{:02X} initialized", self.address);
        Ok(())
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(|e| SensorError::Bus(format!("write 0x{:02X}: {:?}", register, e)))
    }

    fn read_register(&mut self, register: u8) -> Result<u8, SensorError> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[register], &mut buf)
            .map_err(|e| {
                debug!("IMU read 0x{:02X} failed: {:?}", register, e);
                SensorError::ReadInvalid { register }
            })?;
        Ok(buf[0])
    }

    /// Read one signed 16-bit axis from its (low, high) register pair
    pub fn read_axis(&mut self, low: u8, high: u8) -> Result<i16, SensorError> {
        let lo = self.read_register(low)?;
        let hi = self.read_register(high)?;
        Ok(i16::from_le_bytes([lo, hi]))
    }

    fn read_triple(&mut self, registers: &[(u8, u8); 3]) -> Result<[i16; 3], SensorError> {
        let mut out = [0i16; 3];
        for (value, &(low, high)) in out.iter_mut().zip(registers) {
            *value = self.read_axis(low, high)?;
        }
        Ok(out)
    }
}

impl<I2C: I2c + Send + 'static> InertialSensor for Lsm6ds<I2C> {
    fn read_sample(&mut self) -> Result<RawImuSample, SensorError> {
        let gyro = self.read_triple(&GYRO_REGISTERS)?;
        let accel = self.read_triple(&ACCEL_REGISTERS)?;
        Ok(RawImuSample { gyro, accel })
    }
}

/// Open the sensor on a Linux I2C character device and initialize it
#[cfg(target_os = "linux")]
pub fn open(path: &str, address: u8) -> Result<Lsm6ds<linux_embedded_hal::I2cdev>, SensorError> {
    info!("Opening IMU on {} at 0x{:02X}", path, address);
    let i2c = linux_embedded_hal::I2cdev::new(path).map_err(|e| SensorError::Bus(format!("{}: {}", path, e)))?;
    let mut imu = Lsm6ds::new(i2c, address);
    imu.init(&mut linux_embedded_hal::Delay)?;
    Ok(imu)
}

#[cfg(not(target_os = "linux"))]
pub fn open(path: &str, _address: u8) -> Result<Lsm6ds<NoI2c>, SensorError> {
    Err(SensorError::Bus(format!("{}: I2C devices are only supported on Linux", path)))
}

/// Placeholder bus type on platforms without `/dev/i2c-*`
#[cfg(not(target_os = "linux"))]
pub enum NoI2c {}

#[cfg(not(target_os = "linux"))]
impl embedded_hal::i2c::ErrorType for NoI2c {
    type Error = embedded_hal::i2c::ErrorKind;
}

#[cfg(not(target_os = "linux"))]
impl I2c for NoI2c {
    fn transaction(
        &mut self,
        _address: u8,
        _operations: &mut [embedded_hal::i2c::Operation<'_>],
    ) -> Result<(), Self::Error> {
        match *self {}
    }
}
