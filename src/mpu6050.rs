//! MPU6050 accelerometer/gyroscope driver.
//!
//! The device powers up asleep, so [`Mpu6050::initialize`] must succeed
//! before [`Mpu6050::read`] returns data. Raw register values are 16-bit
//! two's complement, MSB first.

use embedded_hal::{delay::DelayNs, i2c::I2c};

use crate::bus::RegisterBus;
use crate::error::SensorError;

/// I2C address with AD0 tied low.
pub const DEFAULT_ADDRESS: u8 = 0x68;
/// I2C address with AD0 tied high.
pub const ALTERNATE_ADDRESS: u8 = 0x69;

/// Value of `WHO_AM_I` on a genuine MPU6050, independent of AD0.
const DEVICE_ID: u8 = 0x68;

/// Time for the oscillator to settle after waking up.
const WAKE_DELAY_MS: u32 = 100;

mod registers {
    pub const GYRO_CONFIG: u8 = 0x1B;
    pub const ACCEL_CONFIG: u8 = 0x1C;
    /// First of 14 data registers: accel X/Y/Z, temperature, gyro X/Y/Z.
    pub const ACCEL_XOUT_H: u8 = 0x3B;
    pub const PWR_MGMT_1: u8 = 0x6B;
    pub const WHO_AM_I: u8 = 0x75;
}

mod pwr_mgmt_1 {
    pub const WAKE: u8 = 0x00;
    pub const SLEEP: u8 = 0x40;
}

/// Accelerometer full-scale range.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AccelRange {
    /// ±2 g
    #[default]
    G2,
    /// ±4 g
    G4,
    /// ±8 g
    G8,
    /// ±16 g
    G16,
}

impl AccelRange {
    /// Value for `ACCEL_CONFIG` (AFS_SEL in bits 4:3).
    fn config_bits(self) -> u8 {
        (self as u8) << 3
    }

    /// LSB per g.
    pub fn sensitivity(self) -> f32 {
        match self {
            AccelRange::G2 => 16384.0,
            AccelRange::G4 => 8192.0,
            AccelRange::G8 => 4096.0,
            AccelRange::G16 => 2048.0,
        }
    }
}

/// Gyroscope full-scale range.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GyroRange {
    /// ±250 °/s
    #[default]
    Dps250,
    /// ±500 °/s
    Dps500,
    /// ±1000 °/s
    Dps1000,
    /// ±2000 °/s
    Dps2000,
}

impl GyroRange {
    /// Value for `GYRO_CONFIG` (FS_SEL in bits 4:3).
    fn config_bits(self) -> u8 {
        (self as u8) << 3
    }

    /// LSB per °/s.
    pub fn sensitivity(self) -> f32 {
        match self {
            GyroRange::Dps250 => 131.0,
            GyroRange::Dps500 => 65.5,
            GyroRange::Dps1000 => 32.8,
            GyroRange::Dps2000 => 16.4,
        }
    }
}

/// Full-scale configuration applied by [`Mpu6050::initialize`].
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Config {
    pub accel_range: AccelRange,
    pub gyro_range: GyroRange,
}

/// Three-axis measurement.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Reading returned by the MPU6050.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    /// Acceleration in g.
    pub accel: Vector3,
    /// Angular rate in degrees per second.
    pub gyro: Vector3,
    /// Die temperature in degrees Celsius.
    pub temperature: f32,
}

/// The 14 data registers captured by one burst read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterBlock(pub [u8; 14]);

impl RegisterBlock {
    fn word(&self, index: usize) -> i16 {
        i16::from_be_bytes([self.0[2 * index], self.0[2 * index + 1]])
    }

    /// Scales the raw block into physical units.
    pub fn decode(&self, config: &Config) -> Reading {
        let accel_div = config.accel_range.sensitivity();
        let gyro_div = config.gyro_range.sensitivity();

        Reading {
            accel: Vector3 {
                x: self.word(0) as f32 / accel_div,
                y: self.word(1) as f32 / accel_div,
                z: self.word(2) as f32 / accel_div,
            },
            temperature: self.word(3) as f32 / 340.0 + 36.53,
            gyro: Vector3 {
                x: self.word(4) as f32 / gyro_div,
                y: self.word(5) as f32 / gyro_div,
                z: self.word(6) as f32 / gyro_div,
            },
        }
    }
}

/// Driver for the MPU6050 accelerometer and gyroscope.
pub struct Mpu6050<I2C, D> {
    bus: RegisterBus<I2C>,
    delay: D,
    config: Config,
    initialized: bool,
}

impl<I2C, D> Mpu6050<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    /// Creates a new driver instance. Nothing is sent on the bus until
    /// [`initialize`](Self::initialize) is called.
    ///
    /// # Arguments
    ///
    /// * `i2c` - The I2C bus the device is attached to.
    /// * `delay` - A delay provider implementing the `DelayNs` trait.
    /// * `address` - [`DEFAULT_ADDRESS`] or [`ALTERNATE_ADDRESS`].
    /// * `config` - Full-scale ranges for accelerometer and gyroscope.
    pub fn new(i2c: I2C, delay: D, address: u8, config: Config) -> Self {
        Mpu6050 {
            bus: RegisterBus::new(i2c, address),
            delay,
            config,
            initialized: false,
        }
    }

    /// Full-scale ranges in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether `initialize` has succeeded since construction or the last `sleep`.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Wakes the device, verifies its identity and applies the configured
    /// full-scale ranges.
    ///
    /// # Errors
    ///
    /// Returns `SensorError::InitError` if any register access is not
    /// acknowledged or `WHO_AM_I` does not identify an MPU6050. The driver
    /// stays uninitialized in that case.
    pub fn initialize(&mut self) -> Result<(), SensorError<I2C::Error>> {
        self.initialized = false;

        if self
            .bus
            .write_register(registers::PWR_MGMT_1, pwr_mgmt_1::WAKE)
            .is_err()
        {
            warn!("mpu6050 {=u8:x}: no ack on wake-up", self.bus.address());
            return Err(SensorError::InitError);
        }
        self.delay.delay_ms(WAKE_DELAY_MS);

        match self.bus.read_register(registers::WHO_AM_I) {
            Ok(DEVICE_ID) => {}
            Ok(id) => {
                warn!("mpu6050: unexpected WHO_AM_I {=u8:x}", id);
                return Err(SensorError::InitError);
            }
            Err(_) => {
                warn!("mpu6050: WHO_AM_I read failed");
                return Err(SensorError::InitError);
            }
        }

        let gyro_bits = self.config.gyro_range.config_bits();
        let accel_bits = self.config.accel_range.config_bits();
        let ranges = self
            .bus
            .write_register(registers::GYRO_CONFIG, gyro_bits)
            .and_then(|()| self.bus.write_register(registers::ACCEL_CONFIG, accel_bits));
        if ranges.is_err() {
            warn!("mpu6050: writing full-scale configuration failed");
            return Err(SensorError::InitError);
        }

        debug!("mpu6050 {=u8:x} initialized", self.bus.address());
        self.initialized = true;
        Ok(())
    }

    /// Reads accelerometer, temperature and gyroscope registers in one burst
    /// and scales them into physical units.
    ///
    /// # Returns
    ///
    /// * `Ok(Reading)` if the burst read succeeded.
    /// * `Err(SensorError::NotInitialized)` before a successful `initialize`.
    /// * `Err(SensorError::BusError)` if the bus transaction failed.
    pub fn read(&mut self) -> Result<Reading, SensorError<I2C::Error>> {
        if !self.initialized {
            return Err(SensorError::NotInitialized);
        }

        let mut block = RegisterBlock([0; 14]);
        self.bus.read_registers(registers::ACCEL_XOUT_H, &mut block.0)?;
        trace!("mpu6050 raw block {=[u8]}", &block.0[..]);

        Ok(block.decode(&self.config))
    }

    /// Puts the device back to sleep. [`initialize`](Self::initialize) must
    /// be called again before the next read.
    pub fn sleep(&mut self) -> Result<(), SensorError<I2C::Error>> {
        self.initialized = false;
        self.bus
            .write_register(registers::PWR_MGMT_1, pwr_mgmt_1::SLEEP)?;
        Ok(())
    }

    /// Gives back the I2C bus and delay provider.
    pub fn release(self) -> (I2C, D) {
        (self.bus.release(), self.delay)
    }
}
