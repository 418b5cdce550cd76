//! Bus primitives the sensor engines are built on.
//!
//! [`SingleWire`] drives and measures one open-drain GPIO line,
//! [`RegisterBus`] talks to one device on a register-addressed I2C bus.
//! Both own their bus handle for the lifetime of the driver.

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
    i2c::I2c,
};

use crate::clock::{Clock, Duration};
use crate::error::BusError;

/// Logic level of a digital line.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Timed access to a single bidirectional data line.
///
/// Durations are measured with a [`Clock`] while the line is polled as fast
/// as the pin allows, so the resolution is one pin read, independent of
/// how long the polling loop takes per iteration.
pub struct SingleWire<PIN, D> {
    pin: PIN,
    delay: D,
}

impl<PIN, D, E> SingleWire<PIN, D>
where
    PIN: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayNs,
{
    /// Takes ownership of the data line and a delay provider.
    pub fn new(pin: PIN, delay: D) -> Self {
        SingleWire { pin, delay }
    }

    /// Drives the line to `level` and holds it for `duration_us`.
    pub fn assert_level(&mut self, level: Level, duration_us: u32) -> Result<(), BusError<E>> {
        self.drive(level)?;
        self.delay.delay_us(duration_us);
        Ok(())
    }

    /// Drives the line to `level` and returns immediately.
    pub fn drive(&mut self, level: Level) -> Result<(), BusError<E>> {
        let result = match level {
            Level::Low => self.pin.set_low(),
            Level::High => self.pin.set_high(),
        };
        result.map_err(BusError::Io)
    }

    /// Reads the current level of the line.
    pub fn sample_level(&mut self) -> Result<Level, BusError<E>> {
        if self.pin.is_high().map_err(BusError::Io)? {
            Ok(Level::High)
        } else {
            Ok(Level::Low)
        }
    }

    /// Waits until the line reaches `level`.
    ///
    /// Returns the time spent waiting according to `clock`, which is the
    /// remaining duration of the opposite level.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Timeout` if the line did not change within
    /// `timeout`.
    pub fn wait_for<C: Clock>(
        &mut self,
        level: Level,
        timeout: Duration,
        clock: &C,
    ) -> Result<Duration, BusError<E>> {
        let start = clock.now();
        loop {
            let elapsed = clock
                .now()
                .checked_duration_since(start)
                .unwrap_or(Duration::from_ticks(0));
            if self.sample_level()? == level {
                return Ok(elapsed);
            }
            if elapsed >= timeout {
                return Err(BusError::Timeout);
            }
        }
    }

    /// Gives back the pin and delay provider.
    pub fn release(self) -> (PIN, D) {
        (self.pin, self.delay)
    }
}

/// One device on a register-addressed I2C bus.
pub struct RegisterBus<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> RegisterBus<I2C> {
    /// Binds `i2c` to the device at the 7-bit `address`.
    pub fn new(i2c: I2C, address: u8) -> Self {
        RegisterBus { i2c, address }
    }

    /// The 7-bit device address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Writes `value` to a single register.
    pub fn write_register(&mut self, register: u8, value: u8) -> Result<(), BusError<I2C::Error>> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(BusError::Io)
    }

    /// Reads a single register.
    pub fn read_register(&mut self, register: u8) -> Result<u8, BusError<I2C::Error>> {
        let mut buf = [0];
        self.read_registers(register, &mut buf)?;
        Ok(buf[0])
    }

    /// Reads `buf.len()` consecutive registers starting at `register` in a
    /// single bus transaction.
    pub fn read_registers(
        &mut self,
        register: u8,
        buf: &mut [u8],
    ) -> Result<(), BusError<I2C::Error>> {
        self.i2c
            .write_read(self.address, &[register], buf)
            .map_err(BusError::Io)
    }

    /// Gives back the I2C bus.
    pub fn release(self) -> I2C {
        self.i2c
    }
}
