//! Uniform polling interface over all supported sensors.

use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
    i2c::I2c,
};

use crate::clock::Clock;
use crate::error::SensorError;
use crate::{dht22, mpu6050};

/// A reading from any supported sensor.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SensorReading {
    /// Temperature and humidity from a DHT22.
    Climate(dht22::Reading),
    /// Acceleration, angular rate and die temperature from an MPU6050.
    Motion(mpu6050::Reading),
}

/// A device that produces a reading on demand.
pub trait Sensor {
    /// Error type of the underlying bus.
    type BusError;

    /// Runs one transaction and returns its reading.
    ///
    /// Blocks only for the duration of the bus protocol. Failures are always
    /// reported as errors; the caller decides whether to retry.
    fn poll(&mut self) -> Result<SensorReading, SensorError<Self::BusError>>;
}

impl<S: Sensor + ?Sized> Sensor for &mut S {
    type BusError = S::BusError;

    fn poll(&mut self) -> Result<SensorReading, SensorError<Self::BusError>> {
        (**self).poll()
    }
}

impl<PIN, D, C, E> Sensor for dht22::Dht22<PIN, D, C>
where
    PIN: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayNs,
    C: Clock,
{
    type BusError = E;

    fn poll(&mut self) -> Result<SensorReading, SensorError<E>> {
        self.read().map(SensorReading::Climate)
    }
}

impl<I2C, D> Sensor for mpu6050::Mpu6050<I2C, D>
where
    I2C: I2c,
    D: DelayNs,
{
    type BusError = I2C::Error;

    fn poll(&mut self) -> Result<SensorReading, SensorError<I2C::Error>> {
        self.read().map(SensorReading::Motion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht22::sim::{SimDelay, SimPin, SimTime};
    use crate::dht22::{Dht22, RawSample};
    use crate::mpu6050::{Config, DEFAULT_ADDRESS, Mpu6050};
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction as I2cTx};

    fn poll_twice<S: Sensor>(
        mut sensor: S,
    ) -> [Result<SensorReading, SensorError<S::BusError>>; 2] {
        [sensor.poll(), sensor.poll()]
    }

    #[test]
    fn test_poll_dht22() {
        let reading = dht22::Reading {
            temperature: -5.5,
            relative_humidity: 80.2,
        };
        let time = SimTime::default();
        let pin = SimPin::sensor(&time, RawSample::encode(&reading).0, 2_000);
        let delay = SimDelay::new(&time, 0);

        let dht = Dht22::new(pin, delay, time);
        let [first, second] = poll_twice(dht);

        assert_eq!(first.unwrap(), SensorReading::Climate(reading));
        assert!(matches!(second, Err(SensorError::TooSoon { .. })));
    }

    #[test]
    fn test_poll_mpu6050() {
        let expectations = [
            I2cTx::write(DEFAULT_ADDRESS, vec![0x6B, 0x00]),
            I2cTx::write_read(DEFAULT_ADDRESS, vec![0x75], vec![0x68]),
            I2cTx::write(DEFAULT_ADDRESS, vec![0x1B, 0x00]),
            I2cTx::write(DEFAULT_ADDRESS, vec![0x1C, 0x00]),
            I2cTx::write_read(
                DEFAULT_ADDRESS,
                vec![0x3B],
                vec![0x40, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            ),
        ];
        let mut i2c = I2cMock::new(&expectations);

        let mut mpu = Mpu6050::new(i2c.clone(), NoopDelay, DEFAULT_ADDRESS, Config::default());
        let [before, again] = poll_twice(&mut mpu);
        assert_eq!(before.unwrap_err(), SensorError::NotInitialized);
        assert_eq!(again.unwrap_err(), SensorError::NotInitialized);

        mpu.initialize().unwrap();
        match mpu.poll().unwrap() {
            SensorReading::Motion(reading) => {
                assert_eq!(reading.accel.x, 1.0);
                assert_eq!(reading.gyro.z, 0.0);
                assert_eq!(reading.temperature, 36.53);
            }
            other => panic!("unexpected reading {other:?}"),
        }

        i2c.done();
    }
}
