use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};

use crate::bus::{Level, SingleWire};
use crate::clock::{Clock, Duration, Instant};
use crate::error::{BusError, SensorError};

/// How long the start signal holds the line low, in microseconds.
const START_SIGNAL_US: u32 = 1_000;

/// Number of data bits in one transaction.
const FRAME_BITS: u8 = 40;

/// Documented measuring range of the DHT22.
const HUMIDITY_RANGE: core::ops::RangeInclusive<f32> = 0.0..=100.0;
const TEMPERATURE_RANGE: core::ops::RangeInclusive<f32> = -40.0..=80.0;

/// Timing parameters of the DHT22 driver.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    /// Minimum time between two transactions.
    pub min_interval: Duration,
    /// Maximum time (in microseconds) to wait for the line to change state.
    pub response_timeout_us: u32,
    /// High pulses at least this long (in microseconds) are read as `1`.
    pub bit_threshold_us: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            min_interval: Duration::secs(2),
            response_timeout_us: 100,
            bit_threshold_us: 50,
        }
    }
}

impl Config {
    /// 1 Hz polling. Faster than the datasheet's 0.5 Hz, so the sensor may
    /// answer with its previous measurement.
    pub fn fast() -> Self {
        Config {
            min_interval: Duration::secs(1),
            ..Config::default()
        }
    }
}

/// Phases of a DHT22 transaction.
///
/// Each phase names the work in progress: `Idle` sends the start signal,
/// `StartSignalSent` waits for the sensor to pull the line low,
/// `AwaitingResponse` follows its 80us low / 80us high handshake.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    StartSignalSent,
    AwaitingResponse,
    /// Index of the next bit to read, MSB of byte 0 first.
    ReadingBits(u8),
    ChecksumVerify,
    Done,
    Failed,
}

/// Reading returned by the DHT22 sensor.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    /// Temperature in degrees Celsius.
    pub temperature: f32,
    /// Relative humidity in percent.
    pub relative_humidity: f32,
}

/// The 5 bytes of one transaction: humidity, temperature, checksum.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawSample(pub [u8; 5]);

impl RawSample {
    /// Sets bit `index` of the frame, counting from the MSB of byte 0.
    fn set_bit(&mut self, index: u8) {
        let index = usize::from(index);
        self.0[index / 8] |= 1 << (7 - index % 8);
    }

    fn checksum(&self) -> u8 {
        self.0[..4].iter().fold(0u8, |sum, v| sum.wrapping_add(*v))
    }

    /// Sum of the first 4 bytes modulo 256 must equal the 5th.
    pub fn verify_checksum<E>(&self) -> Result<(), SensorError<E>> {
        if self.checksum() == self.0[4] {
            Ok(())
        } else {
            Err(SensorError::ChecksumMismatch)
        }
    }

    /// Validates the frame and converts it into a `Reading`.
    ///
    /// # Errors
    ///
    /// * `ChecksumMismatch` if the checksum byte is wrong.
    /// * `ProtocolError` if the values are outside the sensor's range.
    pub fn decode<E>(&self) -> Result<Reading, SensorError<E>> {
        self.verify_checksum()?;

        let [hum_hi, hum_lo, temp_hi, temp_lo, _] = self.0;

        let joined_humidity = u16::from_be_bytes([hum_hi, hum_lo]);
        let relative_humidity = joined_humidity as f32 / 10.0;

        let is_temp_negative = (temp_hi >> 7) != 0;
        let temp_hi = temp_hi & 0b0111_1111;
        let joined_temp = u16::from_be_bytes([temp_hi, temp_lo]);
        let mut temperature = joined_temp as f32 / 10.0;
        if is_temp_negative {
            temperature = -temperature;
        }

        if !HUMIDITY_RANGE.contains(&relative_humidity) || !TEMPERATURE_RANGE.contains(&temperature)
        {
            return Err(SensorError::ProtocolError);
        }

        Ok(Reading {
            temperature,
            relative_humidity,
        })
    }

    /// Builds the frame a sensor would send for `reading`, rounding to the
    /// nearest 0.1 step. Useful for simulating a sensor.
    pub fn encode(reading: &Reading) -> Self {
        let humidity = (reading.relative_humidity * 10.0 + 0.5) as u16;

        let negative = reading.temperature < 0.0;
        let magnitude = if negative {
            -reading.temperature
        } else {
            reading.temperature
        };
        let mut temperature = (magnitude * 10.0 + 0.5) as u16 & 0x7FFF;
        if negative {
            temperature |= 0x8000;
        }

        let [hum_hi, hum_lo] = humidity.to_be_bytes();
        let [temp_hi, temp_lo] = temperature.to_be_bytes();
        let mut sample = RawSample([hum_hi, hum_lo, temp_hi, temp_lo, 0]);
        sample.0[4] = sample.checksum();
        sample
    }
}

/// Driver for the DHT22 temperature and humidity sensor.
pub struct Dht22<PIN, D, C> {
    wire: SingleWire<PIN, D>,
    clock: C,
    config: Config,
    state: State,
    last_start: Option<Instant>,
}

impl<PIN, D, C, E> Dht22<PIN, D, C>
where
    PIN: InputPin<Error = E> + OutputPin<Error = E>,
    D: DelayNs,
    C: Clock,
{
    /// Creates a new instance of the DHT22 driver.
    ///
    /// # Arguments
    ///
    /// * `pin` - The GPIO pin connected to the DHT22 data line. Must support both input and output.
    /// * `delay` - A delay provider implementing the `DelayNs` trait.
    /// * `clock` - Time source for the minimum interval between reads.
    pub fn new(pin: PIN, delay: D, clock: C) -> Self {
        Self::with_config(pin, delay, clock, Config::default())
    }

    /// Like [`new`](Self::new), with explicit timing parameters.
    pub fn with_config(pin: PIN, delay: D, clock: C, config: Config) -> Self {
        Dht22 {
            wire: SingleWire::new(pin, delay),
            clock,
            config,
            state: State::Idle,
            last_start: None,
        }
    }

    /// Timing parameters in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Phase the last transaction ended in.
    pub fn state(&self) -> State {
        self.state
    }

    /// Reads a temperature and humidity measurement from the DHT22 sensor.
    ///
    /// Runs one transaction through the states of [`State`]: start signal,
    /// response handshake, 40 data bits, checksum. The read is refused
    /// without touching the line if the previous transaction started less
    /// than `min_interval` ago.
    ///
    /// # Returns
    ///
    /// * `Ok(Reading)` if the read is successful and the checksum is valid.
    /// * `Err(SensorError)` otherwise. Nothing is retried.
    pub fn read(&mut self) -> Result<Reading, SensorError<E>> {
        let now = self.clock.now();
        if let Some(retry_in) = self.cooldown_remaining(now) {
            debug!("dht22: too soon, retry in {=u64} us", retry_in.ticks());
            return Err(SensorError::TooSoon { retry_in });
        }

        self.state = State::Idle;
        let result = self.transact(now);
        if result.is_ok() {
            self.state = State::Done;
        } else {
            warn!("dht22: transaction failed in {}", self.state);
            self.state = State::Failed;
        }
        result
    }

    /// Time left until the next transaction may start, if any.
    fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last_start?;
        let elapsed = now.checked_duration_since(last)?;
        if elapsed < self.config.min_interval {
            Some(self.config.min_interval - elapsed)
        } else {
            None
        }
    }

    /// Runs one transaction, entering each phase in `self.state` as it goes.
    fn transact(&mut self, now: Instant) -> Result<Reading, SensorError<E>> {
        self.start()?;
        self.last_start = Some(now);

        self.state = State::StartSignalSent;
        self.wait_response(Level::Low)?;

        self.state = State::AwaitingResponse;
        self.wait_response(Level::High)?;
        self.wait_response(Level::Low)?;

        let mut sample = RawSample::default();
        for index in 0..FRAME_BITS {
            self.state = State::ReadingBits(index);
            if self.read_bit()? {
                sample.set_bit(index);
            }
        }

        self.state = State::ChecksumVerify;
        trace!("dht22 raw sample {}", sample);
        sample.decode()
    }

    /// Sends the start signal: the line is held low for 1 ms, then released.
    fn start(&mut self) -> Result<(), SensorError<E>> {
        self.wire.assert_level(Level::Low, START_SIGNAL_US)?;
        self.wire.drive(Level::High)?;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        Duration::micros(u64::from(self.config.response_timeout_us))
    }

    /// Waits for one edge of the sensor's response.
    fn wait_response(&mut self, level: Level) -> Result<(), SensorError<E>> {
        let timeout = self.timeout();
        match self.wire.wait_for(level, timeout, &self.clock) {
            Ok(_) => Ok(()),
            Err(BusError::Timeout) => Err(SensorError::NoResponse),
            Err(BusError::Io(e)) => Err(SensorError::BusError(e)),
        }
    }

    /// Reads a single bit from the sensor.
    ///
    /// Each bit starts with ~50us low, followed by a high pulse of ~26us
    /// for `0` or ~70us for `1`. The high pulse is timed with the clock
    /// from its rising edge until the line falls again.
    fn read_bit(&mut self) -> Result<bool, SensorError<E>> {
        let timeout = self.timeout();

        self.wire.wait_for(Level::High, timeout, &self.clock)?;

        let high = match self.wire.wait_for(Level::Low, timeout, &self.clock) {
            Ok(high) => high,
            Err(BusError::Timeout) => return Err(SensorError::ProtocolError),
            Err(BusError::Io(e)) => return Err(SensorError::BusError(e)),
        };

        Ok(high >= Duration::micros(u64::from(self.config.bit_threshold_us)))
    }

    /// Gives back the pin, delay provider and clock.
    pub fn release(self) -> (PIN, D, C) {
        let (pin, delay) = self.wire.release();
        (pin, delay, self.clock)
    }
}


#[cfg(test)]
mod tests {
    use super::sim::{SimDelay, SimPin, SimTime};
    use super::*;
    use crate::clock::tests::ManualClock;
    use embedded_hal_mock::eh1::MockError;
    use embedded_hal_mock::eh1::delay::CheckedDelay;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::delay::Transaction as DelayTx;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTx,
    };

    // Humidity 40.0%, temperature 24.6C, checksum 0x87
    const FRAME: [u8; 5] = [0x01, 0x90, 0x00, 0xF6, 0x87];
    const READING: Reading = Reading {
        relative_humidity: 40.0,
        temperature: 24.6,
    };

    // Pin read of 3us and 1us of overhead on every delay call.
    fn simulated(frame: [u8; 5]) -> (SimTime, SimPin, SimDelay) {
        let time = SimTime::default();
        let pin = SimPin::sensor(&time, frame, 3_000);
        let delay = SimDelay::new(&time, 1_000);
        (time, pin, delay)
    }

    #[test]
    fn test_start_sequence() {
        let mut pin = PinMock::new(&[PinTx::set(PinState::Low), PinTx::set(PinState::High)]);

        let delay_transactions = vec![DelayTx::delay_us(1_000)];
        let mut delay = CheckedDelay::new(&delay_transactions);
        let clock = ManualClock::default();

        let mut dht = Dht22::new(pin.clone(), &mut delay, &clock);
        dht.start().unwrap();

        pin.done();
        delay.done();
    }

    #[test]
    fn test_read_valid() {
        let (time, pin, delay) = simulated(FRAME);

        let mut dht = Dht22::new(pin, delay, time);
        assert_eq!(dht.read().unwrap(), READING);
        assert_eq!(dht.state(), State::Done);
    }

    #[test]
    fn test_read_independent_of_poll_cost() {
        for read_cost_ns in [250, 1_000, 2_000, 5_000, 8_000] {
            for delay_overhead_ns in [0, 1_000, 20_000] {
                let time = SimTime::default();
                let pin = SimPin::sensor(&time, FRAME, read_cost_ns);
                let delay = SimDelay::new(&time, delay_overhead_ns);

                let mut dht = Dht22::new(pin, delay, time);
                assert_eq!(
                    dht.read().unwrap(),
                    READING,
                    "read cost {read_cost_ns} ns, delay overhead {delay_overhead_ns} ns"
                );
            }
        }
    }

    #[test]
    fn test_read_other_frames() {
        for frame in [
            [0x03, 0xE8, 0x80, 0x96, 0x01], // 100.0%, -15.0C
            [0x00, 0x00, 0x00, 0x00, 0x00], // 0.0%, 0.0C
            [0x02, 0x8C, 0x80, 0x65, 0x73], // 65.2%, -10.1C
        ] {
            let (time, pin, delay) = simulated(frame);
            let mut dht = Dht22::new(pin, delay, time);
            assert_eq!(
                dht.read().unwrap(),
                RawSample(frame).decode::<()>().unwrap()
            );
        }
    }

    #[test]
    fn test_read_negative_temperature() {
        // 65.2% -> 0x028C, -10.1C -> 0x8065, checksum 0x02 + 0x8C + 0x80 + 0x65 = 0x173 -> 0x73
        let (time, pin, delay) = simulated([0x02, 0x8C, 0x80, 0x65, 0x73]);

        let mut dht = Dht22::new(pin, delay, time);
        assert_eq!(
            dht.read().unwrap(),
            Reading {
                relative_humidity: 65.2,
                temperature: -10.1,
            }
        );
    }

    #[test]
    fn test_read_invalid() {
        let (time, pin, delay) = simulated([0x01, 0x90, 0x00, 0xF6, 0x81]); // Wrong checksum value

        let mut dht = Dht22::new(pin, delay, time);
        assert_eq!(dht.read().unwrap_err(), SensorError::ChecksumMismatch);
        assert_eq!(dht.state(), State::Failed);
    }

    #[test]
    fn test_no_response() {
        let time = SimTime::default();
        let pin = SimPin::silent(&time, 2_000);
        let delay = SimDelay::new(&time, 0);

        let mut dht = Dht22::new(pin, delay, time);
        assert_eq!(dht.read().unwrap_err(), SensorError::NoResponse);
        assert_eq!(dht.state(), State::Failed);
    }

    #[test]
    fn test_pulse_never_ends() {
        let (time, pin, delay) = simulated(FRAME);

        let mut dht = Dht22::new(pin.stuck_high_in_bit(12), delay, time);
        assert_eq!(dht.read().unwrap_err(), SensorError::ProtocolError);
    }

    #[test]
    fn test_line_stuck_low() {
        let (time, pin, delay) = simulated(FRAME);

        let mut dht = Dht22::new(pin.stuck_low_before_bit(7), delay, time);
        assert_eq!(dht.read().unwrap_err(), SensorError::BusTimeout);
    }

    #[test]
    fn test_pin_error() {
        let mut pin = PinMock::new(&[
            PinTx::set(PinState::Low).with_error(MockError::Io(std::io::ErrorKind::NotConnected))
        ]);
        let clock = ManualClock::default();

        let mut dht = Dht22::new(pin.clone(), NoopDelay, &clock);
        assert_eq!(
            dht.read().unwrap_err(),
            SensorError::BusError(MockError::Io(std::io::ErrorKind::NotConnected))
        );

        pin.done();
    }

    #[test]
    fn test_decode_positive_temp() {
        // Humidity: 55.5% -> [0x02, 0x2B] => 555
        // Temperature: 24.6C -> [0x00, 0xF6] => 246
        let sample = RawSample([0x02, 0x2B, 0x00, 0xF6, 0x23]);

        assert_eq!(
            sample.decode::<()>().unwrap(),
            Reading {
                relative_humidity: 55.5,
                temperature: 24.6,
            }
        );
    }

    #[test]
    fn test_decode_negative_temp() {
        // Humidity: 40.0% -> [0x01, 0x90] => 400
        // Temperature: -1.0C -> [0x80, 0x0A]
        // Bit 7 of temp_hi is 1 => negative
        // Clear sign bit: 0x80 & 0x7F = 0x00, so [0x00, 0x0A] = 10 => 1.0 then negated
        let sample = RawSample([0x01, 0x90, 0x80, 0x0A, 0x1B]);

        assert_eq!(
            sample.decode::<()>().unwrap(),
            Reading {
                relative_humidity: 40.0,
                temperature: -1.0,
            }
        );
    }

    #[test]
    fn test_decode_out_of_range() {
        // Humidity 100.1%
        let sample = RawSample([0x03, 0xE9, 0x00, 0xF6, 0xE2]);
        assert_eq!(sample.decode::<()>().unwrap_err(), SensorError::ProtocolError);

        // Temperature -40.1C
        let sample = RawSample([0x01, 0x90, 0x81, 0x91, 0xA3]);
        assert_eq!(sample.decode::<()>().unwrap_err(), SensorError::ProtocolError);
    }

    #[test]
    fn test_decode_checksum_mismatch() {
        for bad in [0x00, 0x86, 0x88, 0xFF] {
            let sample = RawSample([0x01, 0x90, 0x00, 0xF6, bad]);
            assert_eq!(
                sample.decode::<()>().unwrap_err(),
                SensorError::ChecksumMismatch
            );
        }
    }

    #[test]
    fn test_decode_checksum_wraps() {
        // 0x03 + 0xE8 + 0x80 + 0x96 = 0x201 -> 0x01
        let sample = RawSample([0x03, 0xE8, 0x80, 0x96, 0x01]);
        assert_eq!(
            sample.decode::<()>().unwrap(),
            Reading {
                relative_humidity: 100.0,
                temperature: -15.0,
            }
        );
    }

    #[test]
    fn test_encode_decode_within_quantization() {
        for (temperature, relative_humidity) in [
            (24.63, 55.51),
            (-12.34, 0.0),
            (-40.0, 100.0),
            (80.0, 3.17),
            (0.04, 99.96),
        ] {
            let original = Reading {
                temperature,
                relative_humidity,
            };
            let decoded = RawSample::encode(&original).decode::<()>().unwrap();
            assert!((decoded.temperature - temperature).abs() <= 0.05 + f32::EPSILON * 100.0);
            assert!(
                (decoded.relative_humidity - relative_humidity).abs()
                    <= 0.05 + f32::EPSILON * 100.0
            );
        }
    }

    #[test]
    fn test_too_soon() {
        let (time, pin, delay) = simulated(FRAME);

        let mut dht = Dht22::new(pin, delay, time.clone());
        let started = time.now();
        dht.read().unwrap();

        for advance_ms in [0, 500, 1_400] {
            time.advance_ms(advance_ms);
            let elapsed = time.now().checked_duration_since(started).unwrap();
            assert_eq!(
                dht.read().unwrap_err(),
                SensorError::TooSoon {
                    retry_in: Duration::secs(2) - elapsed
                }
            );
        }
        // A refused read does not change the last transaction's state.
        assert_eq!(dht.state(), State::Done);

        time.advance_ms(100);
        assert_eq!(dht.read().unwrap(), READING);
    }

    #[test]
    fn test_failed_read_starts_interval() {
        let (time, pin, delay) = simulated([0x01, 0x90, 0x00, 0xF6, 0x00]);

        let mut dht = Dht22::new(pin, delay, time.clone());
        assert_eq!(dht.read().unwrap_err(), SensorError::ChecksumMismatch);

        time.advance_ms(1_000);
        assert!(matches!(
            dht.read().unwrap_err(),
            SensorError::TooSoon { .. }
        ));

        time.advance_ms(1_000);
        assert_eq!(dht.read().unwrap_err(), SensorError::ChecksumMismatch);
    }

    #[test]
    fn test_fast_mode_interval() {
        let (time, pin, delay) = simulated(FRAME);

        let mut dht = Dht22::with_config(pin, delay, time.clone(), Config::fast());
        dht.read().unwrap();
        time.advance_ms(1_000);
        assert_eq!(dht.read().unwrap(), READING);
    }

    #[test]
    fn test_release() {
        let mut pin = PinMock::new(&[]);
        let clock = ManualClock::default();

        let dht = Dht22::new(pin.clone(), NoopDelay, &clock);
        let (_pin, _delay, released) = dht.release();
        assert_eq!(released.now().ticks(), 0);

        pin.done();
    }
}
