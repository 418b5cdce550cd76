use core::fmt;

use crate::clock::Duration;

/// Failure of a single bus primitive.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusError<E> {
    /// An expected line transition did not happen within the allowed window.
    Timeout,
    /// Error from the underlying GPIO pin or I2C peripheral.
    Io(E),
}

/// Possible errors from a sensor transaction.
///
/// Every variant is recoverable: the caller decides whether and when to
/// start another transaction.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorError<E> {
    /// Timed out waiting for a bus transition outside the handshake.
    BusTimeout,
    /// Error from the GPIO pin or I2C peripheral.
    BusError(E),
    /// The DHT22 did not answer the start signal.
    NoResponse,
    /// A data pulse was malformed or the decoded values are out of range.
    ProtocolError,
    /// Checksum did not match the received data.
    ChecksumMismatch,
    /// The DHT22 minimum interval between transactions has not elapsed yet.
    TooSoon {
        /// Time left until the next transaction is allowed.
        retry_in: Duration,
    },
    /// The MPU6050 did not acknowledge or identify itself during initialization.
    InitError,
    /// The MPU6050 was read before [`initialize`](crate::Mpu6050::initialize) succeeded.
    NotInitialized,
}

impl<E> From<BusError<E>> for SensorError<E> {
    fn from(value: BusError<E>) -> Self {
        match value {
            BusError::Timeout => Self::BusTimeout,
            BusError::Io(e) => Self::BusError(e),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for SensorError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusTimeout => f.write_str("timed out waiting for a bus transition"),
            Self::BusError(e) => write!(f, "bus error: {e:?}"),
            Self::NoResponse => f.write_str("sensor did not respond to the start signal"),
            Self::ProtocolError => f.write_str("malformed data from sensor"),
            Self::ChecksumMismatch => f.write_str("checksum mismatch"),
            Self::TooSoon { retry_in } => {
                write!(f, "read attempted too soon, retry in {} ms", retry_in.to_millis())
            }
            Self::InitError => f.write_str("sensor initialization failed"),
            Self::NotInitialized => f.write_str("sensor not initialized"),
        }
    }
}

impl<E: fmt::Debug> core::error::Error for SensorError<E> {}
