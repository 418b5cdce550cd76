//! Sensor transaction engine for the DHT22 and MPU6050.
//!
//! This crate provides platform-agnostic drivers for the DHT22 (AM2302)
//! temperature and humidity sensor and the MPU6050 accelerometer and
//! gyroscope, built on top of the [`embedded-hal`] traits.
//!
//! Every read is one blocking, bounded transaction on the caller's thread and
//! returns a `Result`: a failed read never produces a zeroed reading, and
//! nothing is retried behind the caller's back.
//!
//! # Features
//! - Blocking synchronous API using `embedded-hal` traits
//! - Designed for `no_std` environments
//! - DHT22 single-wire protocol as an explicit state machine with measured
//!   pulse widths and checksum validation
//! - MPU6050 register engine with configurable full-scale ranges
//! - A common [`Sensor`] trait for polling either device
//!
//! # Dependencies
//! This crate depends on the following `embedded-hal` traits:
//! - [`InputPin`] and [`OutputPin`] for the DHT22 data line
//! - [`I2c`] for the MPU6050
//! - [`DelayNs`] for accurate timing
//!
//! Time for the DHT22's minimum read interval comes from a [`Clock`].
//!
//! # Optional Features
//! - `defmt`: Implements `defmt::Format` and emits log events via `defmt`
//! - `std`: Provides `clock::StdClock`, a `Clock` backed by `std::time::Instant`
//!
//! [`embedded-hal`]: https://docs.rs/embedded-hal
//! [`InputPin`]: embedded_hal::digital::InputPin
//! [`OutputPin`]: embedded_hal::digital::OutputPin
//! [`I2c`]: embedded_hal::i2c::I2c
//! [`DelayNs`]: embedded_hal::delay::DelayNs

#![cfg_attr(not(any(test, feature = "std")), no_std)]

// This must go first so the logging macros are visible to the other modules.
mod fmt;

pub mod bus;
pub mod clock;
pub mod dht22;
pub mod error;
pub mod mpu6050;
pub mod sensor;

pub use clock::{Clock, Duration, Instant};
pub use dht22::Dht22;
pub use error::{BusError, SensorError};
pub use mpu6050::Mpu6050;
pub use sensor::{Sensor, SensorReading};
