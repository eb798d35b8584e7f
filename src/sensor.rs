//! Uplink payload source
//!
//! The application reads a 16-bit light level and sends it big-endian as
//! a two byte payload.

use rand_core::RngCore;

/// Upper bound (exclusive) of the dummy light readings
pub const DUMMY_LIGHT_RANGE: u32 = 32_000;

/// Light level source
pub trait LightSensor {
    /// Read the current light level
    fn read_light(&mut self) -> u16;
}

impl<F: FnMut() -> u16> LightSensor for F {
    fn read_light(&mut self) -> u16 {
        self()
    }
}

/// A single light measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LightReading(pub u16);

impl LightReading {
    /// Take a reading from a sensor
    pub fn sample<L: LightSensor + ?Sized>(sensor: &mut L) -> Self {
        Self(sensor.read_light())
    }

    /// Payload bytes, high byte first
    pub fn to_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

/// Dummy sensor returning pseudo-random levels in `0..32000`
pub struct RandomLight<R: RngCore> {
    rng: R,
}

impl<R: RngCore> RandomLight<R> {
    /// Wrap a random number generator
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: RngCore> LightSensor for RandomLight<R> {
    fn read_light(&mut self) -> u16 {
        (self.rng.next_u32() % DUMMY_LIGHT_RANGE) as u16
    }
}
