//! Random reading generator

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Range;
use thiserror::Error;

use super::SensorReading;

/// Default temperature range, °C
pub const DEFAULT_TEMPERATURE_RANGE: Range<f64> = 20.0..30.0;

/// Default pressure range, MPa
pub const DEFAULT_PRESSURE_RANGE: Range<f64> = 0.8..1.2;

/// Generator errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeneratorError {
    #[error("Empty {name} range: {start}..{end}")]
    EmptyRange {
        name: &'static str,
        start: f64,
        end: f64,
    },
}

/// Draws readings uniformly from fixed ranges
#[derive(Debug, Clone)]
pub struct ReadingGenerator {
    rng: StdRng,
    temperature: Range<f64>,
    pressure: Range<f64>,
}

impl ReadingGenerator {
    /// Create a generator seeded from OS entropy
    pub fn new(temperature: Range<f64>, pressure: Range<f64>) -> Result<Self, GeneratorError> {
        Self::with_rng(StdRng::from_entropy(), temperature, pressure)
    }

    /// Create a deterministic generator
    pub fn seeded(seed: u64, temperature: Range<f64>, pressure: Range<f64>) -> Result<Self, GeneratorError> {
        Self::with_rng(StdRng::seed_from_u64(seed), temperature, pressure)
    }

    fn with_rng(rng: StdRng, temperature: Range<f64>, pressure: Range<f64>) -> Result<Self, GeneratorError> {
        check_range("temperature", &temperature)?;
        check_range("pressure", &pressure)?;
        Ok(Self {
            rng,
            temperature,
            pressure,
        })
    }

    /// Draw the next reading
    pub fn next_reading(&mut self) -> SensorReading {
        SensorReading::new(
            self.rng.gen_range(self.temperature.clone()),
            self.rng.gen_range(self.pressure.clone()),
        )
    }
}

fn check_range(name: &'static str, range: &Range<f64>) -> Result<(), GeneratorError> {
    // Also rejects NaN bounds.
    if !(range.start < range.end) || !range.start.is_finite() || !range.end.is_finite() {
        return Err(GeneratorError::EmptyRange {
            name,
            start: range.start,
            end: range.end,
        });
    }
    Ok(())
}
