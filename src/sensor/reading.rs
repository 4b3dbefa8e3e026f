//! Sensor reading line format
//!
//! A reading travels as one text line: `Temp=25.3,Press=1.05\n`.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const TEMPERATURE_KEY: &str = "Temp";
const PRESSURE_KEY: &str = "Press";

/// Errors from parsing a reading line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadingParseError {
    #[error("Expected 2 comma-separated fields, found {0}")]
    FieldCount(usize),

    #[error("Missing '=' in field '{0}'")]
    MissingSeparator(String),

    #[error("Unexpected key '{found}', expected '{expected}'")]
    UnexpectedKey {
        expected: &'static str,
        found: String,
    },

    #[error("Invalid number '{value}' for {key}")]
    InvalidNumber {
        key: &'static str,
        value: String,
    },
}

/// One temperature/pressure sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    /// Degrees Celsius
    pub temperature: f64,
    /// MPa
    pub pressure: f64,
}

impl SensorReading {
    pub fn new(temperature: f64, pressure: f64) -> Self {
        Self {
            temperature,
            pressure,
        }
    }

    /// Newline-terminated wire line
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

/// Value text of each field, exactly as received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadingFields<'a> {
    pub temperature: &'a str,
    pub pressure: &'a str,
}

impl<'a> ReadingFields<'a> {
    /// Split a line into its keyed values without converting them
    pub fn split(line: &'a str) -> Result<Self, ReadingParseError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() != 2 {
            return Err(ReadingParseError::FieldCount(parts.len()));
        }

        Ok(Self {
            temperature: field_value(parts[0], TEMPERATURE_KEY)?,
            pressure: field_value(parts[1], PRESSURE_KEY)?,
        })
    }

    pub fn temperature_label(&self) -> String {
        format!("Temperature: {} °C", self.temperature)
    }

    pub fn pressure_label(&self) -> String {
        format!("Pressure: {} MPa", self.pressure)
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={:.1},{}={:.2}",
            TEMPERATURE_KEY, self.temperature, PRESSURE_KEY, self.pressure
        )
    }
}

impl FromStr for SensorReading {
    type Err = ReadingParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields = ReadingFields::split(line)?;
        Ok(Self {
            temperature: parse_number(fields.temperature, TEMPERATURE_KEY)?,
            pressure: parse_number(fields.pressure, PRESSURE_KEY)?,
        })
    }
}

fn field_value<'a>(field: &'a str, key: &'static str) -> Result<&'a str, ReadingParseError> {
    let (found, value) = field
        .split_once('=')
        .ok_or_else(|| ReadingParseError::MissingSeparator(field.to_string()))?;

    if found.trim() != key {
        return Err(ReadingParseError::UnexpectedKey {
            expected: key,
            found: found.to_string(),
        });
    }
    Ok(value.trim())
}

fn parse_number(value: &str, key: &'static str) -> Result<f64, ReadingParseError> {
    value.parse().map_err(|_| ReadingParseError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}
