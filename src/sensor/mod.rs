//! Sensor module - Simulated temperature/pressure readings over serial lines
//!
//! Provides:
//! - The `Temp=..,Press=..` line format and its parser
//! - A random reading generator and a cancellable periodic simulator
//! - Serial device setup (8N1, no flow control)
//! - A line monitor that turns a serial stream into parsed readings

mod generator;
mod monitor;
mod reading;
mod serial;
mod simulator;

pub use generator::*;
pub use monitor::*;
pub use reading::*;
pub use serial::*;
pub use simulator::*;

/// Default baud rate of the simulated sensor link
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default interval between readings, in milliseconds
pub const DEFAULT_INTERVAL_MS: u64 = 1000;
