//! Serial line monitor
//!
//! Reads newline-delimited readings and reports each one as parsed or
//! malformed.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::{ReadingParseError, SensorReading};

/// Monitor errors
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type MonitorResult<T> = Result<T, MonitorError>;

/// One received line
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// The line parsed as a reading
    Reading {
        raw: String,
        reading: SensorReading,
    },
    /// The line could not be parsed
    Malformed {
        raw: String,
        error: ReadingParseError,
    },
}

impl MonitorEvent {
    pub fn raw(&self) -> &str {
        match self {
            MonitorEvent::Reading { raw, .. } | MonitorEvent::Malformed { raw, .. } => raw,
        }
    }
}

/// Turns a byte stream into reading events
pub struct Monitor<R> {
    reader: R,
    line_buf: Vec<u8>,
    lines_seen: u64,
}

impl<R> Monitor<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_buf: Vec::with_capacity(64),
            lines_seen: 0,
        }
    }

    /// Wait for the next non-empty line
    /// Returns Ok(None) at end of stream
    pub async fn next_event(&mut self) -> MonitorResult<Option<MonitorEvent>> {
        loop {
            self.line_buf.clear();
            if self.reader.read_until(b'\n', &mut self.line_buf).await? == 0 {
                return Ok(None);
            }

            let text = String::from_utf8_lossy(&self.line_buf);
            let raw = text.trim_end_matches(['\r', '\n']);
            if raw.trim().is_empty() {
                continue;
            }

            self.lines_seen += 1;
            let raw = raw.to_string();
            tracing::debug!("Raw data: {}", raw);

            let event = match raw.parse::<SensorReading>() {
                Ok(reading) => MonitorEvent::Reading { raw, reading },
                Err(error) => MonitorEvent::Malformed { raw, error },
            };
            return Ok(Some(event));
        }
    }

    /// Number of non-empty lines read so far
    pub fn lines_seen(&self) -> u64 {
        self.lines_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_parses_stream() {
        let input: &[u8] = b"Temp=25.3,Press=1.05\n\nTemp=bad\r\nTemp=21.0,Press=0.90";
        let mut monitor = Monitor::new(input);

        match monitor.next_event().await.unwrap() {
            Some(MonitorEvent::Reading { raw, reading }) => {
                assert_eq!(raw, "Temp=25.3,Press=1.05");
                assert_eq!(reading, SensorReading::new(25.3, 1.05));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        match monitor.next_event().await.unwrap() {
            Some(MonitorEvent::Malformed { raw, error }) => {
                assert_eq!(raw, "Temp=bad");
                assert_eq!(error, ReadingParseError::FieldCount(1));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let last = monitor.next_event().await.unwrap().unwrap();
        assert_eq!(last.raw(), "Temp=21.0,Press=0.90");
        assert!(matches!(last, MonitorEvent::Reading { .. }));

        assert!(monitor.next_event().await.unwrap().is_none());
        assert_eq!(monitor.lines_seen(), 3);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_malformed_not_fatal() {
        let input: &[u8] = b"Temp=\xff,Press=1.00\n";
        let mut monitor = Monitor::new(input);

        let event = monitor.next_event().await.unwrap().unwrap();
        assert!(matches!(
            event,
            MonitorEvent::Malformed {
                error: ReadingParseError::InvalidNumber { key: "Temp", .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_simulator_output_round_trips() {
        use crate::sensor::{ReadingGenerator, Simulator};
        use std::time::Duration;
        use tokio::io::BufReader;

        let (writer, reader) = tokio::io::duplex(1024);
        let generator = ReadingGenerator::seeded(3, 20.0..30.0, 0.8..1.2).unwrap();
        let handle = Simulator::new(generator, Duration::from_millis(1))
            .unwrap()
            .with_max_readings(5)
            .spawn(writer);

        let mut monitor = Monitor::new(BufReader::new(reader));
        let stats = handle.join().await.unwrap();
        assert_eq!(stats.sent, 5);

        let mut readings = 0;
        while let Some(event) = monitor.next_event().await.unwrap() {
            assert!(matches!(event, MonitorEvent::Reading { .. }), "{:?}", event);
            readings += 1;
        }
        assert_eq!(readings, 5);
    }
}
