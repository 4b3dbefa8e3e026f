//! Periodic sensor simulator
//!
//! Writes one reading per tick to a byte sink until stopped.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::ReadingGenerator;

/// Simulator errors
#[derive(Error, Debug)]
pub enum SimulatorError {
    #[error("Simulator task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Interval must be non-zero")]
    ZeroInterval,
}

pub type SimulatorResult<T> = Result<T, SimulatorError>;

/// Counters reported when the simulator stops
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimulatorStats {
    /// Lines written
    pub sent: u64,
    /// Lines that failed to write
    pub failed: u64,
}

/// Emits generated readings at a fixed cadence
pub struct Simulator {
    generator: ReadingGenerator,
    interval: Duration,
    max_readings: Option<u64>,
}

/// Handle to a running simulator task
pub struct SimulatorHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<SimulatorStats>,
}

impl SimulatorHandle {
    /// Sender that stops the simulator when a message is sent
    pub fn stop_signal(&self) -> mpsc::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Wait for the simulator to finish and collect its stats
    pub async fn join(self) -> SimulatorResult<SimulatorStats> {
        let SimulatorHandle { shutdown_tx, task } = self;
        let stats = task.await?;
        drop(shutdown_tx);
        Ok(stats)
    }
}

impl Simulator {
    pub fn new(generator: ReadingGenerator, interval: Duration) -> SimulatorResult<Self> {
        if interval.is_zero() {
            return Err(SimulatorError::ZeroInterval);
        }
        Ok(Self {
            generator,
            interval,
            max_readings: None,
        })
    }

    /// Stop after this many write attempts
    pub fn with_max_readings(mut self, max_readings: u64) -> Self {
        self.max_readings = Some(max_readings);
        self
    }

    /// Run the simulator in a background task
    pub fn spawn<W>(self, sink: W) -> SimulatorHandle
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(self.run(sink, shutdown_rx));
        SimulatorHandle { shutdown_tx, task }
    }

    /// Write readings until the shutdown channel fires or closes
    pub async fn run<W>(mut self, mut sink: W, mut shutdown_rx: mpsc::Receiver<()>) -> SimulatorStats
    where
        W: AsyncWrite + Unpin,
    {
        let mut stats = SimulatorStats::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Simulating sensor every {:?}", self.interval);

        loop {
            if let Some(max) = self.max_readings {
                if stats.sent + stats.failed >= max {
                    break;
                }
            }

            tokio::select! {
                _ = ticker.tick() => {
                    let line = self.generator.next_reading().to_line();
                    match write_line(&mut sink, &line).await {
                        Ok(()) => {
                            stats.sent += 1;
                            tracing::info!("Sent: {}", line.trim_end());
                        }
                        Err(e) => {
                            stats.failed += 1;
                            tracing::warn!("Error writing data: {}", e);
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        tracing::info!("Simulator stopped: {} sent, {} failed", stats.sent, stats.failed);
        stats
    }
}

async fn write_line<W: AsyncWrite + Unpin>(sink: &mut W, line: &str) -> std::io::Result<()> {
    sink.write_all(line.as_bytes()).await?;
    sink.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{SensorReading, DEFAULT_PRESSURE_RANGE, DEFAULT_TEMPERATURE_RANGE};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::time::Instant;

    fn generator() -> ReadingGenerator {
        ReadingGenerator::seeded(1, DEFAULT_TEMPERATURE_RANGE, DEFAULT_PRESSURE_RANGE).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_lines_on_schedule() {
        let (writer, reader) = tokio::io::duplex(1024);
        let start = Instant::now();

        let handle = Simulator::new(generator(), Duration::from_secs(1))
            .unwrap()
            .with_max_readings(3)
            .spawn(writer);

        let mut lines = BufReader::new(reader).lines();
        for _ in 0..3 {
            let line = lines.next_line().await.unwrap().unwrap();
            let reading: SensorReading = line.parse().unwrap();
            assert!(DEFAULT_TEMPERATURE_RANGE.contains(&reading.temperature));
        }

        let stats = handle.join().await.unwrap();
        assert_eq!(stats, SimulatorStats { sent: 3, failed: 0 });
        // First line goes out immediately, then one per interval.
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_ends_run() {
        let (writer, reader) = tokio::io::duplex(1024);
        let handle = Simulator::new(generator(), Duration::from_secs(1)).unwrap().spawn(writer);

        let mut lines = BufReader::new(reader).lines();
        lines.next_line().await.unwrap().unwrap();

        handle.stop_signal().send(()).await.unwrap();
        let stats = handle.join().await.unwrap();
        assert!(stats.sent >= 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failures_are_counted() {
        let (writer, reader) = tokio::io::duplex(64);
        drop(reader);

        let stats = Simulator::new(generator(), Duration::from_millis(10))
            .unwrap()
            .with_max_readings(2)
            .spawn(writer)
            .join()
            .await
            .unwrap();
        assert_eq!(stats, SimulatorStats { sent: 0, failed: 2 });
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(matches!(
            Simulator::new(generator(), Duration::ZERO),
            Err(SimulatorError::ZeroInterval)
        ));
    }
}
