//! Serial bus access behind object-safe traits.
//!
//! The worker only ever talks to [`BusLink`]/[`BusOpener`], so tests can
//! substitute a simulated bus. The production implementation sits on
//! `tokio-serial` with fixed 8N1 framing.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{self, Instant};
use tokio_serial::{
    ClearBuffer, DataBits, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits,
};

/// Failures surfaced to a scan job. Everything here ends up as the job's
/// `error` string; nothing propagates past the worker loop.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to open {port} at {baud} baud: {source}")]
    Connect {
        port: String,
        baud: u32,
        #[source]
        source: tokio_serial::Error,
    },
    #[error("bus i/o error: {0}")]
    Io(#[from] io::Error),
}

/// One open connection to a physical bus.
#[async_trait]
pub trait BusLink: Send {
    /// Discard any stale bytes sitting in the input buffer.
    async fn clear_input(&mut self) -> io::Result<()>;

    /// Write one request frame to the bus.
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Read up to `max_len` response bytes, bounded by `timeout`.
    ///
    /// A timeout is not an error: whatever arrived by the deadline is
    /// returned, possibly empty. Validation decides what it means.
    async fn read_response(&mut self, max_len: usize, timeout: Duration) -> io::Result<Vec<u8>>;
}

/// Factory for [`BusLink`]s, one call per (re)open.
#[async_trait]
pub trait BusOpener: Send + Sync {
    async fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn BusLink>, ScanError>;
}

/// Opens real serial ports via `tokio-serial`.
#[derive(Debug, Default)]
pub struct SerialOpener;

#[async_trait]
impl BusOpener for SerialOpener {
    async fn open(
        &self,
        port: &str,
        baud_rate: u32,
        timeout: Duration,
    ) -> Result<Box<dyn BusLink>, ScanError> {
        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(timeout)
            .open_native_async()
            .map_err(|source| ScanError::Connect {
                port: port.to_string(),
                baud: baud_rate,
                source,
            })?;
        Ok(Box::new(SerialLink { stream }))
    }
}

/// A live RS-485 connection.
pub struct SerialLink {
    stream: SerialStream,
}

#[async_trait]
impl BusLink for SerialLink {
    async fn clear_input(&mut self) -> io::Result<()> {
        self.stream
            .clear(ClearBuffer::Input)
            .map_err(io::Error::from)
    }

    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await
    }

    async fn read_response(&mut self, max_len: usize, timeout: Duration) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max_len];
        let mut filled = 0usize;
        let deadline = Instant::now() + timeout;
        while filled < max_len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match time::timeout(remaining, self.stream.read(&mut buf[filled..])).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => return Err(e),
                Err(_) => break, // deadline hit, keep what we have
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}
