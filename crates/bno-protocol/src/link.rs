use crate::metrics::StickMetrics;
use crate::Result;
use serial_transport::{Transport, TransportError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default receive budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);
/// Capacity of a single read.
pub const READ_CAPACITY: usize = 1024;

/// Request/response discipline over an exclusively owned transport.
pub struct Link<T: Transport> {
    transport: T,
    metrics: Option<StickMetrics>,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: StickMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub(crate) fn metrics(&self) -> Option<&StickMetrics> {
        self.metrics.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Write a whole frame; a partial write is a [`TransportError::ShortWrite`].
    pub fn send(&mut self, frame: &[u8]) -> Result<()> {
        let written = self.transport.write(frame)?;
        if written != frame.len() {
            return Err(TransportError::ShortWrite {
                expected: frame.len(),
                written,
            }
            .into());
        }
        debug!(len = frame.len(), "frame sent");
        if let Some(m) = &self.metrics {
            m.tx_packets.inc();
        }
        Ok(())
    }

    /// Poll until some bytes arrive or `timeout` elapses. Empty means nothing arrived.
    pub fn poll(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let started = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            let chunk = self.transport.read(READ_CAPACITY, remaining)?;
            if !chunk.is_empty() {
                debug!(len = chunk.len(), "bytes received");
                if let Some(m) = &self.metrics {
                    m.rx_packets.inc();
                }
                return Ok(chunk);
            }
            if started.elapsed() >= timeout {
                trace!(?timeout, "poll timed out");
                return Ok(chunk);
            }
        }
    }

    /// Like [`Link::poll`], but nothing arriving is a [`TransportError::Timeout`].
    pub fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let buf = self.poll(timeout)?;
        if buf.is_empty() {
            return Err(TransportError::Timeout {
                budget_ms: timeout.as_millis() as u64,
            }
            .into());
        }
        Ok(buf)
    }

    pub fn transact(&mut self, frame: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.send(frame)?;
        self.receive(timeout)
    }
}
