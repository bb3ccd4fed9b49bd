use crate::{Result, Transport, TransportError};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// A scripted in-process transport. Each instance is independent.
///
/// Reads are served from a queue of chunks; a responder hook may enqueue replies for
/// every frame written, so request/response flows are testable without hardware.
pub struct MockTransport {
    name: String,
    open: bool,
    pending: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    responder: Option<Responder>,
    write_limit: Option<usize>,
}

impl MockTransport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            open: false,
            pending: VecDeque::new(),
            written: Vec::new(),
            responder: None,
            write_limit: None,
        }
    }

    /// Install a hook called with every written frame; its chunks are queued for reading.
    pub fn with_responder<F>(mut self, f: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        self.responder = Some(Box::new(f));
        self
    }

    /// Accept at most `n` bytes per write, to exercise short-write handling.
    pub fn with_write_limit(mut self, n: usize) -> Self {
        self.write_limit = Some(n);
        self
    }

    pub fn push_read(&mut self, chunk: impl Into<Vec<u8>>) {
        let chunk = chunk.into();
        if !chunk.is_empty() {
            self.pending.push_back(chunk);
        }
    }

    pub fn pending_chunks(&self) -> usize {
        self.pending.len()
    }

    pub fn written(&self) -> &[Vec<u8>] {
        &self.written
    }

}

impl Transport for MockTransport {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        debug!(name = %self.name, "mock transport opened");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        let accepted = self.write_limit.map_or(bytes.len(), |n| n.min(bytes.len()));
        self.written.push(bytes[..accepted].to_vec());
        if let Some(responder) = self.responder.as_mut() {
            for chunk in responder(bytes) {
                if !chunk.is_empty() {
                    self.pending.push_back(chunk);
                }
            }
        }
        Ok(accepted)
    }

    fn read(&mut self, max_bytes: usize, _timeout: Duration) -> Result<Vec<u8>> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        // Nothing queued behaves like a read that timed out.
        let mut chunk = match self.pending.pop_front() {
            Some(c) => c,
            None => return Ok(Vec::new()),
        };
        if chunk.len() > max_bytes {
            let rest = chunk.split_off(max_bytes);
            self.pending.push_front(rest);
        }
        Ok(chunk)
    }
}
