use crate::Result;
use std::time::Duration;

/// A minimal blocking byte-stream interface.
///
/// One caller owns the transport for a whole send+receive pair; implementations do no
/// internal locking.
pub trait Transport {
    /// Open the underlying channel. Opening an already open transport is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Close the underlying channel. Closing a closed transport is a no-op.
    fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Write `bytes`, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Read at most `max_bytes`, waiting no longer than `timeout`.
    ///
    /// Returns an empty buffer when nothing arrived in time.
    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>>;
}
