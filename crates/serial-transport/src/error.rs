use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("port is not open")]
    NotOpen,
    #[error("timeout: no bytes received within {budget_ms} ms")]
    Timeout { budget_ms: u64 },
    #[error("short write: expected {expected} bytes, wrote {written}")]
    ShortWrite { expected: usize, written: usize },
}
