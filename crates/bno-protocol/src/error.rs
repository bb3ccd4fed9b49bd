use core::fmt;
use serial_transport::TransportError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Any failure surfaced by the stick client. Nothing here is fatal; the caller decides
/// whether to retry, drain or give up.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),
    #[error("device still sending after {rounds} drain rounds")]
    DrainIncomplete { rounds: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing json config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("parsing yaml config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported config format: {0}")]
    Format(String),
    #[error("invalid hex value {value:?} at {section}.{key}")]
    InvalidHex {
        section: &'static str,
        key: String,
        value: String,
    },
    #[error("{command}: parameter {description:?} at byte {offset} is outside a {len}-byte command")]
    SlotOutOfRange {
        command: String,
        description: String,
        offset: usize,
        len: usize,
    },
    #[error("{section}: address 0x{address:02X} claimed by both {first} and {second}")]
    DuplicateAddress {
        section: &'static str,
        address: u8,
        first: String,
        second: String,
    },
    #[error("unknown command template: {0}")]
    UnknownTemplate(String),
    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown parameter {description:?} for command {template}")]
    UnknownParameter {
        template: String,
        description: String,
    },
    #[error("no register name for address 0x{address:02X}")]
    UnresolvedAddress { address: usize },
    #[error("payload truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
}

/// Which framing invariant a packet broke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramingCheck {
    NonEmpty,
    StartByte,
    StopByteCr,
    StopByteLf,
    ErrorStatus,
    ResponseCode,
    StreamLength,
    StreamStart,
    StreamStop,
}

impl FramingCheck {
    pub fn as_str(self) -> &'static str {
        match self {
            FramingCheck::NonEmpty => "non-empty buffer",
            FramingCheck::StartByte => "start byte",
            FramingCheck::StopByteCr => "stop byte (CR)",
            FramingCheck::StopByteLf => "stop byte (LF)",
            FramingCheck::ErrorStatus => "error status",
            FramingCheck::ResponseCode => "response code",
            FramingCheck::StreamLength => "streaming packet length",
            FramingCheck::StreamStart => "streaming start byte",
            FramingCheck::StreamStop => "streaming stop bytes",
        }
    }
}

impl fmt::Display for FramingCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A packet that failed a framing check, with what was expected and what was seen.
///
/// `actual` is `None` when the checked position does not exist in the buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtocolError {
    pub check: FramingCheck,
    pub expected: &'static [usize],
    pub actual: Option<usize>,
}

impl ProtocolError {
    pub fn new(check: FramingCheck, expected: &'static [usize], actual: Option<usize>) -> Self {
        Self {
            check,
            expected,
            actual,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: expected one of [", self.check)?;
        for (i, e) in self.expected.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "0x{e:02X}")?;
        }
        match self.actual {
            Some(a) => write!(f, "], got 0x{a:02X}"),
            None => f.write_str("], got nothing"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let e = ProtocolError::new(FramingCheck::StartByte, &[0xAA], Some(0));
        assert_eq!(e.to_string(), "start byte: expected one of [0xAA], got 0x00");
        let e = ProtocolError::new(FramingCheck::ErrorStatus, &[0, 2], None);
        assert_eq!(
            e.to_string(),
            "error status: expected one of [0x00, 0x02], got nothing"
        );
    }
}
