//! bno-protocol: config-driven codec and streaming client for the BNO055 USB stick

mod error;
pub use error::{ConfigError, DecodeError, Error, FramingCheck, ProtocolError, Result};

mod types;
pub use types::*;

mod loader;
pub use loader::{load_config_file, parse_hex_u8, ConfigRegistry, RegisterMap};

mod metrics;
pub use metrics::{MetricsHub, StickMetrics};

mod encode;
pub use encode::{
    board_info_command, burst_read_command, read_register_command, write_register_command,
    CommandTemplate, ParamSlot,
};

mod validate;
pub use validate::{validate_packet, START_BYTE, STOP_BYTES};

mod cursor;
pub use cursor::ByteCursor;

mod decode;
pub use decode::{
    decode_board_info, decode_burst_read, decode_register_read, decode_register_write,
    field_name, BoardInfo, RegisterValue, WriteOutcome,
};

pub mod stream;
pub use stream::{decode_stream_packet, validate_stream_packet, ImuSample, STREAM_PACKET_LEN};

mod link;
pub use link::{Link, DEFAULT_TIMEOUT, READ_CAPACITY};

mod session;
pub use session::{BnoStick, SampleStream, BNO055_CHIP_ID, DRAIN_ROUNDS};
