//! Telemetry frames emitted continuously once streaming is active.
//!
//! A streaming frame is exactly [`STREAM_PACKET_LEN`] bytes: start byte, four header
//! bytes, the register image from `ACCEL_DATA_X_LSB` onwards, and the stop bytes. Vector
//! registers are little-endian `i16`; scaling to physical units uses the fixed
//! [`resolution`] constants.

use crate::cursor::ByteCursor;
use crate::validate::{START_BYTE, STOP_BYTES};
use crate::{FramingCheck, ProtocolError, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub const STREAM_PACKET_LEN: usize = 0x38;

const PAYLOAD_START: usize = 5;

/// Fixed scale factors from raw register counts to physical units.
pub mod resolution {
    /// unitless, 2^14 LSB per 1.0
    pub const QUATERNION: f64 = 1.0 / 16384.0;
    /// m/s^2
    pub const ACCELERATION: f64 = 1.0 / 100.0;
    /// uT
    pub const MAGNETOMETER: f64 = 1.0 / 16.0;
    /// deg/s
    pub const GYROSCOPE: f64 = 1.0 / 16.0;
    /// m/s^2
    pub const LINEAR_ACCELERATION: f64 = 1.0 / 100.0;
    /// m/s^2
    pub const GRAVITY: f64 = 1.0 / 100.0;
    /// degrees
    pub const EULER: f64 = 1.0 / 16.0;
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl Vector3<i16> {
    pub fn scaled(&self, k: f64) -> Vector3<f64> {
        Vector3 {
            x: f64::from(self.x) * k,
            y: f64::from(self.y) * k,
            z: f64::from(self.z) * k,
        }
    }
}

/// Heading (yaw), roll and pitch, in the order the chip reports them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EulerAngles<T> {
    pub yaw: T,
    pub roll: T,
    pub pitch: T,
}

impl EulerAngles<i16> {
    pub fn scaled(&self, k: f64) -> EulerAngles<f64> {
        EulerAngles {
            yaw: f64::from(self.yaw) * k,
            roll: f64::from(self.roll) * k,
            pitch: f64::from(self.pitch) * k,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quaternion<T> {
    pub w: T,
    pub x: T,
    pub y: T,
    pub z: T,
}

impl Quaternion<i16> {
    pub fn scaled(&self, k: f64) -> Quaternion<f64> {
        Quaternion {
            w: f64::from(self.w) * k,
            x: f64::from(self.x) * k,
            y: f64::from(self.y) * k,
            z: f64::from(self.z) * k,
        }
    }
}

/// Sensor and fusion outputs; `T` is `i16` for register counts, `f64` once scaled.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionData<T> {
    pub accel: Vector3<T>,
    pub mag: Vector3<T>,
    pub gyro: Vector3<T>,
    pub euler: EulerAngles<T>,
    pub quaternion: Quaternion<T>,
    pub linear_accel: Vector3<T>,
    pub gravity: Vector3<T>,
}

impl MotionData<i16> {
    pub fn scaled(&self) -> MotionData<f64> {
        MotionData {
            accel: self.accel.scaled(resolution::ACCELERATION),
            mag: self.mag.scaled(resolution::MAGNETOMETER),
            gyro: self.gyro.scaled(resolution::GYROSCOPE),
            euler: self.euler.scaled(resolution::EULER),
            quaternion: self.quaternion.scaled(resolution::QUATERNION),
            linear_accel: self.linear_accel.scaled(resolution::LINEAR_ACCELERATION),
            gravity: self.gravity.scaled(resolution::GRAVITY),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImuStatus {
    /// degrees Celsius
    pub temperature: i8,
    pub calibration: u8,
    pub self_test: u8,
    pub interrupt: u8,
    pub system_clock: u8,
    /// `SYS_STATUS` falls one byte past the 56-byte frame, so it is usually absent.
    pub system: Option<u8>,
}

impl ImuStatus {
    pub fn calibration_status(&self) -> CalibrationStatus {
        CalibrationStatus::from_register(self.calibration)
    }
}

/// `CALIB_STAT` split into its four 2-bit levels (0 = uncalibrated, 3 = fully calibrated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationStatus {
    pub system: u8,
    pub gyro: u8,
    pub accel: u8,
    pub mag: u8,
}

impl CalibrationStatus {
    pub fn from_register(v: u8) -> Self {
        Self {
            system: (v >> 6) & 0x03,
            gyro: (v >> 4) & 0x03,
            accel: (v >> 2) & 0x03,
            mag: v & 0x03,
        }
    }

    pub fn is_fully_calibrated(&self) -> bool {
        self.system == 3 && self.gyro == 3 && self.accel == 3 && self.mag == 3
    }
}

/// One decoded streaming frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    pub raw: MotionData<i16>,
    pub scaled: MotionData<f64>,
    pub status: ImuStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub received_at: Option<OffsetDateTime>,
}

pub fn validate_stream_packet(buf: &[u8]) -> Result<(), ProtocolError> {
    if buf.len() != STREAM_PACKET_LEN {
        return Err(ProtocolError::new(
            FramingCheck::StreamLength,
            &[STREAM_PACKET_LEN],
            Some(buf.len()),
        ));
    }
    if buf[0] != START_BYTE {
        return Err(ProtocolError::new(
            FramingCheck::StreamStart,
            &[0xAA],
            Some(buf[0].into()),
        ));
    }
    let stop = &buf[STREAM_PACKET_LEN - 2..];
    if stop != STOP_BYTES {
        let (cr, lf) = (stop[0], stop[1]);
        let actual = if cr != STOP_BYTES[0] { cr } else { lf };
        return Err(ProtocolError::new(
            FramingCheck::StreamStop,
            &[0x0D, 0x0A],
            Some(actual.into()),
        ));
    }
    Ok(())
}

pub fn decode_stream_packet(buf: &[u8]) -> Result<ImuSample> {
    validate_stream_packet(buf)?;
    let mut cur = ByteCursor::new(&buf[PAYLOAD_START..STREAM_PACKET_LEN - 2]);

    let accel = vector3(&mut cur)?;
    let mag = vector3(&mut cur)?;
    let gyro = vector3(&mut cur)?;
    let euler = EulerAngles {
        yaw: cur.i16_le()?,
        roll: cur.i16_le()?,
        pitch: cur.i16_le()?,
    };
    let quaternion = Quaternion {
        w: cur.i16_le()?,
        x: cur.i16_le()?,
        y: cur.i16_le()?,
        z: cur.i16_le()?,
    };
    let linear_accel = vector3(&mut cur)?;
    let gravity = vector3(&mut cur)?;

    let status = ImuStatus {
        temperature: cur.i8()?,
        calibration: cur.u8()?,
        self_test: cur.u8()?,
        interrupt: cur.u8()?,
        system_clock: cur.u8()?,
        system: cur.u8().ok(),
    };

    let raw = MotionData {
        accel,
        mag,
        gyro,
        euler,
        quaternion,
        linear_accel,
        gravity,
    };
    Ok(ImuSample {
        scaled: raw.scaled(),
        raw,
        status,
        received_at: None,
    })
}

fn vector3(cur: &mut ByteCursor<'_>) -> Result<Vector3<i16>> {
    Ok(Vector3 {
        x: cur.i16_le()?,
        y: cur.i16_le()?,
        z: cur.i16_le()?,
    })
}
