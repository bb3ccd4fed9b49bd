use crate::{FramingCheck, ProtocolError};

pub const START_BYTE: u8 = 0xAA;
pub const STOP_BYTES: [u8; 2] = [0x0D, 0x0A];

pub const ERROR_STATUS_INDEX: usize = 3;
pub const RESPONSE_CODE_INDEX: usize = 4;

const START: &[usize] = &[0xAA];
const STOP_CR: &[usize] = &[0x0D];
const STOP_LF: &[usize] = &[0x0A];
const ERROR_STATUS: &[usize] = &[0x00, 0x02];
const RESPONSE_CODE: &[usize] = &[0x41, 0x42];

/// Check the framing of a command response.
///
/// Checks run in a fixed order and the first failure is returned.
pub fn validate_packet(buf: &[u8]) -> Result<(), ProtocolError> {
    let (first, last) = match (buf.first(), buf.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return Err(ProtocolError::new(FramingCheck::NonEmpty, &[], None)),
    };
    if first != START_BYTE {
        return Err(ProtocolError::new(
            FramingCheck::StartByte,
            START,
            Some(first.into()),
        ));
    }
    let cr = buf.len().checked_sub(2).and_then(|i| buf.get(i)).copied();
    if cr != Some(STOP_BYTES[0]) {
        return Err(ProtocolError::new(
            FramingCheck::StopByteCr,
            STOP_CR,
            cr.map(usize::from),
        ));
    }
    if last != STOP_BYTES[1] {
        return Err(ProtocolError::new(
            FramingCheck::StopByteLf,
            STOP_LF,
            Some(last.into()),
        ));
    }
    check_member(buf, ERROR_STATUS_INDEX, FramingCheck::ErrorStatus, ERROR_STATUS)?;
    check_member(buf, RESPONSE_CODE_INDEX, FramingCheck::ResponseCode, RESPONSE_CODE)?;
    Ok(())
}

fn check_member(
    buf: &[u8],
    index: usize,
    check: FramingCheck,
    allowed: &'static [usize],
) -> Result<(), ProtocolError> {
    match buf.get(index) {
        Some(b) if allowed.contains(&usize::from(*b)) => Ok(()),
        other => Err(ProtocolError::new(
            check,
            allowed,
            other.map(|b| usize::from(*b)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn good() -> Vec<u8> {
        vec![
            0xAA, 0x0E, 0x02, 0x00, 0x42, 0x00, 0x01, 0x3D, 0x00, 0x01, 0x00, 0x0C, 0x0D, 0x0A,
        ]
    }

    #[test]
    fn test_valid_packet() {
        assert_eq!(validate_packet(&good()), Ok(()));
        let mut p = good();
        p[3] = 2;
        p[4] = 0x41;
        assert_eq!(validate_packet(&p), Ok(()));
    }

    #[test]
    fn test_empty_buffer() {
        let err = validate_packet(&[]).unwrap_err();
        assert_eq!(err.check, FramingCheck::NonEmpty);
        assert_eq!(err.actual, None);
    }

    #[test]
    fn test_bad_start_byte_reports_byte() {
        let mut p = good();
        p[0] = 0x00;
        let err = validate_packet(&p).unwrap_err();
        assert_eq!(err.check, FramingCheck::StartByte);
        assert_eq!(err.expected, &[0xAA_usize]);
        assert_eq!(err.actual, Some(0x00));
    }

    #[test]
    fn test_bad_stop_bytes() {
        let mut p = good();
        let n = p.len();
        p[n - 2] = 0x0A;
        assert_eq!(validate_packet(&p).unwrap_err().check, FramingCheck::StopByteCr);

        let mut p = good();
        p[n - 1] = 0x0D;
        let err = validate_packet(&p).unwrap_err();
        assert_eq!(err.check, FramingCheck::StopByteLf);
        assert_eq!(err.actual, Some(0x0D));
    }

    #[test]
    fn test_single_byte_buffer() {
        let err = validate_packet(&[0xAA]).unwrap_err();
        assert_eq!(err.check, FramingCheck::StopByteCr);
        assert_eq!(err.actual, None);
    }

    #[test]
    fn test_status_one_rejected() {
        let mut p = good();
        p[3] = 1;
        let err = validate_packet(&p).unwrap_err();
        assert_eq!(err.check, FramingCheck::ErrorStatus);
        assert_eq!(err.expected, &[0_usize, 2]);
        assert_eq!(err.actual, Some(1));
    }

    #[test]
    fn test_bad_response_code() {
        let mut p = good();
        p[4] = 0x43;
        let err = validate_packet(&p).unwrap_err();
        assert_eq!(err.check, FramingCheck::ResponseCode);
        assert_eq!(err.actual, Some(0x43));
    }

    #[test]
    fn test_frame_too_short_for_status() {
        let err = validate_packet(&[0xAA, 0x00, 0x0D, 0x0A]).unwrap_err();
        assert_eq!(err.check, FramingCheck::ErrorStatus);
        assert_eq!(err.actual, Some(0x0A));

        let err = validate_packet(&[0xAA, 0x0D, 0x0A]).unwrap_err();
        assert_eq!(err.check, FramingCheck::ErrorStatus);
        assert_eq!(err.actual, None);
    }
}
