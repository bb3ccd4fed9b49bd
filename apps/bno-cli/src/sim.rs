//! In-process stand-in for a BNO055 stick, served through `MockTransport`.

use bno_protocol::BNO055_CHIP_ID;
use serial_transport::MockTransport;

const ACK: [u8; 7] = [0xAA, 0x07, 0x0B, 0x00, 0x42, 0x0D, 0x0A];
// Frames queued per start request. Kept below DRAIN_ROUNDS so a stop always drains.
const BURST_FRAMES: usize = 200;

pub fn simulated_stick() -> MockTransport {
    let mut regs = [0u8; 256];
    regs[0x00] = BNO055_CHIP_ID;
    regs[0x01] = 0xFB; // ACC_ID
    regs[0x02] = 0x32; // MAG_ID
    regs[0x03] = 0x0F; // GYR_ID
    regs[0x04] = 0x11; // SW_REV_ID_LSB
    regs[0x05] = 0x03; // SW_REV_ID_MSB
    regs[0x06] = 0x15; // BL_REV_ID
    regs[0x34] = 0x19; // TEMP
    regs[0x35] = 0xFF; // CALIB_STAT
    regs[0x36] = 0x0F; // ST_RESULT
    let mut tick = 0i16;
    // register window each streamed frame carries, set by the stream setup request
    let mut window = (0x08usize, 0x31usize);

    MockTransport::new("sim").with_responder(move |frame| {
        let Some(&kind) = frame.get(2) else {
            return Vec::new();
        };
        let at = |i: usize| frame.get(i).copied().unwrap_or(0);
        match kind {
            0x0F => vec![vec![
                0xAA, 0x0F, 0x0F, 0x00, 0x42, 0x0F, 0x00, 0x01, 0x00, 0x02, 0x03, 0x11, 0x01,
                0x0D, 0x0A,
            ]],
            0x02 => {
                let start = usize::from(at(5));
                let n = usize::from(u16::from_be_bytes([at(6), at(7)]));
                let mut reply = vec![0xAA, 0x00, 0x02, 0x00, 0x42, 0x01, 0x00, at(5), at(6), at(7)];
                if n == 1 {
                    reply.extend_from_slice(&[0x00, regs[start]]);
                } else {
                    reply.push(0x00);
                    reply.extend((start..start + n).map(|a| regs.get(a).copied().unwrap_or(0)));
                }
                reply.extend_from_slice(&[0x0D, 0x0A]);
                vec![reply]
            }
            0x03 => {
                let (address, value) = (at(5), at(8));
                regs[usize::from(address)] = value;
                vec![vec![
                    0xAA, 0x0E, 0x03, 0x00, 0x42, 0x01, 0x00, address, 0x00, 0x01, 0x00, value,
                    0x0D, 0x0A,
                ]]
            }
            0x06 => {
                window = (usize::from(at(5)), usize::from(u16::from_be_bytes([at(6), at(7)])));
                vec![ACK.to_vec()]
            }
            0x0B if at(3) == 0x01 => {
                let mut out = vec![ACK.to_vec()];
                for _ in 0..BURST_FRAMES {
                    tick = tick.wrapping_add(1);
                    out.push(stream_frame(tick, &mut regs, window));
                }
                out
            }
            0x0B => {
                tick = tick.wrapping_add(1);
                vec![ACK.to_vec(), stream_frame(tick, &mut regs, window)]
            }
            _ => vec![ACK.to_vec()],
        }
    })
}

// Stick lying flat, slowly turning about z.
fn stream_frame(tick: i16, regs: &mut [u8; 256], (start, count): (usize, usize)) -> Vec<u8> {
    let heading = (tick % 360) * 16;
    let words: [i16; 22] = [
        0, 0, 981, // accel
        200, -35, -410, // mag
        0, 0, 16, // gyro
        heading, 0, 0, // euler
        16384, 0, 0, 0, // quaternion
        0, 0, 0, // linear accel
        0, 0, 981, // gravity
    ];
    for (i, w) in words.iter().enumerate() {
        let at = 0x08 + 2 * i;
        regs[at..at + 2].copy_from_slice(&w.to_le_bytes());
    }
    let end = (start + count).min(regs.len());
    let len = u8::try_from(5 + (end - start.min(end)) + 2).unwrap_or(u8::MAX);
    let mut f = vec![0xAA, len, 0x00, 0x00, 0x00];
    f.extend_from_slice(regs.get(start..end).unwrap_or(&[]));
    f.extend_from_slice(&[0x0D, 0x0A]);
    f
}
