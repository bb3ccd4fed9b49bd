//! Device client for the BNO055 stick.
//!
//! [`BnoStick`] owns the transport through a [`Link`] and runs one command at a time:
//! build from the config template, send, receive, validate and decode. Streaming mode is
//! a small state machine (`Idle -> Streaming -> Idle`) driven by the start and stop frame
//! sequences from the config.

use crate::decode::{
    decode_board_info, decode_burst_read, decode_register_read, decode_register_write,
    BoardInfo, RegisterValue, WriteOutcome,
};
use crate::encode::{
    board_info_command, burst_read_command, read_register_command, write_register_command,
};
use crate::link::{Link, DEFAULT_TIMEOUT};
use crate::metrics::StickMetrics;
use crate::stream::{decode_stream_packet, ImuSample};
use crate::validate::validate_packet;
use crate::{ConfigRegistry, Error, Result};
use serial_transport::Transport;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Value of `CHIP_ID` on a genuine BNO055.
pub const BNO055_CHIP_ID: u8 = 0xA0;
const CHIP_ID_REGISTER: &str = "CHIP_ID_ADDR";

/// Upper bound on receive attempts while flushing a stream after the stop frames.
pub const DRAIN_ROUNDS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Idle,
    Streaming { stream_taken: bool },
}

pub struct BnoStick<T: Transport> {
    config: ConfigRegistry,
    link: Link<T>,
    timeout: Duration,
    state: SessionState,
}

impl<T: Transport> BnoStick<T> {
    pub fn new(config: ConfigRegistry, transport: T) -> Self {
        Self {
            config,
            link: Link::new(transport),
            timeout: DEFAULT_TIMEOUT,
            state: SessionState::Idle,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: StickMetrics) -> Self {
        self.link = self.link.with_metrics(metrics);
        self
    }

    pub fn config(&self) -> &ConfigRegistry {
        &self.config
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.state, SessionState::Streaming { .. })
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.link.transport_mut()
    }

    pub fn open(&mut self) -> Result<()> {
        if !self.link.transport().is_open() {
            self.link.transport_mut().open()?;
            info!("stick opened");
        }
        Ok(())
    }

    /// Stop streaming if needed, then close the transport. The transport is closed even
    /// when the stop sequence fails; that failure is returned afterwards.
    pub fn close(&mut self) -> Result<()> {
        let stopped = if self.is_streaming() {
            self.deactivate_streaming()
        } else {
            Ok(())
        };
        self.link.transport_mut().close()?;
        info!("stick closed");
        stopped
    }

    fn require_idle(&self, op: &'static str) -> Result<()> {
        if self.is_streaming() {
            warn!(op, "command refused while streaming");
            return Err(Error::InvalidState("command not allowed while streaming"));
        }
        Ok(())
    }

    fn note<R>(&self, r: Result<R>) -> Result<R> {
        if let (Err(Error::Protocol(e)), Some(m)) = (&r, self.link.metrics()) {
            debug!(error = %e, "framing check failed");
            m.protocol_errors.inc();
        }
        r
    }

    pub fn query_board_info(&mut self) -> Result<BoardInfo> {
        self.require_idle("board_info")?;
        let cmd = board_info_command(&self.config)?;
        let buf = self.link.transact(&cmd, self.timeout)?;
        let info = self.note(decode_board_info(&buf))?;
        debug!(?info, "board info");
        Ok(info)
    }

    pub fn read_register(&mut self, address: u8) -> Result<u8> {
        self.require_idle("read_register")?;
        let cmd = read_register_command(&self.config, address)?;
        let buf = self.link.transact(&cmd, self.timeout)?;
        let value = self.note(decode_register_read(&buf))?;
        debug!(address, value, "register read");
        Ok(value)
    }

    /// A wrong echo is returned as [`WriteOutcome::Mismatch`], not as an error.
    pub fn write_register(&mut self, address: u8, value: u8) -> Result<WriteOutcome> {
        self.require_idle("write_register")?;
        let cmd = write_register_command(&self.config, address, value)?;
        let buf = self.link.transact(&cmd, self.timeout)?;
        let outcome = self.note(decode_register_write(&buf, address, value))?;
        if let WriteOutcome::Mismatch {
            echoed_address,
            echoed_value,
        } = outcome
        {
            warn!(
                address,
                value, echoed_address, echoed_value, "register write not confirmed"
            );
        }
        Ok(outcome)
    }

    pub fn burst_read(&mut self, start_address: u8, num_bytes: u16) -> Result<Vec<RegisterValue>> {
        self.require_idle("burst_read")?;
        let cmd = burst_read_command(&self.config, start_address, num_bytes)?;
        let buf = self.link.transact(&cmd, self.timeout)?;
        let values = self.note(decode_burst_read(
            &buf,
            self.config.page0(),
            start_address,
            num_bytes,
        ))?;
        debug!(start_address, num_bytes, fields = values.len(), "burst read");
        Ok(values)
    }

    /// Read `CHIP_ID` and compare it against [`BNO055_CHIP_ID`].
    pub fn check_chip_id(&mut self) -> Result<bool> {
        let address = self.config.register_address(CHIP_ID_REGISTER).unwrap_or(0x00);
        let id = self.read_register(address)?;
        if id != BNO055_CHIP_ID {
            warn!(id, expected = BNO055_CHIP_ID, "unexpected chip id");
        }
        Ok(id == BNO055_CHIP_ID)
    }

    // Replies to start/stop frames are drained but never fail the sequence.
    fn send_sequence(&mut self, frames: &[Vec<u8>], label: &'static str) -> Result<()> {
        for (i, frame) in frames.iter().enumerate() {
            self.link.send(frame)?;
            let reply = self.link.poll(self.timeout)?;
            if reply.is_empty() {
                debug!(label, frame = i, "no reply");
            } else if let Err(e) = validate_packet(&reply) {
                warn!(label, frame = i, error = %e, "ignoring malformed reply");
            }
        }
        Ok(())
    }

    /// Send the start sequence. Calling this again while streaming re-arms [`BnoStick::stream`].
    pub fn activate_streaming(&mut self) -> Result<()> {
        let frames = self.config.start_streaming().to_vec();
        self.send_sequence(&frames, "start_streaming")?;
        self.state = SessionState::Streaming {
            stream_taken: false,
        };
        if let Some(m) = self.link.metrics() {
            m.streaming.set(1);
        }
        info!(frames = frames.len(), "streaming activated");
        Ok(())
    }

    /// One bounded receive decoded as a streaming frame, stamped with the receive time.
    pub fn receive_sample(&mut self, timeout: Duration) -> Result<ImuSample> {
        if !self.is_streaming() {
            return Err(Error::InvalidState("streaming is not active"));
        }
        let buf = self.link.receive(timeout)?;
        let mut sample = self.note(decode_stream_packet(&buf))?;
        sample.received_at = Some(OffsetDateTime::now_utc());
        if let Some(m) = self.link.metrics() {
            m.samples_decoded.inc();
        }
        Ok(sample)
    }

    /// Pull samples lazily; `None` means no limit.
    ///
    /// The first error is yielded and ends the iterator. A stream can be taken once per
    /// activation.
    pub fn stream(&mut self, limit: Option<usize>) -> Result<SampleStream<'_, T>> {
        match self.state {
            SessionState::Idle => Err(Error::InvalidState("streaming is not active")),
            SessionState::Streaming { stream_taken: true } => Err(Error::InvalidState(
                "stream already taken; activate streaming again",
            )),
            SessionState::Streaming {
                stream_taken: false,
            } => {
                self.state = SessionState::Streaming { stream_taken: true };
                Ok(SampleStream {
                    stick: self,
                    remaining: limit,
                    done: false,
                })
            }
        }
    }

    /// Send the stop sequence, then receive and discard until the line goes quiet.
    pub fn deactivate_streaming(&mut self) -> Result<()> {
        let frames = self.config.stop_streaming().to_vec();
        self.send_sequence(&frames, "stop_streaming")?;
        self.state = SessionState::Idle;
        if let Some(m) = self.link.metrics() {
            m.streaming.set(0);
        }

        let mut discarded = 0usize;
        for _ in 0..DRAIN_ROUNDS {
            let chunk = self.link.poll(self.timeout)?;
            if chunk.is_empty() {
                info!(discarded, "streaming deactivated");
                return Ok(());
            }
            discarded += chunk.len();
        }
        warn!(discarded, rounds = DRAIN_ROUNDS, "stream did not go quiet");
        Err(Error::DrainIncomplete {
            rounds: DRAIN_ROUNDS,
        })
    }
}

/// Iterator returned by [`BnoStick::stream`].
pub struct SampleStream<'a, T: Transport> {
    stick: &'a mut BnoStick<T>,
    remaining: Option<usize>,
    done: bool,
}

impl<T: Transport> Iterator for SampleStream<'_, T> {
    type Item = Result<ImuSample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.remaining == Some(0) {
            return None;
        }
        let timeout = self.stick.timeout;
        let item = self.stick.receive_sample(timeout);
        match &item {
            Ok(_) => {
                if let Some(n) = self.remaining.as_mut() {
                    *n -= 1;
                }
            }
            Err(_) => self.done = true,
        }
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::tests::stream_frame;
    use crate::MetricsHub;
    use serial_transport::{MockTransport, TransportError};

    const FAST: Duration = Duration::from_millis(2);
    const ACK: [u8; 7] = [0xAA, 0x07, 0x0B, 0x00, 0x42, 0x0D, 0x0A];

    fn register_reply(kind: u8, address: u8, value: u8) -> Vec<u8> {
        vec![
            0xAA, 0x0E, kind, 0x00, 0x42, 0x01, 0x00, address, 0x00, 0x01, 0x00, value, 0x0D,
            0x0A,
        ]
    }

    fn sample_frame(accel_x: i16) -> Vec<u8> {
        let mut words = [0i16; 22];
        words[0] = accel_x;
        stream_frame(&words, [0x19, 0xFF, 0x0F, 0x00, 0x00])
    }

    /// Scripted stick: a 256-byte register file plus canned streaming behaviour.
    fn fake_device(frames_per_start: usize, leftovers_after_stop: usize) -> MockTransport {
        let mut regs = [0u8; 256];
        regs[0x00] = BNO055_CHIP_ID;
        regs[0x01] = 0xFB;
        regs[0x04] = 0x11;
        regs[0x05] = 0x03;
        let mut t = MockTransport::new("fake-stick").with_responder(move |f| match f[2] {
            0x0F => vec![vec![
                0xAA, 0x0F, 0x0F, 0x00, 0x42, 0x0F, 0x01, 0x02, 0x00, 0x10, 0x12, 0x34, 0x07,
                0x0D, 0x0A,
            ]],
            0x02 => {
                let (start, n) = (f[5], u16::from_be_bytes([f[6], f[7]]));
                if n == 1 {
                    return vec![register_reply(0x02, start, regs[usize::from(start)])];
                }
                let mut reply =
                    vec![0xAA, 0x00, 0x02, 0x00, 0x42, 0x01, 0x00, start, f[6], f[7], 0x00];
                let from = usize::from(start);
                reply.extend_from_slice(&regs[from..from + usize::from(n)]);
                reply.extend_from_slice(&[0x0D, 0x0A]);
                vec![reply]
            }
            0x03 => {
                regs[usize::from(f[5])] = f[8];
                vec![register_reply(0x03, f[5], f[8])]
            }
            0x0B if f[3] == 0x01 => {
                let mut out = vec![ACK.to_vec()];
                out.extend((0..frames_per_start).map(|i| sample_frame(100 * (i as i16 + 1))));
                out
            }
            0x0B => {
                let mut out = vec![ACK.to_vec()];
                out.extend((0..leftovers_after_stop).map(|_| sample_frame(0)));
                out
            }
            _ => vec![ACK.to_vec()],
        });
        t.open().unwrap();
        t
    }

    fn stick(t: MockTransport) -> BnoStick<MockTransport> {
        BnoStick::new(ConfigRegistry::builtin().unwrap(), t).with_timeout(FAST)
    }

    #[test]
    fn test_board_info_and_chip_id() {
        let mut s = stick(fake_device(0, 0));
        let info = s.query_board_info().unwrap();
        assert_eq!(info.shuttle_id, 0x0102);
        assert_eq!(info.board_type, 7);
        assert!(s.check_chip_id().unwrap());
        assert_eq!(s.transport().written()[0], vec![0xAA, 0x05, 0x0F, 0x0D, 0x0A]);
    }

    #[test]
    fn test_write_register_round_trip() {
        let mut s = stick(fake_device(0, 0));
        assert_eq!(s.write_register(0x3D, 0x0C).unwrap(), WriteOutcome::Confirmed);
        assert_eq!(s.read_register(0x3D).unwrap(), 0x0C);
    }

    #[test]
    fn test_write_register_mismatch_is_not_error() {
        let mut t = MockTransport::new("liar")
            .with_responder(|_| vec![register_reply(0x03, 0x3D, 0x00)]);
        t.open().unwrap();
        let mut s = stick(t);
        assert_eq!(
            s.write_register(0x3D, 0x0C).unwrap(),
            WriteOutcome::Mismatch {
                echoed_address: 0x3D,
                echoed_value: 0x00
            }
        );
    }

    #[test]
    fn test_burst_read_through_stick() {
        let mut s = stick(fake_device(0, 0));
        let values = s.burst_read(0x00, 2).unwrap();
        assert_eq!(values[0].name, "CHIP_ID");
        assert_eq!(values[0].value, 0xA0);
        assert_eq!(values[1].value, 0xFB);
        assert_eq!(
            s.transport().written()[0],
            vec![0xAA, 0x0C, 0x02, 0x01, 0x28, 0x00, 0x00, 0x02, 0x00, 0x00, 0x0D, 0x0A]
        );
    }

    #[test]
    fn test_no_reply_is_timeout() {
        let mut t = MockTransport::new("silent");
        t.open().unwrap();
        let mut s = stick(t);
        assert!(matches!(
            s.read_register(0x00),
            Err(Error::Transport(TransportError::Timeout { .. }))
        ));
    }

    #[test]
    fn test_protocol_errors_counted() {
        let hub = MetricsHub::new().unwrap();
        let mut t = MockTransport::new("noisy").with_responder(|_| vec![vec![0x00, 0x0D, 0x0A]]);
        t.open().unwrap();
        let mut s = stick(t).with_metrics(hub.stick.clone());
        assert!(matches!(s.read_register(0x00), Err(Error::Protocol(_))));
        assert_eq!(hub.stick.protocol_errors.get(), 1);
    }

    #[test]
    fn test_receive_requires_streaming() {
        let mut s = stick(fake_device(0, 0));
        assert!(matches!(
            s.receive_sample(FAST),
            Err(Error::InvalidState(_))
        ));
        assert!(s.stream(None).is_err());
    }

    #[test]
    fn test_stream_session_lifecycle() {
        let hub = MetricsHub::new().unwrap();
        let mut s = stick(fake_device(5, 3)).with_metrics(hub.stick.clone());
        s.activate_streaming().unwrap();
        assert!(s.is_streaming());
        assert_eq!(hub.stick.streaming.get(), 1);
        assert!(matches!(s.read_register(0x00), Err(Error::InvalidState(_))));

        let samples: Vec<ImuSample> = s
            .stream(Some(3))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].scaled.accel.x, 1.0);
        assert_eq!(samples[2].raw.accel.x, 300);
        assert!(samples.iter().all(|x| x.received_at.is_some()));
        assert_eq!(samples[0].status.temperature, 25);
        assert_eq!(hub.stick.samples_decoded.get(), 3);

        assert!(matches!(s.stream(None), Err(Error::InvalidState(_))));
        assert!(s.receive_sample(FAST).is_ok());

        s.deactivate_streaming().unwrap();
        assert!(!s.is_streaming());
        assert_eq!(hub.stick.streaming.get(), 0);
        assert!(s.link.poll(FAST).unwrap().is_empty());
        assert_eq!(s.transport().pending_chunks(), 0);

        // start frames, stop frame
        assert_eq!(s.transport().written().len(), 4);
    }

    #[test]
    fn test_stream_ends_on_first_error() {
        let mut s = stick(fake_device(2, 0));
        s.activate_streaming().unwrap();
        let items: Vec<Result<ImuSample>> = s.stream(None).unwrap().collect();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok() && items[1].is_ok());
        assert!(matches!(
            items[2],
            Err(Error::Transport(TransportError::Timeout { .. }))
        ));

        s.activate_streaming().unwrap();
        assert_eq!(s.stream(Some(1)).unwrap().count(), 1);
    }

    #[test]
    fn test_truncated_stream_frame_rejected() {
        let mut s = stick(fake_device(0, 0));
        s.activate_streaming().unwrap();
        s.transport_mut().push_read(sample_frame(7)[..40].to_vec());
        assert!(matches!(s.receive_sample(FAST), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_drain_gives_up_on_endless_stream() {
        let mut t = MockTransport::new("firehose")
            .with_responder(|_| (0..DRAIN_ROUNDS + 8).map(|_| sample_frame(1)).collect());
        t.open().unwrap();
        let mut s = stick(t);
        s.activate_streaming().unwrap();
        assert!(matches!(
            s.deactivate_streaming(),
            Err(Error::DrainIncomplete { rounds: DRAIN_ROUNDS })
        ));
        assert!(!s.is_streaming());
    }

    #[test]
    fn test_close_stops_streaming() {
        let mut s = stick(fake_device(1, 1));
        s.activate_streaming().unwrap();
        s.close().unwrap();
        assert!(!s.is_streaming());
        assert!(!s.transport().is_open());
        let last = s.transport().written().last().unwrap().clone();
        assert_eq!(last, vec![0xAA, 0x06, 0x0B, 0x00, 0x0D, 0x0A]);
    }

    #[test]
    fn test_stream_request_matches_frame_length() {
        use crate::encode::{NUM_BYTES_LSB, NUM_BYTES_MSB, START_REG_ADDR};
        use crate::STREAM_PACKET_LEN;

        let cfg = ConfigRegistry::builtin().unwrap();
        let burst = cfg.burst_read();
        let request = &cfg.start_streaming()[1];
        let at = |d: &str| request[burst.slot(d).unwrap().offset];
        let first = at(START_REG_ADDR);
        let count = usize::from(u16::from_be_bytes([at(NUM_BYTES_MSB), at(NUM_BYTES_LSB)]));

        assert_eq!(cfg.register_name(first), Some("ACCEL_DATA_X_LSB_ADDR"));
        let last = u8::try_from(usize::from(first) + count - 1).unwrap();
        assert_eq!(cfg.register_name(last), Some("SYS_CLK_STAT_ADDR"));
        // start byte and header, register image, stop pair
        assert_eq!(5 + count + 2, STREAM_PACKET_LEN);
    }
}
