//! Serial protocol for the A&D FX-i class balance.
//!
//! Every read is a full request/response: flush, send `PRT`, wait for a frame
//! and decode the eight-character weight field that follows the sign byte.

use std::sync::Arc;

use trickler_traits::{Clock, SerialPort};

use crate::config::ScaleCfg;
use crate::error::ScaleError;
use crate::hw_error::map_link_error;

pub const PRINT_COMMAND: &[u8] = b"PRT\r";
pub const ZERO_COMMAND: &[u8] = b"R\r";
pub const ID_COMMAND: &[u8] = b"?ID\r";

/// Width of the sign byte plus the numeric field of a weight frame.
pub const FRAME_FIELD_LEN: usize = 9;

/// Anything that can produce a single instantaneous weight reading.
pub trait InstantWeight {
    fn read_instant(&mut self) -> Result<f32, ScaleError>;
}

/// Decode one weight frame, e.g. `+00032.00 GN`.
///
/// Byte 0 is the sign; bytes 1..=8 must all lie in `.`..=`9`. Trailing unit
/// text and line endings are ignored.
pub fn decode_frame(frame: &[u8]) -> Result<f32, ScaleError> {
    if frame.len() < FRAME_FIELD_LEN {
        return Err(ScaleError::Format);
    }
    let negative = frame[0] == b'-';
    let field = &frame[1..FRAME_FIELD_LEN];
    if field.iter().any(|b| !(b'.'..=b'9').contains(b)) {
        return Err(ScaleError::Format);
    }
    // '/' sits inside the accepted byte range but is never part of a number
    let text = std::str::from_utf8(field).map_err(|_| ScaleError::Format)?;
    let value: f32 = text.parse().map_err(|_| ScaleError::Format)?;
    Ok(if negative { -value } else { value })
}

pub struct ScaleLink {
    port: Box<dyn SerialPort>,
    clock: Arc<dyn Clock + Send + Sync>,
    cfg: ScaleCfg,
}

impl ScaleLink {
    pub fn new(port: Box<dyn SerialPort>, clock: Arc<dyn Clock + Send + Sync>, cfg: ScaleCfg) -> Self {
        Self { port, clock, cfg }
    }

    fn flush(&mut self) -> Result<usize, ScaleError> {
        let mut dropped = 0;
        while self.port.read_byte().map_err(|e| map_link_error(&*e))?.is_some() {
            dropped += 1;
        }
        Ok(dropped)
    }

    fn send(&mut self, command: &[u8]) -> Result<(), ScaleError> {
        self.port.write(command).map_err(|e| map_link_error(&*e))
    }

    /// Block until at least `min_response_bytes` are buffered or the response
    /// window elapses.
    fn await_response(&mut self) -> Result<usize, ScaleError> {
        let start = self.clock.now();
        loop {
            let buffered = self.port.available().map_err(|e| map_link_error(&*e))?;
            if buffered >= self.cfg.min_response_bytes {
                return Ok(buffered);
            }
            if self.clock.ms_since(start) >= self.cfg.response_timeout_ms {
                return Err(ScaleError::Timeout);
            }
            self.clock.sleep_ms(self.cfg.poll_ms);
        }
    }

    fn drain(&mut self, max: usize) -> Result<Vec<u8>, ScaleError> {
        let mut frame = Vec::with_capacity(max);
        while frame.len() < max {
            match self.port.read_byte().map_err(|e| map_link_error(&*e))? {
                Some(b) => frame.push(b),
                None => break,
            }
        }
        Ok(frame)
    }

    /// One instantaneous reading in grains.
    pub fn read_instant(&mut self) -> Result<f32, ScaleError> {
        let stale = self.flush()?;
        if stale > 0 {
            tracing::trace!(bytes = stale, "dropped stale scale bytes");
        }
        self.send(PRINT_COMMAND)?;
        let buffered = match self.await_response() {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, timeout_ms = self.cfg.response_timeout_ms, "scale read failed");
                return Err(e);
            }
        };
        let frame = self.drain(buffered)?;
        let weight = decode_frame(&frame).inspect_err(|e| {
            tracing::warn!(
                error = %e,
                frame = %String::from_utf8_lossy(&frame).trim_end(),
                "unexpected scale frame"
            );
        })?;
        tracing::trace!(weight, "scale sample");
        Ok(weight)
    }

    /// Re-zero the balance.
    pub fn zero(&mut self) -> Result<(), ScaleError> {
        self.flush()?;
        self.send(ZERO_COMMAND)?;
        self.clock.sleep_ms(self.cfg.zero_settle_ms);
        tracing::debug!("scale zeroed");
        Ok(())
    }

    /// Probe with `?ID` until the balance answers; returns the raw reply.
    pub fn identify(&mut self) -> Result<String, ScaleError> {
        for attempt in 1..=self.cfg.id_attempts {
            self.flush()?;
            self.send(ID_COMMAND)?;
            self.clock.sleep_ms(50);
            let buffered = self.port.available().map_err(|e| map_link_error(&*e))?;
            if buffered > 0 {
                let reply = self.drain(buffered)?;
                let id = String::from_utf8_lossy(&reply).trim().to_string();
                tracing::info!(attempt, id = %id, "scale identified");
                return Ok(id);
            }
        }
        Err(ScaleError::Timeout)
    }
}

impl InstantWeight for ScaleLink {
    fn read_instant(&mut self) -> Result<f32, ScaleError> {
        ScaleLink::read_instant(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use trickler_traits::ManualClock;

    type BoxErr = Box<dyn std::error::Error + Send + Sync>;

    /// Answers each `PRT` with a fixed frame once `latency_ms` has passed.
    struct ReplyPort {
        clock: ManualClock,
        reply: Option<Vec<u8>>,
        latency_ms: u64,
        rx: VecDeque<u8>,
        pending_since: Option<u64>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl ReplyPort {
        fn new(clock: ManualClock, reply: Option<&[u8]>, latency_ms: u64) -> Self {
            Self {
                clock,
                reply: reply.map(<[u8]>::to_vec),
                latency_ms,
                rx: VecDeque::new(),
                pending_since: None,
                written: Arc::default(),
            }
        }

        fn pump(&mut self) {
            if let Some(t0) = self.pending_since
                && self.clock.elapsed_ms() - t0 >= self.latency_ms
            {
                self.pending_since = None;
                if let Some(r) = &self.reply {
                    self.rx.extend(r.iter().copied());
                }
            }
        }
    }

    impl SerialPort for ReplyPort {
        fn write(&mut self, bytes: &[u8]) -> Result<(), BoxErr> {
            self.written.lock().unwrap().extend_from_slice(bytes);
            if bytes == PRINT_COMMAND || bytes == ID_COMMAND {
                self.pending_since = Some(self.clock.elapsed_ms());
            }
            Ok(())
        }
        fn available(&mut self) -> Result<usize, BoxErr> {
            self.pump();
            Ok(self.rx.len())
        }
        fn read_byte(&mut self) -> Result<Option<u8>, BoxErr> {
            self.pump();
            Ok(self.rx.pop_front())
        }
    }

    fn link(reply: Option<&[u8]>, latency_ms: u64) -> (ScaleLink, ManualClock, Arc<Mutex<Vec<u8>>>) {
        let clock = ManualClock::new();
        let port = ReplyPort::new(clock.clone(), reply, latency_ms);
        let written = port.written.clone();
        let link = ScaleLink::new(Box::new(port), Arc::new(clock.clone()), ScaleCfg::default());
        (link, clock, written)
    }

    #[rstest]
    #[case(b"+00032.00 GN\r\n", 32.0)]
    #[case(b"-00000.42 GN\r\n", -0.42)]
    #[case(b" 00001.50 GN\r\n", 1.5)]
    #[case(b"+000000.0 g \r\n", 0.0)]
    fn decodes_weight_frames(#[case] frame: &[u8], #[case] expected: f32) {
        let w = decode_frame(frame).unwrap();
        assert!((w - expected).abs() < 1e-6, "{w} != {expected}");
    }

    #[rstest]
    #[case(b"+0003A.00 GN\r\n")]
    #[case(b"+00 32.00 GN\r\n")]
    #[case(b"+0.0.0000 GN\r\n")]
    #[case(b"+0003/.00 GN\r\n")]
    #[case(b"+0003")]
    fn rejects_malformed_frames(#[case] frame: &[u8]) {
        assert_eq!(decode_frame(frame), Err(ScaleError::Format));
    }

    #[test]
    fn read_waits_for_latency_then_decodes() {
        let (mut link, clock, written) = link(Some(b"+00012.34 GN\r\n"), 120);
        let w = link.read_instant().unwrap();
        assert!((w - 12.34).abs() < 1e-4);
        assert!(clock.elapsed_ms() >= 120);
        assert_eq!(written.lock().unwrap().as_slice(), PRINT_COMMAND);
    }

    #[test]
    fn silent_scale_times_out_after_response_window() {
        let (mut link, clock, _) = link(None, 0);
        assert_eq!(link.read_instant(), Err(ScaleError::Timeout));
        assert!(clock.elapsed_ms() >= 500);
        assert!(clock.elapsed_ms() < 510);
    }

    #[test]
    fn zero_sends_rezero_and_settles() {
        let (mut link, clock, written) = link(None, 0);
        link.zero().unwrap();
        assert_eq!(written.lock().unwrap().as_slice(), ZERO_COMMAND);
        assert_eq!(clock.elapsed_ms(), 50);
    }

    #[test]
    fn identify_returns_first_reply() {
        let (mut link, clock, _) = link(Some(b"ID,FX-120i\r\n"), 10);
        assert_eq!(link.identify().unwrap(), "ID,FX-120i");
        assert_eq!(clock.elapsed_ms(), 50);
    }
}
