//! Short and Compact frame: up to 64 byte payloads, 1 byte header, optional CRC-8 trailer.
//!
//! Header byte layout: `0x80 - 1 + len` for the plain (no CRC) "short" variant, giving the
//! range `0x81..=0xBF` for `len` in `1..=64`; the CRC-8 "compact" variant sets bit 6 on that
//! value, giving `0xC1..=0xFF`. A byte of exactly `0x80` never occurs as a header -- it is
//! reserved as the folded frame-family tag used by [`crate::dispatch::Dispatch`] -- so the
//! decoder treats it as ordinary out-of-frame data, same as any byte `<= 0x80`.

use crate::clock::{self, Clock, Counter};
use crate::error::{Error, Result};
use crate::frame::crc::crc8;
use crate::layer::{Layer, Stats};

/// Maximum payload size of a short/compact frame.
pub const MAXSIZE: usize = 64;

/// Whether a CRC-8 trailer protects the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// No checksum; 1 byte of overhead.
    Plain,
    /// CRC-8 trailer; 2 bytes of overhead.
    Crc8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    InMessage,
    Forwarding,
}

/// The short/compact frame layer.
pub struct ShortFrame<'a> {
    child: &'a mut dyn Layer,
    other: Option<&'a mut dyn Layer>,
    parent: &'a mut dyn Layer,
    clock: &'a dyn Clock,
    mode: Mode,
    frame_timeout: u32,
    state: State,
    crc: u8,
    recv_buf: [u8; MAXSIZE],
    recv_size: usize,
    recv_len: usize,
    recv_fwed: usize,
    last_ts: Counter,
    /// Traffic counters; see [`Stats`].
    pub stats: Stats,
}

impl<'a> ShortFrame<'a> {
    /// Build a new frame layer.
    ///
    /// `timeout` bounds, in clock ticks, how long a frame-in-progress may sit idle before it is
    /// discarded as abandoned.
    pub fn new(
        mode: Mode,
        child: &'a mut dyn Layer,
        other: Option<&'a mut dyn Layer>,
        parent: &'a mut dyn Layer,
        clock: &'a dyn Clock,
        timeout: u32,
    ) -> Self {
        ShortFrame {
            child,
            other,
            parent,
            clock,
            mode,
            frame_timeout: timeout,
            state: State::Idle,
            crc: 0,
            recv_buf: [0; MAXSIZE],
            recv_size: 0,
            recv_len: 0,
            recv_fwed: 0,
            last_ts: 0,
            stats: Stats::default(),
        }
    }

    fn overhead(&self) -> usize {
        match self.mode {
            Mode::Plain => 1,
            Mode::Crc8 => 2,
        }
    }

    fn flush_other(&mut self, caller: &mut dyn Layer) {
        if self.recv_size == 0 {
            return;
        }
        if let Some(other) = self.other.as_mut() {
            other.recv(&self.recv_buf[..self.recv_size], caller);
        }
        self.recv_size = 0;
    }

    /// Retry forwarding the currently decoded frame to `child`. Returns `true` once it has been
    /// fully delivered.
    fn try_forward(&mut self, caller: &mut dyn Layer) -> bool {
        let remaining = &self.recv_buf[self.recv_fwed..self.recv_size];
        let forwarded = self.child.recv(remaining, caller);
        if forwarded < remaining.len() {
            self.recv_fwed += forwarded;
            self.stats.rx_retries += 1;
            false
        } else {
            self.recv_size = 0;
            self.recv_len = 0;
            self.recv_fwed = 0;
            self.state = State::Idle;
            true
        }
    }
}

impl<'a> Layer for ShortFrame<'a> {
    fn recv(&mut self, src: &[u8], caller: &mut dyn Layer) -> usize {
        let now = self.clock.now();
        if self.state != State::Forwarding && clock::since(now, self.last_ts) > self.frame_timeout as i32 {
            self.state = State::Idle;
            if self.recv_len != 0 {
                self.stats.rx_dropped += 1;
            }
            self.recv_size = 0;
            self.recv_len = 0;
        }
        self.last_ts = now;

        if src.is_empty() {
            self.stats.rx_dropped += 1;
            return 0;
        }

        if self.state == State::Forwarding && !self.try_forward(caller) {
            return 0;
        }

        let mut i = 0;
        while i < src.len() {
            let byte = src[i];
            match self.state {
                State::Idle => {
                    if byte > 0x80 {
                        self.flush_other(caller);
                        self.state = State::InMessage;
                        self.recv_len = ((byte & 0x3f) as usize) + 1;
                        self.recv_size = 0;
                        if self.mode == Mode::Crc8 {
                            self.crc = crc8(0, byte);
                        }
                    } else if self.recv_size < self.recv_buf.len() {
                        self.recv_buf[self.recv_size] = byte;
                        self.recv_size += 1;
                    }
                }
                State::InMessage => {
                    let crc_enabled = self.mode == Mode::Crc8;
                    if self.recv_size == self.recv_len && crc_enabled {
                        if byte == self.crc {
                            self.state = State::Forwarding;
                            self.recv_fwed = 0;
                            self.stats.rx_packets += 1;
                            self.stats.rx_counter += self.recv_size as u32;
                        } else {
                            self.stats.rx_errors += 1;
                            self.recv_size = 0;
                            self.recv_len = 0;
                            self.state = State::Idle;
                        }
                    } else {
                        self.recv_buf[self.recv_size] = byte;
                        self.recv_size += 1;
                        if crc_enabled {
                            self.crc = crc8(self.crc, byte);
                        } else if self.recv_size == self.recv_len {
                            self.state = State::Forwarding;
                            self.recv_fwed = 0;
                            self.stats.rx_packets += 1;
                            self.stats.rx_counter += self.recv_size as u32;
                        }
                    }
                }
                State::Forwarding => unreachable!("forwarding is resolved before the loop runs"),
            }
            i += 1;

            if self.state == State::Forwarding && !self.try_forward(caller) {
                return i;
            }
        }

        self.flush_other(caller);
        src.len()
    }

    fn sendbuf_available(&mut self, size: usize) -> usize {
        let size = size.min(MAXSIZE);
        self.parent.sendbuf_available(size + self.overhead()).saturating_sub(self.overhead())
    }

    fn send_with(
        &mut self,
        size: usize,
        f: &mut dyn FnMut(&mut [u8]) -> Option<usize>,
    ) -> Result<usize> {
        let size = size.min(MAXSIZE);
        let overhead = self.overhead();
        let crc_enabled = self.mode == Mode::Crc8;
        let mut committed = 0usize;

        let sent = self.parent.send_with(size + overhead, &mut |buf| {
            if buf.len() < overhead {
                return None;
            }
            let body_cap = buf.len() - overhead;
            let written = f(&mut buf[1..1 + body_cap])?;
            committed = written;
            let frame_len = written + 1;
            buf[0] = 0x80u8.wrapping_sub(1).wrapping_add(written as u8);
            if crc_enabled {
                buf[0] ^= 0x40;
                let checksum = crate::frame::crc::crc8_buf(&buf[..frame_len]);
                buf[frame_len] = checksum;
                Some(frame_len + 1)
            } else {
                Some(frame_len)
            }
        });

        match sent {
            Ok(n) => {
                self.stats.tx_packets += 1;
                self.stats.tx_counter += committed as u32;
                Ok(n)
            }
            Err(err) => {
                self.stats.tx_dropped += 1;
                Err(err)
            }
        }
    }
}

/// Reject a payload too large for this framing to ever carry.
pub fn check_size(size: usize) -> Result<()> {
    if size > MAXSIZE {
        Err(Error::BadSize)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::vec::Vec;
    use crate::clock::ManualClock;

    struct Sink {
        buf: [u8; 128],
        len: usize,
        cap: usize,
    }

    impl Sink {
        fn new(cap: usize) -> Self {
            Sink { buf: [0; 128], len: 0, cap }
        }
    }

    impl Layer for Sink {
        fn recv(&mut self, _src: &[u8], _caller: &mut dyn Layer) -> usize {
            0
        }

        fn sendbuf_available(&mut self, size: usize) -> usize {
            size.min(self.cap)
        }

        fn send_with(
            &mut self,
            size: usize,
            f: &mut dyn FnMut(&mut [u8]) -> Option<usize>,
        ) -> Result<usize> {
            let size = size.min(self.cap);
            let mut scratch = [0u8; 128];
            match f(&mut scratch[..size]) {
                Some(len) => {
                    self.buf[..len].copy_from_slice(&scratch[..len]);
                    self.len = len;
                    Ok(len)
                }
                None => Ok(0),
            }
        }
    }

    struct Counting(usize);

    impl Layer for Counting {
        fn recv(&mut self, src: &[u8], _caller: &mut dyn Layer) -> usize {
            self.0 += 1;
            src.len()
        }

        fn sendbuf_available(&mut self, _size: usize) -> usize {
            0
        }

        fn send_with(
            &mut self,
            _size: usize,
            _f: &mut dyn FnMut(&mut [u8]) -> Option<usize>,
        ) -> Result<usize> {
            Ok(0)
        }
    }

    #[test]
    fn send_plain_frame_has_one_byte_header() {
        let mut sink = Sink::new(128);
        let mut child = Counting(0);
        let clock = ManualClock::new();
        {
            let mut frame =
                ShortFrame::new(Mode::Plain, &mut child, None, &mut sink, &clock, 1000);
            frame.send(&[1, 2, 3]).unwrap();
        }
        assert_eq!(&sink.buf[..sink.len], &[0x82, 1, 2, 3]);
    }

    #[test]
    fn send_crc_frame_round_trips_through_recv() {
        let mut sink = Sink::new(128);
        let mut child = Counting(0);
        let clock = ManualClock::new();
        let mut wire = Vec::new();
        {
            let mut frame =
                ShortFrame::new(Mode::Crc8, &mut child, None, &mut sink, &clock, 1000);
            frame.send(&[0xAA, 0xBB]).unwrap();
            wire.extend_from_slice(&sink.buf[..sink.len]);
        }

        let mut receiver = Counting(0);
        let mut origin = Counting(0);
        let mut sink2 = Sink::new(128);
        let mut frame =
            ShortFrame::new(Mode::Crc8, &mut receiver, None, &mut sink2, &clock, 1000);
        let consumed = frame.recv(&wire, &mut origin);
        assert_eq!(consumed, wire.len());
        assert_eq!(frame.stats.rx_packets, 1);
        assert_eq!(frame.stats.rx_errors, 0);
        assert_eq!(receiver.0, 1);
    }

    #[test]
    fn bad_crc_is_counted_and_dropped() {
        let mut sink = Sink::new(128);
        let mut child = Counting(0);
        let clock = ManualClock::new();
        let mut wire = Vec::new();
        {
            let mut frame =
                ShortFrame::new(Mode::Crc8, &mut child, None, &mut sink, &clock, 1000);
            frame.send(&[1, 2, 3]).unwrap();
            wire.extend_from_slice(&sink.buf[..sink.len]);
        }
        let last = wire.len() - 1;
        wire[last] ^= 0xff;

        let mut receiver = Counting(0);
        let mut origin = Counting(0);
        let mut sink2 = Sink::new(128);
        let mut frame =
            ShortFrame::new(Mode::Crc8, &mut receiver, None, &mut sink2, &clock, 1000);
        frame.recv(&wire, &mut origin);
        assert_eq!(frame.stats.rx_errors, 1);
        assert_eq!(receiver.0, 0);
    }

    #[test]
    fn byte_0x80_is_not_a_frame_header() {
        let mut receiver = Counting(0);
        let mut origin = Counting(0);
        let mut sink = Sink::new(128);
        let clock = ManualClock::new();
        let mut other = Counting(0);
        {
            let mut frame = ShortFrame::new(
                Mode::Plain,
                &mut receiver,
                Some(&mut other),
                &mut sink,
                &clock,
                1000,
            );
            frame.recv(&[0x80], &mut origin);
        }
        assert_eq!(other.0, 1);
    }
}
