//! Long frame: up to 4096 byte payloads, 2 byte header, CRC-16/CCITT-FALSE trailer.
//!
//! Header layout: the first byte is `0xD0 | (len_field >> 8)` where `len_field = len - 1`, the
//! second byte is `len_field & 0xFF`; together they carry a 12-bit length in `1..=4096`. Framing
//! is recognized by masking the first byte with `0xF0` and comparing against `0xD0`, the top
//! nibble short/compact frame headers never produce. The two schemes still overlap numerically
//! inside `0x80..=0xFF` -- that range is only collision-free because a device picks one frame
//! encoding or the other for a given link, never both stacked on top of each other.

use crate::clock::{self, Clock, Counter};
use crate::error::Result;
use crate::frame::crc::{crc16_ccitt, CRC16_CCITT_INIT};
use crate::layer::{Layer, Stats};

/// Maximum payload size of a long frame.
pub const MAXSIZE: usize = 4096;

const HEADER: usize = 2;
const FOOTER: usize = 2;
const OVERHEAD: usize = HEADER + FOOTER;

const TAG: u8 = 0xd0;
const MASK: u8 = 0xf0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    InProtocol,
    InMessage,
    InCrc,
    Forwarding,
}

/// The long frame layer.
pub struct LongFrame<'a> {
    child: &'a mut dyn Layer,
    other: Option<&'a mut dyn Layer>,
    parent: &'a mut dyn Layer,
    clock: &'a dyn Clock,
    frame_timeout: u32,
    state: State,
    crc: u16,
    recv_buf: alloc_box::Box<[u8; MAXSIZE]>,
    recv_size: usize,
    recv_len: usize,
    recv_fwed: usize,
    last_ts: Counter,
    /// Traffic counters; see [`Stats`].
    pub stats: Stats,
}

/// The receive buffer is heap-allocated (4096 bytes would blow the stack of many embedded
/// callers if placed inline); this is the one place in the crate that needs the `alloc` feature
/// to be more than a convenience.
mod alloc_box {
    pub use crate::alloc::boxed::Box;
}

impl<'a> LongFrame<'a> {
    /// Build a new long frame layer.
    pub fn new(
        child: &'a mut dyn Layer,
        other: Option<&'a mut dyn Layer>,
        parent: &'a mut dyn Layer,
        clock: &'a dyn Clock,
        timeout: u32,
    ) -> Self {
        LongFrame {
            child,
            other,
            parent,
            clock,
            frame_timeout: timeout,
            state: State::Idle,
            crc: 0,
            recv_buf: alloc_box::Box::new([0; MAXSIZE]),
            recv_size: 0,
            recv_len: 0,
            recv_fwed: 0,
            last_ts: 0,
            stats: Stats::default(),
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

    fn try_forward(&mut self, caller: &mut dyn Layer) -> bool {
        let remaining_start = self.recv_fwed;
        let remaining = &self.recv_buf[remaining_start..self.recv_size];
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

impl<'a> Layer for LongFrame<'a> {
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
                    if byte & MASK == TAG {
                        self.flush_other(caller);
                        self.state = State::InProtocol;
                        self.crc = crc16_ccitt(CRC16_CCITT_INIT, byte);
                        self.recv_len = ((byte & !MASK) as usize) << 8;
                    } else if self.recv_size < self.recv_buf.len() {
                        self.recv_buf[self.recv_size] = byte;
                        self.recv_size += 1;
                    }
                }
                State::InProtocol => {
                    self.state = State::InMessage;
                    self.crc = crc16_ccitt(self.crc, byte);
                    self.recv_len |= byte as usize;
                    self.recv_len += 1;
                }
                State::InMessage => {
                    if self.recv_size == self.recv_len {
                        self.state = State::InCrc;
                        self.crc ^= (byte as u16) << 8;
                    } else {
                        self.recv_buf[self.recv_size] = byte;
                        self.recv_size += 1;
                        self.crc = crc16_ccitt(self.crc, byte);
                    }
                }
                State::InCrc => {
                    self.crc ^= byte as u16;
                    if self.crc == 0 {
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
                }
                State::Forwarding => unreachable!("forwarding is resolved before the loop runs"),
            }
            i += 1;

            if self.state == State::Forwarding && !self.try_forward(caller) {
                return i;
            }
        }

        if self.recv_size != 0 && self.recv_len == 0 {
            self.flush_other(caller);
        }
        src.len()
    }

    fn sendbuf_available(&mut self, size: usize) -> usize {
        let size = size.min(MAXSIZE);
        self.parent.sendbuf_available(size + OVERHEAD).saturating_sub(OVERHEAD)
    }

    fn send_with(
        &mut self,
        size: usize,
        f: &mut dyn FnMut(&mut [u8]) -> Option<usize>,
    ) -> Result<usize> {
        let size = size.min(MAXSIZE);
        let mut committed = 0usize;

        let sent = self.parent.send_with(size + OVERHEAD, &mut |buf| {
            if buf.len() < OVERHEAD {
                return None;
            }
            let body_cap = buf.len() - OVERHEAD;
            let written = f(&mut buf[HEADER..HEADER + body_cap])?;
            committed = written;

            let len_field = (written as u16).wrapping_sub(1);
            buf[0] = TAG | ((len_field >> 8) as u8 & !MASK);
            buf[1] = (len_field & 0xff) as u8;

            let mut crc = CRC16_CCITT_INIT;
            for &b in &buf[..HEADER + written] {
                crc = crc16_ccitt(crc, b);
            }
            buf[HEADER + written] = (crc >> 8) as u8;
            buf[HEADER + written + 1] = (crc & 0xff) as u8;

            Some(HEADER + written + FOOTER)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    struct Sink {
        buf: alloc_box::Box<[u8; MAXSIZE + OVERHEAD]>,
        len: usize,
    }

    impl Sink {
        fn new() -> Self {
            Sink { buf: alloc_box::Box::new([0; MAXSIZE + OVERHEAD]), len: 0 }
        }
    }

    impl Layer for Sink {
        fn recv(&mut self, _src: &[u8], _caller: &mut dyn Layer) -> usize {
            0
        }

        fn sendbuf_available(&mut self, size: usize) -> usize {
            size
        }

        fn send_with(
            &mut self,
            size: usize,
            f: &mut dyn FnMut(&mut [u8]) -> Option<usize>,
        ) -> Result<usize> {
            let mut scratch = alloc_box::Box::new([0u8; MAXSIZE + OVERHEAD]);
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
    fn long_frame_round_trips() {
        let payload: alloc_box::Box<[u8; 300]> = alloc_box::Box::new([7u8; 300]);
        let clock = ManualClock::new();
        let mut sink = Sink::new();
        let mut wire = crate::alloc::vec::Vec::new();
        let mut child = Counting(0);
        {
            let mut frame = LongFrame::new(&mut child, None, &mut sink, &clock, 1000);
            frame.send(&payload[..]).unwrap();
            wire.extend_from_slice(&sink.buf[..sink.len]);
        }
        assert_eq!(wire.len(), 300 + OVERHEAD);

        let mut receiver = Counting(0);
        let mut origin = Counting(0);
        let mut sink2 = Sink::new();
        let mut frame = LongFrame::new(&mut receiver, None, &mut sink2, &clock, 1000);
        let consumed = frame.recv(&wire, &mut origin);
        assert_eq!(consumed, wire.len());
        assert_eq!(frame.stats.rx_packets, 1);
        assert_eq!(receiver.0, 1);
    }

    #[test]
    fn corrupted_long_frame_is_rejected() {
        let payload: alloc_box::Box<[u8; 16]> = alloc_box::Box::new([1u8; 16]);
        let clock = ManualClock::new();
        let mut sink = Sink::new();
        let mut wire = crate::alloc::vec::Vec::new();
        let mut child = Counting(0);
        {
            let mut frame = LongFrame::new(&mut child, None, &mut sink, &clock, 1000);
            frame.send(&payload[..]).unwrap();
            wire.extend_from_slice(&sink.buf[..sink.len]);
        }
        let last = wire.len() - 1;
        wire[last] ^= 0xff;

        let mut receiver = Counting(0);
        let mut origin = Counting(0);
        let mut sink2 = Sink::new();
        let mut frame = LongFrame::new(&mut receiver, None, &mut sink2, &clock, 1000);
        frame.recv(&wire, &mut origin);
        assert_eq!(frame.stats.rx_errors, 1);
        assert_eq!(receiver.0, 0);
    }
}
