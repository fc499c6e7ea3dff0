//! Port-multiplexed transport: demultiplexes one physical link into several logical streams.
//!
//! Each outgoing packet is tagged with a transport-family protocol byte, a port number, and a
//! monotonic per-port counter; on receive, the port byte selects which entry of a dispatch
//! table gets the payload. The short variant packs a 6-bit port and a 2-bit counter into a
//! single byte after the tag, trading counter range for one fewer header byte on links with few
//! ports; the long variant spends a whole byte on the port plus a full 16-bit little-endian
//! counter, for host-side reordering of high-throughput unidirectional streams.

use crate::error::Result;
use crate::layer::{proto, Layer};
use crate::managed::Slice;

/// Which transport variant's wire format to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Width {
    /// 2 bytes of header: tag, then `port(6 bits) | count(2 bits)` packed into one byte.
    Short,
    /// 4 bytes of header: tag, a full port byte, 16-bit little-endian counter.
    Long,
}

impl Width {
    fn tag(self) -> u8 {
        match self {
            Width::Short => proto::TRANS,
            Width::Long => proto::TRANL,
        }
    }

    fn overhead(self) -> usize {
        match self {
            Width::Short => 2,
            Width::Long => 4,
        }
    }
}

/// One entry of the receive-side dispatch table: the layer handling this port, plus the
/// per-port counters the original driver keeps for link diagnostics.
pub struct PortEntry<'a> {
    port: u8,
    child: &'a mut dyn Layer,
    /// Last received sequence counter on this port.
    pub rx_counter: u16,
    /// Packets dropped because no entry in the table claimed their port.
    pub rx_dropped: u32,
}

impl<'a> PortEntry<'a> {
    /// Bind `port` to `child`.
    pub fn new(port: u8, child: &'a mut dyn Layer) -> Self {
        PortEntry { port, child, rx_counter: 0, rx_dropped: 0 }
    }
}

/// A transport endpoint: sends as one port, receives demultiplexed across a table of ports.
pub struct Transport<'a> {
    parent: &'a mut dyn Layer,
    width: Width,
    port: u8,
    tx_counter: u16,
    table: Slice<'a, PortEntry<'a>>,
}

impl<'a> Transport<'a> {
    /// Build a transport endpoint that sends on `port` and demultiplexes incoming packets across
    /// `table`.
    pub fn new(
        width: Width,
        port: u8,
        parent: &'a mut dyn Layer,
        table: &'a mut [PortEntry<'a>],
    ) -> Self {
        Transport { parent, width, port, tx_counter: 0, table: Slice::Borrowed(table) }
    }
}

impl<'a> Layer for Transport<'a> {
    fn recv(&mut self, src: &[u8], caller: &mut dyn Layer) -> usize {
        let overhead = self.width.overhead();
        if src.len() < overhead || src[0] != self.width.tag() {
            return 0;
        }
        let (port, counter) = match self.width {
            Width::Short => (src[1] >> 2, (src[1] & 0x03) as u16),
            Width::Long => (src[1], src[2] as u16 | ((src[3] as u16) << 8)),
        };

        for entry in self.table.as_mut_slice() {
            if entry.port == port {
                entry.rx_counter = counter;
                let body = &src[overhead..];
                let consumed = entry.child.recv(body, caller);
                return if consumed > 0 { consumed + overhead } else { 0 };
            }
        }
        overhead
    }

    fn sendbuf_available(&mut self, size: usize) -> usize {
        let overhead = self.width.overhead();
        self.parent.sendbuf_available(size + overhead).saturating_sub(overhead)
    }

    fn send_with(
        &mut self,
        size: usize,
        f: &mut dyn FnMut(&mut [u8]) -> Option<usize>,
    ) -> Result<usize> {
        let overhead = self.width.overhead();
        let tag = self.width.tag();
        let port = self.port;
        let counter = self.tx_counter;
        let width = self.width;

        let sent = self.parent.send_with(size + overhead, &mut |buf| {
            if buf.len() < overhead {
                return None;
            }
            let written = f(&mut buf[overhead..])?;
            buf[0] = tag;
            match width {
                Width::Short => {
                    buf[1] = (port << 2) | (counter as u8 & 0x03);
                }
                Width::Long => {
                    buf[1] = port;
                    buf[2] = (counter & 0xff) as u8;
                    buf[3] = (counter >> 8) as u8;
                }
            }
            Some(overhead + written)
        });

        if sent.is_ok() {
            self.tx_counter = self.tx_counter.wrapping_add(1);
        }
        sent
    }
}
