//! Framing layers.
//!
//! A physical transport (UART, USB bulk, a TCP socket standing in for one) rarely preserves
//! packet boundaries on its own. A framing layer sits directly above such a transport, turns its
//! byte stream into discrete packets on receive, and wraps outgoing packets with a header (and
//! optionally a trailing checksum) on send. Three variants trade overhead for maximum packet
//! size:
//!
//! * [`short::ShortFrame`] -- 1..=64 byte payloads, 1 byte of header, optional CRC-8 trailer.
//! * [`long::LongFrame`] -- up to 4095 byte payloads, 2 byte header, CRC-16/CCITT trailer.
//! * [`jumbo::JumboFrame`] -- up to 8192 byte payloads, 2 byte header, CRC-32 trailer.
//!
//! All three share the same idle-timeout behaviour: if too long elapses between bytes of a
//! frame in progress, the partial frame is discarded rather than risking it being stitched
//! together with unrelated bytes received later.
//!
//! Bytes that do not start a recognized frame header are not an error; they are forwarded
//! verbatim to an `other` sibling so that, for example, a human typing at a terminal connected
//! to the same UART does not get treated as protocol garbage.

pub mod crc;
pub mod jumbo;
pub mod long;
pub mod short;

pub use jumbo::JumboFrame;
pub use long::LongFrame;
pub use short::{Mode, ShortFrame};
