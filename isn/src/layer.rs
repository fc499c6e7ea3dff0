//! The layer contract shared by every protocol object in this crate.
//!
//! Each layer receives data from its parent, post-processes it, and forwards it to a child (or
//! several children). In the reverse direction a child responds by sending data back up through
//! its parent, which pre-processes it on the way further up.
//!
//! ## Buffers
//!
//! To avoid copying data between layers, a layer that wants to send asks its parent for a
//! buffer via [`Layer::send_with`], specifying how large a payload it intends to write. Each
//! layer on the way up adds its own header size to the request before forwarding it further,
//! then slices its own header off the front of whatever comes back so that only the remaining
//! payload region is exposed further down the call stack. The original C driver expressed this
//! by handing back a raw pointer that stayed valid across two separate calls (`getsendbuf` then
//! `send`); in safe Rust the same zero-copy shape is expressed as a single call that takes a
//! closure, so the borrow of the underlying buffer never has to outlive the call that produced
//! it. Because the buffer can only ever be touched from inside that one closure invocation,
//! "only one send buffer outstanding per layer at a time" is enforced by the type system rather
//! than by a runtime-checked lock flag.
//!
//! Not every layer needs to send. Pure routers such as [`crate::dispatch::Dispatch`],
//! [`crate::dup::Dup`], and [`crate::redirect::Redirect`] only ever receive; they implement
//! [`Receiver`] instead of the full [`Layer`] contract.
use crate::error::{Error, Result};

/// A generic protocol layer.
pub trait Layer {
    /// Inspect data handed down from the parent.
    ///
    /// `caller` identifies the immediate parent that produced `src`, so that a layer
    /// implementing a simple echo or a multi-path reply can address its answer back to the right
    /// neighbour instead of always using its statically configured parent.
    ///
    /// Returns the number of bytes of `src` that were consumed. Zero means the layer did not
    /// recognize the protocol and the caller should try another sibling; a framing layer may
    /// also return fewer bytes than `src.len()` when it decoded and forwarded one packet but a
    /// downstream layer could not accept a second one yet, in which case the caller is expected
    /// to re-present the remainder later.
    fn recv(&mut self, src: &[u8], caller: &mut dyn Layer) -> usize;

    /// Report how many bytes could be sent right now for a request of `size`, without reserving
    /// anything. A requested size of zero still represents a valid, empty packet and should
    /// report back zero (available), not an error. A return value smaller than `size` means a
    /// smaller packet would currently fit; it is up to the caller whether to proceed with that
    /// or wait.
    fn sendbuf_available(&mut self, size: usize) -> usize;

    /// Reserve a buffer able to hold `size` bytes of payload for this layer plus whatever header
    /// overhead every layer between here and the physical transport needs to add, then invoke
    /// `f` with the region this layer may write into.
    ///
    /// If `f` returns `Some(len)`, exactly `len` bytes are framed with this layer's header and
    /// forwarded to the parent's own `send_with`. If `f` returns `None` the reservation is
    /// dropped without sending anything, equivalent to the original driver's explicit `free()`
    /// call. Returns the number of bytes the parent reports as sent, or
    /// [`Error::WouldBlock`] if no buffer of the requested size could be obtained at all.
    fn send_with(
        &mut self,
        size: usize,
        f: &mut dyn FnMut(&mut [u8]) -> Option<usize>,
    ) -> Result<usize>;

    /// Send a complete payload that is already assembled in memory.
    ///
    /// A convenience built on [`Layer::send_with`] for terminal senders -- a message reply
    /// staged in its own buffer, a test fixture -- that do not need to build their payload
    /// in-place inside the lower layers' buffer.
    fn send(&mut self, payload: &[u8]) -> Result<usize> {
        let len = payload.len();
        self.send_with(len, &mut move |buf| {
            if buf.len() < len {
                return None;
            }
            buf[..len].copy_from_slice(payload);
            Some(len)
        })
    }
}

/// A layer that only ever receives.
///
/// Routing layers -- [`crate::dispatch::Dispatch`], [`crate::dup::Dup`], and
/// [`crate::redirect::Redirect`] -- never originate a send of their own; they forward to the
/// `send_with` of whichever child accepted the packet, or of the caller for a loopback reply.
/// Such layers implement this narrower trait instead of fabricating no-op buffer methods.
pub trait Receiver {
    /// See [`Layer::recv`].
    fn recv(&mut self, src: &[u8], caller: &mut dyn Layer) -> usize;
}

impl<L: Layer + ?Sized> Receiver for L {
    fn recv(&mut self, src: &[u8], caller: &mut dyn Layer) -> usize {
        Layer::recv(self, src, caller)
    }
}

/// Helper for a layer that wants to prepend a fixed-size header before calling its parent.
///
/// `header_len` bytes are reserved at the front of the buffer the parent returns; `write_header`
/// is called with that region immediately before the combined buffer is handed to the parent's
/// `send`, and `body` is given the remaining region to fill with payload. This captures the
/// "add my header, ask the layer below for `size + header_len`, slice my piece off the front"
/// pattern shared by every framing and wrapper layer in this crate.
pub fn send_with_header(
    parent: &mut dyn Layer,
    header_len: usize,
    size: usize,
    write_header: impl FnOnce(&mut [u8], usize),
    body: &mut dyn FnMut(&mut [u8]) -> Option<usize>,
) -> Result<usize> {
    let mut written_len = None;
    let mut write_header = Some(write_header);
    let result = parent.send_with(size + header_len, &mut |buf| {
        if buf.len() < header_len {
            return None;
        }
        let (header, rest) = buf.split_at_mut(header_len);
        match body(rest) {
            Some(len) => {
                if let Some(write_header) = write_header.take() {
                    write_header(header, len);
                }
                written_len = Some(len);
                Some(header_len + len)
            }
            None => None,
        }
    });
    match result {
        Ok(_) => Ok(written_len.unwrap_or(0)),
        Err(err) => Err(err),
    }
}

/// Availability check through a layer that adds `header_len` bytes of its own.
pub fn sendbuf_available_with_header(parent: &mut dyn Layer, header_len: usize, size: usize) -> usize {
    parent.sendbuf_available(size + header_len).saturating_sub(header_len)
}

/// Assert that a requested size does not exceed a hard protocol maximum.
///
/// Exceeding the maximum is a programmer error (the caller chose a payload larger than the
/// wire format can ever represent), not a transient condition, so this is a hard error rather
/// than silently truncating.
pub fn check_max_size(size: usize, max: usize) -> Result<()> {
    if size > max {
        Err(Error::BadSize)
    } else {
        Ok(())
    }
}

/// Per-layer traffic counters.
///
/// Every concrete layer in this crate embeds one of these and updates it on the hot path the
/// same way the original C drivers update their `obj->drv.stats` fields. Nothing here is
/// load-bearing for correctness; it exists so a device can report link health.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Packets accepted and forwarded upward.
    pub rx_packets: u32,
    /// Bytes accepted and forwarded upward.
    pub rx_counter: u32,
    /// Packets rejected for corruption (bad CRC, truncated frame, unknown tag).
    pub rx_errors: u32,
    /// Packets accepted by framing but dropped before reaching a handler (no route, full queue,
    /// timeout while mid-frame).
    pub rx_dropped: u32,
    /// Times a downstream layer could only make partial progress on a forwarded packet.
    pub rx_retries: u32,
    /// Packets successfully handed to `send`.
    pub tx_packets: u32,
    /// Bytes successfully handed to `send`.
    pub tx_counter: u32,
    /// Packets that could not be sent because no buffer was available.
    pub tx_dropped: u32,
    /// Retransmissions performed on the send side.
    pub tx_retries: u32,
}

impl Stats {
    /// Write a one-line summary to standard error.
    ///
    /// Available only on `std` because it prints to standard error, mirroring the `eprintln!`
    /// diagnostic sink used elsewhere in this crate.
    #[cfg(feature = "std")]
    pub fn trace(&self, label: &str) {
        eprintln!(
            "{label}: rx={}/{}err/{}drop tx={}/{}drop",
            self.rx_packets, self.rx_errors, self.rx_dropped, self.tx_packets, self.tx_dropped,
        );
    }
}

/// Protocol tag byte space (first byte of a decoded, unframed packet).
///
/// Frame-family tags occupy the top two bits (`0x81..=0xFF`; `0x80` itself is reserved and never
/// appears as a live header, see [`crate::frame`]); [`crate::dispatch::Dispatch`] folds the whole
/// range to a single match value since routing never needs to distinguish short from compact
/// framing.
pub mod proto {
    /// Keep-alive / terminal passthrough marker.
    pub const PING: u8 = 0x00;
    /// Lowest user protocol tag.
    pub const USER1: u8 = 0x01;
    /// Highest user protocol tag.
    pub const USER15: u8 = 0x0f;
    /// Long transport.
    pub const TRANL: u8 = 0x7d;
    /// Short transport.
    pub const TRANS: u8 = 0x7e;
    /// Message layer.
    pub const MSG: u8 = 0x7f;
    /// Start of the frame-family tag range (short, compact, long, jumbo headers).
    pub const FRAME: u8 = 0x80;
}
