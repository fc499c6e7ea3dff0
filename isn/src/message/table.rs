//! The table of message slots a [`super::MessageLayer`] schedules over.

/// What a handler was invoked to do, handed to it alongside the output buffer so it can tell an
/// external request apart from the tail end of its own outstanding query without the message
/// layer needing to expose its internals.
pub struct MessageContext<'a> {
    pub(super) input: Option<&'a [u8]>,
    pub(super) priority: u8,
}

impl<'a> MessageContext<'a> {
    /// The argument data that came with this call, if any. `None` means the slot is merely
    /// being polled for its current value.
    pub fn input(&self) -> Option<&'a [u8]> {
        self.input
    }

    /// True iff this call answers a query from the peer (we were scheduled at [`PRI_HIGHEST`]),
    /// as opposed to a locally-originated update or the tail of our own query.
    pub fn is_query(&self) -> bool {
        self.priority == PRI_HIGHEST
    }

    /// True iff this call is the peer's reply to a query we sent ourselves, rather than a fresh
    /// request from the peer.
    pub fn is_reply(&self) -> bool {
        matches!(self.priority, PRI_QUERY_WAIT | PRI_QUERY_ARGS)
    }

    /// Confirms that `arg` is the same slice this context was built from, to disambiguate a
    /// handler shared by callbacks triggered from more than one source.
    pub fn is_input_valid(&self, arg: &[u8]) -> bool {
        match self.input {
            Some(input) => core::ptr::eq(input.as_ptr(), arg.as_ptr()) && input.len() == arg.len(),
            None => false,
        }
    }
}

/// A handler backing one message slot.
///
/// Called with `ctx.input() == Some(data)` when a query arrived carrying argument data,
/// `ctx.input() == None` when the slot is merely being polled for its current value. Writes its
/// response into `out` and returns how many bytes it wrote, or `None` if it currently has
/// nothing to report (the slot is skipped for this round but stays scheduled).
pub trait Handler {
    /// Produce (or consume and produce) this message's payload.
    fn call(&mut self, ctx: MessageContext, out: &mut [u8]) -> Option<usize>;
}

impl<F> Handler for F
where
    F: FnMut(MessageContext, &mut [u8]) -> Option<usize>,
{
    fn call(&mut self, ctx: MessageContext, out: &mut [u8]) -> Option<usize> {
        self(ctx, out)
    }
}

/// Highest possible scheduling priority; reserved for responses to queries so that a remote
/// asking a direct question is never starved by a device continuously streaming low-priority
/// telemetry.
pub const PRI_HIGHEST: u8 = 0x0f;
/// Reserved priority for sending a message's own textual descriptor rather than its data.
pub const PRI_DESCRIPTION: u8 = 31;
/// Like [`PRI_DESCRIPTION`], but only sent once the table has no higher-priority work pending;
/// used for descriptors fetched opportunistically during an otherwise idle link.
pub const PRI_DESCRIPTION_LOW: u8 = 30;
/// Convenience priority band for routine high-rate telemetry.
pub const PRI_HIGH: u8 = 0x08;
/// Convenience priority band for ordinary periodic reports.
pub const PRI_NORMAL: u8 = 0x04;
/// Convenience priority band for low-rate, rarely-changing values.
pub const PRI_LOW: u8 = 0x01;
/// Not pending; a slot at this priority is never scheduled.
pub const PRI_CLEAR: u8 = 0;

/// Force-send the slot's current arguments, bypassing the lock held by any other slot.
pub const PRI_UNLOCK_ARGS: u8 = 29;
/// Ask the peer for its current value of this slot and wait for the reply.
pub const PRI_QUERY_ARGS: u8 = 27;
/// A query for this slot has been sent; waiting on the peer's reply before anything else of
/// this slot's can go out.
pub const PRI_QUERY_WAIT: u8 = 26;
/// Push a new value to the peer and hold the lock until it is acknowledged.
pub const PRI_UPDATE_ARGS: u8 = 25;

/// The highest message number a table may address.
pub const LAST_MSGNUM: u8 = 127;
/// Message number reserved for the fast-load request: "send me every slot's descriptor (or
/// value)", used by a fresh peer enumerating the table instead of querying each slot in turn.
pub const LAST_MSGNUM_FAST_LOAD: u8 = LAST_MSGNUM;

/// One slot of a message table.
pub struct Slot<'a> {
    pub(super) priority: u8,
    pub(super) handler: &'a mut dyn Handler,
    pub(super) desc: &'static str,
}

impl<'a> Slot<'a> {
    /// Build a slot with a human-readable descriptor string (sent in response to a descriptor
    /// query), initially idle.
    pub fn new(handler: &'a mut dyn Handler, desc: &'static str) -> Self {
        Slot { priority: 0, handler, desc }
    }

    /// Whether this slot is currently scheduled to send.
    pub fn is_pending(&self) -> bool {
        self.priority != 0
    }
}
