//! Message layer: a table of up to 128 independently scheduled, typed values.
//!
//! Each slot has a priority; [`MessageLayer::sched`] sends the single highest-priority pending
//! slot per call, breaking ties by round-robin rotation through the table so that several slots
//! marked pending at the same priority all eventually get a turn rather than the lowest message
//! number starving the rest. A remote peer can query a slot directly (`recv` stages its input and
//! raises that slot to the highest priority so the reply goes out before any streaming data
//! queued behind it) or ask for a slot's human-readable descriptor instead of its value.
//!
//! Beyond plain posting, a slot can place the whole layer under a single outstanding *lock*:
//! asking the peer a question ([`table::PRI_QUERY_ARGS`]) or pushing a value that must be
//! acknowledged ([`table::PRI_UPDATE_ARGS`]) blocks that slot (and, for a query-wait, nothing
//! else) from resending until the matching reply arrives or [`MessageLayer::resend_queries`]
//! decides the peer went quiet. [`table::PRI_UNLOCK_ARGS`] forces a send through regardless of
//! any lock held by another slot.
//!
//! Wire shape per packet: `[MSG tag][msgnum | 0x80 for a descriptor][payload...]`. A zero-length
//! payload from the peer is a query for the slot's current value; message number 127 is a
//! reserved "fast load" request that posts every real slot at once, letting a fresh peer
//! enumerate the whole table without querying each slot in turn.

pub mod table;

use crate::error::{Error, Result};
use crate::layer::{proto, Layer};
use crate::managed::Slice;
pub use table::{Handler, MessageContext, Slot};

const RECV_SIZE: usize = 64;

/// The message layer.
pub struct MessageLayer<'a> {
    parent: &'a mut dyn Layer,
    table: Slice<'a, Slot<'a>>,
    recv_buf: [u8; RECV_SIZE],
    recv_len: usize,
    recv_msgnum: Option<u8>,
    round_robin: u8,
    /// The msgnum currently holding the single global lock, if any: either a query awaiting
    /// reply or an update awaiting acknowledgement.
    lock: Option<u8>,
    /// Ticks since the lock (if any) was last taken or a query/update was last (re)sent.
    /// [`MessageLayer::resend_queries`] is the only thing that advances or resets this.
    resend_timer: u32,
    mirror: Option<&'a mut dyn Layer>,
    /// Packets accepted as valid queries.
    pub rx_packets: u32,
    /// Packets rejected (unknown message number, malformed header).
    pub rx_errors: u32,
    /// Replies successfully handed to the parent.
    pub tx_packets: u32,
}

impl<'a> MessageLayer<'a> {
    /// Build a message layer over a fixed table of slots.
    pub fn new(parent: &'a mut dyn Layer, table: &'a mut [Slot<'a>]) -> Self {
        assert!(table.len() <= table::LAST_MSGNUM as usize + 1);
        MessageLayer {
            parent,
            table: Slice::Borrowed(table),
            recv_buf: [0; RECV_SIZE],
            recv_len: 0,
            recv_msgnum: None,
            round_robin: 0,
            lock: None,
            resend_timer: 0,
            mirror: None,
            rx_packets: 0,
            rx_errors: 0,
            tx_packets: 0,
        }
    }

    /// Mirror every accepted query to `mirror` in addition to handling it locally, so a second
    /// device can observe the same traffic without being a real participant in it.
    pub fn set_mirror(&mut self, mirror: &'a mut dyn Layer) {
        self.mirror = Some(mirror);
    }

    /// Mark `msgnum` pending for transmission at `priority`, raising it only if `priority` is
    /// higher than whatever is already pending (so a low-priority post never demotes a slot
    /// already queued at a higher one). A priority of [`table::PRI_CLEAR`] always wins and
    /// discards whatever was pending.
    pub fn send(&mut self, msgnum: u8, priority: u8) {
        self.post(msgnum, priority);
    }

    /// Find a slot by handler identity starting from `start` and post it at `priority`, for a
    /// caller that wants to avoid repeating a linear `msgnum` search it has already done once.
    /// Returns the msgnum found, or `0xff` if no slot from `start` onward uses that handler.
    pub fn send_qby(&mut self, handler: &dyn Handler, priority: u8, start: u8) -> u8 {
        let len = self.table.as_slice().len() as u8;
        let mut msgnum = start;
        while msgnum < len {
            let found = core::ptr::eq(
                &*self.table.as_slice()[msgnum as usize].handler as *const dyn Handler,
                handler as *const dyn Handler,
            );
            if found {
                self.post(msgnum, priority);
                return msgnum;
            }
            msgnum += 1;
        }
        0xff
    }

    /// [`MessageLayer::send_qby`] starting the search from the first slot.
    pub fn send_by(&mut self, handler: &dyn Handler, priority: u8) -> u8 {
        self.send_qby(handler, priority, 0)
    }

    fn post(&mut self, msgnum: u8, priority: u8) {
        if let Some(slot) = self.table.as_mut_slice().get_mut(msgnum as usize) {
            if priority == table::PRI_CLEAR {
                slot.priority = table::PRI_CLEAR;
            } else if slot.priority < priority {
                slot.priority = priority;
            }
        }
    }

    /// Number of slots currently pending transmission.
    pub fn pending_count(&self) -> usize {
        self.table.as_slice().iter().filter(|slot| slot.is_pending()).count()
    }

    /// Clear every pending slot without sending it, and release any held lock.
    pub fn discard_pending(&mut self) {
        for slot in self.table.as_mut_slice() {
            slot.priority = table::PRI_CLEAR;
        }
        self.lock = None;
    }

    /// Called by the application on a slow tick (every 1-3 seconds is typical). If more than
    /// `timeout` ticks have passed since the lock was last (re)armed, promote every slot stuck
    /// in [`table::PRI_QUERY_WAIT`] back to [`table::PRI_QUERY_ARGS`] so [`MessageLayer::sched`]
    /// asks again, and re-arm the locked slot (if any) as a fresh [`table::PRI_UPDATE_ARGS`].
    /// Returns how many slots were marked for retry, so the application can notice an
    /// unresponsive peer.
    pub fn resend_queries(&mut self, timeout: u32) -> usize {
        self.resend_timer = self.resend_timer.saturating_add(1);
        if self.resend_timer <= timeout {
            return 0;
        }
        if let Some(locked) = self.lock.take() {
            if let Some(slot) = self.table.as_mut_slice().get_mut(locked as usize) {
                slot.priority = table::PRI_UPDATE_ARGS;
            }
        }
        let mut count = 0;
        for slot in self.table.as_mut_slice() {
            match slot.priority {
                table::PRI_QUERY_WAIT => {
                    slot.priority = table::PRI_QUERY_ARGS;
                    count += 1;
                }
                table::PRI_UPDATE_ARGS => count += 1,
                _ => {}
            }
        }
        if count > 0 {
            self.resend_timer = 0;
        }
        count
    }

    /// Send the single highest-priority pending slot, if any. Ties are broken by rotating
    /// through the table starting just after the slot served last time. A slot parked in
    /// [`table::PRI_QUERY_WAIT`] is skipped while any slot holds the lock, unless it is itself
    /// the lock holder and its reply has just arrived. Returns `false` when nothing eligible was
    /// pending.
    pub fn sched(&mut self) -> bool {
        let len = self.table.as_slice().len();
        if len == 0 {
            return false;
        }

        let lock = self.lock;
        let recv_msgnum = self.recv_msgnum;
        let index = {
            let slots = self.table.as_slice();
            let eligible = |i: usize| {
                let priority = slots[i].priority;
                priority != table::PRI_CLEAR
                    && (priority != table::PRI_QUERY_WAIT || lock.is_none() || recv_msgnum == Some(i as u8))
            };
            let mut best: Option<usize> = None;
            for offset in 0..len {
                let i = (self.round_robin as usize + 1 + offset) % len;
                if !eligible(i) {
                    continue;
                }
                match best {
                    None => best = Some(i),
                    Some(b) if slots[i].priority > slots[b].priority => best = Some(i),
                    _ => {}
                }
            }
            match best {
                Some(i) => i,
                None => return false,
            }
        };
        self.round_robin = index as u8;
        let priority = self.table.as_slice()[index].priority;

        // Release the lock once the slot holding it gets its matching reply; otherwise take it
        // when we're about to send something the peer must explicitly answer or acknowledge.
        if recv_msgnum == Some(index as u8) && lock == Some(index as u8) {
            self.lock = None;
        } else if matches!(priority, table::PRI_UPDATE_ARGS | table::PRI_QUERY_ARGS) {
            self.lock = Some(index as u8);
            self.resend_timer = 0;
        }

        if priority >= table::PRI_DESCRIPTION_LOW {
            self.table.as_mut_slice()[index].priority =
                if recv_msgnum == Some(index as u8) { table::PRI_HIGHEST } else { table::PRI_LOW };
            self.send_desc(index as u8);
        } else if priority == table::PRI_QUERY_ARGS && recv_msgnum != Some(index as u8) {
            self.table.as_mut_slice()[index].priority = table::PRI_QUERY_WAIT;
            self.send_query(index as u8);
        } else {
            let mut recv_copy = [0u8; RECV_SIZE];
            let input = if recv_msgnum == Some(index as u8) {
                self.recv_msgnum = None;
                let n = self.recv_len;
                recv_copy[..n].copy_from_slice(&self.recv_buf[..n]);
                Some(&recv_copy[..n])
            } else {
                None
            };
            self.table.as_mut_slice()[index].priority = table::PRI_CLEAR;
            self.send_value(index as u8, priority, input);
        }
        true
    }

    fn send_desc(&mut self, msgnum: u8) {
        let desc = self.table.as_slice()[msgnum as usize].desc;
        let result = self.parent.send_with(desc.len() + 2, &mut |buf| {
            if buf.len() < 2 {
                return None;
            }
            buf[0] = proto::MSG;
            buf[1] = msgnum | 0x80;
            let n = (buf.len() - 2).min(desc.len());
            buf[2..2 + n].copy_from_slice(&desc.as_bytes()[..n]);
            Some(2 + n)
        });
        if result.is_ok() {
            self.tx_packets += 1;
        }
    }

    /// Send a bare zero-length-argument packet: a request for the peer's current value.
    fn send_query(&mut self, msgnum: u8) {
        let result = self.parent.send_with(2, &mut |buf| {
            if buf.len() < 2 {
                return None;
            }
            buf[0] = proto::MSG;
            buf[1] = msgnum;
            Some(2)
        });
        if result.is_ok() {
            self.tx_packets += 1;
        }
    }

    fn send_value(&mut self, msgnum: u8, priority: u8, input: Option<&[u8]>) {
        let mut scratch = [0u8; RECV_SIZE];
        let ctx = MessageContext { input, priority };
        let written = self.table.as_mut_slice()[msgnum as usize].handler.call(ctx, &mut scratch);
        let written = match written {
            Some(n) => n,
            None => return,
        };
        // Answering our own outstanding query locally doesn't go back out over the wire -- that
        // would just ping-pong the same request.
        if matches!(priority, table::PRI_QUERY_WAIT | table::PRI_QUERY_ARGS) {
            return;
        }
        let body = scratch;
        let result = self.parent.send_with(written + 2, &mut |buf| {
            if buf.len() < written + 2 {
                return None;
            }
            buf[0] = proto::MSG;
            buf[1] = msgnum;
            buf[2..2 + written].copy_from_slice(&body[..written]);
            Some(2 + written)
        });
        if result.is_ok() {
            self.tx_packets += 1;
        }
    }
}

impl<'a> Layer for MessageLayer<'a> {
    /// Accept an incoming query, staging its argument data and raising the target slot's
    /// priority so [`MessageLayer::sched`] answers it promptly. Returns bytes consumed.
    fn recv(&mut self, src: &[u8], caller: &mut dyn Layer) -> usize {
        if src.len() < 2 || src[0] != proto::MSG {
            return 0;
        }
        let tag = src[1];
        let msgnum = tag & 0x7f;
        let want_desc = tag & 0x80 != 0;
        let payload = &src[2..];
        let len = self.table.as_slice().len();

        // Message 127 is reserved: a peer enumerating a fresh device asks for everything at
        // once instead of walking the table one descriptor at a time.
        if msgnum == table::LAST_MSGNUM_FAST_LOAD {
            let fast_priority = if want_desc { table::PRI_DESCRIPTION_LOW } else { table::PRI_LOW };
            if len > 2 {
                for i in 1..len - 1 {
                    self.post(i as u8, fast_priority);
                }
            }
            self.rx_packets += 1;
            return src.len();
        }

        if msgnum as usize >= len {
            // Open question: a query for a message number with no handler simply clears any
            // stale pending state and is acked, rather than treated as a protocol error.
            self.rx_errors += 1;
            return src.len();
        }

        if self.table.as_slice()[msgnum as usize].priority != table::PRI_UPDATE_ARGS {
            if !payload.is_empty() {
                let n = payload.len().min(self.recv_buf.len());
                self.recv_buf[..n].copy_from_slice(&payload[..n]);
                self.recv_len = n;
                self.recv_msgnum = Some(msgnum);
            }
            self.post(msgnum, if want_desc { table::PRI_DESCRIPTION } else { table::PRI_HIGHEST });
        } else if self.lock == Some(msgnum) {
            // The peer's acknowledgement of our outstanding update: release the lock so the
            // next `sched` can move on.
            self.lock = None;
        }
        // Otherwise: an update for this slot is already in flight locally, so an inbound packet
        // that doesn't match the lock is a stale intermediate and is silently dropped -- the
        // newest locally-queued update always wins.

        self.rx_packets += 1;

        if let Some(mirror) = self.mirror.as_mut() {
            mirror.recv(src, caller);
        }
        src.len()
    }

    /// The message layer has no direct send path of its own -- replies are scheduled via
    /// [`MessageLayer::send`] and flushed by [`MessageLayer::sched`], never written in place by
    /// a caller further down the chain.
    fn sendbuf_available(&mut self, _size: usize) -> usize {
        0
    }

    fn send_with(
        &mut self,
        _size: usize,
        _f: &mut dyn FnMut(&mut [u8]) -> Option<usize>,
    ) -> Result<usize> {
        Err(Error::NoRoute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    struct Sink {
        buf: [u8; 96],
        len: usize,
    }

    impl Sink {
        fn new() -> Self {
            Sink { buf: [0; 96], len: 0 }
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
            let mut scratch = [0u8; 96];
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

    #[test]
    fn scheduled_send_calls_handler_and_frames_reply() {
        let mut sink = Sink::new();
        let mut counter = 41u8;
        let mut handler = move |_ctx: MessageContext, out: &mut [u8]| {
            counter += 1;
            out[0] = counter;
            Some(1)
        };
        {
            let mut slots = [Slot::new(&mut handler, "counter")];
            let mut msg = MessageLayer::new(&mut sink, &mut slots);
            msg.send(0, table::PRI_NORMAL);
            assert!(msg.sched());
            assert!(!msg.sched());
        }
        assert_eq!(&sink.buf[..sink.len], &[proto::MSG, 0, 42]);
    }

    #[test]
    fn query_raises_priority_and_stages_input() {
        let mut sink = Sink::new();
        let mut seen = None;
        let mut handler = |ctx: MessageContext, out: &mut [u8]| {
            seen = ctx.input().map(|i| i[0]);
            assert!(ctx.is_query());
            out[0] = 1;
            Some(1)
        };
        let mut other = |_: MessageContext, out: &mut [u8]| {
            out[0] = 9;
            Some(1)
        };
        {
            let mut slots = [Slot::new(&mut handler, "a"), Slot::new(&mut other, "b")];
            let mut msg = MessageLayer::new(&mut sink, &mut slots);
            msg.send(1, table::PRI_LOW);
            let mut caller = Sink::new();
            msg.recv(&[proto::MSG, 0, 7], &mut caller);
            assert_eq!(msg.pending_count(), 2);
            assert!(msg.sched());
        }
        assert_eq!(&sink.buf[..sink.len], &[proto::MSG, 0, 1]);
        assert_eq!(seen, Some(7));
    }

    #[test]
    fn descriptor_request_sends_text() {
        let mut sink = Sink::new();
        let mut handler = |_: MessageContext, out: &mut [u8]| {
            out[0] = 0;
            Some(1)
        };
        {
            let mut slots = [Slot::new(&mut handler, "temp")];
            let mut msg = MessageLayer::new(&mut sink, &mut slots);
            let mut caller = Sink::new();
            msg.recv(&[proto::MSG, 0x80], &mut caller);
            assert!(msg.sched());
        }
        assert_eq!(&sink.buf[..sink.len], b"\x7f\x80temp");
    }

    #[test]
    fn unknown_msgnum_is_acked_without_crashing() {
        let mut sink = Sink::new();
        let mut handler = |_: MessageContext, out: &mut [u8]| {
            out[0] = 0;
            Some(1)
        };
        let mut slots = [Slot::new(&mut handler, "only")];
        let mut msg = MessageLayer::new(&mut sink, &mut slots);
        let mut caller = Sink::new();
        let consumed = msg.recv(&[proto::MSG, 5], &mut caller);
        assert_eq!(consumed, 3);
        assert_eq!(msg.rx_errors, 1);
    }

    #[test]
    fn fast_load_posts_every_slot_then_descriptor_flushes_next() {
        let mut sink = Sink::new();
        let mut id_handler = |_: MessageContext, out: &mut [u8]| {
            out[0] = 1;
            Some(1)
        };
        let mut data_handler = |_: MessageContext, out: &mut [u8]| {
            out[0] = 2;
            Some(1)
        };
        let mut term_handler = |_: MessageContext, out: &mut [u8]| {
            out[0] = 3;
            Some(1)
        };
        {
            let mut slots = [
                Slot::new(&mut id_handler, "id"),
                Slot::new(&mut data_handler, "data"),
                Slot::new(&mut term_handler, "%!"),
            ];
            let mut msg = MessageLayer::new(&mut sink, &mut slots);
            let mut caller = Sink::new();
            msg.recv(&[proto::MSG, 0xff], &mut caller);
            assert_eq!(msg.table.as_slice()[1].priority, table::PRI_DESCRIPTION_LOW);
            assert_eq!(msg.table.as_slice()[0].priority, table::PRI_CLEAR);
            assert_eq!(msg.table.as_slice()[2].priority, table::PRI_CLEAR);
            assert!(msg.sched());
        }
        assert_eq!(&sink.buf[..sink.len], b"\x7f\x81data");
    }

    #[test]
    fn query_locks_then_unlocks_on_matching_reply() {
        // `MessageLayer` holds its parent by `&mut` for as long as it is used, so a plain `Sink`
        // can't be inspected mid-test while `msg` is still alive. Use interior mutability here so
        // the underlying bytes can be peeked without needing a fresh mutable borrow of `sink`.
        struct CellSink {
            buf: core::cell::RefCell<[u8; 96]>,
            len: core::cell::Cell<usize>,
        }
        impl CellSink {
            fn new() -> Self {
                CellSink { buf: core::cell::RefCell::new([0; 96]), len: core::cell::Cell::new(0) }
            }
        }
        impl Layer for &CellSink {
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
                let mut scratch = [0u8; 96];
                match f(&mut scratch[..size]) {
                    Some(len) => {
                        self.buf.borrow_mut()[..len].copy_from_slice(&scratch[..len]);
                        self.len.set(len);
                        Ok(len)
                    }
                    None => Ok(0),
                }
            }
        }

        let sink = CellSink::new();
        let mut seen = None;
        let mut handler = |ctx: MessageContext, out: &mut [u8]| {
            assert!(ctx.is_reply());
            seen = ctx.input().map(|i| i.to_vec());
            out[0] = 0;
            Some(0)
        };
        {
            let mut slots = [Slot::new(&mut handler, "remote")];
            let mut sink_ref = &sink;
            let mut msg = MessageLayer::new(&mut sink_ref, &mut slots);

            msg.send(0, table::PRI_QUERY_ARGS);
            assert!(msg.sched());
            assert_eq!(&sink.buf.borrow()[..sink.len.get()], &[proto::MSG, 0]);
            assert!(!msg.sched());

            let mut caller = Sink::new();
            let reply = [proto::MSG, 0, 1, 2, 3, 4, 5, 6, 7, 8];
            msg.recv(&reply, &mut caller);
            assert!(msg.sched());
        }
        assert_eq!(seen.as_deref(), Some(&[1u8, 2, 3, 4, 5, 6, 7, 8][..]));
        // The reply was consumed locally; nothing further went out for this slot.
        assert_eq!(&sink.buf.borrow()[..sink.len.get()], &[proto::MSG, 0]);
    }

    #[test]
    fn unlock_args_bypasses_an_unrelated_lock() {
        let mut sink = Sink::new();
        let mut locked = |_: MessageContext, out: &mut [u8]| {
            out[0] = 0;
            Some(1)
        };
        let mut forced = |_: MessageContext, out: &mut [u8]| {
            out[0] = 7;
            Some(1)
        };
        let mut slots = [Slot::new(&mut locked, "a"), Slot::new(&mut forced, "b")];
        let mut msg = MessageLayer::new(&mut sink, &mut slots);

        msg.send(0, table::PRI_UPDATE_ARGS);
        assert!(msg.sched());
        assert_eq!(msg.table.as_slice()[0].priority, table::PRI_CLEAR);

        msg.send(1, table::PRI_UNLOCK_ARGS);
        assert!(msg.sched());
        assert_eq!(&sink.buf[..sink.len], &[proto::MSG, 1, 7]);
    }
}
