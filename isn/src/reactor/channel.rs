//! A bounded single-producer/single-consumer queue for moving tasklet requests across cores.
//!
//! A [`crate::reactor::Reactor`] is not thread-safe by design -- it is meant to own one CPU core
//! outright. When a second core (an interrupt handler, a peer CPU) needs to ask the reactor's
//! core to run something, it pushes a request here instead of touching the reactor directly; the
//! reactor's own core drains the channel on its next pass. The queue uses a fixed ring buffer and
//! plain `Ordering::AcqRel` indices rather than a lock, since a lock shared with an interrupt
//! handler risks priority inversion on the very core the reactor is trying not to block.

use core::sync::atomic::{AtomicUsize, Ordering};

/// A fixed-capacity SPSC ring buffer of `T`.
pub struct Channel<T, const N: usize> {
    slots: [core::cell::UnsafeCell<core::mem::MaybeUninit<T>>; N],
    head: AtomicUsize,
    tail: AtomicUsize,
    wakeup: core::cell::Cell<Option<fn()>>,
}

// SAFETY: `head`/`tail` are only ever advanced by their respective single producer/consumer
// side, and every slot access is gated by the atomic indices: the producer writes a slot before
// publishing by incrementing `tail`, the consumer never reads a slot until it has observed that
// publish, and the consumer only frees (and the producer only reuses) a slot after the consumer
// has moved out of it and advanced `head`.
unsafe impl<T: Send, const N: usize> Sync for Channel<T, N> {}

impl<T, const N: usize> Channel<T, N> {
    /// Build an empty channel.
    pub fn new() -> Self {
        Channel {
            slots: core::array::from_fn(|_| core::cell::UnsafeCell::new(core::mem::MaybeUninit::uninit())),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            wakeup: core::cell::Cell::new(None),
        }
    }

    /// Register a callback to run after every successful [`Channel::push`] -- the producer
    /// side's way of nudging the consumer's core (an interrupt, a cross-core doorbell) that
    /// there is now something to drain. Must be set before the channel is shared with a
    /// producer; there is no way to unregister it.
    pub fn set_wakeup(&self, f: fn()) {
        self.wakeup.set(Some(f));
    }

    /// Push a value. Returns it back if the channel is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= N {
            return Err(value);
        }
        let slot = &self.slots[tail % N];
        // SAFETY: this slot is not reachable by the consumer until `tail` below is published.
        unsafe { (*slot.get()).write(value) };
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        if let Some(f) = self.wakeup.get() {
            f();
        }
        Ok(())
    }

    /// Pop the oldest value, if any.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let slot = &self.slots[head % N];
        // SAFETY: `tail` being ahead of `head` means the producer has published this slot.
        let value = unsafe { (*slot.get()).assume_init_read() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Whether the channel currently holds no values.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed) == self.tail.load(Ordering::Relaxed)
    }
}

impl<T, const N: usize> Default for Channel<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_preserves_order() {
        let channel: Channel<u32, 4> = Channel::new();
        channel.push(1).unwrap();
        channel.push(2).unwrap();
        assert_eq!(channel.pop(), Some(1));
        assert_eq!(channel.pop(), Some(2));
        assert_eq!(channel.pop(), None);
    }

    #[test]
    fn full_channel_rejects_push() {
        let channel: Channel<u32, 2> = Channel::new();
        channel.push(1).unwrap();
        channel.push(2).unwrap();
        assert_eq!(channel.push(3), Err(3));
    }

    #[test]
    fn wraps_around_the_ring() {
        let channel: Channel<u32, 2> = Channel::new();
        for i in 0..10 {
            channel.push(i).unwrap();
            assert_eq!(channel.pop(), Some(i));
        }
    }

    static WAKEUPS: AtomicUsize = AtomicUsize::new(0);

    fn record_wakeup() {
        WAKEUPS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn push_invokes_the_registered_wakeup() {
        let channel: Channel<u32, 4> = Channel::new();
        channel.set_wakeup(record_wakeup);
        let before = WAKEUPS.load(Ordering::Relaxed);
        channel.push(1).unwrap();
        channel.push(2).unwrap();
        assert_eq!(WAKEUPS.load(Ordering::Relaxed), before + 2);
    }
}
