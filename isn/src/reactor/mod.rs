//! Single-threaded cooperative scheduler for timed tasklets with optional mutex groups.
//!
//! The original driver links its tasklet queue through an array of free-list indices embedded
//! in each slot; this port instead keeps slots in a plain array and scans for a free one, which
//! is the portable equivalent for a queue capacity small enough (a few dozen entries on a
//! sensor node) that a linear scan costs nothing a linked free list would meaningfully save.
//!
//! A tasklet is any `FnMut() -> Next`. Returning [`Next::Reschedule`] from inside the tasklet
//! itself is how the original's self-triggering events (`ISN_REACTOR_REPEAT`) are expressed --
//! there is no separate "reschedule myself" side channel, the return value is the contract.
//! [`Next::Pass`] follows the same idiom for a tail-call transfer: a tasklet that wants to hand
//! its slot to a different tasklet (without going through `Reactor::queue` and freeing its own
//! slot first) just returns the next one to run in its place.

pub mod channel;

use crate::clock::Counter;
use crate::managed::Slice;

/// What a tasklet wants to happen after it runs.
pub enum Next<'a> {
    /// The tasklet is done; free its slot. If the slot was queued with
    /// [`Reactor::call_at`], its caller continuation runs now.
    Done,
    /// Run again at this absolute time.
    Reschedule(Counter),
    /// Replace this slot's tasklet with `next` and run it as soon as possible, carrying over
    /// this slot's mutex group and any pending caller continuation. The tail-call counterpart
    /// to queuing a brand new tasklet and dropping this one.
    Pass(Tasklet<'a>),
}

/// A mutex group bit. Tasklets sharing a bit never run concurrently with a locked instance of
/// that bit; unlike a blocking lock, a locked tasklet is simply skipped by [`Reactor::step`]
/// until it's unlocked, it never blocks the scheduler.
pub type Mutex = u32;

type Tasklet<'a> = crate::alloc::boxed::Box<dyn FnMut() -> Next<'a> + 'a>;

/// One request carried across a [`channel::Channel`] from another core into this reactor's:
/// either a tasklet to queue here, or a bare continuation to invoke directly (the feedback path
/// for a call placed from this core that doesn't need to re-enter the queue).
pub enum ChannelEntry<'a> {
    Call(Tasklet<'a>),
    Return(crate::alloc::boxed::Box<dyn FnOnce() + 'a>),
}

impl<'a> core::fmt::Debug for ChannelEntry<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ChannelEntry::Call(_) => f.write_str("ChannelEntry::Call(..)"),
            ChannelEntry::Return(_) => f.write_str("ChannelEntry::Return(..)"),
        }
    }
}

struct Slot<'a> {
    tasklet: Option<Tasklet<'a>>,
    time: Counter,
    mutex: Mutex,
    caller: Option<crate::alloc::boxed::Box<dyn FnOnce() + 'a>>,
}

impl<'a> Slot<'a> {
    fn empty() -> Self {
        Slot { tasklet: None, time: 0, mutex: 0, caller: None }
    }
}

/// The scheduler itself.
pub struct Reactor<'a> {
    slots: Slice<'a, Slot<'a>>,
    locked: Mutex,
    used_mutexes: Mutex,
    self_index: Option<usize>,
}

impl<'a> Reactor<'a> {
    /// Build a reactor with room for `capacity` simultaneously pending tasklets.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = crate::alloc::vec::Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot::empty());
        }
        Reactor { slots: Slice::Many(slots), locked: 0, used_mutexes: 0, self_index: None }
    }

    /// Queue `tasklet` to run as soon as possible (i.e. on the next [`Reactor::step`]).
    pub fn queue(&mut self, now: Counter, tasklet: impl FnMut() -> Next<'a> + 'a) -> Option<usize> {
        self.queue_at(now, tasklet)
    }

    /// Queue `tasklet` to run no earlier than `time`.
    pub fn queue_at(&mut self, time: Counter, tasklet: impl FnMut() -> Next<'a> + 'a) -> Option<usize> {
        self.mutex_queue_at(time, 0, tasklet)
    }

    /// Queue `tasklet` under a mutex group; it will be skipped by [`Reactor::step`] while that
    /// group is locked.
    pub fn mutex_queue(
        &mut self,
        now: Counter,
        mutex_bits: Mutex,
        tasklet: impl FnMut() -> Next<'a> + 'a,
    ) -> Option<usize> {
        self.mutex_queue_at(now, mutex_bits, tasklet)
    }

    fn mutex_queue_at(
        &mut self,
        time: Counter,
        mutex_bits: Mutex,
        tasklet: impl FnMut() -> Next<'a> + 'a,
    ) -> Option<usize> {
        self.queue_tasklet_at(time, mutex_bits, crate::alloc::boxed::Box::new(tasklet))
    }

    fn queue_tasklet_at(&mut self, time: Counter, mutex_bits: Mutex, tasklet: Tasklet<'a>) -> Option<usize> {
        let slots = self.slots.as_mut_slice();
        let index = slots.iter().position(|slot| slot.tasklet.is_none())?;
        slots[index] = Slot { tasklet: Some(tasklet), time, mutex: mutex_bits, caller: None };
        Some(index)
    }

    /// Queue `tasklet` to run no earlier than `time`; once it finishes (returns [`Next::Done`]),
    /// `caller` runs -- a chained continuation, the counterpart to the original's cross-tasklet
    /// callback argument. Rescheduling or passing the slot along defers the continuation to
    /// whichever run finally returns [`Next::Done`].
    pub fn call_at(
        &mut self,
        time: Counter,
        tasklet: impl FnMut() -> Next<'a> + 'a,
        caller: impl FnOnce() + 'a,
    ) -> Option<usize> {
        let index = self.mutex_queue_at(time, 0, tasklet)?;
        self.slots.as_mut_slice()[index].caller = Some(crate::alloc::boxed::Box::new(caller));
        Some(index)
    }

    /// Claim the next unused mutex bit, or `0` if every bit is already claimed.
    pub fn get_mutex(&mut self) -> Mutex {
        for bit in 0..Mutex::BITS {
            let mask = 1 << bit;
            if self.used_mutexes & mask == 0 {
                self.used_mutexes |= mask;
                return mask;
            }
        }
        0
    }

    /// Lock the given mutex bit(s). Returns `true` if the lock was newly acquired.
    pub fn mutex_lock(&mut self, mutex_bits: Mutex) -> bool {
        let was_locked = self.locked & mutex_bits;
        self.locked |= mutex_bits;
        was_locked == 0
    }

    /// Unlock the given mutex bit(s). Returns `true` if they had been locked.
    pub fn mutex_unlock(&mut self, mutex_bits: Mutex) -> bool {
        let was_locked = self.locked & mutex_bits != 0;
        self.locked &= !mutex_bits;
        was_locked
    }

    /// Whether any of the given mutex bits is currently locked.
    pub fn mutex_is_locked(&self, mutex_bits: Mutex) -> bool {
        self.locked & mutex_bits != 0
    }

    /// Reschedule a still-pending tasklet to run at `newtime`. Returns `false` if the index is
    /// no longer occupied.
    pub fn change_timed(&mut self, index: usize, newtime: Counter) -> bool {
        match self.slots.as_mut_slice().get_mut(index) {
            Some(slot) if slot.tasklet.is_some() => {
                slot.time = newtime;
                true
            }
            _ => false,
        }
    }

    /// Drop a still-pending tasklet without running it. Returns `false` if the index is already
    /// free, or if it is the tasklet currently executing -- a running tasklet cannot drop
    /// itself out from under `step`.
    pub fn drop_at(&mut self, index: usize) -> bool {
        if self.is_last(index) {
            return false;
        }
        match self.slots.as_mut_slice().get_mut(index) {
            Some(slot) if slot.tasklet.is_some() => {
                slot.tasklet = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a previously queued index is still pending.
    pub fn is_pending(&self, index: usize) -> bool {
        self.slots.as_slice().get(index).map_or(false, |slot| slot.tasklet.is_some())
    }

    /// Whether `index` is the tasklet currently running. Meaningful only when called from
    /// inside a tasklet body (e.g. before deciding whether it's safe to [`Reactor::drop_at`]
    /// some other slot); outside of `step` nothing is ever "last".
    pub fn is_last(&self, index: usize) -> bool {
        self.self_index == Some(index)
    }

    /// Run the single earliest-due, unlocked tasklet, if any is ready at `now`.
    ///
    /// Returns `true` if a tasklet ran. A tasklet under a locked mutex group is skipped even if
    /// it is otherwise due; it remains queued and is considered again on the next call.
    pub fn step(&mut self, now: Counter) -> bool {
        let slots = self.slots.as_mut_slice();
        let mut best: Option<usize> = None;
        for (i, slot) in slots.iter().enumerate() {
            if slot.tasklet.is_none() {
                continue;
            }
            if self.locked & slot.mutex != 0 {
                continue;
            }
            if crate::clock::since(now, slot.time) < 0 {
                continue;
            }
            match best {
                None => best = Some(i),
                Some(b) if crate::clock::since(slots[b].time, slot.time) > 0 => best = Some(i),
                _ => {}
            }
        }

        let index = match best {
            Some(i) => i,
            None => return false,
        };

        let mut tasklet = slots[index].tasklet.take().expect("checked above");
        let mutex = slots[index].mutex;
        self.self_index = Some(index);
        let outcome = tasklet();
        self.self_index = None;

        match outcome {
            Next::Done => {
                if let Some(caller) = self.slots.as_mut_slice()[index].caller.take() {
                    caller();
                }
            }
            Next::Reschedule(time) => {
                let slots = self.slots.as_mut_slice();
                slots[index].tasklet = Some(tasklet);
                slots[index].time = time;
            }
            Next::Pass(next_tasklet) => {
                let slots = self.slots.as_mut_slice();
                slots[index].tasklet = Some(next_tasklet);
                slots[index].time = now;
                slots[index].mutex = mutex;
            }
        }
        true
    }

    /// Run every tasklet due at or before `now`, returning the tick of the soonest-pending
    /// tasklet afterward (for a caller that wants to sleep until then), or `None` if the queue
    /// is empty.
    pub fn run(&mut self, now: Counter) -> Option<Counter> {
        while self.step(now) {}
        self.slots
            .as_slice()
            .iter()
            .filter(|slot| slot.tasklet.is_some())
            .map(|slot| slot.time)
            .min_by(|a, b| crate::clock::since(*a, *b).cmp(&0))
    }

    /// Drain a cross-core [`channel::Channel`], queuing every [`ChannelEntry::Call`] and
    /// invoking every [`ChannelEntry::Return`] directly, then run the reactor to completion.
    ///
    /// The original driver's `isn_reactor_runall` takes a variadic list of queues to drain in
    /// one pass; this port only ever drains a single channel per call, since nothing in this
    /// crate needs more than one cross-core link into a given reactor.
    pub fn runall<const N: usize>(
        &mut self,
        channel: &channel::Channel<ChannelEntry<'a>, N>,
        now: Counter,
    ) -> Option<Counter> {
        while let Some(entry) = channel.pop() {
            match entry {
                ChannelEntry::Call(tasklet) => {
                    self.queue_tasklet_at(now, 0, tasklet);
                }
                ChannelEntry::Return(caller) => caller(),
            }
        }
        self.run(now)
    }
}
