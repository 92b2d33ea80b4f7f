use crate::traits::{Callback, Scheduler};
use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Pending,
    Cancelled,
    Fired,
}

/// Cancellable reference to one scheduled callback.
///
/// Handles are cheap to clone; all clones observe the same state. Cancelling a
/// handle that already fired is a no-op.
#[derive(Debug, Clone)]
pub struct EventHandle {
    state: Rc<Cell<HandleState>>,
}

impl EventHandle {
    /// A fresh pending handle. Scheduler implementations hand these out from
    /// [`Scheduler::schedule_after`].
    pub fn new() -> Self {
        Self {
            state: Rc::new(Cell::new(HandleState::Pending)),
        }
    }

    pub fn cancel(&self) {
        if self.state.get() == HandleState::Pending {
            self.state.set(HandleState::Cancelled);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.get() == HandleState::Cancelled
    }

    pub fn is_pending(&self) -> bool {
        self.state.get() == HandleState::Pending
    }

    /// Mark the handle as fired. Returns `false` if it had been cancelled, in which
    /// case the scheduler must not run the callback.
    pub fn fire(&self) -> bool {
        match self.state.get() {
            HandleState::Pending => {
                self.state.set(HandleState::Fired);
                true
            }
            HandleState::Cancelled | HandleState::Fired => false,
        }
    }
}

impl Default for EventHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns at most one outstanding scheduled callback.
///
/// Arming a new handle cancels the previous one, and dropping the slot cancels
/// whatever is still pending, so a torn-down component can never be called back.
#[derive(Debug, Default)]
pub struct PendingSlot {
    handle: Option<EventHandle>,
}

impl PendingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, handle: EventHandle) {
        self.cancel();
        self.handle = Some(handle);
    }

    /// Cancel the outstanding callback. Returns `true` if one was still pending.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                let pending = handle.is_pending();
                handle.cancel();
                pending
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(EventHandle::is_pending)
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct Entry {
    at: Duration,
    seq: u64,
    handle: EventHandle,
    callback: Callback,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap: invert so the earliest (time, seq) pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Single-threaded discrete-event scheduler.
///
/// Events are ordered by firing time, ties broken by scheduling order.
/// Cancelled events stay in the heap and are discarded when they reach the top.
pub struct Simulator {
    now: Duration,
    next_seq: u64,
    queue: BinaryHeap<Entry>,
    executed: u64,
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_seq: 0,
            queue: BinaryHeap::new(),
            executed: 0,
        }
    }

    /// Schedule at an absolute simulated time. Times in the past fire at `now`.
    pub fn schedule_at(&mut self, at: Duration, callback: Callback) -> EventHandle {
        let handle = EventHandle::new();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Entry {
            at: at.max(self.now),
            seq,
            handle: handle.clone(),
            callback,
        });
        handle
    }

    /// Run the next live event. Returns `false` when nothing is left.
    pub fn step(&mut self) -> bool {
        match self.pop_live(None) {
            Some(entry) => {
                self.execute(entry);
                true
            }
            None => false,
        }
    }

    /// Run every event due at or before `end`, then advance the clock to `end`.
    /// Returns the number of callbacks executed.
    pub fn run_until(&mut self, end: Duration) -> u64 {
        let before = self.executed;
        while let Some(entry) = self.pop_live(Some(end)) {
            self.execute(entry);
        }
        if end > self.now {
            self.now = end;
        }
        self.executed - before
    }

    /// Run until the queue is drained.
    pub fn run(&mut self) -> u64 {
        let before = self.executed;
        while self.step() {}
        self.executed - before
    }

    /// Number of queued events that have not been cancelled.
    pub fn pending(&self) -> usize {
        self.queue
            .iter()
            .filter(|entry| entry.handle.is_pending())
            .count()
    }

    /// Total callbacks executed since construction.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    fn pop_live(&mut self, limit: Option<Duration>) -> Option<Entry> {
        while let Some(top) = self.queue.peek() {
            if !top.handle.is_pending() {
                self.queue.pop();
                continue;
            }
            if limit.is_some_and(|end| top.at > end) {
                return None;
            }
            return self.queue.pop();
        }
        None
    }

    fn execute(&mut self, entry: Entry) {
        if !entry.handle.fire() {
            return;
        }
        self.now = entry.at;
        self.executed += 1;
        (entry.callback)(self);
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for Simulator {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule_after(&mut self, delay: Duration, callback: Callback) -> EventHandle {
        self.schedule_at(self.now.saturating_add(delay), callback)
    }
}
