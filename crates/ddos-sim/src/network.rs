use ndn_workload::{
    Interest, Name, PendingSlot, RequestGenerator, Scheduler, Transport, WindowedCounter,
};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TableStats {
    pub inserted: u64,
    pub aggregated: u64,
    pub satisfied: u64,
    pub expired: u64,
    pub dropped: u64,
    pub peak: usize,
}

enum Outcome {
    Satisfied,
    Expired,
}

struct TableInner {
    capacity: usize,
    served_prefix: Name,
    response_delay: Duration,
    /// Each entry owns the callback that will retire it.
    entries: HashMap<Name, PendingSlot>,
    counter: Option<WindowedCounter>,
    consumer: Option<RequestGenerator>,
    stats: TableStats,
}

impl TableInner {
    fn report(&self) {
        if let Some(counter) = &self.counter {
            counter.on_event(self.entries.len() as u64);
        }
    }
}

/// Pending-request table of one node, fed by that node's generator.
///
/// Requests under the served prefix are answered after the response delay when it is
/// shorter than their lifetime; everything else times out. The table size is pushed to
/// the node's tracer after every change.
#[derive(Clone)]
pub struct PendingTable {
    inner: Rc<RefCell<TableInner>>,
}

impl PendingTable {
    pub fn new(capacity: usize, served_prefix: Name, response_delay: Duration) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TableInner {
                capacity,
                served_prefix,
                response_delay,
                entries: HashMap::new(),
                counter: None,
                consumer: None,
                stats: TableStats::default(),
            })),
        }
    }

    pub fn set_counter(&self, counter: WindowedCounter) {
        self.inner.borrow_mut().counter = Some(counter);
    }

    /// Generator receiving responses and rejections for this table's requests.
    pub fn set_consumer(&self, generator: RequestGenerator) {
        self.inner.borrow_mut().consumer = Some(generator);
    }

    /// Transport handing the generator's Interests to this table. Holds the table weakly.
    pub fn transport(&self) -> impl Transport + 'static {
        let weak = Rc::downgrade(&self.inner);
        move |interest: Interest, scheduler: &mut dyn Scheduler| {
            if let Some(inner) = weak.upgrade() {
                PendingTable { inner }.insert(interest, scheduler);
            }
        }
    }

    pub fn insert(&self, interest: Interest, scheduler: &mut dyn Scheduler) {
        let mut inner = self.inner.borrow_mut();
        if inner.entries.contains_key(&interest.name) {
            inner.stats.aggregated += 1;
            return;
        }
        if inner.entries.len() >= inner.capacity {
            inner.stats.dropped += 1;
            // Rejections travel back like any other packet, never synchronously.
            if let Some(consumer) = inner.consumer.clone() {
                scheduler.schedule_after(
                    Duration::ZERO,
                    Box::new(move |_: &mut dyn Scheduler| consumer.on_nack(&interest)),
                );
            }
            return;
        }

        let served = interest.name.starts_with(&inner.served_prefix)
            && inner.response_delay < interest.lifetime;
        let (delay, outcome) = if served {
            (inner.response_delay, Outcome::Satisfied)
        } else {
            (interest.lifetime, Outcome::Expired)
        };

        let weak = Rc::downgrade(&self.inner);
        let name = interest.name.clone();
        let handle = scheduler.schedule_after(
            delay,
            Box::new(move |_: &mut dyn Scheduler| {
                if let Some(inner) = weak.upgrade() {
                    PendingTable { inner }.retire(&name, outcome);
                }
            }),
        );
        let mut slot = PendingSlot::new();
        slot.arm(handle);
        inner.entries.insert(interest.name, slot);
        inner.stats.inserted += 1;
        inner.stats.peak = inner.stats.peak.max(inner.entries.len());
        inner.report();
    }

    fn retire(&self, name: &Name, outcome: Outcome) {
        let consumer = {
            let mut inner = self.inner.borrow_mut();
            if inner.entries.remove(name).is_none() {
                return;
            }
            match outcome {
                Outcome::Satisfied => inner.stats.satisfied += 1,
                Outcome::Expired => inner.stats.expired += 1,
            }
            inner.report();
            match outcome {
                Outcome::Satisfied => inner.consumer.clone(),
                Outcome::Expired => None,
            }
        };
        if let Some(consumer) = consumer {
            consumer.on_data(name);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn stats(&self) -> TableStats {
        self.inner.borrow().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndn_workload::{MemorySink, Simulator, TraceAggregator};

    fn interest(uri: &str, seq: u64, lifetime_ms: u64) -> Interest {
        Interest {
            name: Name::from_uri(uri).with_sequence(seq),
            nonce: 0,
            lifetime: Duration::from_millis(lifetime_ms),
        }
    }

    fn table(capacity: usize) -> PendingTable {
        PendingTable::new(capacity, Name::from_uri("/good"), Duration::from_millis(40))
    }

    #[test]
    fn served_requests_are_satisfied_after_delay() {
        let mut sim = Simulator::new();
        let table = table(10);
        table.insert(interest("/good/a", 1, 2000), &mut sim);
        assert_eq!(table.len(), 1);

        sim.run_until(Duration::from_millis(39));
        assert_eq!(table.len(), 1);
        sim.run_until(Duration::from_millis(40));
        assert_eq!(table.len(), 0);
        assert_eq!(table.stats().satisfied, 1);
    }

    #[test]
    fn unserved_requests_expire_after_lifetime() {
        let mut sim = Simulator::new();
        let table = table(10);
        table.insert(interest("/evil/a", 5000, 2000), &mut sim);
        sim.run_until(Duration::from_millis(1999));
        assert_eq!(table.len(), 1);
        sim.run_until(Duration::from_secs(2));
        assert_eq!(table.len(), 0);
        assert_eq!(table.stats().expired, 1);
    }

    #[test]
    fn full_table_drops_and_duplicates_aggregate() {
        let mut sim = Simulator::new();
        let table = table(2);
        table.insert(interest("/evil/a", 1, 2000), &mut sim);
        table.insert(interest("/evil/a", 1, 2000), &mut sim);
        table.insert(interest("/evil/a", 2, 2000), &mut sim);
        table.insert(interest("/evil/a", 3, 2000), &mut sim);

        let stats = table.stats();
        assert_eq!(stats.inserted, 2);
        assert_eq!(stats.aggregated, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.peak, 2);
    }

    #[test]
    fn size_is_pushed_to_counter() {
        let mut sim = Simulator::new();
        let sink = MemorySink::new();
        let mut traces = TraceAggregator::with_sink(sink.clone());
        let counter = traces
            .attach_counter("leaf", Duration::from_secs(1), &mut sim)
            .unwrap();
        let table = table(10);
        table.set_counter(counter.clone());

        table.insert(interest("/evil/a", 1, 5000), &mut sim);
        table.insert(interest("/evil/a", 2, 5000), &mut sim);
        assert_eq!(counter.current(), 2);

        sim.run_until(Duration::from_secs(1));
        assert_eq!(sink.lines()[1], "1\tleaf\tPitEntries\t2");
    }

    #[test]
    fn dropping_table_cancels_retirements() {
        let mut sim = Simulator::new();
        let table = table(10);
        table.insert(interest("/good/a", 1, 2000), &mut sim);
        table.insert(interest("/evil/a", 2, 2000), &mut sim);
        assert_eq!(sim.pending(), 2);
        drop(table);
        assert_eq!(sim.pending(), 0);
    }
}
