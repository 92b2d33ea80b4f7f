use crate::generator::GeneratorEvent;
use crate::name::Interest;
use crate::sim::EventHandle;
use std::io;
use std::time::Duration;

/// Deferred work queued on a [`Scheduler`]. Receives the scheduler back when it fires
/// so it can reschedule itself.
pub type Callback = Box<dyn FnOnce(&mut dyn Scheduler)>;

/// The discrete-event timeline every component runs on.
///
/// Implementations must fire callbacks scheduled for the same instant in the order
/// they were scheduled, and must skip callbacks whose handle was cancelled.
pub trait Scheduler {
    /// Current simulated time, measured from the start of the run.
    fn now(&self) -> Duration;

    /// Queue `callback` to run `delay` after [`Scheduler::now`].
    fn schedule_after(&mut self, delay: Duration, callback: Callback) -> EventHandle;
}

/// Downstream collaborator that receives generated Interests (usually an application face).
pub trait Transport {
    fn send(&mut self, interest: Interest, scheduler: &mut dyn Scheduler);
}

impl<F> Transport for F
where
    F: FnMut(Interest, &mut dyn Scheduler),
{
    fn send(&mut self, interest: Interest, scheduler: &mut dyn Scheduler) {
        self(interest, scheduler)
    }
}

/// Reports the aggregate outgoing link capacity of the node hosting a generator.
pub trait CapacityProbe {
    /// Capacity in bytes per second.
    fn outgoing_capacity(&self) -> f64;
}

impl<F> CapacityProbe for F
where
    F: Fn() -> f64,
{
    fn outgoing_capacity(&self) -> f64 {
        self()
    }
}

/// Line-oriented output used by the PIT tracer.
pub trait LineSink {
    /// Write one complete line. The implementation appends the line terminator.
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Receives lifecycle and emission events from a request generator.
pub trait GeneratorObserver {
    fn on_event(&mut self, event: &GeneratorEvent);
}

impl<F> GeneratorObserver for F
where
    F: FnMut(&GeneratorEvent),
{
    fn on_event(&mut self, event: &GeneratorEvent) {
        self(event)
    }
}
