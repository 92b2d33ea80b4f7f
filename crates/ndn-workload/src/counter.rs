use crate::error::{Result, WorkloadError};
use crate::sim::PendingSlot;
use crate::traits::{LineSink, Scheduler};
use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::rc::{Rc, Weak};
use std::time::Duration;

pub const TRACE_HEADER: &str = "Time\tNode\tSignal\tValue";
pub const PIT_ENTRIES_SIGNAL: &str = "PitEntries";

/// [`LineSink`] over any `io::Write`.
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> LineSink for WriterSink<W> {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{line}")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// In-memory sink. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    lines: Rc<RefCell<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }
}

impl LineSink for MemorySink {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.lines.borrow_mut().push(line.to_string());
        Ok(())
    }
}

/// The output shared by every counter of one aggregator. Each record is written as
/// one complete line while the output is borrowed, so rows never interleave.
struct TraceOutput {
    sink: Box<dyn LineSink>,
    header_written: bool,
    records: u64,
}

impl TraceOutput {
    fn write_header_once(&mut self) {
        if self.header_written {
            return;
        }
        self.header_written = true;
        if let Err(e) = self.sink.write_line(TRACE_HEADER) {
            tracing::warn!(error = %e, "failed to write trace header");
        }
    }

    fn write_record(&mut self, line: &str) {
        match self.sink.write_line(line) {
            Ok(()) => {
                self.records += 1;
                metrics::counter!("workload_trace_records_total").increment(1);
            }
            Err(e) => tracing::warn!(error = %e, "failed to write trace record"),
        }
    }
}

struct CounterInner {
    subject: String,
    period: Duration,
    current: u64,
    pending: PendingSlot,
    output: Rc<RefCell<TraceOutput>>,
}

/// Gauge sampler: keeps the last value reported by the monitored subsystem and,
/// every `period`, writes it to the trace output and resets it to zero.
///
/// Values are overwritten, not summed. A window with no updates reports 0.
#[derive(Clone)]
pub struct WindowedCounter {
    inner: Rc<RefCell<CounterInner>>,
}

impl WindowedCounter {
    fn new(subject: String, output: Rc<RefCell<TraceOutput>>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(CounterInner {
                subject,
                period: Duration::ZERO,
                current: 0,
                pending: PendingSlot::new(),
                output,
            })),
        }
    }

    /// Arm the periodic report. Re-attaching replaces the previous timer.
    pub fn attach(&self, period: Duration, scheduler: &mut dyn Scheduler) -> Result<()> {
        if period.is_zero() {
            return Err(WorkloadError::InvalidParameter(
                "tracer period must be > 0".into(),
            ));
        }
        self.inner.borrow_mut().period = period;
        self.arm(scheduler);
        Ok(())
    }

    /// Record the latest absolute value observed on the subject.
    pub fn on_event(&self, count: u64) {
        self.inner.borrow_mut().current = count;
    }

    pub fn detach(&self) {
        self.inner.borrow_mut().pending.cancel();
    }

    pub fn is_attached(&self) -> bool {
        self.inner.borrow().pending.is_armed()
    }

    pub fn current(&self) -> u64 {
        self.inner.borrow().current
    }

    pub fn subject(&self) -> String {
        self.inner.borrow().subject.clone()
    }

    fn arm(&self, scheduler: &mut dyn Scheduler) {
        let weak = Rc::downgrade(&self.inner);
        let period = self.inner.borrow().period;
        let handle = scheduler.schedule_after(
            period,
            Box::new(move |scheduler: &mut dyn Scheduler| {
                if let Some(counter) = upgrade(&weak) {
                    counter.report(scheduler);
                }
            }),
        );
        self.inner.borrow_mut().pending.arm(handle);
    }

    fn report(&self, scheduler: &mut dyn Scheduler) {
        {
            let mut inner = self.inner.borrow_mut();
            let line = format!(
                "{}\t{}\t{}\t{}",
                scheduler.now().as_secs_f64(),
                inner.subject,
                PIT_ENTRIES_SIGNAL,
                inner.current
            );
            inner.output.borrow_mut().write_record(&line);
            inner.current = 0;
        }
        self.arm(scheduler);
    }
}

fn upgrade(weak: &Weak<RefCell<CounterInner>>) -> Option<WindowedCounter> {
    weak.upgrade().map(|inner| WindowedCounter { inner })
}

/// Owns one trace output and every counter writing to it.
pub struct TraceAggregator {
    output: Rc<RefCell<TraceOutput>>,
    counters: Vec<WindowedCounter>,
}

impl TraceAggregator {
    /// `-` writes to stdout; anything else creates or truncates a file.
    pub fn open(target: &str) -> Result<Self> {
        if target == "-" {
            return Ok(Self::with_sink(WriterSink::new(io::stdout())));
        }
        let file = File::create(target).map_err(|source| WorkloadError::SinkUnavailable {
            target: target.to_string(),
            source,
        })?;
        tracing::info!(path = target, "trace output opened");
        Ok(Self::with_sink(WriterSink::new(BufWriter::new(file))))
    }

    pub fn with_sink(sink: impl LineSink + 'static) -> Self {
        Self {
            output: Rc::new(RefCell::new(TraceOutput {
                sink: Box::new(sink),
                header_written: false,
                records: 0,
            })),
            counters: Vec::new(),
        }
    }

    /// Create a counter for `subject` and arm its first report `period` from now.
    /// The header line goes out together with the first counter, ahead of any record.
    pub fn attach_counter(
        &mut self,
        subject: impl Into<String>,
        period: Duration,
        scheduler: &mut dyn Scheduler,
    ) -> Result<WindowedCounter> {
        let counter = WindowedCounter::new(subject.into(), Rc::clone(&self.output));
        counter.attach(period, scheduler)?;
        self.output.borrow_mut().write_header_once();
        self.counters.push(counter.clone());
        Ok(counter)
    }

    pub fn counters(&self) -> &[WindowedCounter] {
        &self.counters
    }

    pub fn records_written(&self) -> u64 {
        self.output.borrow().records
    }

    pub fn detach_all(&mut self) {
        for counter in self.counters.drain(..) {
            counter.detach();
        }
    }

    pub fn flush(&self) -> io::Result<()> {
        self.output.borrow_mut().sink.flush()
    }
}

impl Drop for TraceAggregator {
    fn drop(&mut self) {
        self.detach_all();
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "failed to flush trace output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Simulator;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn reports_last_value_then_resets() {
        let sink = MemorySink::new();
        let mut sim = Simulator::new();
        let mut traces = TraceAggregator::with_sink(sink.clone());
        let counter = traces.attach_counter("gw-1", secs(1), &mut sim).unwrap();

        counter.on_event(5);
        counter.on_event(5);
        counter.on_event(12);
        sim.run_until(secs(1));
        assert_eq!(counter.current(), 0);

        sim.run_until(secs(2));
        assert_eq!(
            sink.lines(),
            vec![
                "Time\tNode\tSignal\tValue".to_string(),
                "1\tgw-1\tPitEntries\t12".to_string(),
                "2\tgw-1\tPitEntries\t0".to_string(),
            ]
        );
    }

    #[test]
    fn fractional_periods_format_as_seconds() {
        let sink = MemorySink::new();
        let mut sim = Simulator::new();
        let mut traces = TraceAggregator::with_sink(sink.clone());
        let counter = traces
            .attach_counter("leaf-3", Duration::from_millis(500), &mut sim)
            .unwrap();
        counter.on_event(3);
        sim.run_until(Duration::from_millis(1000));

        let lines = sink.lines();
        assert_eq!(lines[1], "0.5\tleaf-3\tPitEntries\t3");
        assert_eq!(lines[2], "1\tleaf-3\tPitEntries\t0");
    }

    #[test]
    fn header_written_once_for_shared_output() {
        let sink = MemorySink::new();
        let mut sim = Simulator::new();
        let mut traces = TraceAggregator::with_sink(sink.clone());
        let a = traces.attach_counter("a", secs(10), &mut sim).unwrap();
        let b = traces.attach_counter("b", secs(10), &mut sim).unwrap();
        a.on_event(1);
        b.on_event(2);
        sim.run_until(secs(20));

        let lines = sink.lines();
        assert_eq!(lines.iter().filter(|l| l.starts_with("Time")).count(), 1);
        assert_eq!(lines[0], TRACE_HEADER);
        assert_eq!(
            &lines[1..],
            &[
                "10\ta\tPitEntries\t1".to_string(),
                "10\tb\tPitEntries\t2".to_string(),
                "20\ta\tPitEntries\t0".to_string(),
                "20\tb\tPitEntries\t0".to_string(),
            ]
        );
        assert_eq!(traces.records_written(), 4);
    }

    #[test]
    fn detach_stops_reports_and_is_idempotent() {
        let sink = MemorySink::new();
        let mut sim = Simulator::new();
        let mut traces = TraceAggregator::with_sink(sink.clone());
        let counter = traces.attach_counter("n", secs(1), &mut sim).unwrap();
        sim.run_until(secs(2));
        assert!(counter.is_attached());

        counter.detach();
        counter.detach();
        assert!(!counter.is_attached());
        sim.run_until(secs(5));
        assert_eq!(sink.lines().len(), 3);
    }

    #[test]
    fn dropping_aggregator_detaches_everything() {
        let sink = MemorySink::new();
        let mut sim = Simulator::new();
        let mut traces = TraceAggregator::with_sink(sink.clone());
        traces.attach_counter("x", secs(1), &mut sim).unwrap();
        traces.attach_counter("y", secs(1), &mut sim).unwrap();
        drop(traces);

        assert_eq!(sim.pending(), 0);
        sim.run_until(secs(3));
        assert_eq!(sink.lines(), vec![TRACE_HEADER.to_string()]);
    }

    #[test]
    fn zero_period_rejected() {
        let mut sim = Simulator::new();
        let mut traces = TraceAggregator::with_sink(MemorySink::new());
        assert!(matches!(
            traces.attach_counter("x", Duration::ZERO, &mut sim),
            Err(WorkloadError::InvalidParameter(_))
        ));
    }

    #[test]
    fn unopenable_file_is_sink_unavailable() {
        let err = TraceAggregator::open("/nonexistent-dir/for/sure/trace.txt")
            .err()
            .unwrap();
        assert!(matches!(err, WorkloadError::SinkUnavailable { .. }));
    }

    #[test]
    fn writer_sink_terminates_lines() {
        let mut sink = WriterSink::new(Vec::new());
        sink.write_line("a\tb").unwrap();
        sink.write_line("c").unwrap();
        assert_eq!(sink.into_inner(), b"a\tb\nc\n".to_vec());
    }
}
