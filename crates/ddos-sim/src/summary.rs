use crate::network::TableStats;
use hdrhistogram::Histogram;
use ndn_workload::{GeneratorEvent, GeneratorObserver, GeneratorStats, Mode};
use serde::Serialize;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

/// Histogram of gaps between consecutive requests of one generator, in microseconds.
pub struct GapRecorder {
    last: Option<f64>,
    histogram: Histogram<u64>,
}

impl GapRecorder {
    pub fn new() -> Self {
        Self {
            last: None,
            // Auto-resizing, 3 significant digits.
            histogram: Histogram::new(3).expect("3 significant figures is a valid precision"),
        }
    }

    fn record(&mut self, timestamp: f64) {
        if let Some(last) = self.last {
            let gap_us = ((timestamp - last) * 1e6).round().max(0.0) as u64;
            if let Err(e) = self.histogram.record(gap_us) {
                tracing::warn!(error = ?e, gap_us, "gap not recorded");
            }
        }
        self.last = Some(timestamp);
    }

    pub fn snapshot(&self) -> GapStats {
        let h = &self.histogram;
        GapStats {
            samples: h.len(),
            mean_us: if h.is_empty() { 0.0 } else { h.mean() },
            p50_us: h.value_at_quantile(0.5),
            p99_us: h.value_at_quantile(0.99),
            max_us: h.max(),
        }
    }
}

impl Default for GapRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer adapter so a shared recorder can be handed to a generator.
#[derive(Clone, Default)]
pub struct SharedGapRecorder(pub Rc<RefCell<GapRecorder>>);

impl GeneratorObserver for SharedGapRecorder {
    fn on_event(&mut self, event: &GeneratorEvent) {
        match event {
            GeneratorEvent::RequestSent { timestamp, .. } => self.0.borrow_mut().record(*timestamp),
            // A new run must not measure the gap across the pause.
            GeneratorEvent::Stopped { .. } | GeneratorEvent::Finalized { .. } => {
                self.0.borrow_mut().last = None
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GapStats {
    pub samples: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub label: String,
    pub mode: Mode,
    pub generator: GeneratorStats,
    pub pending_table: TableStats,
    pub gaps: GapStats,
}

impl NodeSummary {
    pub fn log(&self) {
        tracing::info!(
            node = %self.label,
            mode = self.mode.as_str(),
            sent = self.generator.requests_sent,
            frequency = self.generator.frequency,
            satisfied = self.pending_table.satisfied,
            expired = self.pending_table.expired,
            dropped = self.pending_table.dropped,
            peak_pending = self.pending_table.peak,
            gap_mean_us = format!("{:.0}", self.gaps.mean_us),
            gap_p50_us = self.gaps.p50_us,
            gap_p99_us = self.gaps.p99_us,
            "node summary"
        );
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub duration_secs: f64,
    pub seed: u64,
    pub trace_records: u64,
    pub nodes: Vec<NodeSummary>,
}

impl RunSummary {
    pub fn write_json(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(timestamp: f64) -> GeneratorEvent {
        GeneratorEvent::RequestSent {
            index: 1,
            mode: Mode::Benign,
            timestamp,
            name: "/good/%00%01".into(),
        }
    }

    #[test]
    fn records_gaps_between_requests() {
        let mut recorder = SharedGapRecorder::default();
        for t in [0.0, 0.010, 0.030, 0.040] {
            recorder.on_event(&sent(t));
        }
        let stats = recorder.0.borrow().snapshot();
        assert_eq!(stats.samples, 3);
        assert!((stats.mean_us - 13_333.0).abs() < 50.0);
        assert!((19_950..=20_050).contains(&stats.max_us));
    }

    #[test]
    fn stop_resets_gap_origin() {
        let mut recorder = SharedGapRecorder::default();
        recorder.on_event(&sent(1.0));
        recorder.on_event(&GeneratorEvent::Stopped { timestamp: 1.0 });
        recorder.on_event(&sent(100.0));
        assert_eq!(recorder.0.borrow().snapshot().samples, 0);
    }

    #[test]
    fn empty_histogram_snapshot() {
        let stats = GapRecorder::new().snapshot();
        assert_eq!(stats.samples, 0);
        assert_eq!(stats.mean_us, 0.0);
    }
}
