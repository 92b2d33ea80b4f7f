mod config;
mod network;
mod summary;

use clap::Parser;
use config::{NodeConfig, Scenario};
use ndn_workload::{
    Callback, GeneratorConfig, Name, RequestGenerator, Scheduler, Simulator, TraceAggregator,
};
use network::PendingTable;
use std::path::{Path, PathBuf};
use std::time::Duration;
use summary::{NodeSummary, RunSummary, SharedGapRecorder};
use tracing_subscriber::EnvFilter;

/// Interest flooding scenario runner: legitimate clients and attackers on one
/// simulated timeline, with per-node PIT occupancy traced to a tab-separated file.
#[derive(Parser)]
#[command(name = "ddos-sim")]
struct Args {
    /// Scenario file (TOML). The built-in reference scenario is used if it does not exist.
    #[arg(long, default_value = "scenario.toml")]
    config: PathBuf,

    /// Trace output path, `-` for stdout (overrides the scenario)
    #[arg(long)]
    output: Option<String>,

    /// Base random seed (overrides the scenario)
    #[arg(long)]
    seed: Option<u64>,

    /// Simulated run length in seconds (overrides the scenario)
    #[arg(long)]
    duration_secs: Option<f64>,

    /// Write a JSON run summary to this path
    #[arg(long)]
    summary_json: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

/// Everything wired up for one scenario node.
struct Node {
    label: String,
    generator: RequestGenerator,
    table: PendingTable,
    gaps: SharedGapRecorder,
}

fn main() {
    let args = Args::parse();
    init_tracing(args.json_logs);

    if let Err(e) = run(args) {
        tracing::error!(error = %e, "scenario failed");
        std::process::exit(1);
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout may carry the trace table, so logs go to stderr.
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_scenario(path: &Path) -> Scenario {
    if path.exists() {
        match Scenario::load(path) {
            Ok(s) => {
                tracing::info!(path = %path.display(), "loaded scenario");
                s
            }
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "failed to load scenario, using reference scenario"
                );
                Scenario::default_scenario()
            }
        }
    } else {
        tracing::info!(path = %path.display(), "no scenario file found, using reference scenario");
        Scenario::default_scenario()
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut scenario = load_scenario(&args.config);
    if let Some(output) = args.output {
        scenario.tracer.output = output;
    }
    if let Some(seed) = args.seed {
        scenario.simulation.seed = seed;
    }
    if let Some(duration) = args.duration_secs {
        scenario.simulation.duration_secs = duration;
    }
    scenario.validate()?;

    let mut sim = Simulator::new();

    let mut traces = if scenario.tracer.enabled {
        match TraceAggregator::open(&scenario.tracer.output) {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::error!(error = %e, "tracing disabled");
                None
            }
        }
    } else {
        None
    };

    tracing::info!(
        nodes = scenario.nodes.len(),
        duration_secs = scenario.simulation.duration_secs,
        seed = scenario.simulation.seed,
        trace = %scenario.tracer.output,
        tracing = traces.is_some(),
        "scenario starting"
    );

    let mut nodes = Vec::with_capacity(scenario.nodes.len());
    for (index, node_config) in scenario.nodes.iter().enumerate() {
        let node = build_node(&scenario, index, node_config, &mut sim, traces.as_mut())?;
        nodes.push(node);
    }

    let period = scenario.tracer_period();
    sim.schedule_after(period, progress_ticker(period));

    sim.run_until(scenario.duration());

    let summaries: Vec<NodeSummary> = nodes
        .iter()
        .map(|node| NodeSummary {
            label: node.label.clone(),
            mode: node.generator.mode(),
            generator: node.generator.stats(),
            pending_table: node.table.stats(),
            gaps: node.gaps.0.borrow().snapshot(),
        })
        .collect();
    for s in &summaries {
        s.log();
    }

    let trace_records = traces.as_ref().map_or(0, TraceAggregator::records_written);
    if let Some(mut t) = traces.take() {
        t.detach_all();
        t.flush()?;
    }

    if let Some(path) = &args.summary_json {
        let summary = RunSummary {
            duration_secs: scenario.simulation.duration_secs,
            seed: scenario.simulation.seed,
            trace_records,
            nodes: summaries,
        };
        summary.write_json(path)?;
        tracing::info!(path = %path.display(), "summary written");
    }

    tracing::info!(trace_records, "scenario finished");
    Ok(())
}

fn build_node(
    scenario: &Scenario,
    index: usize,
    config: &NodeConfig,
    sim: &mut Simulator,
    traces: Option<&mut TraceAggregator>,
) -> Result<Node, Box<dyn std::error::Error>> {
    let table = PendingTable::new(
        scenario.network.pit_capacity,
        Name::from_uri(&scenario.network.served_prefix),
        Duration::from_millis(scenario.network.response_delay_ms),
    );
    if let Some(traces) = traces {
        let counter = traces.attach_counter(config.label.clone(), scenario.tracer_period(), sim)?;
        table.set_counter(counter);
    }

    let generator_config = GeneratorConfig {
        seed: config
            .generator
            .seed
            .or(Some(node_seed(scenario.simulation.seed, index))),
        ..config.generator.clone()
    };
    let capacity = config.outgoing_capacity();
    let gaps = SharedGapRecorder::default();
    let generator = RequestGenerator::new(generator_config, table.transport())?
        .with_capacity_probe(move || capacity)
        .with_observer(gaps.clone());
    table.set_consumer(generator.clone());

    let starter = generator.clone();
    let label = config.label.clone();
    sim.schedule_at(
        Duration::from_secs_f64(config.start_secs),
        Box::new(move |sched: &mut dyn Scheduler| {
            if let Err(e) = starter.start(sched) {
                tracing::error!(node = %label, error = %e, "generator failed to start");
            }
        }),
    );
    if let Some(stop) = config.stop_secs {
        let stopper = generator.clone();
        sim.schedule_at(
            Duration::from_secs_f64(stop),
            Box::new(move |sched: &mut dyn Scheduler| stopper.stop(sched)),
        );
    }

    Ok(Node {
        label: config.label.clone(),
        generator,
        table,
        gaps,
    })
}

/// Seed for a node whose generator has none of its own.
fn node_seed(base: u64, index: usize) -> u64 {
    base.wrapping_mul(1000).wrapping_add(index as u64)
}

fn progress_ticker(period: Duration) -> Callback {
    Box::new(move |sched: &mut dyn Scheduler| {
        tracing::info!(at = sched.now().as_secs_f64(), "simulated time");
        sched.schedule_after(period, progress_ticker(period));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndn_workload::{GeneratorState, MemorySink};

    /// Reference scenario squeezed into a few seconds: attacker active from 1 s to 2 s.
    fn short_scenario() -> Scenario {
        let mut scenario = Scenario::default_scenario();
        scenario.tracer.period_secs = 1.0;
        scenario.nodes[1].start_secs = 1.0;
        scenario.nodes[1].stop_secs = Some(2.0);
        scenario.validate().unwrap();
        scenario
    }

    fn run_nodes(scenario: &Scenario, until: Duration) -> (Vec<Node>, MemorySink) {
        let mut sim = Simulator::new();
        let sink = MemorySink::new();
        let mut traces = TraceAggregator::with_sink(sink.clone());
        let nodes: Vec<Node> = scenario
            .nodes
            .iter()
            .enumerate()
            .map(|(i, config)| build_node(scenario, i, config, &mut sim, Some(&mut traces)).unwrap())
            .collect();
        sim.run_until(until);
        (nodes, sink)
    }

    #[test]
    fn node_seeds_differ_per_index() {
        assert_eq!(node_seed(1, 0), 1000);
        assert_eq!(node_seed(1, 1), 1001);
        assert_ne!(node_seed(2, 0), node_seed(1, 0));
        assert_eq!(node_seed(u64::MAX, 3), u64::MAX.wrapping_mul(1000).wrapping_add(3));
    }

    #[test]
    fn nodes_start_and_stop_on_schedule() {
        let scenario = short_scenario();

        let (nodes, _) = run_nodes(&scenario, Duration::from_millis(999));
        assert_eq!(nodes[0].generator.state(), GeneratorState::Running);
        assert!(nodes[0].generator.stats().requests_sent > 0);
        assert_eq!(nodes[1].generator.state(), GeneratorState::Idle);
        assert_eq!(nodes[1].generator.stats().requests_sent, 0);

        let (nodes, sink) = run_nodes(&scenario, Duration::from_secs(3));
        assert_eq!(nodes[0].generator.state(), GeneratorState::Running);
        // Grace period of 10 s has not elapsed yet.
        assert_eq!(nodes[1].generator.state(), GeneratorState::Stopping);
        let evil = nodes[1].generator.stats();
        assert!(evil.requests_sent > 500, "sent {}", evil.requests_sent);
        assert!(evil.requests_sent < 1500, "sent {}", evil.requests_sent);

        // Unserved attacker names pile up in the table for their 2 s lifetime.
        let evil_table = nodes[1].table.stats();
        assert_eq!(evil_table.satisfied, 0);
        assert!(evil_table.peak > 500);
        assert!(nodes[0].table.stats().satisfied > 0);

        let lines = sink.lines();
        assert_eq!(lines.len(), 1 + 3 * 2);
        assert!(lines[1].starts_with("1\tgood-leaf-1\tPitEntries\t"));
        assert!(lines[2].starts_with("1\tevil-leaf-2\tPitEntries\t"));
    }

    #[test]
    fn derived_seeds_make_runs_reproducible() {
        let scenario = short_scenario();
        let (first, _) = run_nodes(&scenario, Duration::from_secs(3));
        let (second, _) = run_nodes(&scenario, Duration::from_secs(3));
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.generator.stats().requests_sent, b.generator.stats().requests_sent);
            assert_eq!(a.gaps.0.borrow().snapshot().samples, b.gaps.0.borrow().snapshot().samples);
        }

        let mut reseeded = short_scenario();
        reseeded.simulation.seed = 2;
        let (third, _) = run_nodes(&reseeded, Duration::from_secs(3));
        assert_ne!(
            first[0].gaps.0.borrow().snapshot().mean_us,
            third[0].gaps.0.borrow().snapshot().mean_us
        );
    }
}
