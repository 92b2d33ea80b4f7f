use ndn_workload::generator::{GeneratorConfig, Mode};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub tracer: TracerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_nodes")]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_duration_secs")]
    pub duration_secs: f64,
    /// Base seed; node generators without their own seed derive one from it.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TracerConfig {
    #[serde(default = "default_tracer_enabled")]
    pub enabled: bool,
    /// File path, or `-` for stdout.
    #[serde(default = "default_tracer_output")]
    pub output: String,
    #[serde(default = "default_tracer_period_secs")]
    pub period_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Requests under this prefix are answered by the producer.
    #[serde(default = "default_served_prefix")]
    pub served_prefix: String,
    #[serde(default = "default_response_delay_ms")]
    pub response_delay_ms: u64,
    /// Maximum pending entries per node; further requests are rejected.
    #[serde(default = "default_pit_capacity")]
    pub pit_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub label: String,
    /// Outgoing link rates of the node, in bits per second.
    #[serde(default = "default_link_capacity_bps")]
    pub link_capacity_bps: Vec<u64>,
    #[serde(default)]
    pub start_secs: f64,
    #[serde(default)]
    pub stop_secs: Option<f64>,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

impl NodeConfig {
    /// Aggregate outgoing capacity in bytes per second.
    pub fn outgoing_capacity(&self) -> f64 {
        self.link_capacity_bps.iter().map(|&bps| bps as f64 / 8.0).sum()
    }
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)?;
        let scenario: Scenario = toml::from_str(&contents)?;
        Ok(scenario)
    }

    /// One legitimate client at 100 req/s for the whole run, one attacker at
    /// 1000 req/s between minute 1 and minute 6, nine simulated minutes in total.
    pub fn default_scenario() -> Self {
        Scenario {
            simulation: SimulationConfig::default(),
            tracer: TracerConfig::default(),
            network: NetworkConfig::default(),
            nodes: default_nodes(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let duration = seconds("simulation.duration_secs", self.simulation.duration_secs)?;
        if duration.is_zero() {
            return Err(format!(
                "simulation.duration_secs must be > 0, got {}",
                self.simulation.duration_secs
            ));
        }
        let period = seconds("tracer.period_secs", self.tracer.period_secs)?;
        if period.is_zero() {
            return Err(format!(
                "tracer.period_secs must be > 0, got {}",
                self.tracer.period_secs
            ));
        }
        if self.network.pit_capacity == 0 {
            return Err("network.pit_capacity must be > 0".to_string());
        }
        let mut labels = HashSet::new();
        for node in &self.nodes {
            if !labels.insert(node.label.as_str()) {
                return Err(format!("duplicate node label `{}`", node.label));
            }
            seconds("start_secs", node.start_secs)
                .map_err(|e| format!("node `{}`: {e}", node.label))?;
            if let Some(stop) = node.stop_secs {
                seconds("stop_secs", stop).map_err(|e| format!("node `{}`: {e}", node.label))?;
                if stop < node.start_secs {
                    return Err(format!(
                        "node `{}`: stop_secs must not precede start_secs",
                        node.label
                    ));
                }
            }
            node.generator
                .validate()
                .map_err(|e| format!("node `{}`: {e}", node.label))?;
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.simulation.duration_secs)
    }

    pub fn tracer_period(&self) -> Duration {
        Duration::from_secs_f64(self.tracer.period_secs)
    }
}

/// Seconds as a `Duration`: finite, non-negative and small enough to represent.
fn seconds(field: &str, value: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(value).map_err(|_| format!("{field} out of range, got {value}"))
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            seed: default_seed(),
        }
    }
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            enabled: default_tracer_enabled(),
            output: default_tracer_output(),
            period_secs: default_tracer_period_secs(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            served_prefix: default_served_prefix(),
            response_delay_ms: default_response_delay_ms(),
            pit_capacity: default_pit_capacity(),
        }
    }
}

fn default_nodes() -> Vec<NodeConfig> {
    vec![
        NodeConfig {
            label: "good-leaf-1".to_string(),
            link_capacity_bps: default_link_capacity_bps(),
            start_secs: 0.0,
            stop_secs: None,
            generator: GeneratorConfig {
                frequency: 100.0,
                prefix: "/good/good-leaf-1".to_string(),
                lifetime_ms: 2000,
                ..GeneratorConfig::default()
            },
        },
        NodeConfig {
            label: "evil-leaf-2".to_string(),
            link_capacity_bps: default_link_capacity_bps(),
            start_secs: 60.0,
            stop_secs: Some(360.0),
            generator: GeneratorConfig {
                frequency: 1000.0,
                prefix: "/evil/evil-leaf-2".to_string(),
                lifetime_ms: 2000,
                mode: Mode::Adversarial,
                ..GeneratorConfig::default()
            },
        },
    ]
}

fn default_duration_secs() -> f64 {
    540.0
}
fn default_seed() -> u64 {
    1
}
fn default_tracer_enabled() -> bool {
    true
}
fn default_tracer_output() -> String {
    "-".to_string()
}
fn default_tracer_period_secs() -> f64 {
    10.0
}
fn default_served_prefix() -> String {
    "/good".to_string()
}
fn default_response_delay_ms() -> u64 {
    40
}
fn default_pit_capacity() -> usize {
    5000
}
fn default_link_capacity_bps() -> Vec<u64> {
    vec![10_000_000]
}
