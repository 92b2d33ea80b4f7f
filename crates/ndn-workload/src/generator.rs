use crate::error::{Result, WorkloadError};
use crate::name::{Interest, Name};
use crate::popularity::{PopularityModel, DEFAULT_CATALOG_SIZE};
use crate::sim::PendingSlot;
use crate::traits::{CapacityProbe, GeneratorObserver, Scheduler, Transport};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Whether a generator models a legitimate client or a flooding attacker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Requests drawn from a bounded catalog with Zipf popularity.
    #[default]
    Benign,
    /// Requests for names outside the catalog, so nothing can be served from cache.
    Adversarial,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Benign => "benign",
            Mode::Adversarial => "adversarial",
        }
    }
}

/// How an adversarial generator picks its out-of-catalog sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdversarialNaming {
    /// Uniform over `[adversarial_floor, u32::MAX]`.
    #[default]
    Random,
    /// Counter starting at `adversarial_floor`; never repeats.
    Sequential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Target request rate in requests per second.
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_lifetime_ms")]
    pub lifetime_ms: u64,
    #[serde(default)]
    pub mode: Mode,
    /// Benign only: derive the rate from the node's outgoing capacity.
    #[serde(default)]
    pub derive_rate_from_capacity: bool,
    #[serde(default = "default_catalog_size")]
    pub catalog_size: u32,
    #[serde(default = "default_skew_exponent")]
    pub skew_exponent: f64,
    #[serde(default)]
    pub shift_parameter: f64,
    /// Lowest adversarial sequence number. Must exceed `catalog_size`.
    #[serde(default = "default_adversarial_floor")]
    pub adversarial_floor: u32,
    #[serde(default)]
    pub adversarial_naming: AdversarialNaming,
    /// Bytes of returned data per request when deriving the rate from capacity.
    #[serde(default = "default_capacity_divisor")]
    pub capacity_divisor: f64,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            frequency: default_frequency(),
            prefix: default_prefix(),
            lifetime_ms: default_lifetime_ms(),
            mode: Mode::default(),
            derive_rate_from_capacity: false,
            catalog_size: default_catalog_size(),
            skew_exponent: default_skew_exponent(),
            shift_parameter: 0.0,
            adversarial_floor: default_adversarial_floor(),
            adversarial_naming: AdversarialNaming::default(),
            capacity_divisor: default_capacity_divisor(),
            grace_period_ms: default_grace_period_ms(),
            seed: None,
        }
    }
}

impl GeneratorConfig {
    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(self.lifetime_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    fn uses_capacity(&self) -> bool {
        self.derive_rate_from_capacity && self.mode == Mode::Benign
    }

    pub fn validate(&self) -> Result<()> {
        if !self.uses_capacity() {
            check_frequency(self.frequency)?;
        }
        if self.catalog_size == 0 {
            return Err(WorkloadError::InvalidParameter(
                "catalog_size must be > 0".into(),
            ));
        }
        if self.adversarial_floor <= self.catalog_size {
            return Err(WorkloadError::InvalidParameter(format!(
                "adversarial_floor ({}) must be greater than catalog_size ({})",
                self.adversarial_floor, self.catalog_size
            )));
        }
        if !(self.capacity_divisor.is_finite() && self.capacity_divisor > 0.0) {
            return Err(WorkloadError::InvalidParameter(format!(
                "capacity_divisor must be > 0, got {}",
                self.capacity_divisor
            )));
        }
        Ok(())
    }
}

fn check_frequency(frequency: f64) -> Result<()> {
    if !(frequency.is_finite() && frequency > 0.0) {
        return Err(WorkloadError::InvalidParameter(format!(
            "frequency must be > 0, got {frequency}"
        )));
    }
    // The longest inter-emission gap must fit in a Duration.
    if Duration::try_from_secs_f64(2.0 / frequency).is_err() {
        return Err(WorkloadError::InvalidParameter(format!(
            "frequency {frequency} is too small to schedule"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorState {
    Idle,
    Running,
    Stopping,
}

impl GeneratorState {
    pub fn as_str(self) -> &'static str {
        match self {
            GeneratorState::Idle => "idle",
            GeneratorState::Running => "running",
            GeneratorState::Stopping => "stopping",
        }
    }
}

/// Observable generator activity. Timestamps are simulated seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum GeneratorEvent {
    RequestSent {
        index: u64,
        mode: Mode,
        timestamp: f64,
        name: String,
    },
    Stopped {
        timestamp: f64,
    },
    Finalized {
        timestamp: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeneratorStats {
    pub state: GeneratorState,
    pub requests_sent: u64,
    /// Rate in effect for the current run; 0 before the first start.
    pub frequency: f64,
}

struct GeneratorInner {
    config: GeneratorConfig,
    prefix: Name,
    state: GeneratorState,
    frequency: f64,
    popularity: Option<PopularityModel>,
    sequence_counter: u64,
    rng: StdRng,
    transport: Box<dyn Transport>,
    capacity: Option<Box<dyn CapacityProbe>>,
    observer: Option<Box<dyn GeneratorObserver>>,
    pending: PendingSlot,
    requests_sent: u64,
}

impl GeneratorInner {
    fn effective_frequency(&self) -> Result<f64> {
        if !self.config.uses_capacity() {
            check_frequency(self.config.frequency)?;
            return Ok(self.config.frequency);
        }
        let probe = self.capacity.as_ref().ok_or_else(|| {
            WorkloadError::InvalidParameter(
                "derive_rate_from_capacity requires a capacity probe".into(),
            )
        })?;
        let bytes_per_sec = probe.outgoing_capacity();
        let frequency = bytes_per_sec / self.config.capacity_divisor;
        check_frequency(frequency)?;
        tracing::debug!(
            prefix = %self.prefix,
            bytes_per_sec,
            frequency,
            "rate derived from outgoing capacity"
        );
        Ok(frequency)
    }

    fn next_index(&mut self) -> u64 {
        match self.config.mode {
            Mode::Adversarial => match self.config.adversarial_naming {
                AdversarialNaming::Random => self
                    .rng
                    .gen_range(u64::from(self.config.adversarial_floor)..=u64::from(u32::MAX)),
                AdversarialNaming::Sequential => self.next_sequence(),
            },
            Mode::Benign => match &self.popularity {
                Some(model) => u64::from(model.sample_with(&mut self.rng)),
                None => self.next_sequence(),
            },
        }
    }

    fn next_sequence(&mut self) -> u64 {
        let seq = self.sequence_counter;
        self.sequence_counter += 1;
        seq
    }

    fn notify(&mut self, event: GeneratorEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_event(&event);
        }
    }
}

/// Self-rescheduling Interest source.
///
/// Lifecycle: `Idle -> start() -> Running -> stop() -> Stopping -> (grace period) -> Idle`.
/// While running, every emission hands one Interest to the transport and schedules the
/// next one after a delay drawn uniformly from `[0, 2 / frequency)`.
///
/// The handle is cheap to clone. Scheduled callbacks hold only a weak reference, and the
/// outstanding event is cancelled when the last handle is dropped. The transport and
/// observer run while the generator is borrowed and must not call back into it.
#[derive(Clone)]
pub struct RequestGenerator {
    inner: Rc<RefCell<GeneratorInner>>,
}

impl RequestGenerator {
    pub fn new(config: GeneratorConfig, transport: impl Transport + 'static) -> Result<Self> {
        config.validate()?;
        let rng = make_rng(config.seed);
        let prefix = Name::from_uri(&config.prefix);
        let sequence_counter = u64::from(config.adversarial_floor);
        Ok(Self {
            inner: Rc::new(RefCell::new(GeneratorInner {
                config,
                prefix,
                state: GeneratorState::Idle,
                frequency: 0.0,
                popularity: None,
                sequence_counter,
                rng,
                transport: Box::new(transport),
                capacity: None,
                observer: None,
                pending: PendingSlot::new(),
                requests_sent: 0,
            })),
        })
    }

    pub fn with_capacity_probe(self, probe: impl CapacityProbe + 'static) -> Self {
        self.inner.borrow_mut().capacity = Some(Box::new(probe));
        self
    }

    pub fn with_observer(self, observer: impl GeneratorObserver + 'static) -> Self {
        self.inner.borrow_mut().observer = Some(Box::new(observer));
        self
    }

    /// Replace the configuration. Only allowed while idle.
    pub fn reconfigure(&self, config: GeneratorConfig) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.state != GeneratorState::Idle {
            return Err(WorkloadError::InvalidState {
                expected: GeneratorState::Idle.as_str(),
                actual: inner.state.as_str(),
            });
        }
        config.validate()?;
        if config.seed.is_some() {
            inner.rng = make_rng(config.seed);
        }
        inner.prefix = Name::from_uri(&config.prefix);
        inner.config = config;
        Ok(())
    }

    /// Compute the effective rate, prime the popularity table and emit the first request.
    pub fn start(&self, scheduler: &mut dyn Scheduler) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != GeneratorState::Idle {
                return Err(WorkloadError::InvalidState {
                    expected: GeneratorState::Idle.as_str(),
                    actual: inner.state.as_str(),
                });
            }
            let frequency = inner.effective_frequency()?;
            inner.popularity = match inner.config.mode {
                Mode::Benign => Some(PopularityModel::new(
                    inner.config.catalog_size,
                    inner.config.skew_exponent,
                    inner.config.shift_parameter,
                )?),
                Mode::Adversarial => None,
            };
            inner.sequence_counter = u64::from(inner.config.adversarial_floor);
            inner.frequency = frequency;
            inner.state = GeneratorState::Running;
            tracing::info!(
                prefix = %inner.prefix,
                mode = inner.config.mode.as_str(),
                frequency,
                at = scheduler.now().as_secs_f64(),
                "request generator started"
            );
        }
        self.emit_once(scheduler);
        Ok(())
    }

    /// Emit one Interest and schedule the next emission. Does nothing unless running.
    pub fn emit_once(&self, scheduler: &mut dyn Scheduler) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != GeneratorState::Running {
            return;
        }

        let index = inner.next_index();
        let name = inner.prefix.clone().with_sequence(index);
        let interest = Interest {
            name,
            nonce: inner.rng.gen(),
            lifetime: inner.config.lifetime(),
        };
        let mode = inner.config.mode;
        let timestamp = scheduler.now().as_secs_f64();

        tracing::debug!(
            name = %interest.name,
            index,
            mode = mode.as_str(),
            timestamp,
            "request sent"
        );
        let event = GeneratorEvent::RequestSent {
            index,
            mode,
            timestamp,
            name: interest.name.to_string(),
        };
        inner.transport.send(interest, scheduler);
        inner.requests_sent += 1;
        metrics::counter!("workload_requests_sent_total", "mode" => mode.as_str()).increment(1);
        inner.notify(event);

        let upper = 2.0 / inner.frequency;
        let delay = Duration::from_secs_f64(inner.rng.gen_range(0.0..upper));
        let weak = Rc::downgrade(&self.inner);
        let handle = scheduler.schedule_after(
            delay,
            Box::new(move |scheduler: &mut dyn Scheduler| {
                if let Some(generator) = upgrade(&weak) {
                    generator.emit_once(scheduler);
                }
            }),
        );
        inner.pending.arm(handle);
    }

    /// Cancel the next emission and finalize after the grace period. Ignored unless running.
    pub fn stop(&self, scheduler: &mut dyn Scheduler) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != GeneratorState::Running {
            tracing::debug!(state = inner.state.as_str(), "stop ignored");
            return;
        }
        inner.pending.cancel();
        inner.state = GeneratorState::Stopping;

        let timestamp = scheduler.now().as_secs_f64();
        tracing::info!(
            prefix = %inner.prefix,
            sent = inner.requests_sent,
            at = timestamp,
            "request generator stopping"
        );
        inner.notify(GeneratorEvent::Stopped { timestamp });

        let weak = Rc::downgrade(&self.inner);
        let handle = scheduler.schedule_after(
            inner.config.grace_period(),
            Box::new(move |scheduler: &mut dyn Scheduler| {
                if let Some(generator) = upgrade(&weak) {
                    generator.finalize(scheduler.now());
                }
            }),
        );
        inner.pending.arm(handle);
    }

    fn finalize(&self, now: Duration) {
        let mut inner = self.inner.borrow_mut();
        if inner.state != GeneratorState::Stopping {
            return;
        }
        inner.state = GeneratorState::Idle;
        inner.popularity = None;
        let timestamp = now.as_secs_f64();
        tracing::info!(prefix = %inner.prefix, at = timestamp, "request generator finalized");
        inner.notify(GeneratorEvent::Finalized { timestamp });
    }

    /// Negative acknowledgments are ignored; re-emitting on a NACK would only
    /// amplify attack traffic. The next request still goes out on schedule.
    pub fn on_nack(&self, _interest: &Interest) {}

    /// Responses are not correlated with requests.
    pub fn on_data(&self, _name: &Name) {}

    pub fn state(&self) -> GeneratorState {
        self.inner.borrow().state
    }

    pub fn stats(&self) -> GeneratorStats {
        let inner = self.inner.borrow();
        GeneratorStats {
            state: inner.state,
            requests_sent: inner.requests_sent,
            frequency: inner.frequency,
        }
    }

    pub fn prefix(&self) -> Name {
        self.inner.borrow().prefix.clone()
    }

    pub fn mode(&self) -> Mode {
        self.inner.borrow().config.mode
    }
}

fn upgrade(weak: &Weak<RefCell<GeneratorInner>>) -> Option<RequestGenerator> {
    weak.upgrade().map(|inner| RequestGenerator { inner })
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn default_frequency() -> f64 {
    1.0
}
fn default_prefix() -> String {
    "/".to_string()
}
fn default_lifetime_ms() -> u64 {
    1000
}
fn default_catalog_size() -> u32 {
    DEFAULT_CATALOG_SIZE
}
fn default_skew_exponent() -> f64 {
    0.7
}
fn default_adversarial_floor() -> u32 {
    DEFAULT_CATALOG_SIZE + 1
}
fn default_capacity_divisor() -> f64 {
    1146.0
}
fn default_grace_period_ms() -> u64 {
    10_000
}
