//! Interest workload generation for discrete-event NDN simulations.
//!
//! - [`popularity`]: Zipf-Mandelbrot content popularity with inverse-transform sampling.
//! - [`generator`]: self-rescheduling request source for legitimate clients and
//!   flooding attackers.
//! - [`counter`]: windowed PIT-size tracer writing a tab-separated time series.
//! - [`sim`]: the single-threaded scheduler the components run on.
//!
//! Everything runs on one timeline; components share state through `Rc`, never locks.

pub mod counter;
pub mod error;
pub mod generator;
pub mod name;
pub mod popularity;
pub mod sim;
pub mod traits;

pub use counter::{MemorySink, TraceAggregator, WindowedCounter, WriterSink};
pub use error::{Result, WorkloadError};
pub use generator::{
    AdversarialNaming, GeneratorConfig, GeneratorEvent, GeneratorState, GeneratorStats, Mode,
    RequestGenerator,
};
pub use name::{Interest, Name};
pub use popularity::PopularityModel;
pub use sim::{EventHandle, PendingSlot, Simulator};
pub use traits::{Callback, CapacityProbe, GeneratorObserver, LineSink, Scheduler, Transport};
