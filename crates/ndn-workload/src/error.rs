use thiserror::Error;

/// Errors surfaced by workload components.
///
/// All of them are configuration-time failures: once a generator has started,
/// emission itself cannot fail.
#[derive(Error, Debug)]
pub enum WorkloadError {
    /// A configuration value is out of range (non-positive frequency, empty catalog, ...).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The trace output could not be opened.
    #[error("sink `{target}` unavailable: {source}")]
    SinkUnavailable {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// A lifecycle call was made in the wrong state.
    #[error("invalid state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, WorkloadError>;
