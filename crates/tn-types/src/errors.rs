use thiserror::Error;

/// Main error type for the Tourney system
#[derive(Error, Debug)]
pub enum TnError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building or interpreting a trial outcome
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OutcomeError {
    #[error("Completed trial has a non-finite score: {score}")]
    NonFiniteScore { score: f64 },

    #[error("Unknown evaluation metric: {name}")]
    UnknownMetric { name: String },
}

/// Experiment-level errors
#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("Worker {worker} could not be prepared: {message}")]
    WorkerPrepare { worker: usize, message: String },
}

/// Result type alias for Tourney operations
pub type TnResult<T> = Result<T, TnError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::TnError::Config(format!($($arg)*))
    };
}
