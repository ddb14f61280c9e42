use thiserror::Error;

/// Core error type for the Waypoint engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Flow instance not found
    #[error("Flow instance not found: {0}")]
    FlowInstanceNotFound(String),

    /// Continuation was denied; the caller must stop invoking steps
    #[error("Flow halted at step {0}")]
    FlowHalted(String),

    /// A step action failed inside an invocation wrapper with a non-stop cause
    #[error("Step invocation error: {0}")]
    StepInvocationError(String),

    /// Callback does not match the pending form task
    #[error("Callback mismatch: {0}")]
    CallbackMismatch(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Input/output error
    #[error("Input/output error: {0}")]
    IOError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Whether this error is the halt signal rather than a real failure
    pub fn is_halt(&self) -> bool {
        matches!(self, CoreError::FlowHalted(_))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::IOError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}
