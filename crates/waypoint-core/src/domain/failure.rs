//! Failures raised by step actions
//!
//! A step action returns `Result<(), StepFailure>`. The variant decides how
//! the step executor classifies the outcome; see
//! [`StepExecutor`](crate::application::step_executor::StepExecutor).

use crate::CoreError;
use thiserror::Error;

/// Closed set of failures a step action can raise
#[derive(Error, Debug)]
pub enum StepFailure {
    /// Cooperative request to stop the flow after this step
    #[error("{0}")]
    StopRequested(String),

    /// Declared business failure; the flow stops
    #[error("{0}")]
    BusinessFailure(String),

    /// Several independent causes collected together
    #[error("{message}")]
    Aggregated {
        /// Summary message
        message: String,
        /// Inner causes, in the order they were collected
        causes: Vec<StepFailure>,
    },

    /// Failure raised through an invocation layer around the real cause
    #[error("invocation failed: {0}")]
    Invocation(Box<StepFailure>),

    /// Anything else
    #[error("{0}")]
    Unclassified(anyhow::Error),
}

impl StepFailure {
    /// Request a cooperative stop
    pub fn stop(message: impl Into<String>) -> Self {
        StepFailure::StopRequested(message.into())
    }

    /// Declare a business failure
    pub fn business(message: impl Into<String>) -> Self {
        StepFailure::BusinessFailure(message.into())
    }

    /// Collect several causes into one failure
    pub fn aggregated(message: impl Into<String>, causes: Vec<StepFailure>) -> Self {
        StepFailure::Aggregated {
            message: message.into(),
            causes,
        }
    }

    /// Wrap a failure raised through an invocation layer
    pub fn invocation(inner: StepFailure) -> Self {
        StepFailure::Invocation(Box::new(inner))
    }

    /// Wrap any other error
    pub fn unclassified<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        StepFailure::Unclassified(err.into())
    }

    /// Short name of the variant, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            StepFailure::StopRequested(_) => "stop_requested",
            StepFailure::BusinessFailure(_) => "business_failure",
            StepFailure::Aggregated { .. } => "aggregated",
            StepFailure::Invocation(_) => "invocation",
            StepFailure::Unclassified(_) => "unclassified",
        }
    }

    /// Leaf causes, unwrapping aggregated and invocation layers recursively.
    ///
    /// An aggregated failure without causes is its own leaf.
    pub fn leaves(&self) -> Vec<&StepFailure> {
        match self {
            StepFailure::Aggregated { causes, .. } if !causes.is_empty() => {
                causes.iter().flat_map(|cause| cause.leaves()).collect()
            }
            StepFailure::Invocation(inner) => inner.leaves(),
            other => vec![other],
        }
    }

    /// Diagnostic trace of the failure and everything it wraps
    pub fn trace(&self) -> String {
        let mut out = String::new();
        self.write_trace(&mut out, 0);
        out
    }

    fn write_trace(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        match self {
            StepFailure::Aggregated { message, causes } => {
                out.push_str(&format!("{}aggregated: {}\n", indent, message));
                for (i, cause) in causes.iter().enumerate() {
                    out.push_str(&format!("{}  cause {}:\n", indent, i));
                    cause.write_trace(out, depth + 2);
                }
            }
            StepFailure::Invocation(inner) => {
                out.push_str(&format!("{}invocation failed\n", indent));
                inner.write_trace(out, depth + 1);
            }
            StepFailure::Unclassified(err) => {
                for line in format!("{:?}", err).lines() {
                    out.push_str(&format!("{}{}\n", indent, line));
                }
            }
            other => {
                out.push_str(&format!("{}{}: {}\n", indent, other.kind(), other));
            }
        }
    }
}

impl From<anyhow::Error> for StepFailure {
    fn from(err: anyhow::Error) -> Self {
        StepFailure::Unclassified(err)
    }
}

impl From<CoreError> for StepFailure {
    fn from(err: CoreError) -> Self {
        StepFailure::Unclassified(err.into())
    }
}

impl From<serde_json::Error> for StepFailure {
    fn from(err: serde_json::Error) -> Self {
        StepFailure::Unclassified(err.into())
    }
}

impl From<std::io::Error> for StepFailure {
    fn from(err: std::io::Error) -> Self {
        StepFailure::Unclassified(err.into())
    }
}
