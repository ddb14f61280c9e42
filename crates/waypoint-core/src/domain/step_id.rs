use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one step invocation within an attempt, rendered `name:index`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    /// Build the identifier for the `index`-th step invocation named `name`
    pub fn new(name: &str, index: u32) -> Self {
        Self(format!("{}:{}", name, index))
    }

    /// Step name without the index suffix
    pub fn name(&self) -> &str {
        self.0.rsplit_once(':').map(|(name, _)| name).unwrap_or(&self.0)
    }

    /// Invocation index, if the identifier carries one
    pub fn index(&self) -> Option<u32> {
        self.0.rsplit_once(':').and_then(|(_, idx)| idx.parse().ok())
    }

    /// Borrow the rendered identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out step identifiers for one attempt and keeps the in-progress
/// call sequence.
///
/// The counter is per attempt: a resumed flow starts again at 1, so a step
/// that is reached by the same path gets the same identifier it had before.
#[derive(Debug, Default)]
pub struct StepIdAllocator {
    call_index: u32,
    in_progress: Vec<StepId>,
}

impl StepIdAllocator {
    /// Create an allocator for a fresh attempt
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the identifier for the next step invocation
    pub fn allocate(&mut self, name: &str) -> StepId {
        self.call_index += 1;
        let id = StepId::new(name, self.call_index);
        self.in_progress.push(id.clone());
        id
    }

    /// Identifiers allocated so far, in invocation order
    pub fn in_progress(&self) -> &[StepId] {
        &self.in_progress
    }

    /// Number of steps invoked in this attempt
    pub fn call_index(&self) -> u32 {
        self.call_index
    }
}
