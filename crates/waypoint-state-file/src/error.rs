use thiserror::Error;
use waypoint_core::CoreError;

/// Errors raised by the file history store
#[derive(Error, Debug)]
pub enum FileStoreError {
    /// No instance stored under this id
    #[error("Flow instance not found: {0}")]
    NotFound(String),

    /// The id cannot be used as a directory name
    #[error("Invalid instance id: {0:?}")]
    InvalidInstanceId(String),

    /// A history line failed to parse
    #[error("Corrupt history for {instance_id} at line {line}: {source}")]
    CorruptHistory {
        /// Instance whose history is corrupt
        instance_id: String,
        /// 1-based line number
        line: usize,
        /// Parse failure
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<FileStoreError> for CoreError {
    fn from(err: FileStoreError) -> Self {
        match err {
            FileStoreError::NotFound(id) => CoreError::FlowInstanceNotFound(id),
            other => CoreError::StateStoreError(other.to_string()),
        }
    }
}
