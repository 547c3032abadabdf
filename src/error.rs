//! Error types for consensus.

use thiserror::Error;

/// Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Errors that can occur during consensus operations.
#[derive(Debug, Error, Clone)]
pub enum ConsensusError {
    /// Invalid consensus parameters
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// A genesis vertex was not accepted
    #[error("invalid genesis vertex {0}: status must be accepted")]
    InvalidGenesis(String),

    /// A vertex failed admission checks
    #[error("invalid vertex {id}: {reason}")]
    BadVertex { id: String, reason: String },

    /// A transaction consumes no inputs
    #[error("transaction {0} consumes no inputs")]
    NoInputs(String),

    /// Vertex not found
    #[error("vertex not found: {0}")]
    NotFound(String),

    /// Metric registration failed
    #[error("metrics error: {0}")]
    Metrics(String),

    /// A storage commit (accept/reject) failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}
