use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScanError>;

/// Failure taxonomy for a scan session.
///
/// Only `InvalidInput` and `EngineUnavailable` ever reach the caller as
/// failures. The per-target variants are absorbed by the orchestrator and
/// recorded as zero findings.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("scan engine unavailable: {engine} ({reason})")]
    EngineUnavailable { engine: String, reason: String },

    #[error("{phase} invocation against {target} timed out after {}s", .after.as_secs())]
    InvocationTimeout {
        phase: String,
        target: String,
        after: Duration,
    },

    #[error("{phase} invocation against {target} produced no data")]
    InvocationEmpty { phase: String, target: String },

    #[error("malformed engine output: {0}")]
    MalformedResult(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the error must abort the session instead of degrading to an
    /// empty result for one target.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::InvalidInput(_) | ScanError::EngineUnavailable { .. }
        )
    }
}
