//! Error types for onair-core.
//!
//! Every component boundary maps its failures into [`Error`], so a stage
//! fault always carries one of these variants regardless of which native
//! module or collaborator produced it.

use thiserror::Error;

/// Error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Cooperative cancellation was observed. Expected during shutdown and
    /// never logged as a failure.
    #[error("Operation cancelled")]
    Cancelled,

    /// A native module, codec or buffer could not be initialized.
    #[error("Allocation failed: {0}")]
    Allocation(String),

    /// Missing mandatory export, wrong capability flags, or a call made in
    /// the wrong lifecycle state.
    #[error("Plugin protocol error: {0}")]
    PluginProtocol(String),

    /// A plugin process call faulted.
    #[error("Plugin processing failed in {operation}: {reason}")]
    PluginProcessing { operation: String, reason: String },

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Egress failed: {0}")]
    Egress(String),

    #[error("Pool '{0}' has been disposed")]
    Disposed(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Stage '{0}' panicked")]
    StagePanicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for the cancellation outcome, which stages treat as a clean exit.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// A stage failure as reported by the orchestrator.
#[derive(Debug)]
pub struct PipelineFault {
    pub chain: String,
    pub stage: String,
    pub error: Error,
}

impl std::fmt::Display for PipelineFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}: {}", self.chain, self.stage, self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_is_not_a_failure() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Allocation("codec".into()).is_cancelled());
    }

    #[test]
    fn test_fault_display_names_stage() {
        let fault = PipelineFault {
            chain: "audio".into(),
            stage: "vst".into(),
            error: Error::PluginProcessing {
                operation: "processReplacing".into(),
                reason: "boom".into(),
            },
        };
        let text = fault.to_string();
        assert!(text.starts_with("audio/vst:"));
        assert!(text.contains("boom"));
    }
}
