//! Error types for the VST2 host.

use crate::effect::EffectState;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Opening,
    EntryPoint,
    Instantiation,
    Descriptor,
    Starting,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStage::Opening => write!(f, "opening library"),
            LoadStage::EntryPoint => write!(f, "resolving entry point"),
            LoadStage::Instantiation => write!(f, "creating instance"),
            LoadStage::Descriptor => write!(f, "validating descriptor"),
            LoadStage::Starting => write!(f, "starting"),
        }
    }
}

#[derive(Error, Debug)]
pub enum VstError {
    #[error("Plugin load failed at {stage} stage: {path}\n  Reason: {reason}")]
    LoadFailed {
        path: PathBuf,
        stage: LoadStage,
        reason: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{operation} not allowed while {actual:?}")]
    InvalidState {
        operation: &'static str,
        actual: EffectState,
    },

    #[error("Plugin faulted during {operation}: {reason}")]
    Processing {
        operation: &'static str,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, VstError>;

impl From<VstError> for onair_core::Error {
    fn from(err: VstError) -> Self {
        match err {
            VstError::LoadFailed {
                stage: LoadStage::Opening | LoadStage::Instantiation,
                ..
            } => onair_core::Error::Allocation(err.to_string()),
            VstError::LoadFailed { .. } | VstError::Protocol(_) | VstError::InvalidState { .. } => {
                onair_core::Error::PluginProtocol(err.to_string())
            }
            VstError::Processing { operation, reason } => onair_core::Error::PluginProcessing {
                operation: operation.to_string(),
                reason,
            },
        }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "native fault".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_stage_display() {
        let err = VstError::LoadFailed {
            path: PathBuf::from("/plugins/synth.so"),
            stage: LoadStage::EntryPoint,
            reason: "no VSTPluginMain".into(),
        };
        let text = err.to_string();
        assert!(text.contains("resolving entry point"));
        assert!(text.contains("/plugins/synth.so"));
    }

    #[test]
    fn test_taxonomy_mapping() {
        let opening = VstError::LoadFailed {
            path: PathBuf::new(),
            stage: LoadStage::Opening,
            reason: "missing".into(),
        };
        assert!(matches!(
            onair_core::Error::from(opening),
            onair_core::Error::Allocation(_)
        ));

        let state = VstError::InvalidState {
            operation: "processReplacing",
            actual: EffectState::Unopened,
        };
        assert!(matches!(
            onair_core::Error::from(state),
            onair_core::Error::PluginProtocol(_)
        ));

        let fault = VstError::Processing {
            operation: "processReplacing",
            reason: "segv".into(),
        };
        match onair_core::Error::from(fault) {
            onair_core::Error::PluginProcessing { operation, reason } => {
                assert_eq!(operation, "processReplacing");
                assert_eq!(reason, "segv");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "native fault");
    }
}
