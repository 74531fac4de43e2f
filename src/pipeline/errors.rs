//! Error taxonomy of the operation pipeline

use thiserror::Error;

use crate::encoding::EncodingError;
use crate::node_manager::node_errors::summarize;
use crate::node_manager::{NodeError, ProtocolError};

#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    /// No principal address given and none derivable from the intents
    #[error("No address provided or found in the operation intents")]
    MissingAddress,

    /// A reveal must be synthesized but no public key was supplied
    #[error("Reveal needed for {address} but no public key was supplied")]
    MissingPublicKey { address: String },

    /// An intent violates a precondition (bad storage, wrong key, bad hex)
    #[error("Invalid intent #{index}: {reason}")]
    InvalidIntent { index: usize, reason: String },

    /// The node simulated or injected the group and refused it
    ///
    /// `errors` keeps the node's records, details included, in the order reported
    #[error("Operation rejected during {stage}: {}", summarize(errors))]
    ChainRejected {
        stage: &'static str,
        errors: Vec<ProtocolError>,
    },

    /// The batch asks for more gas than a block can hold
    #[error("Batch gas limit {total} exceeds the block limit of {limit}")]
    GasBudgetExceeded { total: u64, limit: u64 },

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Simulation output did not line up with the submitted contents
    #[error("Estimation failed: {0}")]
    Estimation(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Node(e) => e.is_retryable(),
            Self::MissingAddress
            | Self::MissingPublicKey { .. }
            | Self::InvalidIntent { .. }
            | Self::ChainRejected { .. }
            | Self::GasBudgetExceeded { .. }
            | Self::Encoding(_)
            | Self::Estimation(_)
            | Self::Signing(_)
            | Self::Configuration(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::MissingAddress
            | Self::MissingPublicKey { .. }
            | Self::InvalidIntent { .. }
            | Self::GasBudgetExceeded { .. } => "precondition",
            Self::ChainRejected { .. } => "chain",
            Self::Node(_) => "node",
            Self::Encoding(_) => "encoding",
            Self::Estimation(_) => "estimation",
            Self::Signing(_) => "signing",
            Self::Configuration(_) => "config",
        }
    }

    /// Protocol refusals become `ChainRejected` for the given stage
    pub fn rejected_at(stage: &'static str, err: NodeError) -> Self {
        match err {
            NodeError::Protocol { errors, .. } => Self::ChainRejected { stage, errors },
            other => Self::Node(other),
        }
    }

    /// Ids of the protocol errors behind a rejection, empty otherwise
    pub fn rejection_ids(&self) -> Vec<&str> {
        match self {
            Self::ChainRejected { errors, .. } => errors.iter().map(|e| e.id.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn invalid_intent(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidIntent {
            index,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::ChainRejected {
            stage: "simulation",
            errors: vec![
                ProtocolError::new("temporary", "proto.alpha.contract.balance_too_low"),
                ProtocolError::new("temporary", "proto.alpha.tez.subtraction_underflow"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Operation rejected during simulation: proto.alpha.contract.balance_too_low, proto.alpha.tez.subtraction_underflow"
        );
        assert_eq!(
            PipelineError::invalid_intent(2, "storage section missing").to_string(),
            "Invalid intent #2: storage section missing"
        );
    }

    #[test]
    fn test_retryability_follows_node_errors() {
        let timeout = PipelineError::from(NodeError::Timeout {
            endpoint: "http://node".into(),
            timeout_ms: 10,
        });
        assert!(timeout.is_retryable());
        assert_eq!(timeout.category(), "node");

        assert!(!PipelineError::MissingAddress.is_retryable());
        assert_eq!(PipelineError::MissingAddress.category(), "precondition");
        assert!(!PipelineError::Signing("device locked".into()).is_retryable());

        let heavy = PipelineError::GasBudgetExceeded {
            total: 2_000_000,
            limit: 1_733_333,
        };
        assert!(!heavy.is_retryable());
        assert_eq!(heavy.category(), "precondition");
    }

    #[test]
    fn test_protocol_errors_become_rejections() {
        let mut stale = ProtocolError::new("temporary", "proto.alpha.contract.counter_in_the_past");
        stale.details.insert("expected".into(), serde_json::json!("5"));
        stale.details.insert("found".into(), serde_json::json!("4"));
        let refused = NodeError::Protocol {
            endpoint: "http://node".into(),
            errors: vec![stale.clone()],
        };
        let rejection = PipelineError::rejected_at("injection", refused);
        assert_eq!(rejection.rejection_ids(), vec!["proto.alpha.contract.counter_in_the_past"]);
        match rejection {
            PipelineError::ChainRejected { stage, errors } => {
                assert_eq!(stage, "injection");
                assert_eq!(errors, vec![stale]);
                assert_eq!(errors[0].details["expected"], "5");
            }
            other => panic!("unexpected {:?}", other),
        }

        let timeout = NodeError::Timeout {
            endpoint: "http://node".into(),
            timeout_ms: 10,
        };
        assert!(matches!(PipelineError::rejected_at("simulation", timeout), PipelineError::Node(_)));
    }
}
