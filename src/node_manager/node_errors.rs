use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One entry of the error array a Tezos node returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub kind: String,
    pub id: String,
    #[serde(flatten)]
    pub details: serde_json::Map<String, Value>,
}

impl ProtocolError {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            details: serde_json::Map::new(),
        }
    }
}

pub(crate) fn summarize(errors: &[ProtocolError]) -> String {
    errors
        .iter()
        .map(|e| e.id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised while talking to a Tezos node
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    /// Network-level failure (connection refused, reset, TLS)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// Non-success status whose body is not a protocol error array
    #[error("HTTP {status} from {endpoint}: {body}")]
    HttpStatus {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The node answered with a structured protocol error array
    #[error("Node rejected request at {endpoint}: {}", summarize(.errors))]
    Protocol {
        endpoint: String,
        errors: Vec<ProtocolError>,
    },

    #[error("Failed to decode response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },

    #[error("No healthy endpoints available (total: {total}, cooling down: {cooling_down})")]
    NoHealthyEndpoints { total: usize, cooling_down: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl NodeError {
    pub fn is_retryable(&self) -> bool {
        match self {
            NodeError::Transport { .. } => true,
            NodeError::Timeout { .. } => true,
            NodeError::NoHealthyEndpoints { .. } => true,
            NodeError::HttpStatus { status, .. } => *status == 429 || (500..600).contains(status),
            NodeError::Protocol { .. } => false,
            NodeError::Decode { .. } => false,
            NodeError::Configuration(_) => false,
        }
    }

    /// Whether the failure says something about the endpoint rather than the request
    pub fn counts_against_endpoint(&self) -> bool {
        match self {
            NodeError::Transport { .. } | NodeError::Timeout { .. } => true,
            NodeError::HttpStatus { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            NodeError::Transport { endpoint, .. }
            | NodeError::Timeout { endpoint, .. }
            | NodeError::HttpStatus { endpoint, .. }
            | NodeError::Protocol { endpoint, .. }
            | NodeError::Decode { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }

    /// Protocol error ids, empty for any other failure
    pub fn protocol_error_ids(&self) -> Vec<&str> {
        match self {
            NodeError::Protocol { errors, .. } => errors.iter().map(|e| e.id.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    pub fn from_reqwest(err: reqwest::Error, endpoint: &str, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            NodeError::Timeout {
                endpoint: endpoint.to_string(),
                timeout_ms,
            }
        } else if err.is_decode() {
            NodeError::Decode {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        } else {
            NodeError::Transport {
                endpoint: endpoint.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// A node error body is a non-empty array whose every element is a record
/// with string `id` and `kind` fields
pub fn detect_protocol_errors(body: &Value) -> Option<Vec<ProtocolError>> {
    let items = body.as_array()?;
    if items.is_empty() {
        return None;
    }
    let looks_like_error = |item: &Value| {
        item.get("id").map_or(false, Value::is_string)
            && item.get("kind").map_or(false, Value::is_string)
    };
    if !items.iter().all(looks_like_error) {
        return None;
    }
    items
        .iter()
        .map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detects_protocol_error_array() {
        let body = json!([
            {"kind": "temporary", "id": "proto.alpha.contract.counter_in_the_past", "expected": "5", "found": "4"},
            {"kind": "permanent", "id": "proto.alpha.gas_exhausted.operation"}
        ]);
        let errors = detect_protocol_errors(&body).unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].kind, "temporary");
        assert_eq!(errors[0].details["expected"], "5");
    }

    #[test]
    fn test_ignores_regular_arrays() {
        assert!(detect_protocol_errors(&json!([])).is_none());
        assert!(detect_protocol_errors(&json!([{"prim": "Pair"}])).is_none());
        assert!(detect_protocol_errors(&json!([{"kind": "x", "id": 5}])).is_none());
        assert!(detect_protocol_errors(&json!({"kind": "x", "id": "y"})).is_none());
    }

    #[test]
    fn test_retry_classification() {
        let timeout = NodeError::Timeout {
            endpoint: "http://a".into(),
            timeout_ms: 100,
        };
        assert!(timeout.is_retryable());
        assert!(timeout.counts_against_endpoint());

        let rejected = NodeError::Protocol {
            endpoint: "http://a".into(),
            errors: vec![],
        };
        assert!(!rejected.is_retryable());
        assert!(!rejected.counts_against_endpoint());
        assert_eq!(rejected.endpoint(), Some("http://a"));

        let throttled = NodeError::HttpStatus {
            endpoint: "http://a".into(),
            status: 429,
            body: String::new(),
        };
        assert!(throttled.is_retryable());
        assert!(!throttled.counts_against_endpoint());
    }
}
