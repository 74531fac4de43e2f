//! Correlation ids, trace context and subscriber setup

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::LoggingConfig;

/// Correlation ID for tracking one batch across prepare, estimate, forge and inject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Trace and span identifiers for one pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub correlation_id: CorrelationId,
    pub parent_span_id: Option<String>,
    /// Stage name, e.g. `prepare` or `inject`
    pub operation: String,
}

impl TraceContext {
    pub fn new(operation: &str) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            span_id: Uuid::new_v4().to_string(),
            correlation_id: CorrelationId::new(),
            parent_span_id: None,
            operation: operation.to_string(),
        }
    }

    /// Fresh trace that keeps an existing correlation id
    pub fn resume(operation: &str, correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            ..Self::new(operation)
        }
    }

    /// Child span sharing trace and correlation ids
    pub fn child_span(&self, operation: &str) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            correlation_id: self.correlation_id.clone(),
            parent_span_id: Some(self.span_id.clone()),
            operation: operation.to_string(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new("pipeline")
    }
}

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Calling this twice
/// is harmless; the second call reports an error and leaves the first
/// subscriber in place.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_span_keeps_trace_and_correlation() {
        let root = TraceContext::new("build");
        let child = root.child_span("estimate");
        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.correlation_id(), root.correlation_id());
        assert_eq!(child.parent_span_id.as_deref(), Some(root.span_id.as_str()));
        assert_ne!(child.span_id, root.span_id);
        assert_eq!(child.operation, "estimate");
    }

    #[test]
    fn test_resume_keeps_only_the_correlation() {
        let build = TraceContext::new("build");
        let submit = TraceContext::resume("submit", build.correlation_id().clone());
        assert_eq!(submit.correlation_id(), build.correlation_id());
        assert_ne!(submit.trace_id, build.trace_id);
        assert!(submit.parent_span_id.is_none());
        assert_ne!(TraceContext::new("build").correlation_id(), build.correlation_id());
    }

    #[test]
    fn test_correlation_id_conversions() {
        let id = CorrelationId::from("batch-1");
        assert_eq!(id.as_str(), "batch-1");
        assert_eq!(id.to_string(), "batch-1");
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }
}
