//! Structured log events for pipeline stages

use crate::observability::{CorrelationId, TraceContext};

/// Emits pipeline events tagged with the batch's correlation id and the
/// stage's span
#[derive(Debug, Clone)]
pub struct PipelineLogger {
    trace: TraceContext,
}

impl PipelineLogger {
    pub fn new(trace: TraceContext) -> Self {
        Self { trace }
    }

    /// Logger for one stage, a child span of this one
    pub fn for_stage(&self, stage: &str) -> Self {
        Self::new(self.trace.child_span(stage))
    }

    pub fn context_id(&self) -> &CorrelationId {
        self.trace.correlation_id()
    }

    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }

    pub fn log_prepared(&self, principal: &str, contents: usize, counter: u64, reveal: bool) {
        tracing::info!(
            context_id = %self.trace.correlation_id,
            span_id = %self.trace.span_id,
            principal = %principal,
            contents = %contents,
            head_counter = %counter,
            reveal_injected = %reveal,
            "Operation group prepared"
        );
    }

    pub fn log_estimated(&self, gas_total: u64, storage_total: u64, fee_total: u64) {
        tracing::info!(
            context_id = %self.trace.correlation_id,
            span_id = %self.trace.span_id,
            gas_total = %gas_total,
            storage_total = %storage_total,
            fee_total_mutez = %fee_total,
            "Operation group estimated"
        );
    }

    pub fn log_forged(&self, bytes: usize, digest: &str) {
        tracing::debug!(
            context_id = %self.trace.correlation_id,
            span_id = %self.trace.span_id,
            bytes = %bytes,
            digest = %digest,
            "Operation group forged"
        );
    }

    pub fn log_injected(&self, hash: &str, latency_ms: u64) {
        tracing::info!(
            context_id = %self.trace.correlation_id,
            span_id = %self.trace.span_id,
            operation_hash = %hash,
            latency_ms = %latency_ms,
            "Operation injected"
        );
    }

    pub fn log_failure(&self, stage: &str, error: &str, category: &str) {
        tracing::warn!(
            context_id = %self.trace.correlation_id,
            span_id = %self.trace.span_id,
            stage = %stage,
            category = %category,
            error = %error,
            "Pipeline stage failed"
        );
    }
}

impl Default for PipelineLogger {
    fn default() -> Self {
        Self::new(TraceContext::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_loggers_share_the_correlation_id() {
        let root = PipelineLogger::new(TraceContext::new("pipeline"));
        let forge = root.for_stage("forge");
        assert_eq!(forge.context_id(), root.context_id());
        assert_eq!(forge.trace().operation, "forge");
        assert_eq!(forge.trace().parent_span_id.as_deref(), Some(root.trace().span_id.as_str()));
    }
}
