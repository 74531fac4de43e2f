//! Gas, storage and fee estimation from a node simulation
//!
//! The group is dry-forged to learn its size, then simulated with a stub
//! signature. Consumed gas and storage are read off every operation result
//! and its internal results, buffered, and priced with the node's
//! minimal-fee formula.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{instrument, warn};

use super::errors::PipelineError;
use super::forge::forge_operation;
use crate::chain::ChainContext;
use crate::config::FeeConfig;
use crate::metrics::{metrics, Timer};
use crate::node_manager::ProtocolError;
use crate::structured_logging::PipelineLogger;
use crate::types::{OperationContent, OperationKind, PreparedOperation, ProtocolConstants};

/// Well-formed signature the node accepts on a simulated group
pub const SIMULATION_SIGNATURE: &str =
    "edsigtkpiSSschcaCt9pUVrpNPf7TTcgvgDEDD6NCEHMy8NNQJCGnMfLZzYoQj74yLjo9wx6MPVV29CvVzgi7qEcEUok3k7AuMg";

/// Byte size attributed to one content: `total_bytes / share`, kept exact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpSize {
    pub total_bytes: u64,
    pub share: u64,
}

impl OpSize {
    pub fn new(total_bytes: u64, share: u64) -> Self {
        Self {
            total_bytes,
            share: share.max(1),
        }
    }

    /// Whole bytes, rounded up
    pub fn bytes(&self) -> u64 {
        self.total_bytes.div_ceil(self.share)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstimateProperties {
    pub milligas_limit: u64,
    pub storage_limit: u64,
    pub op_size: OpSize,
    pub minimal_fee_per_storage_byte_mutez: u64,
    /// Fixed fee; set to zero for operations that pay none
    pub base_fee_mutez: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    pub gas_limit: u64,
    pub storage_limit: u64,
    pub suggested_fee_mutez: u64,
    /// Storage burn, paid on top of the fee
    pub burn_fee_mutez: u64,
    pub op_size: OpSize,
}

impl Estimate {
    pub fn from_properties(properties: &EstimateProperties, fees: &FeeConfig) -> Self {
        let gas_limit = properties.milligas_limit.div_ceil(1000);
        let suggested_fee_mutez = match properties.base_fee_mutez {
            Some(base) => base,
            None => minimal_fee_mutez(gas_limit, properties.op_size, fees),
        };
        Self {
            gas_limit,
            storage_limit: properties.storage_limit,
            suggested_fee_mutez,
            burn_fee_mutez: properties
                .minimal_fee_per_storage_byte_mutez
                .saturating_mul(properties.storage_limit),
            op_size: properties.op_size,
        }
    }

    pub fn total_cost_mutez(&self) -> u64 {
        self.suggested_fee_mutez.saturating_add(self.burn_fee_mutez)
    }
}

/// `ceil(minimal + bytes * per_byte + gas * per_gas) + margin`, in nanotez
/// until the final rounding
pub fn minimal_fee_mutez(gas_limit: u64, op_size: OpSize, fees: &FeeConfig) -> u64 {
    let share = u128::from(op_size.share);
    let numerator = u128::from(fees.minimal_fee_mutez) * 1000 * share
        + u128::from(op_size.total_bytes) * u128::from(fees.fee_per_byte_nanotez)
        + u128::from(gas_limit) * u128::from(fees.fee_per_gas_nanotez) * share;
    let fee = numerator.div_ceil(1000 * share);
    u64::try_from(fee)
        .unwrap_or(u64::MAX)
        .saturating_add(fees.fee_margin_mutez)
}

#[derive(Clone)]
pub struct FeeEstimator {
    chain: Arc<ChainContext>,
    fees: FeeConfig,
    logger: PipelineLogger,
}

impl FeeEstimator {
    pub fn new(chain: Arc<ChainContext>, fees: FeeConfig) -> Self {
        Self {
            chain,
            fees,
            logger: PipelineLogger::default(),
        }
    }

    pub fn with_logger(mut self, logger: PipelineLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn fees(&self) -> &FeeConfig {
        &self.fees
    }

    /// One estimate per content, in order
    #[instrument(skip_all, fields(contents = prepared.contents.len()))]
    pub async fn estimate(&self, prepared: &PreparedOperation) -> Result<Vec<Estimate>, PipelineError> {
        let properties = self.estimate_properties(prepared).await?;
        let estimates: Vec<Estimate> = properties
            .iter()
            .map(|p| Estimate::from_properties(p, &self.fees))
            .collect();

        self.logger.log_estimated(
            estimates.iter().map(|e| e.gas_limit).sum(),
            estimates.iter().map(|e| e.storage_limit).sum(),
            estimates.iter().map(|e| e.suggested_fee_mutez).sum(),
        );
        Ok(estimates)
    }

    pub async fn estimate_properties(
        &self,
        prepared: &PreparedOperation,
    ) -> Result<Vec<EstimateProperties>, PipelineError> {
        let timer = Timer::new();
        metrics().estimations.inc();

        let forged = forge_operation(&prepared.branch, &prepared.contents)?;
        let (constants, chain_id) = futures::try_join!(self.chain.get_constants(), self.chain.get_chain_id())?;

        let body = json!({
            "operation": {
                "branch": prepared.branch,
                "contents": prepared.contents,
                "signature": SIMULATION_SIGNATURE,
            },
            "chain_id": chain_id,
        });
        let result = match self.chain.simulate_operation(&body).await {
            Ok(response) => {
                properties_from_simulation(&prepared.contents, &response, forged.len() * 2, &constants, &self.fees)
            }
            Err(e) => Err(PipelineError::rejected_at("simulation", e)),
        };
        if let Err(PipelineError::ChainRejected { errors, .. }) = &result {
            metrics().simulation_rejections.inc();
            let ids: Vec<&str> = errors.iter().map(|e| e.id.as_str()).collect();
            warn!(errors = ?ids, "Simulation rejected the operation group");
        }
        timer.observe_duration(&metrics().estimate_latency);
        result
    }
}

/// Estimate properties for every content from a `simulate_operation` reply
pub fn properties_from_simulation(
    contents: &[OperationContent],
    response: &Value,
    forged_hex_len: usize,
    constants: &ProtocolConstants,
    fees: &FeeConfig,
) -> Result<Vec<EstimateProperties>, PipelineError> {
    let results = response
        .get("contents")
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::Estimation("simulation reply has no contents".to_string()))?;
    if results.len() != contents.len() {
        return Err(PipelineError::Estimation(format!(
            "simulation returned {} results for {} contents",
            results.len(),
            contents.len()
        )));
    }

    let rejected = rejection_errors(results);
    if !rejected.is_empty() {
        return Err(PipelineError::ChainRejected {
            stage: "simulation",
            errors: rejected,
        });
    }

    let first_is_reveal = contents.first().map(|c| c.kind()) == Some(OperationKind::Reveal);
    let operations = if first_is_reveal && contents.len() > 1 {
        contents.len() - 1
    } else {
        contents.len()
    };
    let group_size = OpSize::new((forged_hex_len as u64 + fees.op_size_buffer_hex) / 2, operations as u64);
    let reveal_size = OpSize::new(fees.reveal_op_size_hex / 2, 1);

    Ok(contents
        .iter()
        .zip(results)
        .map(|(content, result)| {
            let op_size = if content.kind() == OperationKind::Reveal {
                reveal_size
            } else {
                group_size
            };
            content_properties(content, result, op_size, constants, fees)
        })
        .collect())
}

fn content_properties(
    content: &OperationContent,
    result: &Value,
    op_size: OpSize,
    constants: &ProtocolConstants,
    fees: &FeeConfig,
) -> EstimateProperties {
    let mut properties = EstimateProperties {
        milligas_limit: 0,
        storage_limit: 0,
        op_size,
        minimal_fee_per_storage_byte_mutez: constants.cost_per_byte,
        base_fee_mutez: None,
    };

    if !content.kind().is_fee_bearing() {
        properties.base_fee_mutez = Some(0);
        return properties;
    }

    for operation_result in flatten_results(result) {
        properties.milligas_limit += number(operation_result, "consumed_milligas");
        properties.storage_limit += consumed_storage(operation_result, constants.origination_size);
    }

    if content.kind().needs_gas_buffer() || content.has_parameters() {
        properties.milligas_limit += fees.milligas_buffer;
    }
    if properties.storage_limit > 0 {
        properties.storage_limit += fees.storage_buffer;
    }

    // Buffers never push a content past what the protocol accepts
    properties.milligas_limit = properties
        .milligas_limit
        .min(constants.hard_gas_limit_per_operation.saturating_mul(1000));
    properties.storage_limit = properties.storage_limit.min(constants.hard_storage_limit_per_operation);
    properties
}

/// The content's own result followed by its internal results, for contents
/// that carry a fee
fn flatten_results(result: &Value) -> Vec<&Value> {
    let mut flattened = Vec::new();
    if result.get("fee").is_none() {
        return flattened;
    }
    let Some(metadata) = result.get("metadata") else {
        return flattened;
    };
    if let Some(operation_result) = metadata.get("operation_result") {
        flattened.push(operation_result);
    }
    if let Some(internal) = metadata.get("internal_operation_results").and_then(Value::as_array) {
        flattened.extend(internal.iter().filter_map(|i| i.get("result")));
    }
    flattened
}

fn consumed_storage(result: &Value, origination_size: u64) -> u64 {
    let mut storage = 0;
    if result.get("allocated_destination_contract").is_some() {
        storage += origination_size;
    }
    if let Some(originated) = result.get("originated_contracts").and_then(Value::as_array) {
        storage += originated.len() as u64 * origination_size;
    }
    if result.get("global_address").is_some() {
        storage += number(result, "storage_size");
    }
    storage += number(result, "paid_storage_size_diff");
    if result.get("genesis_commitment_hash").is_some() {
        storage += number(result, "size");
    }
    storage
}

/// Protocol errors of every result that was not applied, in reply order
///
/// Records repeated across results are kept once. A failed result that
/// reports no errors is described by its kind and status.
fn rejection_errors(results: &[Value]) -> Vec<ProtocolError> {
    let mut errors: Vec<ProtocolError> = Vec::new();
    for result in results {
        for operation_result in flatten_results(result) {
            let status = operation_result.get("status").and_then(Value::as_str).unwrap_or("applied");
            if status == "applied" {
                continue;
            }
            let reported: Vec<ProtocolError> = operation_result
                .get("errors")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(|e| serde_json::from_value(e.clone()).ok())
                        .collect()
                })
                .unwrap_or_default();
            if reported.is_empty() && status != "skipped" {
                let kind = result.get("kind").and_then(Value::as_str).unwrap_or("operation");
                errors.push(ProtocolError::new(status, format!("{} {}", kind, status)));
            }
            for error in reported {
                if !errors.contains(&error) {
                    errors.push(error);
                }
            }
        }
    }
    errors
}

/// Numeric field sent as a decimal string or a JSON number; absent is zero
fn number(value: &Value, key: &str) -> u64 {
    match value.get(key) {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        _ => 0,
    }
}

impl PreparedOperation {
    /// Write estimated limits back into the contents; limits the caller set
    /// explicitly are kept
    pub fn apply_estimates(&mut self, estimates: &[Estimate]) -> Result<(), PipelineError> {
        if estimates.len() != self.contents.len() {
            return Err(PipelineError::Estimation(format!(
                "{} estimates for {} contents",
                estimates.len(),
                self.contents.len()
            )));
        }
        let overrides: Vec<_> = (0..self.contents.len()).map(|i| self.overrides_for(i)).collect();
        for ((content, estimate), user) in self.contents.iter_mut().zip(estimates).zip(overrides) {
            if let Some(manager) = content.manager_mut() {
                manager.fee = user.fee.unwrap_or(estimate.suggested_fee_mutez);
                manager.gas_limit = user.gas_limit.unwrap_or(estimate.gas_limit);
                manager.storage_limit = user.storage_limit.unwrap_or(estimate.storage_limit);
            }
        }
        Ok(())
    }
}
