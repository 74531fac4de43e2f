//! End-to-end orchestration: prepare, estimate, forge, sign and inject

use std::sync::Arc;
use tracing::{info, instrument};

use super::errors::PipelineError;
use super::estimate::{Estimate, FeeEstimator};
use super::forge::{ForgedOperation, Forger};
use super::inject::{Injector, OperationSigner};
use super::prepare::{OperationPreparer, PrepareOptions, StorageEncoder};
use crate::chain::ChainContext;
use crate::config::{FeeConfig, PipelineConfig};
use crate::encoding::{to_expr, Address, BigMapKey, Micheline, PublicKey};
use crate::node_manager::{NodePool, NodeRpc};
use crate::observability::{CorrelationId, TraceContext};
use crate::structured_logging::PipelineLogger;
use crate::types::{tez_to_mutez, Limits, OperationIntent, PreparedOperation, TransactionIntent};

/// A transfer target with a decimal tez amount, e.g. `"1.5"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TezRecipient {
    pub to: Address,
    pub amount: String,
}

/// A priced, forged group ready for signing
#[derive(Debug, Clone)]
pub struct BuiltOperation {
    pub prepared: PreparedOperation,
    pub estimates: Vec<Estimate>,
    pub forged: ForgedOperation,
    /// Correlation id of the build, carried into the submission logs
    pub context_id: CorrelationId,
}

impl BuiltOperation {
    pub fn total_fee_mutez(&self) -> u64 {
        self.prepared
            .contents
            .iter()
            .filter_map(|c| c.manager())
            .map(|m| m.fee)
            .sum()
    }
}

/// Stage components bound to the trace of a single pipeline call
struct Stages {
    chain: Arc<ChainContext>,
    preparer: OperationPreparer,
    estimator: FeeEstimator,
    forger: Forger,
    injector: Injector,
    logger: PipelineLogger,
}

impl Stages {
    async fn prepare(
        &self,
        intents: &[OperationIntent],
        options: &PrepareOptions,
    ) -> Result<PreparedOperation, PipelineError> {
        self.preparer
            .prepare(intents, options)
            .await
            .inspect_err(|e| self.report("prepare", e))
    }

    async fn estimate(&self, prepared: &PreparedOperation) -> Result<Vec<Estimate>, PipelineError> {
        self.estimator
            .estimate(prepared)
            .await
            .inspect_err(|e| self.report("estimate", e))
    }

    #[instrument(skip_all, fields(context_id = %self.logger.context_id()))]
    async fn prepare_estimated(
        &self,
        intents: &[OperationIntent],
        options: &PrepareOptions,
    ) -> Result<(PreparedOperation, Vec<Estimate>), PipelineError> {
        let mut prepared = self.prepare(intents, options).await?;
        let estimates = self.estimate(&prepared).await?;
        prepared.apply_estimates(&estimates)?;
        let constants = self.chain.get_constants().await?;
        prepared
            .check_gas_budget(&constants)
            .inspect_err(|e| self.report("estimate", e))?;
        Ok((prepared, estimates))
    }

    async fn build(
        &self,
        intents: &[OperationIntent],
        options: &PrepareOptions,
    ) -> Result<BuiltOperation, PipelineError> {
        let (prepared, estimates) = self.prepare_estimated(intents, options).await?;
        let forged = self
            .forger
            .forge(&prepared)
            .inspect_err(|e| self.report("forge", e))?;
        Ok(BuiltOperation {
            prepared,
            estimates,
            forged,
            context_id: self.logger.context_id().clone(),
        })
    }

    async fn submit(&self, built: &BuiltOperation, signer: &dyn OperationSigner) -> Result<String, PipelineError> {
        self.injector.sign_and_inject(&built.forged, signer).await
    }

    fn report(&self, stage: &str, error: &PipelineError) {
        self.logger.log_failure(stage, &error.to_string(), error.category());
    }
}

pub struct OperationPipeline {
    chain: Arc<ChainContext>,
    preparer: OperationPreparer,
    estimator: FeeEstimator,
    injector: Injector,
}

impl OperationPipeline {
    pub fn new(rpc: Arc<dyn NodeRpc>, fees: FeeConfig) -> Self {
        Self::with_chain(Arc::new(ChainContext::new(rpc)), fees)
    }

    pub fn with_chain(chain: Arc<ChainContext>, fees: FeeConfig) -> Self {
        Self {
            preparer: OperationPreparer::new(chain.clone()),
            estimator: FeeEstimator::new(chain.clone(), fees),
            injector: Injector::new(chain.clone()),
            chain,
        }
    }

    /// Pipeline over a pool of the configured nodes
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config
            .validate()
            .map_err(|e| PipelineError::Configuration(e.to_string()))?;
        let pool = NodePool::from_config(&config.node)?;
        info!(endpoints = pool.len(), "Operation pipeline ready");
        Ok(Self::new(Arc::new(pool), config.fees))
    }

    pub fn with_storage_encoder(mut self, encoder: Arc<dyn StorageEncoder>) -> Self {
        self.preparer = self.preparer.with_storage_encoder(encoder);
        self
    }

    pub fn chain(&self) -> &Arc<ChainContext> {
        &self.chain
    }

    /// Stages for one call, all logging under `trace`
    fn stages(&self, trace: TraceContext) -> Stages {
        let logger = PipelineLogger::new(trace);
        Stages {
            chain: self.chain.clone(),
            preparer: self.preparer.clone().with_logger(logger.for_stage("prepare")),
            estimator: self.estimator.clone().with_logger(logger.for_stage("estimate")),
            forger: Forger::new(logger.for_stage("forge")),
            injector: self.injector.clone().with_logger(logger.for_stage("inject")),
            logger,
        }
    }

    pub async fn prepare(
        &self,
        intents: &[OperationIntent],
        options: &PrepareOptions,
    ) -> Result<PreparedOperation, PipelineError> {
        self.stages(TraceContext::new("prepare")).prepare(intents, options).await
    }

    pub async fn estimate(&self, prepared: &PreparedOperation) -> Result<Vec<Estimate>, PipelineError> {
        self.stages(TraceContext::new("estimate")).estimate(prepared).await
    }

    /// Prepare, estimate, and write the estimates back
    pub async fn prepare_estimated(
        &self,
        intents: &[OperationIntent],
        options: &PrepareOptions,
    ) -> Result<(PreparedOperation, Vec<Estimate>), PipelineError> {
        self.stages(TraceContext::new("prepare_estimated"))
            .prepare_estimated(intents, options)
            .await
    }

    /// Prepare, price and forge; the result only needs a signature
    pub async fn build(
        &self,
        intents: &[OperationIntent],
        options: &PrepareOptions,
    ) -> Result<BuiltOperation, PipelineError> {
        self.stages(TraceContext::new("build")).build(intents, options).await
    }

    pub async fn inject(&self, forged_hex: &str, signature_hex: &str) -> Result<String, PipelineError> {
        self.stages(TraceContext::new("inject"))
            .injector
            .inject(forged_hex, signature_hex)
            .await
    }

    /// Sign a built group and inject it under the build's correlation id
    pub async fn submit(&self, built: &BuiltOperation, signer: &dyn OperationSigner) -> Result<String, PipelineError> {
        self.stages(TraceContext::resume("submit", built.context_id.clone()))
            .submit(built, signer)
            .await
    }

    /// Build, sign with `signer` and inject; the signer's key also serves a
    /// reveal when one is needed
    pub async fn send(
        &self,
        intents: &[OperationIntent],
        signer: &dyn OperationSigner,
    ) -> Result<String, PipelineError> {
        let options = PrepareOptions::default()
            .with_address(signer.address())
            .with_public_key(signer.public_key());
        let stages = self.stages(TraceContext::new("send"));
        let built = stages.build(intents, &options).await?;
        stages.submit(&built, signer).await
    }

    /// Estimated transfers from `source` to each recipient
    pub async fn create_transaction(
        &self,
        source: &Address,
        recipients: &[TezRecipient],
        public_key: Option<PublicKey>,
    ) -> Result<PreparedOperation, PipelineError> {
        let intents = recipients
            .iter()
            .enumerate()
            .map(|(index, recipient)| {
                let amount = tez_to_mutez(&recipient.amount)
                    .map_err(|e| PipelineError::invalid_intent(index, e.to_string()))?;
                Ok(OperationIntent::Transaction(TransactionIntent {
                    source: Some(source.clone()),
                    destination: recipient.to.clone(),
                    amount,
                    parameters: None,
                    limits: Limits::default(),
                }))
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;

        let options = PrepareOptions {
            address: Some(source.clone()),
            public_key,
        };
        let (prepared, _) = self
            .stages(TraceContext::new("create_transaction"))
            .prepare_estimated(&intents, &options)
            .await?;
        Ok(prepared)
    }

    /// Value stored under `key` in big map `id`
    pub async fn big_map_value(&self, id: u64, key: &BigMapKey) -> Result<Option<Micheline>, PipelineError> {
        let hash = to_expr(key)?;
        Ok(self.chain.get_big_map_value(id, &hash).await?)
    }
}
