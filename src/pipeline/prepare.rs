//! Turns intents into a branch-anchored, counter-assigned operation group
//!
//! Preparation resolves the batch principal, fills default limits from the
//! protocol constants, prepends a reveal when the principal's key is not on
//! chain yet, then assigns gapless counters per source.

use futures::future::try_join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::errors::PipelineError;
use crate::chain::ChainContext;
use crate::encoding::micheline::{sort_script_sections, storage_type};
use crate::encoding::{parse_expression, parse_script, Address, EncodingError, ImplicitKind, Micheline, PublicKey};
use crate::metrics::{metrics, Timer};
use crate::structured_logging::PipelineLogger;
use crate::types::{
    DelegationContent, IncreasePaidStorageContent, InitialStorage, Limits, ManagerFields, OperationContent,
    OperationIntent, OriginationContent, OriginationIntent, PreparedOperation, ProtocolConstants,
    RegisterGlobalConstantContent, ResolvedLimits, RevealContent, Script, ScriptCode,
    SmartRollupAddMessagesContent, SmartRollupExecuteOutboxMessageContent, SmartRollupOriginateContent,
    TransactionContent, TransferTicketContent,
};

/// Branch is taken two blocks behind head to survive short reorganisations
const BRANCH_BLOCK: &str = "head~2";

/// Bytes of an injected reveal, used to price it before simulation
pub const REVEAL_OP_SIZE_BYTES: u64 = 162;

/// Encodes a structured storage value against a Michelson type
///
/// Typed value encoding is left to the caller; originations that pass a
/// structured `storage` need one of these installed on the preparer.
pub trait StorageEncoder: Send + Sync {
    fn encode(&self, storage_type: &Micheline, value: &Value) -> Result<Micheline, EncodingError>;
}

#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    /// Batch principal; derived from the intents when absent
    pub address: Option<Address>,
    /// Key used for a synthesized reveal
    pub public_key: Option<PublicKey>,
}

impl PrepareOptions {
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn with_public_key(mut self, public_key: PublicKey) -> Self {
        self.public_key = Some(public_key);
        self
    }
}

#[derive(Clone)]
pub struct OperationPreparer {
    chain: Arc<ChainContext>,
    storage_encoder: Option<Arc<dyn StorageEncoder>>,
    logger: PipelineLogger,
}

impl OperationPreparer {
    pub fn new(chain: Arc<ChainContext>) -> Self {
        Self {
            chain,
            storage_encoder: None,
            logger: PipelineLogger::default(),
        }
    }

    pub fn with_storage_encoder(mut self, encoder: Arc<dyn StorageEncoder>) -> Self {
        self.storage_encoder = Some(encoder);
        self
    }

    pub fn with_logger(mut self, logger: PipelineLogger) -> Self {
        self.logger = logger;
        self
    }

    #[instrument(skip_all, fields(intents = intents.len()))]
    pub async fn prepare(
        &self,
        intents: &[OperationIntent],
        options: &PrepareOptions,
    ) -> Result<PreparedOperation, PipelineError> {
        let timer = Timer::new();
        let principal = resolve_principal(intents, options.address.as_ref())?;

        let constants = if intents.iter().any(OperationIntent::is_fee_bearing) {
            Some(self.chain.get_constants().await?)
        } else {
            None
        };
        let defaults = constants.as_ref().map(|c| default_limits(c, intents.len()));

        let reveal = self.synthesize_reveal(intents, &principal, options.public_key.as_ref()).await?;
        let revealed = reveal.is_some();

        let mut contents = Vec::with_capacity(intents.len() + 1);
        let mut overrides = Vec::with_capacity(intents.len() + 1);
        if let Some(reveal) = reveal {
            contents.push(reveal);
            overrides.push(Limits::default());
        }
        for index in reveals_first(intents) {
            let intent = &intents[index];
            let limits = intent.limits().copied().unwrap_or_default();
            if let Some(constants) = &constants {
                check_operation_caps(index, &limits, constants)?;
            }
            contents.push(self.build_content(index, intent, &principal, defaults.as_ref()).await?);
            overrides.push(limits);
        }

        let mut sources: Vec<Address> = vec![principal.clone()];
        for manager in contents.iter().filter_map(OperationContent::manager) {
            if !sources.contains(&manager.source) {
                sources.push(manager.source.clone());
            }
        }

        let (branch, protocols, head_counters) = futures::try_join!(
            self.chain.get_block_hash(BRANCH_BLOCK),
            self.chain.get_protocols(),
            try_join_all(sources.iter().map(|s| self.chain.get_contract_counter(s))),
        )?;

        let heads: HashMap<Address, u64> = sources.into_iter().zip(head_counters).collect();
        let counter = heads.get(&principal).copied().unwrap_or(0);
        assign_counters(&mut contents, &heads);

        let prepared = PreparedOperation {
            branch,
            protocol: protocols.protocol,
            contents,
            counter,
            overrides,
        };
        if let Some(constants) = &constants {
            prepared.check_gas_budget(constants)?;
        }

        metrics().operations_prepared.inc();
        if revealed {
            metrics().reveals_injected.inc();
        }
        timer.observe_duration(&metrics().prepare_latency);
        self.logger
            .log_prepared(&principal.to_string(), prepared.contents.len(), counter, revealed);

        Ok(prepared)
    }

    /// A reveal for the principal when the batch needs one and lacks it
    async fn synthesize_reveal(
        &self,
        intents: &[OperationIntent],
        principal: &Address,
        public_key: Option<&PublicKey>,
    ) -> Result<Option<OperationContent>, PipelineError> {
        let needs_revealed_sender = intents.iter().any(OperationIntent::requires_reveal);
        let has_reveal = intents.iter().any(|i| matches!(i, OperationIntent::Reveal(_)));
        if !needs_revealed_sender || has_reveal {
            return Ok(None);
        }
        if self.chain.get_manager_key(principal).await?.is_some() {
            return Ok(None);
        }

        let public_key = public_key.ok_or_else(|| PipelineError::MissingPublicKey {
            address: principal.to_string(),
        })?;
        if &public_key.address() != principal {
            return Err(PipelineError::invalid_intent(
                0,
                format!("public key {} does not control {}", public_key, principal),
            ));
        }

        debug!(address = %principal, "Prepending reveal");
        let gas_limit = reveal_gas_limit(public_key.kind());
        let limits = ResolvedLimits {
            fee: reveal_fee(public_key.kind()),
            gas_limit,
            storage_limit: 0,
        };
        Ok(Some(OperationContent::Reveal(RevealContent {
            manager: ManagerFields::new(principal.clone(), limits),
            public_key: public_key.clone(),
            proof: None,
        })))
    }

    async fn build_content(
        &self,
        index: usize,
        intent: &OperationIntent,
        principal: &Address,
        defaults: Option<&ResolvedLimits>,
    ) -> Result<OperationContent, PipelineError> {
        let manager = |source: &Option<Address>, limits: &Limits| -> Result<ManagerFields, PipelineError> {
            let defaults = defaults.ok_or_else(|| {
                PipelineError::Configuration("default limits missing for a manager operation".to_string())
            })?;
            let source = source.clone().unwrap_or_else(|| principal.clone());
            if !source.is_implicit() {
                return Err(PipelineError::invalid_intent(
                    index,
                    format!("source {} is not an implicit account", source),
                ));
            }
            Ok(ManagerFields::new(source, limits.merge(defaults)))
        };

        let content = match intent {
            OperationIntent::Reveal(i) => OperationContent::Reveal(RevealContent {
                manager: manager(&i.source, &i.limits)?,
                public_key: i.public_key.clone(),
                proof: i.proof.clone(),
            }),
            OperationIntent::Transaction(i) => OperationContent::Transaction(TransactionContent {
                manager: manager(&i.source, &i.limits)?,
                amount: i.amount,
                destination: i.destination.clone(),
                parameters: i.parameters.clone(),
            }),
            OperationIntent::Origination(i) => OperationContent::Origination(OriginationContent {
                manager: manager(&i.source, &i.limits)?,
                balance: i.balance,
                delegate: i.delegate.clone(),
                script: self.origination_script(index, i).await?,
            }),
            OperationIntent::Delegation(i) => OperationContent::Delegation(DelegationContent {
                manager: manager(&i.source, &i.limits)?,
                delegate: i.delegate.clone(),
            }),
            OperationIntent::RegisterGlobalConstant(i) => {
                OperationContent::RegisterGlobalConstant(RegisterGlobalConstantContent {
                    manager: manager(&i.source, &i.limits)?,
                    value: i.value.clone(),
                })
            }
            OperationIntent::IncreasePaidStorage(i) => {
                if !matches!(i.destination, Address::Originated(_)) {
                    return Err(PipelineError::invalid_intent(index, "destination must be a KT1 contract"));
                }
                OperationContent::IncreasePaidStorage(IncreasePaidStorageContent {
                    manager: manager(&i.source, &i.limits)?,
                    amount: i.amount,
                    destination: i.destination.clone(),
                })
            }
            OperationIntent::TransferTicket(i) => OperationContent::TransferTicket(TransferTicketContent {
                manager: manager(&i.source, &i.limits)?,
                ticket_contents: i.ticket_contents.clone(),
                ticket_ty: i.ticket_ty.clone(),
                ticket_ticketer: i.ticket_ticketer.clone(),
                ticket_amount: i.ticket_amount,
                destination: i.destination.clone(),
                entrypoint: i.entrypoint.clone(),
            }),
            OperationIntent::SmartRollupAddMessages(i) => {
                OperationContent::SmartRollupAddMessages(SmartRollupAddMessagesContent {
                    manager: manager(&i.source, &i.limits)?,
                    message: i.message.clone(),
                })
            }
            OperationIntent::SmartRollupOriginate(i) => {
                OperationContent::SmartRollupOriginate(SmartRollupOriginateContent {
                    manager: manager(&i.source, &i.limits)?,
                    pvm_kind: i.pvm_kind,
                    kernel: i.kernel.clone(),
                    parameters_ty: i.parameters_ty.clone(),
                    whitelist: i.whitelist.clone(),
                })
            }
            OperationIntent::SmartRollupExecuteOutboxMessage(i) => {
                if !matches!(i.rollup, Address::SmartRollup(_)) {
                    return Err(PipelineError::invalid_intent(index, "rollup must be an sr1 address"));
                }
                OperationContent::SmartRollupExecuteOutboxMessage(SmartRollupExecuteOutboxMessageContent {
                    manager: manager(&i.source, &i.limits)?,
                    rollup: i.rollup.clone(),
                    cemented_commitment: i.cemented_commitment.clone(),
                    output_proof: i.output_proof.clone(),
                })
            }
            OperationIntent::Activation(i) => OperationContent::Activation(i.clone()),
            OperationIntent::DrainDelegate(i) => OperationContent::DrainDelegate(i.clone()),
            OperationIntent::Ballot(i) => OperationContent::Ballot(i.clone()),
            OperationIntent::Proposals(i) => OperationContent::Proposals(i.clone()),
        };
        Ok(content)
    }

    /// Code in `parameter, storage, code` order plus the initial storage
    async fn origination_script(&self, index: usize, intent: &OriginationIntent) -> Result<Script, PipelineError> {
        let code = match &intent.code {
            ScriptCode::Michelson(text) => parse_script(text)?,
            ScriptCode::Micheline(sections) => sort_script_sections(sections.clone()),
        };

        let storage = match (&intent.init, &intent.storage) {
            (Some(InitialStorage::Michelson(text)), _) => parse_expression(text)?,
            (Some(InitialStorage::Micheline(value)), _) => value.clone(),
            (None, Some(value)) => {
                let ty = storage_type(&code)
                    .ok_or_else(|| PipelineError::invalid_intent(index, "script has no storage section"))?;
                let encoder = self.storage_encoder.as_ref().ok_or_else(|| {
                    PipelineError::invalid_intent(index, "structured storage given but no storage encoder is installed")
                })?;
                let ty = self.expand_global_constants(index, ty).await?;
                encoder.encode(&ty, value)?
            }
            (None, None) => {
                return Err(PipelineError::invalid_intent(index, "origination needs `init` or `storage`"))
            }
        };

        Ok(Script { code, storage })
    }

    async fn expand_global_constants(&self, index: usize, ty: &Micheline) -> Result<Micheline, PipelineError> {
        let hashes = ty.global_constants();
        if hashes.is_empty() {
            return Ok(ty.clone());
        }

        let mut values = HashMap::with_capacity(hashes.len());
        let mut pending = hashes;
        while let Some(hash) = pending.pop() {
            if values.contains_key(&hash) {
                continue;
            }
            let value = self
                .chain
                .get_global_constant(&hash)
                .await?
                .ok_or_else(|| PipelineError::invalid_intent(index, format!("unknown global constant {}", hash)))?;
            pending.extend(value.global_constants());
            values.insert(hash, value);
        }
        Ok(ty.expand_constants(&values)?)
    }
}

/// Explicit address, else the first intent that names one
pub fn resolve_principal(
    intents: &[OperationIntent],
    explicit: Option<&Address>,
) -> Result<Address, PipelineError> {
    explicit
        .or_else(|| intents.iter().find_map(OperationIntent::principal_candidate))
        .cloned()
        .ok_or(PipelineError::MissingAddress)
}

/// Batch defaults: no fee, the full storage allowance and an even share of
/// the block gas that never exceeds the per-operation cap
pub fn default_limits(constants: &ProtocolConstants, intents: usize) -> ResolvedLimits {
    let share = constants.hard_gas_limit_per_block / (intents as u64 + 1);
    ResolvedLimits {
        fee: 0,
        gas_limit: constants.hard_gas_limit_per_operation.min(share),
        storage_limit: constants.hard_storage_limit_per_operation,
    }
}

/// Intent indices with explicit reveals moved ahead of everything else
fn reveals_first(intents: &[OperationIntent]) -> Vec<usize> {
    let is_reveal = |i: &usize| matches!(intents[*i], OperationIntent::Reveal(_));
    let (mut order, rest): (Vec<usize>, Vec<usize>) = (0..intents.len()).partition(is_reveal);
    order.extend(rest);
    order
}

/// Caller-set limits may not exceed what one operation is allowed
pub fn check_operation_caps(
    index: usize,
    limits: &Limits,
    constants: &ProtocolConstants,
) -> Result<(), PipelineError> {
    if let Some(gas) = limits.gas_limit.filter(|g| *g > constants.hard_gas_limit_per_operation) {
        return Err(PipelineError::invalid_intent(
            index,
            format!(
                "gas limit {} exceeds the operation limit of {}",
                gas, constants.hard_gas_limit_per_operation
            ),
        ));
    }
    if let Some(storage) = limits
        .storage_limit
        .filter(|s| *s > constants.hard_storage_limit_per_operation)
    {
        return Err(PipelineError::invalid_intent(
            index,
            format!(
                "storage limit {} exceeds the operation limit of {}",
                storage, constants.hard_storage_limit_per_operation
            ),
        ));
    }
    Ok(())
}

impl PreparedOperation {
    /// The manager contents together must fit in one block's gas
    pub fn check_gas_budget(&self, constants: &ProtocolConstants) -> Result<(), PipelineError> {
        let total = self
            .contents
            .iter()
            .filter_map(OperationContent::manager)
            .fold(0u64, |sum, m| sum.saturating_add(m.gas_limit));
        if total > constants.hard_gas_limit_per_block {
            return Err(PipelineError::GasBudgetExceeded {
                total,
                limit: constants.hard_gas_limit_per_block,
            });
        }
        Ok(())
    }
}

/// Each manager content takes the next counter of its source
fn assign_counters(contents: &mut [OperationContent], heads: &HashMap<Address, u64>) {
    let mut next = heads.clone();
    for manager in contents.iter_mut().filter_map(OperationContent::manager_mut) {
        let counter = next.entry(manager.source.clone()).or_insert(0);
        *counter += 1;
        manager.counter = *counter;
    }
}

pub fn reveal_gas_limit(kind: ImplicitKind) -> u64 {
    match kind {
        ImplicitKind::Ed25519 => 566,
        ImplicitKind::Secp256k1 => 925,
        ImplicitKind::P256 => 3700,
        ImplicitKind::Bls => 7400,
    }
}

/// Minimal fee of a reveal: 100 mutez, 1 mutez per byte, 0.1 mutez per gas unit
pub fn reveal_fee(kind: ImplicitKind) -> u64 {
    100 + REVEAL_OP_SIZE_BYTES + reveal_gas_limit(kind).div_ceil(10)
}
