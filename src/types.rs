//! Domain types shared across the pipeline
//!
//! Intents are what callers ask for; contents are the wire records the node
//! simulates and the forger serializes. Every numeric field of a content is
//! a decimal string on the wire.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::encoding::{Address, EncodingError, Micheline, PublicKey};

/// Operation kinds understood by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Reveal,
    Transaction,
    Origination,
    Delegation,
    RegisterGlobalConstant,
    IncreasePaidStorage,
    TransferTicket,
    SmartRollupAddMessages,
    SmartRollupOriginate,
    SmartRollupExecuteOutboxMessage,
    #[serde(rename = "activate_account")]
    Activation,
    DrainDelegate,
    Ballot,
    Proposals,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Reveal => "reveal",
            OperationKind::Transaction => "transaction",
            OperationKind::Origination => "origination",
            OperationKind::Delegation => "delegation",
            OperationKind::RegisterGlobalConstant => "register_global_constant",
            OperationKind::IncreasePaidStorage => "increase_paid_storage",
            OperationKind::TransferTicket => "transfer_ticket",
            OperationKind::SmartRollupAddMessages => "smart_rollup_add_messages",
            OperationKind::SmartRollupOriginate => "smart_rollup_originate",
            OperationKind::SmartRollupExecuteOutboxMessage => "smart_rollup_execute_outbox_message",
            OperationKind::Activation => "activate_account",
            OperationKind::DrainDelegate => "drain_delegate",
            OperationKind::Ballot => "ballot",
            OperationKind::Proposals => "proposals",
        }
    }

    /// Binary tag of the operation in a forged group
    pub fn tag(&self) -> u8 {
        match self {
            OperationKind::Activation => 4,
            OperationKind::Proposals => 5,
            OperationKind::Ballot => 6,
            OperationKind::DrainDelegate => 9,
            OperationKind::Reveal => 107,
            OperationKind::Transaction => 108,
            OperationKind::Origination => 109,
            OperationKind::Delegation => 110,
            OperationKind::RegisterGlobalConstant => 111,
            OperationKind::IncreasePaidStorage => 113,
            OperationKind::TransferTicket => 158,
            OperationKind::SmartRollupOriginate => 200,
            OperationKind::SmartRollupAddMessages => 201,
            OperationKind::SmartRollupExecuteOutboxMessage => 206,
        }
    }

    /// Manager operations: carry fee, counter, gas and storage limits
    pub fn is_fee_bearing(&self) -> bool {
        !matches!(
            self,
            OperationKind::Activation
                | OperationKind::DrainDelegate
                | OperationKind::Ballot
                | OperationKind::Proposals
        )
    }

    /// Operations the node refuses from a source whose key is not revealed
    pub fn requires_reveal(&self) -> bool {
        self.is_fee_bearing() && *self != OperationKind::Reveal
    }

    /// Kinds whose simulated gas gets extra headroom regardless of parameters
    pub fn needs_gas_buffer(&self) -> bool {
        matches!(
            self,
            OperationKind::Origination
                | OperationKind::RegisterGlobalConstant
                | OperationKind::TransferTicket
                | OperationKind::SmartRollupAddMessages
                | OperationKind::SmartRollupOriginate
                | OperationKind::SmartRollupExecuteOutboxMessage
        )
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-supplied limits; any missing value is filled from batch defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_limit: Option<u64>,
}

impl Limits {
    /// User value wins whenever present
    pub fn merge(&self, defaults: &ResolvedLimits) -> ResolvedLimits {
        ResolvedLimits {
            fee: self.fee.unwrap_or(defaults.fee),
            gas_limit: self.gas_limit.unwrap_or(defaults.gas_limit),
            storage_limit: self.storage_limit.unwrap_or(defaults.storage_limit),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fee.is_none() && self.gas_limit.is_none() && self.storage_limit.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLimits {
    pub fee: u64,
    pub gas_limit: u64,
    pub storage_limit: u64,
}

/// Contract call parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionParameters {
    pub entrypoint: String,
    pub value: Micheline,
}

/// Contract code as Michelson text or as JSON sections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptCode {
    Michelson(String),
    Micheline(Vec<Micheline>),
}

/// Already-encoded initial storage, as Michelson text or JSON Micheline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InitialStorage {
    Michelson(String),
    Micheline(Micheline),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PvmKind {
    Arith,
    Wasm200,
    Riscv,
}

impl PvmKind {
    pub fn tag(&self) -> u8 {
        match self {
            PvmKind::Arith => 0,
            PvmKind::Wasm200 => 1,
            PvmKind::Riscv => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallotVote {
    Yay,
    Nay,
    Pass,
}

impl BallotVote {
    pub fn tag(&self) -> u8 {
        match self {
            BallotVote::Yay => 0,
            BallotVote::Nay => 1,
            BallotVote::Pass => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Intents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevealIntent {
    #[serde(default)]
    pub source: Option<Address>,
    pub public_key: PublicKey,
    /// Proof of possession, required for BLS keys
    #[serde(default)]
    pub proof: Option<String>,
    #[serde(flatten)]
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionIntent {
    #[serde(default)]
    pub source: Option<Address>,
    pub destination: Address,
    /// Mutez
    pub amount: u64,
    #[serde(default)]
    pub parameters: Option<TransactionParameters>,
    #[serde(flatten)]
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginationIntent {
    #[serde(default)]
    pub source: Option<Address>,
    /// Mutez
    #[serde(default)]
    pub balance: u64,
    #[serde(default)]
    pub delegate: Option<Address>,
    pub code: ScriptCode,
    /// Pre-encoded storage; takes precedence over `storage`
    #[serde(default)]
    pub init: Option<InitialStorage>,
    /// Structured storage value, encoded against the storage type
    #[serde(default)]
    pub storage: Option<serde_json::Value>,
    #[serde(flatten)]
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationIntent {
    #[serde(default)]
    pub source: Option<Address>,
    /// `None` withdraws the delegation
    #[serde(default)]
    pub delegate: Option<Address>,
    #[serde(flatten)]
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterGlobalConstantIntent {
    #[serde(default)]
    pub source: Option<Address>,
    pub value: Micheline,
    #[serde(flatten)]
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncreasePaidStorageIntent {
    #[serde(default)]
    pub source: Option<Address>,
    /// Bytes of storage to pay for
    pub amount: u64,
    pub destination: Address,
    #[serde(flatten)]
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferTicketIntent {
    #[serde(default)]
    pub source: Option<Address>,
    pub ticket_contents: Micheline,
    pub ticket_ty: Micheline,
    pub ticket_ticketer: Address,
    pub ticket_amount: u128,
    pub destination: Address,
    pub entrypoint: String,
    #[serde(flatten)]
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartRollupAddMessagesIntent {
    #[serde(default)]
    pub source: Option<Address>,
    /// Hex-encoded messages
    pub message: Vec<String>,
    #[serde(flatten)]
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartRollupOriginateIntent {
    #[serde(default)]
    pub source: Option<Address>,
    pub pvm_kind: PvmKind,
    /// Hex-encoded kernel
    pub kernel: String,
    pub parameters_ty: Micheline,
    #[serde(default)]
    pub whitelist: Option<Vec<Address>>,
    #[serde(flatten)]
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartRollupExecuteOutboxMessageIntent {
    #[serde(default)]
    pub source: Option<Address>,
    pub rollup: Address,
    /// `src1...` commitment hash
    pub cemented_commitment: String,
    /// Hex-encoded proof
    pub output_proof: String,
    #[serde(flatten)]
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationIntent {
    pub pkh: Address,
    /// Hex-encoded 20-byte activation secret
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainDelegateIntent {
    pub consensus_key: Address,
    pub delegate: Address,
    pub destination: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotIntent {
    pub source: Address,
    pub period: i32,
    pub proposal: String,
    pub ballot: BallotVote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalsIntent {
    pub source: Address,
    pub period: i32,
    pub proposals: Vec<String>,
}

/// A high-level operation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationIntent {
    Reveal(RevealIntent),
    Transaction(TransactionIntent),
    Origination(OriginationIntent),
    Delegation(DelegationIntent),
    RegisterGlobalConstant(RegisterGlobalConstantIntent),
    IncreasePaidStorage(IncreasePaidStorageIntent),
    TransferTicket(TransferTicketIntent),
    SmartRollupAddMessages(SmartRollupAddMessagesIntent),
    SmartRollupOriginate(SmartRollupOriginateIntent),
    SmartRollupExecuteOutboxMessage(SmartRollupExecuteOutboxMessageIntent),
    #[serde(rename = "activate_account")]
    Activation(ActivationIntent),
    DrainDelegate(DrainDelegateIntent),
    Ballot(BallotIntent),
    Proposals(ProposalsIntent),
}

impl OperationIntent {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationIntent::Reveal(_) => OperationKind::Reveal,
            OperationIntent::Transaction(_) => OperationKind::Transaction,
            OperationIntent::Origination(_) => OperationKind::Origination,
            OperationIntent::Delegation(_) => OperationKind::Delegation,
            OperationIntent::RegisterGlobalConstant(_) => OperationKind::RegisterGlobalConstant,
            OperationIntent::IncreasePaidStorage(_) => OperationKind::IncreasePaidStorage,
            OperationIntent::TransferTicket(_) => OperationKind::TransferTicket,
            OperationIntent::SmartRollupAddMessages(_) => OperationKind::SmartRollupAddMessages,
            OperationIntent::SmartRollupOriginate(_) => OperationKind::SmartRollupOriginate,
            OperationIntent::SmartRollupExecuteOutboxMessage(_) => {
                OperationKind::SmartRollupExecuteOutboxMessage
            }
            OperationIntent::Activation(_) => OperationKind::Activation,
            OperationIntent::DrainDelegate(_) => OperationKind::DrainDelegate,
            OperationIntent::Ballot(_) => OperationKind::Ballot,
            OperationIntent::Proposals(_) => OperationKind::Proposals,
        }
    }

    /// Explicit source of the operation, if any
    pub fn source(&self) -> Option<&Address> {
        match self {
            OperationIntent::Reveal(i) => i.source.as_ref(),
            OperationIntent::Transaction(i) => i.source.as_ref(),
            OperationIntent::Origination(i) => i.source.as_ref(),
            OperationIntent::Delegation(i) => i.source.as_ref(),
            OperationIntent::RegisterGlobalConstant(i) => i.source.as_ref(),
            OperationIntent::IncreasePaidStorage(i) => i.source.as_ref(),
            OperationIntent::TransferTicket(i) => i.source.as_ref(),
            OperationIntent::SmartRollupAddMessages(i) => i.source.as_ref(),
            OperationIntent::SmartRollupOriginate(i) => i.source.as_ref(),
            OperationIntent::SmartRollupExecuteOutboxMessage(i) => i.source.as_ref(),
            OperationIntent::Ballot(i) => Some(&i.source),
            OperationIntent::Proposals(i) => Some(&i.source),
            OperationIntent::Activation(_) | OperationIntent::DrainDelegate(_) => None,
        }
    }

    /// Address this intent contributes when picking the batch principal:
    /// source, then public key hash, then delegate
    pub fn principal_candidate(&self) -> Option<&Address> {
        if let Some(source) = self.source() {
            return Some(source);
        }
        match self {
            OperationIntent::Activation(i) => Some(&i.pkh),
            OperationIntent::Delegation(i) => i.delegate.as_ref(),
            OperationIntent::Origination(i) => i.delegate.as_ref(),
            OperationIntent::DrainDelegate(i) => Some(&i.delegate),
            _ => None,
        }
    }

    /// User limits of a manager operation
    pub fn limits(&self) -> Option<&Limits> {
        match self {
            OperationIntent::Reveal(i) => Some(&i.limits),
            OperationIntent::Transaction(i) => Some(&i.limits),
            OperationIntent::Origination(i) => Some(&i.limits),
            OperationIntent::Delegation(i) => Some(&i.limits),
            OperationIntent::RegisterGlobalConstant(i) => Some(&i.limits),
            OperationIntent::IncreasePaidStorage(i) => Some(&i.limits),
            OperationIntent::TransferTicket(i) => Some(&i.limits),
            OperationIntent::SmartRollupAddMessages(i) => Some(&i.limits),
            OperationIntent::SmartRollupOriginate(i) => Some(&i.limits),
            OperationIntent::SmartRollupExecuteOutboxMessage(i) => Some(&i.limits),
            OperationIntent::Activation(_)
            | OperationIntent::DrainDelegate(_)
            | OperationIntent::Ballot(_)
            | OperationIntent::Proposals(_) => None,
        }
    }

    pub fn is_fee_bearing(&self) -> bool {
        self.kind().is_fee_bearing()
    }

    pub fn requires_reveal(&self) -> bool {
        self.kind().requires_reveal()
    }
}

// ---------------------------------------------------------------------------
// Wire contents
// ---------------------------------------------------------------------------

/// Fields shared by every manager operation
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerFields {
    pub source: Address,
    #[serde_as(as = "DisplayFromStr")]
    pub fee: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub counter: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub gas_limit: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub storage_limit: u64,
}

impl ManagerFields {
    pub fn new(source: Address, limits: ResolvedLimits) -> Self {
        Self {
            source,
            fee: limits.fee,
            counter: 0,
            gas_limit: limits.gas_limit,
            storage_limit: limits.storage_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealContent {
    #[serde(flatten)]
    pub manager: ManagerFields,
    pub public_key: PublicKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionContent {
    #[serde(flatten)]
    pub manager: ManagerFields,
    #[serde_as(as = "DisplayFromStr")]
    pub amount: u64,
    pub destination: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<TransactionParameters>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub code: Vec<Micheline>,
    pub storage: Micheline,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginationContent {
    #[serde(flatten)]
    pub manager: ManagerFields,
    #[serde_as(as = "DisplayFromStr")]
    pub balance: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate: Option<Address>,
    pub script: Script,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationContent {
    #[serde(flatten)]
    pub manager: ManagerFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterGlobalConstantContent {
    #[serde(flatten)]
    pub manager: ManagerFields,
    pub value: Micheline,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncreasePaidStorageContent {
    #[serde(flatten)]
    pub manager: ManagerFields,
    #[serde_as(as = "DisplayFromStr")]
    pub amount: u64,
    pub destination: Address,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTicketContent {
    #[serde(flatten)]
    pub manager: ManagerFields,
    pub ticket_contents: Micheline,
    pub ticket_ty: Micheline,
    pub ticket_ticketer: Address,
    #[serde_as(as = "DisplayFromStr")]
    pub ticket_amount: u128,
    pub destination: Address,
    pub entrypoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartRollupAddMessagesContent {
    #[serde(flatten)]
    pub manager: ManagerFields,
    pub message: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartRollupOriginateContent {
    #[serde(flatten)]
    pub manager: ManagerFields,
    pub pvm_kind: PvmKind,
    pub kernel: String,
    pub parameters_ty: Micheline,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<Address>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartRollupExecuteOutboxMessageContent {
    #[serde(flatten)]
    pub manager: ManagerFields,
    pub rollup: Address,
    pub cemented_commitment: String,
    pub output_proof: String,
}

/// The wire-shaped record of one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationContent {
    Reveal(RevealContent),
    Transaction(TransactionContent),
    Origination(OriginationContent),
    Delegation(DelegationContent),
    RegisterGlobalConstant(RegisterGlobalConstantContent),
    IncreasePaidStorage(IncreasePaidStorageContent),
    TransferTicket(TransferTicketContent),
    SmartRollupAddMessages(SmartRollupAddMessagesContent),
    SmartRollupOriginate(SmartRollupOriginateContent),
    SmartRollupExecuteOutboxMessage(SmartRollupExecuteOutboxMessageContent),
    #[serde(rename = "activate_account")]
    Activation(ActivationIntent),
    DrainDelegate(DrainDelegateIntent),
    Ballot(BallotIntent),
    Proposals(ProposalsIntent),
}

impl OperationContent {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationContent::Reveal(_) => OperationKind::Reveal,
            OperationContent::Transaction(_) => OperationKind::Transaction,
            OperationContent::Origination(_) => OperationKind::Origination,
            OperationContent::Delegation(_) => OperationKind::Delegation,
            OperationContent::RegisterGlobalConstant(_) => OperationKind::RegisterGlobalConstant,
            OperationContent::IncreasePaidStorage(_) => OperationKind::IncreasePaidStorage,
            OperationContent::TransferTicket(_) => OperationKind::TransferTicket,
            OperationContent::SmartRollupAddMessages(_) => OperationKind::SmartRollupAddMessages,
            OperationContent::SmartRollupOriginate(_) => OperationKind::SmartRollupOriginate,
            OperationContent::SmartRollupExecuteOutboxMessage(_) => {
                OperationKind::SmartRollupExecuteOutboxMessage
            }
            OperationContent::Activation(_) => OperationKind::Activation,
            OperationContent::DrainDelegate(_) => OperationKind::DrainDelegate,
            OperationContent::Ballot(_) => OperationKind::Ballot,
            OperationContent::Proposals(_) => OperationKind::Proposals,
        }
    }

    pub fn manager(&self) -> Option<&ManagerFields> {
        match self {
            OperationContent::Reveal(c) => Some(&c.manager),
            OperationContent::Transaction(c) => Some(&c.manager),
            OperationContent::Origination(c) => Some(&c.manager),
            OperationContent::Delegation(c) => Some(&c.manager),
            OperationContent::RegisterGlobalConstant(c) => Some(&c.manager),
            OperationContent::IncreasePaidStorage(c) => Some(&c.manager),
            OperationContent::TransferTicket(c) => Some(&c.manager),
            OperationContent::SmartRollupAddMessages(c) => Some(&c.manager),
            OperationContent::SmartRollupOriginate(c) => Some(&c.manager),
            OperationContent::SmartRollupExecuteOutboxMessage(c) => Some(&c.manager),
            _ => None,
        }
    }

    pub fn manager_mut(&mut self) -> Option<&mut ManagerFields> {
        match self {
            OperationContent::Reveal(c) => Some(&mut c.manager),
            OperationContent::Transaction(c) => Some(&mut c.manager),
            OperationContent::Origination(c) => Some(&mut c.manager),
            OperationContent::Delegation(c) => Some(&mut c.manager),
            OperationContent::RegisterGlobalConstant(c) => Some(&mut c.manager),
            OperationContent::IncreasePaidStorage(c) => Some(&mut c.manager),
            OperationContent::TransferTicket(c) => Some(&mut c.manager),
            OperationContent::SmartRollupAddMessages(c) => Some(&mut c.manager),
            OperationContent::SmartRollupOriginate(c) => Some(&mut c.manager),
            OperationContent::SmartRollupExecuteOutboxMessage(c) => Some(&mut c.manager),
            _ => None,
        }
    }

    /// A contract call carrying parameters
    pub fn has_parameters(&self) -> bool {
        matches!(self, OperationContent::Transaction(t) if t.parameters.is_some())
    }
}

/// Output of preparation: a branch-anchored, counter-assigned operation group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedOperation {
    pub branch: String,
    pub protocol: String,
    pub contents: Vec<OperationContent>,
    /// Principal's head counter at preparation time
    pub counter: u64,
    /// Limits the caller set explicitly, aligned with `contents`
    #[serde(skip)]
    pub overrides: Vec<Limits>,
}

impl PreparedOperation {
    /// User overrides for content `index`, empty when none were given
    pub fn overrides_for(&self, index: usize) -> Limits {
        self.overrides.get(index).copied().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Node read models
// ---------------------------------------------------------------------------

fn default_origination_size() -> u64 {
    257
}

fn default_minimal_block_delay() -> u64 {
    8
}

fn default_blocks_per_cycle() -> u64 {
    10800
}

/// The protocol constants the pipeline depends on. The node sends some of
/// these as strings and some as numbers.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConstants {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub hard_gas_limit_per_operation: u64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub hard_gas_limit_per_block: u64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub hard_storage_limit_per_operation: u64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub cost_per_byte: u64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default = "default_origination_size")]
    pub origination_size: u64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default = "default_minimal_block_delay")]
    pub minimal_block_delay: u64,
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    #[serde(default = "default_blocks_per_cycle")]
    pub blocks_per_cycle: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: String,
    pub level: i64,
    pub protocol: String,
    pub chain_id: String,
    pub predecessor: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocols {
    pub protocol: String,
    pub next_protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentLevel {
    pub level: i64,
    pub cycle: i64,
    pub cycle_position: u64,
}

/// On-chain record of an account or contract
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractInfo {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub balance: u64,
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    #[serde(default)]
    pub counter: Option<u64>,
    #[serde(default)]
    pub delegate: Option<String>,
    #[serde(default)]
    pub script: Option<serde_json::Value>,
}

/// Convert a decimal tez amount to mutez without floating point
pub fn tez_to_mutez(amount: &str) -> Result<u64, EncodingError> {
    let invalid = || EncodingError::Number(amount.to_string());
    let (whole, fraction) = amount.split_once('.').unwrap_or((amount, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if fraction.len() > 6
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
    let fraction_mutez: u64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<6}", fraction).parse().map_err(|_| invalid())?
    };

    whole
        .checked_mul(1_000_000)
        .and_then(|m| m.checked_add(fraction_mutez))
        .ok_or_else(|| EncodingError::OutOfRange(amount.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constants_accept_strings_and_numbers() {
        let constants: ProtocolConstants = serde_json::from_value(json!({
            "hard_gas_limit_per_operation": "1040000",
            "hard_gas_limit_per_block": "1386666",
            "hard_storage_limit_per_operation": "60000",
            "cost_per_byte": "250",
            "minimal_block_delay": "8",
            "blocks_per_cycle": 10800,
            "proof_of_work_threshold": "-1"
        }))
        .unwrap();
        assert_eq!(constants.hard_gas_limit_per_block, 1_386_666);
        assert_eq!(constants.cost_per_byte, 250);
        assert_eq!(constants.origination_size, 257);
        assert_eq!(constants.minimal_block_delay, 8);
        assert_eq!(constants.blocks_per_cycle, 10800);
    }

    #[test]
    fn test_limits_merge_user_wins() {
        let defaults = ResolvedLimits {
            fee: 0,
            gas_limit: 1000,
            storage_limit: 60000,
        };
        let user = Limits {
            fee: Some(500),
            gas_limit: None,
            storage_limit: Some(0),
        };
        assert_eq!(
            user.merge(&defaults),
            ResolvedLimits {
                fee: 500,
                gas_limit: 1000,
                storage_limit: 0
            }
        );
    }

    #[test]
    fn test_content_numeric_fields_are_strings() {
        let content = OperationContent::Transaction(TransactionContent {
            manager: ManagerFields {
                source: "tz1P2k9NurjUUCHTPBB8cPaNL25UAddyrnUa".parse().unwrap(),
                fee: 275,
                counter: 8190585,
                gas_limit: 2,
                storage_limit: 0,
            },
            amount: 100,
            destination: "tz1burnburnburnburnburnburnburjAYjjX".parse().unwrap(),
            parameters: None,
        });
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value["kind"], "transaction");
        assert_eq!(value["fee"], "275");
        assert_eq!(value["counter"], "8190585");
        assert_eq!(value["storage_limit"], "0");
        assert_eq!(value["amount"], "100");
        assert!(value.get("parameters").is_none());

        let back: OperationContent = serde_json::from_value(value).unwrap();
        assert_eq!(back, content);
    }

    #[test]
    fn test_intent_json_with_flattened_limits() {
        let intent: OperationIntent = serde_json::from_value(json!({
            "kind": "transaction",
            "destination": "tz1burnburnburnburnburnburnburjAYjjX",
            "amount": 100,
            "gas_limit": 1500
        }))
        .unwrap();
        assert_eq!(intent.kind(), OperationKind::Transaction);
        assert_eq!(intent.limits().unwrap().gas_limit, Some(1500));
        assert!(intent.source().is_none());
    }

    #[test]
    fn test_kind_classification() {
        assert!(!OperationKind::Activation.is_fee_bearing());
        assert!(!OperationKind::DrainDelegate.is_fee_bearing());
        assert!(OperationKind::Reveal.is_fee_bearing());
        assert!(!OperationKind::Reveal.requires_reveal());
        assert!(OperationKind::Delegation.requires_reveal());
        assert!(OperationKind::Origination.needs_gas_buffer());
        assert!(!OperationKind::Transaction.needs_gas_buffer());
        assert_eq!(OperationKind::Activation.as_str(), "activate_account");
    }

    #[test]
    fn test_principal_candidate_priority() {
        let activation = OperationIntent::Activation(ActivationIntent {
            pkh: "tz1P2k9NurjUUCHTPBB8cPaNL25UAddyrnUa".parse().unwrap(),
            secret: "00".repeat(20),
        });
        assert_eq!(
            activation.principal_candidate().unwrap().to_string(),
            "tz1P2k9NurjUUCHTPBB8cPaNL25UAddyrnUa"
        );

        let delegation = OperationIntent::Delegation(DelegationIntent {
            source: None,
            delegate: Some("tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx".parse().unwrap()),
            limits: Limits::default(),
        });
        assert_eq!(
            delegation.principal_candidate().unwrap().to_string(),
            "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx"
        );
    }

    #[test]
    fn test_tez_to_mutez() {
        assert_eq!(tez_to_mutez("0.0001").unwrap(), 100);
        assert_eq!(tez_to_mutez("0.001").unwrap(), 1000);
        assert_eq!(tez_to_mutez("12").unwrap(), 12_000_000);
        assert_eq!(tez_to_mutez("1.5").unwrap(), 1_500_000);
        assert!(tez_to_mutez("0.0000001").is_err());
        assert!(tez_to_mutez("-1").is_err());
        assert!(tez_to_mutez(".").is_err());
    }
}
