//! Operation pipeline: intents in, injected operation hash out
//!
//! - **prepare**: principal, default limits, reveal, branch and counters
//! - **estimate**: simulation-driven gas, storage and fee estimates
//! - **forge**: binary encoding and the signing digest
//! - **inject**: signer seam and injection
//! - **builder**: the stages wired together

pub mod builder;
pub mod errors;
pub mod estimate;
pub mod forge;
pub mod inject;
pub mod prepare;

pub use builder::{BuiltOperation, OperationPipeline, TezRecipient};
pub use errors::PipelineError;
pub use estimate::{Estimate, EstimateProperties, FeeEstimator, OpSize};
pub use forge::{forge_operation, signing_digest, ForgedOperation, Forger};
pub use inject::{Ed25519Signer, Injector, OperationSigner};
pub use prepare::{OperationPreparer, PrepareOptions, StorageEncoder};
