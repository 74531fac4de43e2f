//! Tezos operation pipeline
//!
//! Turns high-level operation intents into priced, forged and injected
//! operation groups against a pool of Tezos nodes.

pub mod chain;
pub mod config;
pub mod encoding;
pub mod metrics;
pub mod node_manager;
pub mod observability;
pub mod pipeline;
pub mod structured_logging;
pub mod types;

// Re-export commonly used types
pub use chain::ChainContext;
pub use config::{FeeConfig, PipelineConfig};
pub use encoding::{Address, Micheline, PublicKey, Signature};
pub use pipeline::{OperationPipeline, PipelineError, PrepareOptions};
pub use types::{OperationIntent, PreparedOperation};
