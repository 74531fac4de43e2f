//! Access to Tezos nodes: configuration, HTTP transport and endpoint pooling

pub mod node_client;
pub mod node_config;
pub mod node_errors;
pub mod node_pool;

pub use node_client::{HttpNodeClient, NodeRpc};
pub use node_config::{ConfigError, NodeConfig, NodeEndpointConfig};
pub use node_errors::{detect_protocol_errors, NodeError, ProtocolError};
pub use node_pool::{EndpointStats, NodePool, PoolStats};
