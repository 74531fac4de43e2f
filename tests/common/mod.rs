//! Shared test helpers: a scripted in-memory node

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tezos_pipeline::node_manager::{NodeError, NodeRpc};

pub const BRANCH: &str = "BL1kUezGw5rvjTruYPgpUGAazKsgkqr1gcm4NvjmxPu9VxTfpnF";
pub const PROTOCOL: &str = "PtParisBxoLz5gzMmn3d9WBQNoPSZakgnkMC2VNuQ3KXfUtUQeZ";
pub const CHAIN_ID: &str = "NetXdQprcVkpaWU";
pub const OP_HASH: &str = "ooBghN2ok5EpgEuMqYWqvfwNLBiK9eNFoPai91iwqk2nRCyUKgE";

/// Revealed account, controlled by the seed `[7u8; 32]`
pub const ALICE: &str = "tz1Qr9uevaimfiPS6X1otehsKrwvZjX7bsyL";
pub const ALICE_PK: &str = "edpkvRQaXJ26ZAFi2ZNq5Hb5wXcc3S1Q8kVaXNjxXDfmtWEp9DkpFZ";
pub const BOB: &str = "tz1P2k9NurjUUCHTPBB8cPaNL25UAddyrnUa";
pub const CAROL: &str = "tz1exKQFkuYnrqMxCuSfJNUZSPeoxaMWmzjH";

type Simulator = Box<dyn Fn(&Value) -> Value + Send + Sync>;

/// In-memory node answering from a path table
pub struct MockNode {
    routes: Mutex<HashMap<String, Value>>,
    simulator: Mutex<Simulator>,
    pub gets: Mutex<Vec<String>>,
    pub posts: Mutex<Vec<(String, Value)>>,
    pub get_count: AtomicUsize,
    delay: Option<Duration>,
    failures: Mutex<HashMap<String, usize>>,
}

impl MockNode {
    /// Node with sensible head state and a simulator that applies every
    /// content at 1000 gas
    pub fn new() -> Self {
        let node = Self {
            routes: Mutex::new(HashMap::new()),
            simulator: Mutex::new(Box::new(|body| apply_all(body, |_| json!({ "consumed_milligas": "1000000" })))),
            gets: Mutex::new(Vec::new()),
            posts: Mutex::new(Vec::new()),
            get_count: AtomicUsize::new(0),
            delay: None,
            failures: Mutex::new(HashMap::new()),
        };
        node.route(
            "chains/main/blocks/head/context/constants",
            json!({
                "hard_gas_limit_per_operation": "1040000",
                "hard_gas_limit_per_block": "1733333",
                "hard_storage_limit_per_operation": "60000",
                "cost_per_byte": "250",
                "origination_size": 257,
                "minimal_block_delay": "8",
                "blocks_per_cycle": 10800
            }),
        );
        node.route(
            "chains/main/blocks/head/helpers/current_level",
            json!({ "level": 5_000_000, "cycle": 700, "cycle_position": 100 }),
        );
        node.route("chains/main/blocks/head~2/hash", json!(BRANCH));
        node.route(
            "chains/main/blocks/head/protocols",
            json!({ "protocol": PROTOCOL, "next_protocol": PROTOCOL }),
        );
        node.route("chains/main/chain_id", json!(CHAIN_ID));
        node
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn route(&self, path: &str, value: Value) {
        self.routes.lock().insert(path.to_string(), value);
    }

    /// Register an account with its counter and, if revealed, its key
    pub fn account(&self, address: &str, counter: u64, manager_key: Option<&str>) {
        let base = format!("chains/main/blocks/head/context/contracts/{}", address);
        self.route(&base, json!({ "balance": "1000000000", "counter": counter.to_string() }));
        self.route(
            &format!("{}/manager_key", base),
            manager_key.map_or(Value::Null, |k| json!(k)),
        );
    }

    /// The next `times` reads of `path` fail with a transport error
    pub fn fail_gets(&self, path: &str, times: usize) {
        self.failures.lock().insert(path.to_string(), times);
    }

    pub fn simulate_with<F>(&self, simulator: F)
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        *self.simulator.lock() = Box::new(simulator);
    }

    pub fn gets_of(&self, path: &str) -> usize {
        self.gets.lock().iter().filter(|p| p.as_str() == path).count()
    }

    pub fn last_post(&self, path: &str) -> Option<Value> {
        self.posts
            .lock()
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, body)| body.clone())
    }
}

#[async_trait]
impl NodeRpc for MockNode {
    async fn get_json(&self, path: &str) -> Result<Option<Value>, NodeError> {
        self.get_count.fetch_add(1, Ordering::SeqCst);
        self.gets.lock().push(path.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(left) = self.failures.lock().get_mut(path).filter(|n| **n > 0) {
            *left -= 1;
            return Err(NodeError::Transport {
                endpoint: "mock".to_string(),
                message: format!("connection reset reading {}", path),
            });
        }
        Ok(self.routes.lock().get(path).cloned())
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, NodeError> {
        self.posts.lock().push((path.to_string(), body.clone()));
        if path.ends_with("simulate_operation") {
            return Ok((self.simulator.lock())(body));
        }
        if path.starts_with("injection/operation") {
            return Ok(json!(OP_HASH));
        }
        Err(NodeError::HttpStatus {
            endpoint: "mock".to_string(),
            status: 404,
            body: path.to_string(),
        })
    }
}

/// Echo the simulated contents with an applied result built by `result_for`
pub fn apply_all<F>(body: &Value, result_for: F) -> Value
where
    F: Fn(&Value) -> Value,
{
    let contents = body["operation"]["contents"].as_array().cloned().unwrap_or_default();
    let contents: Vec<Value> = contents
        .into_iter()
        .map(|mut content| {
            if content.get("fee").is_some() {
                let mut result = result_for(&content);
                result["status"] = json!("applied");
                content["metadata"] = json!({ "operation_result": result });
            } else {
                content["metadata"] = json!({});
            }
            content
        })
        .collect();
    json!({ "contents": contents })
}

pub fn shared(node: MockNode) -> Arc<MockNode> {
    Arc::new(node)
}
