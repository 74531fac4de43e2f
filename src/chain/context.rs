//! Cached, single-flight reads of chain state

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use super::cache::{CacheKey, CachePort, TtlCache};
use super::ttl;
use crate::encoding::{Address, Micheline};
use crate::metrics::metrics;
use crate::node_manager::{NodeError, NodeRpc};
use crate::types::{BlockHeader, ContractInfo, CurrentLevel, ProtocolConstants, Protocols, Script};

const HEAD: &str = "head";

/// A shared fetch; only successes are stored, so a failed leader leaves the
/// cell empty and the next waiter fetches again
type Flight = Arc<OnceCell<Option<Value>>>;

/// Read accessor over a node with a TTL cache in front of it
pub struct ChainContext {
    rpc: Arc<dyn NodeRpc>,
    cache: Arc<dyn CachePort>,
    inflight: Mutex<HashMap<CacheKey, Flight>>,
}

impl ChainContext {
    pub fn new(rpc: Arc<dyn NodeRpc>) -> Self {
        Self::with_cache(rpc, Arc::new(TtlCache::new()))
    }

    pub fn with_cache(rpc: Arc<dyn NodeRpc>, cache: Arc<dyn CachePort>) -> Self {
        Self {
            rpc,
            cache,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Cache lookup, then a coalesced fetch. `fetch` yields the value with
    /// its lifetime, or `None` when the node has nothing (never cached).
    async fn read_through<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<Option<Value>, NodeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<(Value, Duration)>, NodeError>>,
    {
        if let Some(value) = self.cache.get(&key) {
            metrics().cache_hits.inc();
            debug!(key = %key, "Cache hit");
            return Ok(Some(value));
        }

        let flight: Flight = self.inflight.lock().entry(key.clone()).or_default().clone();

        let led = AtomicBool::new(false);
        let led_ref = &led;
        let fetch_key = key.clone();
        let cache = &self.cache;
        let result = flight
            .get_or_try_init(move || async move {
                led_ref.store(true, Ordering::Relaxed);
                // a previous flight may have landed between our miss and now
                if let Some(value) = cache.get(&fetch_key) {
                    return Ok(Some(value));
                }
                metrics().cache_misses.inc();
                match fetch().await {
                    Ok(Some((value, ttl))) => {
                        debug!(key = %fetch_key, ttl_secs = ttl.as_secs(), "Cache fill");
                        cache.put(fetch_key, value.clone(), ttl);
                        Ok(Some(value))
                    }
                    Ok(None) => Ok(None),
                    Err(e) => {
                        debug!(key = %fetch_key, error = %e, "Fetch failed, not shared");
                        Err(e)
                    }
                }
            })
            .await
            .cloned();

        if !led.load(Ordering::Relaxed) {
            metrics().cache_coalesced.inc();
            debug!(key = %key, "Joined in-flight read");
        }

        let mut inflight = self.inflight.lock();
        if inflight.get(&key).map_or(false, |f| Arc::ptr_eq(f, &flight)) {
            inflight.remove(&key);
        }

        result
    }

    fn decode<T: DeserializeOwned>(key: &CacheKey, value: Value) -> Result<T, NodeError> {
        serde_json::from_value(value).map_err(|e| NodeError::Decode {
            endpoint: key.to_string(),
            message: e.to_string(),
        })
    }

    fn require(key: &CacheKey, value: Option<Value>) -> Result<Value, NodeError> {
        value.ok_or_else(|| NodeError::HttpStatus {
            endpoint: key.to_string(),
            status: 404,
            body: "not found".to_string(),
        })
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, NodeError> {
        self.rpc.get_json(path).await
    }

    /// Constants plus the current cycle position, the inputs of every TTL
    async fn ttl_basis(&self) -> Result<(ProtocolConstants, u64), NodeError> {
        let constants = self.get_constants().await?;
        let level = self.current_level_with(&constants).await?;
        Ok((constants, level.cycle_position))
    }

    #[instrument(skip(self))]
    pub async fn get_constants(&self) -> Result<ProtocolConstants, NodeError> {
        let key = CacheKey::new("constants", &[], HEAD);
        let value = self
            .read_through(key.clone(), || async {
                let Some(value) = self.get("chains/main/blocks/head/context/constants").await? else {
                    return Ok(None);
                };
                // lifetime derived from the constants just fetched
                let constants: ProtocolConstants = Self::decode(&key, value.clone())?;
                let level = self.current_level_with(&constants).await?;
                Ok::<_, NodeError>(Some((value, ttl::cycle_ttl(&constants, level.cycle_position))))
            })
            .await?;
        Self::decode(&key, Self::require(&key, value)?)
    }

    #[instrument(skip(self))]
    pub async fn get_current_level(&self) -> Result<CurrentLevel, NodeError> {
        let constants = self.get_constants().await?;
        self.current_level_with(&constants).await
    }

    async fn current_level_with(&self, constants: &ProtocolConstants) -> Result<CurrentLevel, NodeError> {
        let key = CacheKey::new("current_level", &[], HEAD);
        let value = self
            .read_through(key.clone(), || async {
                let value = self.get("chains/main/blocks/head/helpers/current_level").await?;
                Ok::<_, NodeError>(value.map(|v| (v, ttl::block_ttl(constants))))
            })
            .await?;
        Self::decode(&key, Self::require(&key, value)?)
    }

    #[instrument(skip(self))]
    pub async fn get_block_header(&self, block: &str) -> Result<BlockHeader, NodeError> {
        let key = CacheKey::new("block_header", &[], block);
        let value = self
            .read_through(key.clone(), || async {
                let value = self.get(&format!("chains/main/blocks/{}/header", block)).await?;
                let constants = self.get_constants().await?;
                Ok::<_, NodeError>(value.map(|v| (v, ttl::block_ttl(&constants))))
            })
            .await?;
        Self::decode(&key, Self::require(&key, value)?)
    }

    #[instrument(skip(self))]
    pub async fn get_block_hash(&self, block: &str) -> Result<String, NodeError> {
        let key = CacheKey::new("block_hash", &[], block);
        let value = self
            .read_through(key.clone(), || async {
                let value = self.get(&format!("chains/main/blocks/{}/hash", block)).await?;
                let constants = self.get_constants().await?;
                Ok::<_, NodeError>(value.map(|v| (v, ttl::block_ttl(&constants))))
            })
            .await?;
        Self::decode(&key, Self::require(&key, value)?)
    }

    #[instrument(skip(self))]
    pub async fn get_protocols(&self) -> Result<Protocols, NodeError> {
        let key = CacheKey::new("protocols", &[], HEAD);
        let value = self
            .read_through(key.clone(), || async {
                let value = self.get("chains/main/blocks/head/protocols").await?;
                let (constants, position) = self.ttl_basis().await?;
                Ok::<_, NodeError>(value.map(|v| (v, ttl::cycle_ttl(&constants, position))))
            })
            .await?;
        Self::decode(&key, Self::require(&key, value)?)
    }

    #[instrument(skip(self))]
    pub async fn get_chain_id(&self) -> Result<String, NodeError> {
        let key = CacheKey::new("chain_id", &[], HEAD);
        let value = self
            .read_through(key.clone(), || async {
                let value = self.get("chains/main/chain_id").await?;
                let (constants, position) = self.ttl_basis().await?;
                Ok::<_, NodeError>(value.map(|v| (v, ttl::cycle_ttl(&constants, position))))
            })
            .await?;
        Self::decode(&key, Self::require(&key, value)?)
    }

    /// Revealed public key of an implicit account, `None` when unrevealed
    #[instrument(skip(self, address), fields(address = %address))]
    pub async fn get_manager_key(&self, address: &Address) -> Result<Option<String>, NodeError> {
        let addr = address.to_string();
        let key = CacheKey::new("manager_key", &[&addr], HEAD);
        let value = self
            .read_through(key.clone(), || async {
                let path = format!("chains/main/blocks/head/context/contracts/{}/manager_key", addr);
                let Some(value) = self.get(&path).await? else {
                    return Ok(None);
                };
                let (constants, position) = self.ttl_basis().await?;
                let revealed = manager_key_of(&value).is_some();
                Ok::<_, NodeError>(Some((value, ttl::manager_key_ttl(&constants, position, revealed))))
            })
            .await?;
        Ok(value.as_ref().and_then(manager_key_of))
    }

    #[instrument(skip(self, address), fields(address = %address))]
    pub async fn get_contract(&self, address: &Address) -> Result<Option<ContractInfo>, NodeError> {
        let addr = address.to_string();
        let key = CacheKey::new("contract", &[&addr], HEAD);
        let value = self
            .read_through(key.clone(), || async {
                let path = format!("chains/main/blocks/head/context/contracts/{}", addr);
                let value = self.get(&path).await?;
                let constants = self.get_constants().await?;
                Ok::<_, NodeError>(value.map(|v| (v, ttl::block_ttl(&constants))))
            })
            .await?;
        value.map(|v| Self::decode(&key, v)).transpose()
    }

    /// Head counter of an account; an account the chain has never seen is at 0
    pub async fn get_contract_counter(&self, address: &Address) -> Result<u64, NodeError> {
        Ok(self
            .get_contract(address)
            .await?
            .and_then(|contract| contract.counter)
            .unwrap_or(0))
    }

    /// Spendable balance in mutez
    #[instrument(skip(self, address), fields(address = %address))]
    pub async fn get_balance(&self, address: &Address) -> Result<u64, NodeError> {
        let addr = address.to_string();
        let key = CacheKey::new("balance", &[&addr], HEAD);
        let value = self
            .read_through(key.clone(), || async {
                let path = format!("chains/main/blocks/head/context/contracts/{}/balance", addr);
                let value = self.get(&path).await?;
                let constants = self.get_constants().await?;
                Ok::<_, NodeError>(value.map(|v| (v, ttl::block_ttl(&constants))))
            })
            .await?;
        match value {
            Some(v) => {
                let balance: String = Self::decode(&key, v)?;
                balance.parse().map_err(|_| NodeError::Decode {
                    endpoint: key.to_string(),
                    message: format!("invalid balance '{}'", balance),
                })
            }
            None => Ok(0),
        }
    }

    #[instrument(skip(self, address), fields(address = %address))]
    pub async fn get_script(&self, address: &Address) -> Result<Option<Script>, NodeError> {
        let addr = address.to_string();
        let key = CacheKey::new("script", &[&addr], HEAD);
        let value = self
            .read_through(key.clone(), || async {
                let path = format!("chains/main/blocks/head/context/contracts/{}/script", addr);
                let value = self.get(&path).await?;
                let (constants, position) = self.ttl_basis().await?;
                Ok::<_, NodeError>(value.map(|v| (v, ttl::cycle_ttl(&constants, position))))
            })
            .await?;
        value.map(|v| Self::decode(&key, v)).transpose()
    }

    /// Entrypoint name to parameter type
    #[instrument(skip(self, address), fields(address = %address))]
    pub async fn get_entrypoints(
        &self,
        address: &Address,
    ) -> Result<Option<BTreeMap<String, Micheline>>, NodeError> {
        let addr = address.to_string();
        let key = CacheKey::new("entrypoints", &[&addr], HEAD);
        let value = self
            .read_through(key.clone(), || async {
                let path = format!("chains/main/blocks/head/context/contracts/{}/entrypoints", addr);
                let value = self.get(&path).await?;
                let (constants, position) = self.ttl_basis().await?;
                Ok::<_, NodeError>(value.map(|v| (v, ttl::cycle_ttl(&constants, position))))
            })
            .await?;
        let Some(mut value) = value else {
            return Ok(None);
        };
        let entrypoints = value.get_mut("entrypoints").map(Value::take).unwrap_or(Value::Null);
        if entrypoints.is_null() {
            return Ok(Some(BTreeMap::new()));
        }
        Self::decode(&key, entrypoints).map(Some)
    }

    /// Big-map value by map id and `expr...` key hash
    #[instrument(skip(self))]
    pub async fn get_big_map_value(&self, id: u64, key_hash: &str) -> Result<Option<Micheline>, NodeError> {
        let id_str = id.to_string();
        let key = CacheKey::new("big_map_value", &[&id_str, key_hash], HEAD);
        let value = self
            .read_through(key.clone(), || async {
                let path = format!("chains/main/blocks/head/context/big_maps/{}/{}", id, key_hash);
                let value = self.get(&path).await?;
                let constants = self.get_constants().await?;
                Ok::<_, NodeError>(value.map(|v| (v, ttl::block_ttl(&constants))))
            })
            .await?;
        value.map(|v| Self::decode(&key, v)).transpose()
    }

    /// Registered global constant by `expr...` hash
    #[instrument(skip(self))]
    pub async fn get_global_constant(&self, hash: &str) -> Result<Option<Micheline>, NodeError> {
        let key = CacheKey::new("global_constant", &[hash], HEAD);
        let value = self
            .read_through(key.clone(), || async {
                let path = format!("chains/main/blocks/head/context/global_constants/{}", hash);
                let value = self.get(&path).await?;
                let (constants, position) = self.ttl_basis().await?;
                Ok::<_, NodeError>(value.map(|v| (v, ttl::cycle_ttl(&constants, position))))
            })
            .await?;
        value.map(|v| Self::decode(&key, v)).transpose()
    }

    /// Dry-run an operation group; never cached
    #[instrument(skip(self, body))]
    pub async fn simulate_operation(&self, body: &Value) -> Result<Value, NodeError> {
        self.rpc
            .post_json("chains/main/blocks/head/helpers/scripts/simulate_operation", body)
            .await
    }

    /// Inject signed bytes; returns the operation hash
    #[instrument(skip(self, signed_hex))]
    pub async fn inject_operation(&self, signed_hex: &str) -> Result<String, NodeError> {
        let value = self
            .rpc
            .post_json("injection/operation?chain=main", &json!(signed_hex))
            .await?;
        serde_json::from_value(value).map_err(|e| NodeError::Decode {
            endpoint: "injection/operation".to_string(),
            message: e.to_string(),
        })
    }

    /// Drop cached per-account state after the account's counter moved
    pub fn forget_account(&self, address: &Address) {
        let addr = address.to_string();
        for method in ["contract", "balance", "manager_key"] {
            self.cache.invalidate(&CacheKey::new(method, &[&addr], HEAD));
        }
    }
}

/// The node answers a bare key string, `null`, or `{ "key": ... }` on older protocols
fn manager_key_of(value: &Value) -> Option<String> {
    match value {
        Value::String(key) => Some(key.clone()),
        Value::Object(map) => map.get("key").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_key_shapes() {
        assert_eq!(
            manager_key_of(&json!("edpkvRQaXJ26ZAFi2ZNq5Hb5wXcc3S1Q8kVaXNjxXDfmtWEp9DkpFZ")).as_deref(),
            Some("edpkvRQaXJ26ZAFi2ZNq5Hb5wXcc3S1Q8kVaXNjxXDfmtWEp9DkpFZ")
        );
        assert_eq!(manager_key_of(&json!({"key": "edpk1"})).as_deref(), Some("edpk1"));
        assert!(manager_key_of(&Value::Null).is_none());
    }
}
