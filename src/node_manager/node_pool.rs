//! Round-robin pool over several Tezos nodes
//!
//! - rotation starts at a random endpoint so several clients spread load
//! - endpoints that keep failing at the transport level go into cooldown
//! - no retries: each call is one attempt against one endpoint

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::node_client::{HttpNodeClient, NodeRpc};
use super::node_config::NodeConfig;
use super::node_errors::NodeError;
use crate::metrics::{metrics, Timer};

/// Endpoint with request accounting and cooldown
struct TrackedEndpoint {
    url: String,
    client: Arc<dyn NodeRpc>,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    consecutive_failures: AtomicU64,
    cooldown_until: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for TrackedEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedEndpoint")
            .field("url", &self.url)
            .field("total_requests", &self.total_requests)
            .field("failed_requests", &self.failed_requests)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish_non_exhaustive()
    }
}

impl TrackedEndpoint {
    fn new(url: String, client: Arc<dyn NodeRpc>) -> Self {
        Self {
            url,
            client,
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            cooldown_until: Mutex::new(None),
        }
    }

    fn success_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        let failed = self.failed_requests.load(Ordering::Relaxed);
        (total - failed) as f64 / total as f64
    }

    fn is_in_cooldown(&self) -> bool {
        let mut cooldown = self.cooldown_until.lock();
        match *cooldown {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                *cooldown = None;
                debug!(url = %self.url, "Cooldown expired");
                false
            }
            None => false,
        }
    }

    fn set_cooldown(&self, duration: Duration) {
        *self.cooldown_until.lock() = Some(Instant::now() + duration);
        metrics().endpoint_cooldowns.inc();
        info!(
            url = %self.url,
            cooldown_secs = duration.as_secs(),
            "Endpoint entered cooldown"
        );
    }

    fn record_success(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Returns the consecutive failure count after this one
    fn record_failure(&self, counts_against_endpoint: bool) -> u64 {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        if counts_against_endpoint {
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.consecutive_failures.load(Ordering::Relaxed)
        }
    }
}

pub struct NodePool {
    endpoints: Vec<Arc<TrackedEndpoint>>,
    current_index: AtomicUsize,
    failure_threshold: u64,
    cooldown_period: Duration,
}

impl NodePool {
    /// Build HTTP clients for every configured endpoint
    pub fn from_config(config: &NodeConfig) -> Result<Self, NodeError> {
        config
            .validate()
            .map_err(|e| NodeError::Configuration(e.to_string()))?;

        let clients = config
            .endpoints
            .iter()
            .map(|endpoint| {
                let client: Arc<dyn NodeRpc> = Arc::new(HttpNodeClient::new(endpoint)?);
                Ok((endpoint.url.clone(), client))
            })
            .collect::<Result<Vec<_>, NodeError>>()?;

        Ok(Self::with_clients(
            clients,
            config.failure_threshold,
            Duration::from_secs(config.cooldown_secs),
        ))
    }

    /// Pool over arbitrary transports
    pub fn with_clients(
        clients: Vec<(String, Arc<dyn NodeRpc>)>,
        failure_threshold: u64,
        cooldown_period: Duration,
    ) -> Self {
        let endpoints: Vec<_> = clients
            .into_iter()
            .map(|(url, client)| Arc::new(TrackedEndpoint::new(url, client)))
            .collect();

        let start = if endpoints.is_empty() {
            0
        } else {
            rand::random::<usize>() % endpoints.len()
        };
        metrics().available_endpoints.set(endpoints.len() as i64);

        Self {
            endpoints,
            current_index: AtomicUsize::new(start),
            failure_threshold: failure_threshold.max(1),
            cooldown_period,
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Next endpoint in rotation that is not cooling down
    fn next_endpoint(&self) -> Result<Arc<TrackedEndpoint>, NodeError> {
        let total = self.endpoints.len();
        for _ in 0..total {
            let idx = self.current_index.fetch_add(1, Ordering::Relaxed) % total;
            let endpoint = &self.endpoints[idx];
            if !endpoint.is_in_cooldown() {
                return Ok(endpoint.clone());
            }
            debug!(url = %endpoint.url, "Skipping endpoint in cooldown");
        }

        warn!(total = total, "No healthy node endpoints available");
        Err(NodeError::NoHealthyEndpoints {
            total,
            cooling_down: total,
        })
    }

    fn record<T>(&self, endpoint: &TrackedEndpoint, result: &Result<T, NodeError>) {
        metrics().node_requests.inc();
        match result {
            Ok(_) => endpoint.record_success(),
            Err(e) => {
                metrics().node_errors.inc();
                let failures = endpoint.record_failure(e.counts_against_endpoint());
                if e.counts_against_endpoint() && failures >= self.failure_threshold {
                    endpoint.set_cooldown(self.cooldown_period);
                    metrics().available_endpoints.set(self.available_count() as i64);
                }
            }
        }
    }

    fn available_count(&self) -> usize {
        self.endpoints.iter().filter(|e| !e.is_in_cooldown()).count()
    }

    pub fn get_stats(&self) -> PoolStats {
        let endpoint_stats: Vec<EndpointStats> = self
            .endpoints
            .iter()
            .map(|ep| EndpointStats {
                url: ep.url.clone(),
                total_requests: ep.total_requests.load(Ordering::Relaxed),
                failed_requests: ep.failed_requests.load(Ordering::Relaxed),
                success_rate: ep.success_rate(),
                in_cooldown: ep.is_in_cooldown(),
            })
            .collect();

        PoolStats {
            total_endpoints: self.endpoints.len(),
            available_endpoints: endpoint_stats.iter().filter(|s| !s.in_cooldown).count(),
            endpoint_stats,
        }
    }
}

#[async_trait]
impl NodeRpc for NodePool {
    async fn get_json(&self, path: &str) -> Result<Option<Value>, NodeError> {
        let endpoint = self.next_endpoint()?;
        let timer = Timer::new();
        let result = endpoint.client.get_json(path).await;
        timer.observe_duration(&metrics().node_latency);
        self.record(&endpoint, &result);
        debug!(url = %endpoint.url, path = %path, ok = result.is_ok(), "GET");
        result
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, NodeError> {
        let endpoint = self.next_endpoint()?;
        let timer = Timer::new();
        let result = endpoint.client.post_json(path, body).await;
        timer.observe_duration(&metrics().node_latency);
        self.record(&endpoint, &result);
        debug!(url = %endpoint.url, path = %path, ok = result.is_ok(), "POST");
        result
    }
}

#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total_endpoints: usize,
    pub available_endpoints: usize,
    pub endpoint_stats: Vec<EndpointStats>,
}

#[derive(Debug, Clone)]
pub struct EndpointStats {
    pub url: String,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub in_cooldown: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Answers every call with a fixed outcome and counts calls
    struct FixedNode {
        fail: bool,
        calls: AtomicU64,
    }

    impl FixedNode {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                calls: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl NodeRpc for FixedNode {
        async fn get_json(&self, _path: &str) -> Result<Option<Value>, NodeError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                Err(NodeError::Transport {
                    endpoint: "fixed".into(),
                    message: "connection refused".into(),
                })
            } else {
                Ok(Some(json!("ok")))
            }
        }

        async fn post_json(&self, path: &str, _body: &Value) -> Result<Value, NodeError> {
            self.get_json(path).await.map(|v| v.unwrap_or(Value::Null))
        }
    }

    #[tokio::test]
    async fn test_rotation_visits_every_endpoint() {
        let a = FixedNode::new(false);
        let b = FixedNode::new(false);
        let pool = NodePool::with_clients(
            vec![
                ("http://a".into(), a.clone() as Arc<dyn NodeRpc>),
                ("http://b".into(), b.clone() as Arc<dyn NodeRpc>),
            ],
            3,
            Duration::from_secs(30),
        );

        for _ in 0..4 {
            pool.get_json("chains/main/blocks/head/hash").await.unwrap();
        }
        assert_eq!(a.calls.load(Ordering::Relaxed), 2);
        assert_eq!(b.calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_failing_endpoint_enters_cooldown() {
        let bad = FixedNode::new(true);
        let good = FixedNode::new(false);
        let pool = NodePool::with_clients(
            vec![
                ("http://bad".into(), bad.clone() as Arc<dyn NodeRpc>),
                ("http://good".into(), good.clone() as Arc<dyn NodeRpc>),
            ],
            1,
            Duration::from_secs(60),
        );

        // one of the first two calls hits the bad endpoint and cools it down
        let _ = pool.get_json("x").await;
        let _ = pool.get_json("x").await;
        assert_eq!(bad.calls.load(Ordering::Relaxed), 1);

        for _ in 0..3 {
            assert!(pool.get_json("x").await.is_ok());
        }
        assert_eq!(bad.calls.load(Ordering::Relaxed), 1);

        let stats = pool.get_stats();
        assert_eq!(stats.total_endpoints, 2);
        assert_eq!(stats.available_endpoints, 1);
        let bad_stats = stats.endpoint_stats.iter().find(|s| s.url == "http://bad").unwrap();
        assert!(bad_stats.in_cooldown);
        assert_eq!(bad_stats.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_all_endpoints_cooling_down() {
        let bad = FixedNode::new(true);
        let pool = NodePool::with_clients(
            vec![("http://bad".into(), bad as Arc<dyn NodeRpc>)],
            1,
            Duration::from_secs(60),
        );

        assert!(matches!(
            pool.get_json("x").await,
            Err(NodeError::Transport { .. })
        ));
        assert!(matches!(
            pool.get_json("x").await,
            Err(NodeError::NoHealthyEndpoints { total: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_pool_reports_no_endpoints() {
        let pool = NodePool::with_clients(vec![], 3, Duration::from_secs(1));
        assert!(pool.is_empty());
        assert!(matches!(
            pool.post_json("x", &json!({})).await,
            Err(NodeError::NoHealthyEndpoints { total: 0, .. })
        ));
    }
}
