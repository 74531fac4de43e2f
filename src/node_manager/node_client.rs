//! HTTP transport to a single Tezos node

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

use super::node_config::NodeEndpointConfig;
use super::node_errors::{detect_protocol_errors, NodeError};

/// Raw JSON access to a node's RPC tree
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// GET `path`; `Ok(None)` when the node answers 404
    async fn get_json(&self, path: &str) -> Result<Option<Value>, NodeError>;

    /// POST `body` to `path`
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, NodeError>;
}

pub struct HttpNodeClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpNodeClient {
    pub fn new(config: &NodeEndpointConfig) -> Result<Self, NodeError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::Configuration(format!("HTTP client for {}: {}", config.url, e)))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Turn a response into JSON, classifying error bodies
    async fn read_body(&self, response: reqwest::Response) -> Result<Value, NodeError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NodeError::from_reqwest(e, &self.base_url, self.timeout_ms()))?;

        let parsed: Option<Value> = serde_json::from_str(&text).ok();
        if let Some(errors) = parsed.as_ref().and_then(detect_protocol_errors) {
            return Err(NodeError::Protocol {
                endpoint: self.base_url.clone(),
                errors,
            });
        }

        if !status.is_success() {
            return Err(NodeError::HttpStatus {
                endpoint: self.base_url.clone(),
                status: status.as_u16(),
                body: text,
            });
        }

        parsed.ok_or_else(|| NodeError::Decode {
            endpoint: self.base_url.clone(),
            message: format!("response is not JSON: {}", text),
        })
    }
}

#[async_trait]
impl NodeRpc for HttpNodeClient {
    #[instrument(skip(self), fields(endpoint = %self.base_url))]
    async fn get_json(&self, path: &str) -> Result<Option<Value>, NodeError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| NodeError::from_reqwest(e, &self.base_url, self.timeout_ms()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(path = %path, "Node returned 404");
            return Ok(None);
        }

        self.read_body(response).await.map(Some)
    }

    #[instrument(skip(self, body), fields(endpoint = %self.base_url))]
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, NodeError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| NodeError::from_reqwest(e, &self.base_url, self.timeout_ms()))?;

        self.read_body(response).await
    }
}
