// src/rater/client.rs
use crate::error::EngineError;
use crate::models::cdr::Cdr;
use crate::rater::{CallCost, CallDescriptor, Rater};
use crate::rpc::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// JSON-RPC client toward one rater back-end.
pub struct JsonRpcRater {
    http_client: Client,
    base_url: String,
    request_id: AtomicU64,
}

impl JsonRpcRater {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self, EngineError> {
        let http_client = ClientBuilder::new()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_max_idle_per_host(20)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.to_string(),
            request_id: AtomicU64::new(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn call<T, R>(&self, method: &str, params: T) -> Result<R, EngineError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: vec![serde_json::to_value(params)?],
            id: self.next_id(),
        };

        debug!("<Rater> request: method={}, id={}", method, request.id);

        let response = self
            .http_client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::RaterUnavailable(format!(
                "{}: http status {}",
                self.base_url, status
            )));
        }

        let rpc_response: JsonRpcResponse<R> = response.json().await.map_err(|e| {
            EngineError::Decode(format!("rater response parse failed: {}", e))
        })?;

        if let Some(err) = rpc_response.error {
            return Err(EngineError::Internal(format!(
                "rater error on {}: {}",
                method, err.message
            )));
        }

        rpc_response
            .result
            .ok_or_else(|| EngineError::Decode("empty rater response".to_string()))
    }
}

#[async_trait]
impl Rater for JsonRpcRater {
    async fn debit(&self, cd: &CallDescriptor) -> Result<CallCost, EngineError> {
        self.call("Responder.Debit", cd).await
    }

    async fn get_cost(&self, cd: &CallDescriptor) -> Result<CallCost, EngineError> {
        self.call("Responder.GetCost", cd).await
    }

    async fn refund_increments(&self, cd: &CallDescriptor) -> Result<(), EngineError> {
        let _: String = self.call("Responder.RefundIncrements", cd).await?;
        Ok(())
    }

    async fn max_session_time(&self, cd: &CallDescriptor) -> Result<f64, EngineError> {
        self.call("Responder.GetMaxSessionTime", cd).await
    }

    async fn derived_max_session_time(&self, cdr: &Cdr) -> Result<f64, EngineError> {
        self.call("Responder.GetDerivedMaxSessionTime", cdr.as_external())
            .await
    }
}
