// Thin REST client for the two upstream vector-database instances
// (spec.md §1, §4.C "Request Router/Proxy" and §9's resolved upstream
// shape). No retry policy lives here — callers (Router, WAL replay)
// decide what a failure means; this module only translates HTTP.
//
// Grounded on the teacher's `pool/connection_pool.rs` style of a narrow
// client struct around a shared `reqwest::Client`, and on
// `examples/omgpointless-aspy`'s use of `reqwest` for outbound calls.

use crate::common::InstanceRole;
use crate::error::{EngineError, Result};
use bytes::Bytes;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: reqwest::header::HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn body_json(&self) -> Result<Value> {
        serde_json::from_slice(&self.body)
            .map_err(|e| EngineError::Protocol(format!("non-JSON upstream body: {e}")))
    }
}

#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    primary_url: String,
    replica_url: String,
}

impl UpstreamClient {
    pub fn new(primary_url: String, replica_url: String, request_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(EngineError::from)?;
        Ok(Self { http, primary_url, replica_url })
    }

    fn base(&self, instance: InstanceRole) -> &str {
        match instance {
            InstanceRole::Primary => &self.primary_url,
            InstanceRole::Replica => &self.replica_url,
        }
    }

    /// Issues an arbitrary method/path/body request against `instance`,
    /// using the request's own timeout override when present (the Router
    /// real-time health bypass uses a shorter one than default routing).
    pub async fn forward(
        &self,
        instance: InstanceRole,
        method: &Method,
        path: &str,
        body: Bytes,
        headers: reqwest::header::HeaderMap,
        timeout: Option<Duration>,
    ) -> Result<UpstreamResponse> {
        let url = format!("{}{}", self.base(instance), path);
        let mut req = self.http.request(method.clone(), &url).headers(headers).body(body);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let resp = req.send().await.map_err(EngineError::from)?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(EngineError::from)?;
        Ok(UpstreamResponse { status, headers, body })
    }

    /// `GET /version` liveness probe used by the Health Monitor (spec.md
    /// §4.C cached health) and Router's real-time bypass.
    pub async fn probe_version(&self, instance: InstanceRole, timeout: Duration) -> Result<bool> {
        let url = format!("{}/version", self.base(instance));
        match self.http.get(&url).timeout(timeout).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(e) if e.is_timeout() || e.is_connect() => Ok(false),
            Err(e) => Err(EngineError::from(e)),
        }
    }

    /// Looks up a collection by name directly on `instance`, used by the
    /// Mapping Registry's discovery-probe fallback. Returns `None` on a
    /// 404, surfaces anything else as an error.
    pub async fn find_collection_id(
        &self,
        instance: InstanceRole,
        name: &str,
    ) -> Result<Option<String>> {
        let url = format!("{}/collections/by-name/{}", self.base(instance), name);
        let resp = self.http.get(&url).send().await.map_err(EngineError::from)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(EngineError::Protocol(format!(
                "discovery probe on {instance} returned {}",
                resp.status()
            )));
        }
        let body: Value = resp.json().await.map_err(EngineError::from)?;
        Ok(body.get("id").and_then(Value::as_str).map(str::to_string))
    }

    /// Issues a name-based `POST /collections` against `instance`, used
    /// by the collection-recovery sync worker to re-establish a
    /// collection that existed on the other side while `instance` was
    /// down. Returns the instance-local id the create produced.
    pub async fn create_collection_by_name(
        &self,
        instance: InstanceRole,
        name: &str,
    ) -> Result<Option<String>> {
        let url = format!("{}/collections", self.base(instance));
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(EngineError::from)?;
        if !resp.status().is_success() {
            return Err(EngineError::Protocol(format!(
                "collection-recovery create on {instance} returned {}",
                resp.status()
            )));
        }
        let body: Value = resp.json().await.map_err(EngineError::from)?;
        Ok(body.get("id").and_then(Value::as_str).map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_selects_configured_instance() {
        let client =
            UpstreamClient::new("http://p".into(), "http://r".into(), Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.base(InstanceRole::Primary), "http://p");
        assert_eq!(client.base(InstanceRole::Replica), "http://r");
    }
}
