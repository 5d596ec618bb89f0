// Module: Client
// Wire-level request/response types and the HTTP transport boundary.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;

/// Default per-client request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Wire-level HTTP request synthesized by a step.
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, Vec<String>>,
    pub query_params: HashMap<String, Vec<String>>,
    /// `None` means the request carries no body.
    pub body: Option<Vec<u8>>,
}

/// Wire-level HTTP response captured for a step.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: String,
    pub status_code: u16,
    pub headers: HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

/// The transport capability consumed by the engine.
///
/// The workflow issues one in-flight request at a time and blocks until it
/// completes or the client's timeout elapses. Tests substitute a fake.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: Request) -> Result<Response>;
}

/// Production transport backed by a reused `reqwest` client.
///
/// Reusing the client keeps the connection pool alive across steps.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Builds a client with the given request timeout in milliseconds.
    pub fn new(timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .context("failed building http client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: Request) -> Result<Response> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| anyhow!("invalid http method '{}': {}", request.method, e))?;

        let mut builder = self.client.request(method, &request.url);

        for (name, values) in &request.headers {
            for value in values {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        let query: Vec<(&str, &str)> = request
            .query_params
            .iter()
            .flat_map(|(key, values)| values.iter().map(move |v| (key.as_str(), v.as_str())))
            .collect();
        if !query.is_empty() {
            builder = builder.query(&query);
        }

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.context("transport error")?;

        let status = response.status();
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(text) = value.to_str() {
                headers
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(text.to_string());
            }
        }

        let body = response
            .bytes()
            .await
            .context("failed reading response body")?
            .to_vec();

        Ok(Response {
            status: status.to_string(),
            status_code: status.as_u16(),
            headers,
            body,
        })
    }
}
