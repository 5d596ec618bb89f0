// Module: Context
// Aggregates the store, HTTP client, and global options for one execution.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use crate::client::{HttpClient, ReqwestClient, DEFAULT_TIMEOUT_MS};
use crate::store::Store;

/// Settings from the definition and CLI that apply to every HTTP step.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Prefix for relative step URLs.
    pub base_url: String,
    /// Headers sent on every request unless a step overrides the name.
    pub headers: HashMap<String, Vec<String>>,
}

/// Execution state shared by every step of one workflow run.
///
/// All fields are populated after construction; missing builder options
/// receive defaults.
pub struct ExecutionContext {
    pub client: Arc<dyn HttpClient>,
    pub store: Store,
    pub options: GlobalOptions,
}

impl ExecutionContext {
    pub fn builder() -> ExecutionContextBuilder {
        ExecutionContextBuilder::default()
    }

    /// Read view of the current variables.
    pub fn variables(&self) -> &HashMap<String, Value> {
        self.store.snapshot()
    }
}

/// Builder for [`ExecutionContext`].
///
/// Defaults: a fresh empty store, a reqwest client with the 15000 ms
/// timeout, no base URL, and no global headers.
#[derive(Default)]
pub struct ExecutionContextBuilder {
    client: Option<Arc<dyn HttpClient>>,
    store: Option<Store>,
    options: Option<GlobalOptions>,
}

impl ExecutionContextBuilder {
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    pub fn global_options(mut self, base_url: String, headers: HashMap<String, Vec<String>>) -> Self {
        self.options = Some(GlobalOptions { base_url, headers });
        self
    }

    pub fn build(self) -> Result<ExecutionContext> {
        let client = match self.client {
            Some(client) => client,
            None => Arc::new(ReqwestClient::new(DEFAULT_TIMEOUT_MS)?),
        };

        Ok(ExecutionContext {
            client,
            store: self.store.unwrap_or_default(),
            options: self.options.unwrap_or_default(),
        })
    }
}
