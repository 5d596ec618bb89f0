// HTTP request step: compiles the request from the store, dispatches it,
// and projects the response back into the store.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::client::Request;
use crate::context::ExecutionContext;
use crate::errors::ValidationErrors;
use crate::expr::{self, CompiledExpr};
use crate::template::BodyTemplate;

/// Reserved store key carrying the decoded response body during projection
/// and validation. Removed again on every exit path.
pub const RESPONSE_KEY: &str = "response";

static PATH_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/:([A-Za-z_][A-Za-z0-9_]*)").expect("valid path parameter regex"));

/// A mapping from a name to a comma-separated list of expressions, as used
/// by the `headers` and `query_params` step fields.
#[derive(Debug, Clone, Default)]
pub struct CsvMap(HashMap<String, Vec<String>>);

impl CsvMap {
    /// The underlying name → expression-list entries.
    pub fn entries(&self) -> &HashMap<String, Vec<String>> {
        &self.0
    }

    fn compile(
        &self,
        vars: &HashMap<String, Value>,
        label: &'static str,
    ) -> Result<HashMap<String, Vec<String>>> {
        let mut compiled = HashMap::with_capacity(self.0.len());

        for (key, expressions) in &self.0 {
            let mut values = Vec::with_capacity(expressions.len());

            for source in expressions {
                let program = CompiledExpr::compile(source)
                    .with_context(|| format!("{} '{}'", label, key))?;
                let value = program
                    .run_string(vars)
                    .with_context(|| format!("{} '{}'", label, key))?;
                values.push(value);
            }

            compiled.insert(key.clone(), values);
        }

        Ok(compiled)
    }
}

impl<'de> Deserialize<'de> for CsvMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: HashMap<String, String> = HashMap::deserialize(deserializer)?;

        let parsed = raw
            .into_iter()
            .map(|(key, value)| (key, value.split(',').map(str::to_owned).collect()))
            .collect();

        Ok(Self(parsed))
    }
}

/// Payload for an HTTP request step.
///
/// `data` maps template names to expressions evaluated at build time; the
/// template comes either inline or from a file next to the config.
#[derive(Debug, Clone)]
pub struct RequestBody {
    template: Option<BodyTemplate>,
    file: Option<String>,
    data: HashMap<String, String>,
}

impl<'de> Deserialize<'de> for RequestBody {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawBody {
            #[serde(default)]
            template: Option<String>,
            #[serde(default)]
            file: Option<String>,
            #[serde(default)]
            data: HashMap<String, String>,
        }

        let raw = RawBody::deserialize(deserializer)?;

        if raw.template.is_none() && raw.file.is_none() {
            return Err(de::Error::custom(
                "template or file should be provided for request body",
            ));
        }

        let template = raw
            .template
            .as_deref()
            .map(BodyTemplate::parse)
            .transpose()
            .map_err(de::Error::custom)?;

        Ok(Self {
            template,
            file: raw.file,
            data: raw.data,
        })
    }
}

impl RequestBody {
    /// Loads and validates a file-backed template, resolved against the
    /// config file's directory. Inline templates were validated at decode.
    fn finalize(&mut self, base_dir: &Path) -> Result<()> {
        if self.template.is_some() {
            return Ok(());
        }

        let Some(file) = &self.file else {
            bail!("no template provided for request body");
        };

        let path = base_dir.join(file);
        let source = fs::read_to_string(&path)
            .with_context(|| format!("failed reading request template '{}'", path.display()))?;
        self.template = Some(BodyTemplate::parse(&source)?);

        Ok(())
    }

    fn build(&self, vars: &HashMap<String, Value>) -> Result<Vec<u8>> {
        let mut data = HashMap::with_capacity(self.data.len());

        for (name, source) in &self.data {
            let value = expr::eval(source, vars)
                .with_context(|| format!("cannot evaluate body data entry '{}'", name))?;
            data.insert(name.clone(), value);
        }

        let Some(template) = &self.template else {
            bail!("request body template is not loaded");
        };

        Ok(template.render(&data)?)
    }
}

/// Validation rules applied to the captured response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Validator {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub asserts: Vec<String>,
}

impl Validator {
    /// Checks the status code and runs every assert expression against the
    /// given environment, which includes the `response` binding.
    fn check(&self, vars: &HashMap<String, Value>, status_code: u16) -> Result<()> {
        if let Some(expected) = self.status_code {
            if expected != status_code {
                bail!(
                    "status code: expected '{}' but got '{}'",
                    expected,
                    status_code
                );
            }
        }

        for assert in &self.asserts {
            let program = CompiledExpr::compile(assert).context("assert")?;
            let passed = program.run_bool(vars).context("assert")?;

            if !passed {
                bail!("assertion '{}' failed", assert);
            }
        }

        Ok(())
    }
}

/// An HTTP request step.
#[derive(Debug, Deserialize)]
pub struct HttpStep {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub body: Option<RequestBody>,
    #[serde(default)]
    pub headers: CsvMap,
    #[serde(default)]
    pub query_params: CsvMap,
    /// Variables to set from expressions evaluated over the response.
    #[serde(default)]
    pub store: HashMap<String, String>,
    /// Wait time in milliseconds before dispatching the request.
    #[serde(default)]
    pub delay: u64,
    #[serde(default)]
    pub validations: Option<Validator>,
}

impl HttpStep {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new("http request");
        errors.require("name", !self.name.is_empty());
        errors.require("url", !self.url.is_empty());
        errors.require("method", !self.method.is_empty());
        errors.into_result()
    }

    pub fn finalize(&mut self, base_dir: &Path) -> Result<()> {
        match &mut self.body {
            Some(body) => body.finalize(base_dir),
            None => Ok(()),
        }
    }

    pub async fn execute(&self, context: &mut ExecutionContext) -> Result<()> {
        let request = self
            .build(context)
            .with_context(|| format!("http request '{}'", self.name))?;

        info!(step = %self.name, method = %request.method, url = %request.url, "sending http request");
        if let Some(body) = &request.body {
            debug!(body = %String::from_utf8_lossy(body), "http request body");
        }

        if self.delay > 0 {
            info!(step = %self.name, delay_ms = self.delay, "delaying request");
            sleep(Duration::from_millis(self.delay)).await;
        }

        let response = context
            .client
            .send(request)
            .await
            .with_context(|| format!("http request '{}'", self.name))?;

        info!(step = %self.name, status = response.status_code, "http request responded");
        debug!(body = %String::from_utf8_lossy(&response.body), "http response body");

        let body: Value = if response.body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&response.body).with_context(|| {
                format!("failed to parse response body for http request '{}'", self.name)
            })?
        };

        // The response binding is visible to projections and asserts only;
        // it must be gone from the store on every exit path.
        context.store.set(RESPONSE_KEY, body.clone());
        let outcome = self.project_and_check(context, response.status_code, &body);
        context.store.remove(RESPONSE_KEY);

        outcome.with_context(|| format!("http request '{}'", self.name))?;
        debug!(step = %self.name, "http response validation completed");

        Ok(())
    }

    fn project_and_check(
        &self,
        context: &mut ExecutionContext,
        status_code: u16,
        body: &Value,
    ) -> Result<()> {
        self.project(context)?;

        if let Some(validator) = &self.validations {
            if let Err(err) = validator.check(context.store.snapshot(), status_code) {
                let dump = serde_json::to_string_pretty(&json!({
                    "StatusCode": status_code,
                    "Body": body,
                }))
                .context("unable to output response")?;

                bail!("{:#}\nresponse: {}", err, dump);
            }
        }

        Ok(())
    }

    /// Evaluates the projection expressions with the response in scope and
    /// stores the results.
    fn project(&self, context: &mut ExecutionContext) -> Result<()> {
        if self.store.is_empty() {
            return Ok(());
        }

        debug!(step = %self.name, "storing variables from response");

        let mut projected = HashMap::with_capacity(self.store.len());
        for (name, source) in &self.store {
            let value = expr::eval(source, context.store.snapshot())
                .with_context(|| format!("variable '{}'", name))?;
            projected.insert(name.clone(), value);
        }

        context.store.add(projected);

        Ok(())
    }

    fn build(&self, context: &ExecutionContext) -> Result<Request> {
        let url = self.build_url(context)?;
        let vars = context.store.snapshot();

        // Per-step headers win wholesale over same-named global headers.
        let mut headers = context.options.headers.clone();
        headers.extend(self.headers.compile(vars, "header")?);

        let query_params = self.query_params.compile(vars, "query param")?;

        let body = match &self.body {
            Some(body) => Some(body.build(vars)?),
            None => None,
        };

        Ok(Request {
            method: self.method.clone(),
            url,
            headers,
            query_params,
            body,
        })
    }

    /// Joins the step URL with the global base URL and expands `/:name`
    /// path parameters from the store. An already-absolute URL only gets
    /// parameter expansion.
    fn build_url(&self, context: &ExecutionContext) -> Result<String> {
        if self.url.is_empty() {
            bail!("invalid url '{}'", self.url);
        }

        let mut url = self.url.clone();
        for captures in PATH_PARAM.captures_iter(&self.url) {
            let name = &captures[1];
            let value = context
                .store
                .get(name)
                .ok_or_else(|| anyhow!("variable '{}' not found for url '{}'", name, self.url))?;

            url = url.replace(&format!(":{}", name), &scalar_text(value));
        }

        if url.contains("://") {
            return Ok(url);
        }

        let base = context.options.base_url.trim_end_matches('/');
        Ok(format!("{}/{}", base, url.trim_start_matches('/')))
    }
}

/// String form of a store value for URL substitution: strings verbatim,
/// everything else as compact JSON.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
