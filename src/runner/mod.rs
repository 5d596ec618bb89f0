// Module: Runner
// Drives one workflow run: merges variable/header sources, seeds the store,
// executes the steps, and writes the output projection.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::client::{HttpClient, ReqwestClient};
use crate::context::ExecutionContext;
use crate::definition::{self, Definition};
use crate::env::Env;
use crate::output;
use crate::steps::execute_sequence;
use crate::store::Store;

/// Shape of the `--env` argument: extra variable and header expressions,
/// either inline JSON or loaded from a file.
#[derive(Debug, Default, Deserialize)]
struct EnvArg {
    #[serde(default, rename = "Variables")]
    variables: HashMap<String, String>,
    #[serde(default, rename = "Headers")]
    headers: HashMap<String, Vec<String>>,
}

/// Shape of piped input: already-evaluated variables.
#[derive(Debug, Default, Deserialize)]
struct PipedInput {
    #[serde(default, rename = "Variables")]
    variables: HashMap<String, Value>,
}

/// Settings for one workflow run, as collected by the CLI.
#[derive(Debug)]
pub struct Runner {
    /// Path to the YAML config file.
    pub config_path: PathBuf,
    /// Inline JSON or a file path with extra variable/header expressions.
    pub env: Option<String>,
    /// Extra global header expressions, as `"key:value"`.
    pub headers: Vec<String>,
    /// Extra variable expressions, as `"name=value"`.
    pub vars: Vec<String>,
}

impl Runner {
    /// Runs the configured workflow with a transport built from the config's
    /// timeout. `input` is raw piped stdin, if any.
    pub async fn run(&self, input: Option<String>, out: &mut dyn Write) -> Result<()> {
        let definition = self.parse()?;
        let client: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(definition.timeout)?);

        self.execute(definition, client, input, out).await
    }

    /// Runs the configured workflow against the given transport.
    pub async fn run_with_client(
        &self,
        client: Arc<dyn HttpClient>,
        input: Option<String>,
        out: &mut dyn Write,
    ) -> Result<()> {
        let definition = self.parse()?;
        self.execute(definition, client, input, out).await
    }

    fn parse(&self) -> Result<Definition> {
        debug!("parsing configuration");
        definition::parse_file(&self.config_path).context("error on parsing config")
    }

    async fn execute(
        &self,
        definition: Definition,
        client: Arc<dyn HttpClient>,
        input: Option<String>,
        out: &mut dyn Write,
    ) -> Result<()> {
        debug!("initializing context");
        if !definition.version.is_empty() {
            debug!(version = %definition.version, "workflow version");
        }

        let mut env = Env::default();
        env.add_vars(parse_var_flags(&self.vars)?)
            .context("error initializing variable")?;
        env.add_headers(parse_header_flags(&self.headers)?)
            .context("error initializing header")?;

        if let Some(arg) = &self.env {
            let extra = parse_env_arg(arg)?;
            env.add_vars(extra.variables)
                .context("error initializing variable")?;
            env.add_headers(extra.headers)
                .context("error initializing header")?;
        }

        env.add_vars(definition.variables.clone())
            .context("error initializing variable")?;
        env.add_headers(definition.headers.entries().clone())
            .context("error initializing header")?;

        let input_vars = parse_input(input).context("failed to parse input")?;
        for name in input_vars.keys() {
            if env.has_var(name) {
                bail!("input variable '{}' is already defined", name);
            }
        }

        let (variables, headers) = env
            .compile(&input_vars)
            .context("failed to initialize config for execution")?;

        let mut store = Store::new(Some(input_vars));
        store.add(variables);

        let mut context = ExecutionContext::builder()
            .http_client(client)
            .store(store)
            .global_options(definition.base_url.clone(), headers)
            .build()?;

        debug!("executing configuration");
        execute_sequence(&definition.steps, &mut context)
            .await
            .context("failed to execute config")?;

        if definition.output_all || definition.output.is_some() {
            debug!("writing output");
            let document = output::project(
                definition.output.as_ref(),
                context.variables(),
                definition.output_all,
            )?;

            out.write_all(document.as_bytes())
                .context("failed to write output")?;
            out.write_all(b"\n").context("failed to write output")?;
        }

        debug!("config executed successfully");

        Ok(())
    }
}

/// Parses repeated `--var "name=value"` flags into variable expressions.
fn parse_var_flags(flags: &[String]) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::with_capacity(flags.len());

    for flag in flags {
        let Some((name, value)) = flag.split_once('=') else {
            bail!("invalid variable '{}': expected name=value", flag);
        };
        vars.insert(name.to_string(), value.to_string());
    }

    Ok(vars)
}

/// Parses repeated `--header "key:value"` flags into header expressions.
fn parse_header_flags(flags: &[String]) -> Result<HashMap<String, Vec<String>>> {
    let mut headers = HashMap::with_capacity(flags.len());

    for flag in flags {
        let Some((name, value)) = flag.split_once(':') else {
            bail!("invalid header '{}': expected key:value", flag);
        };
        headers.insert(name.to_string(), vec![value.to_string()]);
    }

    Ok(headers)
}

/// Parses the `--env` argument: inline JSON when it starts with `{`,
/// otherwise a path to a JSON file.
fn parse_env_arg(arg: &str) -> Result<EnvArg> {
    let source = if arg.trim_start().starts_with('{') {
        arg.to_string()
    } else {
        fs::read_to_string(arg).with_context(|| format!("failed to read env file '{}'", arg))?
    };

    serde_json::from_str(&source).context("failed to parse env json")
}

fn parse_input(input: Option<String>) -> Result<HashMap<String, Value>> {
    let Some(raw) = input else {
        return Ok(HashMap::new());
    };

    if raw.trim().is_empty() {
        return Ok(HashMap::new());
    }

    let parsed: PipedInput = serde_json::from_str(&raw)?;
    Ok(parsed.variables)
}
