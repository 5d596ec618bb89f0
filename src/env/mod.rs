// Module: Env
// Pre-execution registry of variable and header expressions.

use std::collections::HashMap;

use anyhow::{bail, Context as _, Result};
use serde_json::Value;

use crate::expr::{self, CompiledExpr};

/// Collects variable and header expressions from every source (CLI flags,
/// `--env` JSON, config) before execution.
///
/// Names must be unique across sources: a duplicate variable or header
/// definition is rejected when it is added. Per-step headers may still
/// override a global name at request time.
#[derive(Debug, Default)]
pub struct Env {
    var_exprs: HashMap<String, String>,
    header_exprs: HashMap<String, Vec<String>>,
}

impl Env {
    /// Registers variable expressions, rejecting duplicates.
    pub fn add_vars(&mut self, exprs: HashMap<String, String>) -> Result<()> {
        for (name, source) in exprs {
            if self.var_exprs.contains_key(&name) {
                bail!("variable '{}' is already defined", name);
            }
            self.var_exprs.insert(name, source);
        }

        Ok(())
    }

    /// Registers header expressions, rejecting duplicates.
    pub fn add_headers(&mut self, exprs: HashMap<String, Vec<String>>) -> Result<()> {
        for (name, sources) in exprs {
            if self.header_exprs.contains_key(&name) {
                bail!("header '{}' is already defined", name);
            }
            self.header_exprs.insert(name, sources);
        }

        Ok(())
    }

    pub fn has_var(&self, name: &str) -> bool {
        self.var_exprs.contains_key(name)
    }

    /// Evaluates every variable expression with `input` as the environment,
    /// then every header expression with the compiled variables as the
    /// environment, so headers may reference variables. Header expressions
    /// must produce strings.
    pub fn compile(
        &self,
        input: &HashMap<String, Value>,
    ) -> Result<(HashMap<String, Value>, HashMap<String, Vec<String>>)> {
        let mut vars = HashMap::with_capacity(self.var_exprs.len());
        for (name, source) in &self.var_exprs {
            let value =
                expr::eval(source, input).with_context(|| format!("variable '{}'", name))?;
            vars.insert(name.clone(), value);
        }

        let mut headers = HashMap::with_capacity(self.header_exprs.len());
        for (name, sources) in &self.header_exprs {
            let mut values = Vec::with_capacity(sources.len());

            for source in sources {
                let program = CompiledExpr::compile(source)
                    .with_context(|| format!("header '{}'", name))?;
                let value = program
                    .run_string(&vars)
                    .with_context(|| format!("header '{}'", name))?;
                values.push(value);
            }

            headers.insert(name.clone(), values);
        }

        Ok((vars, headers))
    }
}
