// ForEach step: iterates a body sequence over the items of a list
// expression, binding each item to a loop-scoped variable.

use anyhow::{bail, Context as _, Result};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::errors::ValidationErrors;
use crate::expr::CompiledExpr;

use super::{execute_sequence, StepList};

/// A `forEach` step.
///
/// The list expression must produce a sequence; it is evaluated once per
/// execution. The `as` binding must not already exist and is removed again
/// on every exit, error exits included.
#[derive(Debug, Deserialize)]
pub struct ForEachStep {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub list: String,
    #[serde(default, rename = "as")]
    pub binding: String,
    #[serde(default)]
    pub body: Option<StepList>,
    #[serde(skip)]
    compiled_list: OnceCell<CompiledExpr>,
}

impl ForEachStep {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new("forEach");
        errors.require("name", !self.name.is_empty());
        errors.require("list", !self.list.is_empty());
        errors.require("as", !self.binding.is_empty());
        errors.require("body", self.body.is_some());
        errors.into_result()
    }

    pub async fn execute(&self, context: &mut ExecutionContext) -> Result<()> {
        debug!(step = %self.name, "executing forEach step");

        if context.store.contains(&self.binding) {
            bail!(
                "forEach step '{}': variable '{}' is already defined",
                self.name,
                self.binding
            );
        }

        let program = self
            .compiled_list
            .get_or_try_init(|| CompiledExpr::compile(&self.list))
            .with_context(|| format!("forEach step '{}'", self.name))?;

        let items = program
            .run_list(context.store.snapshot())
            .with_context(|| format!("forEach step '{}'", self.name))?;

        let outcome = self.run_items(items, context).await;

        context.store.remove(&self.binding);

        outcome
    }

    async fn run_items(
        &self,
        items: Vec<serde_json::Value>,
        context: &mut ExecutionContext,
    ) -> Result<()> {
        for item in items {
            debug!(step = %self.name, item = %item, "forEach iteration");
            context.store.set(self.binding.clone(), item);

            execute_sequence(self.body.as_deref().unwrap_or(&[]), context).await?;
        }

        Ok(())
    }
}
