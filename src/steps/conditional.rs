// Conditional step: evaluates a boolean guard and runs one of two branches.

use anyhow::{Context as _, Result};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use tracing::info;

use crate::context::ExecutionContext;
use crate::errors::ValidationErrors;
use crate::expr::CompiledExpr;

use super::{execute_sequence, StepList};

/// An `if` step. The condition is compiled once on first execution and the
/// cached program is reused on every later run.
#[derive(Debug, Deserialize)]
pub struct IfStep {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub then: Option<StepList>,
    #[serde(default, rename = "else")]
    pub otherwise: Option<StepList>,
    #[serde(skip)]
    compiled: OnceCell<CompiledExpr>,
}

impl IfStep {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new("if");
        errors.require("name", !self.name.is_empty());
        errors.require("condition", !self.condition.is_empty());
        errors.require("then", self.then.is_some());
        errors.into_result()
    }

    pub async fn execute(&self, context: &mut ExecutionContext) -> Result<()> {
        let program = self
            .compiled
            .get_or_try_init(|| CompiledExpr::compile(&self.condition))
            .with_context(|| format!("if step '{}'", self.name))?;

        let branch = program
            .run_bool(context.store.snapshot())
            .with_context(|| format!("if step '{}'", self.name))?;

        let steps = if branch {
            self.then.as_deref()
        } else {
            self.otherwise.as_deref()
        };

        match steps {
            Some(steps) => execute_sequence(steps, context).await,
            None => {
                info!(step = %self.name, "skipping conditional");
                Ok(())
            }
        }
    }
}
