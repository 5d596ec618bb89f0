// While step: drives a body sequence under a compiled boolean guard with
// loop-scoped init variables and per-iteration updates.

use std::collections::HashMap;

use anyhow::{bail, Context as _, Result};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::context::ExecutionContext;
use crate::errors::ValidationErrors;
use crate::expr::{CompiledExpr, ExprError};

use super::{execute_sequence, StepList};

/// A `while` step.
///
/// `init` seeds loop variables that must not already exist in the store;
/// they are removed again on every exit, error exits included. The condition
/// and update programs are compiled on first entry and cached.
#[derive(Debug, Deserialize)]
pub struct WhileStep {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub init: HashMap<String, Value>,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub update: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<StepList>,
    #[serde(skip)]
    compiled_condition: OnceCell<CompiledExpr>,
    #[serde(skip)]
    compiled_update: OnceCell<HashMap<String, CompiledExpr>>,
}

impl WhileStep {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new("while");
        errors.require("name", !self.name.is_empty());
        errors.require("condition", !self.condition.is_empty());
        errors.require("body", self.body.is_some());
        errors.into_result()
    }

    pub async fn execute(&self, context: &mut ExecutionContext) -> Result<()> {
        for key in self.init.keys() {
            if context.store.contains(key) {
                bail!(
                    "while step '{}': initialization error: key '{}' already exists in context",
                    self.name,
                    key
                );
            }
        }

        for (key, value) in &self.init {
            context.store.set(key.clone(), value.clone());
        }

        let outcome = self.run_loop(context).await;

        for key in self.init.keys() {
            context.store.remove(key);
        }

        outcome
    }

    async fn run_loop(&self, context: &mut ExecutionContext) -> Result<()> {
        let condition = self
            .compiled_condition
            .get_or_try_init(|| CompiledExpr::compile(&self.condition))
            .with_context(|| format!("while step '{}'", self.name))?;

        let updates = self
            .compiled_update
            .get_or_try_init(|| -> Result<_, ExprError> {
                self.update
                    .iter()
                    .map(|(key, source)| Ok((key.clone(), CompiledExpr::compile(source)?)))
                    .collect()
            })
            .with_context(|| format!("while step '{}'", self.name))?;

        if updates.is_empty() {
            error!(step = %self.name, "no loop update is set");
        }

        loop {
            let proceed = condition
                .run_bool(context.store.snapshot())
                .with_context(|| format!("while step '{}'", self.name))?;

            if !proceed {
                debug!(step = %self.name, "exiting loop: condition evaluated to false");
                break;
            }

            debug!(step = %self.name, "executing while body");
            execute_sequence(self.body.as_deref().unwrap_or(&[]), context).await?;

            for (key, program) in updates {
                let value = program
                    .run(context.store.snapshot())
                    .with_context(|| format!("while step '{}'", self.name))?;

                debug!(step = %self.name, variable = %key, value = %value, "loop variable updated");
                context.store.set(key.clone(), value);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::FakeClient;
    use serde_json::json;
    use std::sync::Arc;

    fn step(yaml: &str) -> WhileStep {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn context(client: Arc<FakeClient>) -> ExecutionContext {
        ExecutionContext::builder()
            .http_client(client)
            .global_options("https://api.example".to_string(), Default::default())
            .build()
            .unwrap()
    }

    #[test]
    fn test_validate_requires_condition_and_body() {
        let incomplete = step("name: loop\n");
        let message = incomplete.validate().unwrap_err().to_string();

        assert!(message.contains("'condition' is required"));
        assert!(message.contains("'body' is required"));
    }

    #[tokio::test]
    async fn test_counter_loop_exits_and_cleans_init() {
        let client = Arc::new(FakeClient::returning(200, "{}"));
        let mut ctx = context(client);

        let counter = step(
            r#"
name: counter
init:
  i: 0
condition: "i < 3"
update:
  i: "i + 1"
body: []
"#,
        );

        counter.execute(&mut ctx).await.unwrap();
        assert!(!ctx.store.contains("i"));
    }

    #[tokio::test]
    async fn test_body_runs_once_per_iteration() {
        let client = Arc::new(FakeClient::returning(200, "{}"));
        let mut ctx = context(client.clone());

        let poll = step(
            r#"
name: poll
init:
  i: 0
condition: "i < 2"
update:
  i: "i + 1"
body:
  - type: http
    name: ping
    url: ping
    method: GET
"#,
        );

        poll.execute(&mut ctx).await.unwrap();
        assert_eq!(client.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_init_rejects_existing_key() {
        let client = Arc::new(FakeClient::returning(200, "{}"));
        let mut ctx = context(client);
        ctx.store.set("i", json!(9));

        let counter = step(
            "name: counter\ninit:\n  i: 0\ncondition: \"i < 3\"\nupdate:\n  i: \"i + 1\"\nbody: []\n",
        );

        let err = counter.execute(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("key 'i' already exists"));
        // The pre-existing variable is untouched.
        assert_eq!(ctx.store.get("i"), Some(&json!(9)));
    }

    #[tokio::test]
    async fn test_init_removed_after_body_failure() {
        let client = Arc::new(FakeClient::failing("down"));
        let mut ctx = context(client);

        let poll = step(
            r#"
name: poll
init:
  i: 0
condition: "i < 3"
update:
  i: "i + 1"
body:
  - type: http
    name: ping
    url: ping
    method: GET
"#,
        );

        let err = poll.execute(&mut ctx).await.unwrap_err();
        assert!(format!("{:#}", err).contains("http request 'ping'"));
        assert!(!ctx.store.contains("i"));
    }

    #[tokio::test]
    async fn test_false_condition_skips_body() {
        let client = Arc::new(FakeClient::returning(200, "{}"));
        let mut ctx = context(client.clone());
        ctx.store.set("done", json!(true));

        let wait = step(
            r#"
name: wait
condition: "!done"
update:
  done: "done"
body:
  - type: http
    name: ping
    url: ping
    method: GET
"#,
        );

        wait.execute(&mut ctx).await.unwrap();
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_update_observes_body_projections() {
        let client = Arc::new(FakeClient::returning(200, r#"{"Next":false}"#));
        let mut ctx = context(client.clone());

        let follow = step(
            r#"
name: follow
init:
  more: true
condition: more
update:
  more: has_next
body:
  - type: http
    name: page
    url: items
    method: GET
    store:
      has_next: response.Next
"#,
        );

        follow.execute(&mut ctx).await.unwrap();

        assert_eq!(client.requests().len(), 1);
        assert!(!ctx.store.contains("more"));
        // Projections made by the body survive the loop.
        assert_eq!(ctx.store.get("has_next"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_condition_error_mid_loop_still_cleans_init() {
        let client = Arc::new(FakeClient::returning(200, "{}"));
        let mut ctx = context(client);

        // The first evaluation sees the init value; the update replaces it
        // with a string, so the second evaluation fails the bool check.
        let flaky = step(
            r#"
name: flaky
init:
  go: true
condition: go
update:
  go: "'not a bool'"
body: []
"#,
        );

        let err = flaky.execute(&mut ctx).await.unwrap_err();
        assert!(format!("{:#}", err).contains("while step 'flaky'"));
        assert!(!ctx.store.contains("go"));
    }

    #[tokio::test]
    async fn test_programs_are_compiled_once() {
        let client = Arc::new(FakeClient::returning(200, "{}"));
        let mut ctx = context(client);

        let counter = step(
            "name: counter\ninit:\n  i: 0\ncondition: \"i < 1\"\nupdate:\n  i: \"i + 1\"\nbody: []\n",
        );

        counter.execute(&mut ctx).await.unwrap();
        let first = counter.compiled_condition.get().unwrap() as *const CompiledExpr;

        counter.execute(&mut ctx).await.unwrap();
        let second = counter.compiled_condition.get().unwrap() as *const CompiledExpr;

        assert_eq!(first, second);
    }
}
