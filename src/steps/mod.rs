// Module: Steps
// The polymorphic step model: YAML dispatch, validation, and execution.

pub mod conditional;
pub mod for_each;
pub mod http;
pub mod while_loop;

use std::future::Future;
use std::ops::Deref;
use std::path::Path;
use std::pin::Pin;

use anyhow::Result;
use serde::de::{self, Deserialize, Deserializer};
use tracing::debug;

use crate::context::ExecutionContext;
use crate::errors::ValidationErrors;

use conditional::IfStep;
use for_each::ForEachStep;
use http::HttpStep;
use while_loop::WhileStep;

/// A single unit of execution in a workflow.
#[derive(Debug)]
pub enum Step {
    Http(HttpStep),
    If(IfStep),
    While(WhileStep),
    ForEach(ForEachStep),
}

impl Step {
    pub fn name(&self) -> &str {
        match self {
            Self::Http(step) => &step.name,
            Self::If(step) => &step.name,
            Self::While(step) => &step.name,
            Self::ForEach(step) => &step.name,
        }
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            Self::Http(step) => step.validate(),
            Self::If(step) => step.validate(),
            Self::While(step) => step.validate(),
            Self::ForEach(step) => step.validate(),
        }
    }

    /// Executes the step against the shared context.
    ///
    /// Returns a boxed future because control-flow steps re-enter step
    /// execution for their child sequences.
    pub fn execute<'a>(
        &'a self,
        context: &'a mut ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + 'a>> {
        Box::pin(async move {
            match self {
                Self::Http(step) => step.execute(context).await,
                Self::If(step) => step.execute(context).await,
                Self::While(step) => step.execute(context).await,
                Self::ForEach(step) => step.execute(context).await,
            }
        })
    }

    fn finalize(&mut self, base_dir: &Path) -> Result<()> {
        match self {
            Self::Http(step) => step.finalize(base_dir),
            Self::If(step) => {
                if let Some(then) = &mut step.then {
                    then.finalize(base_dir)?;
                }
                if let Some(otherwise) = &mut step.otherwise {
                    otherwise.finalize(base_dir)?;
                }
                Ok(())
            }
            Self::While(step) => match &mut step.body {
                Some(body) => body.finalize(base_dir),
                None => Ok(()),
            },
            Self::ForEach(step) => match &mut step.body {
                Some(body) => body.finalize(base_dir),
                None => Ok(()),
            },
        }
    }
}

/// An ordered list of steps.
///
/// Deserialization is two-pass: each entry is first read as a raw node, the
/// `type` field selects the concrete step, and the typed step is then
/// decoded and validated. Decode and validation failures are collected per
/// step and reported together; an unknown `type` aborts immediately.
#[derive(Debug, Default)]
pub struct StepList(Vec<Step>);

impl StepList {
    /// Resolves file-backed step resources against the config directory.
    pub fn finalize(&mut self, base_dir: &Path) -> Result<()> {
        for step in &mut self.0 {
            step.finalize(base_dir)?;
        }
        Ok(())
    }
}

impl Deref for StepList {
    type Target = [Step];

    fn deref(&self) -> &[Step] {
        &self.0
    }
}

impl<'de> Deserialize<'de> for StepList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Vec<serde_yaml::Value> = Vec::deserialize(deserializer)?;

        let mut steps = Vec::with_capacity(raw.len());
        let mut errors: Vec<String> = Vec::new();

        for (index, node) in raw.into_iter().enumerate() {
            let Some(kind) = node
                .get("type")
                .and_then(serde_yaml::Value::as_str)
                .map(str::to_owned)
            else {
                return Err(de::Error::custom(format!(
                    "step {}: missing 'type' field",
                    index + 1
                )));
            };

            let decoded = match kind.as_str() {
                "http" => serde_yaml::from_value::<HttpStep>(node).map(Step::Http),
                "if" => serde_yaml::from_value::<IfStep>(node).map(Step::If),
                "while" => serde_yaml::from_value::<WhileStep>(node).map(Step::While),
                "forEach" => serde_yaml::from_value::<ForEachStep>(node).map(Step::ForEach),
                other => {
                    return Err(de::Error::custom(format!(
                        "unsupported type '{}' for step",
                        other
                    )));
                }
            };

            match decoded {
                Ok(step) => match step.validate() {
                    Ok(()) => steps.push(step),
                    Err(e) => errors.push(e.to_string()),
                },
                Err(e) => errors.push(e.to_string()),
            }
        }

        if !errors.is_empty() {
            return Err(de::Error::custom(format!(
                "steps:\n {}",
                errors.join("\n ")
            )));
        }

        Ok(Self(steps))
    }
}

/// Runs the given steps in order, stopping at the first failure.
pub async fn execute_sequence(steps: &[Step], context: &mut ExecutionContext) -> Result<()> {
    for step in steps {
        debug!(step = %step.name(), "executing step");
        step.execute(context).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_steps(yaml: &str) -> Result<StepList, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    #[test]
    fn test_dispatch_on_type() {
        let steps = parse_steps(
            r#"
- type: http
  name: fetch
  url: users
  method: GET
- type: if
  name: guard
  condition: "x > 0"
  then: []
- type: while
  name: loop
  condition: "x < 3"
  body: []
- type: forEach
  name: iterate
  list: "[1, 2]"
  as: item
  body: []
"#,
        )
        .unwrap();

        assert_eq!(steps.len(), 4);
        assert!(matches!(steps[0], Step::Http(_)));
        assert!(matches!(steps[1], Step::If(_)));
        assert!(matches!(steps[2], Step::While(_)));
        assert!(matches!(steps[3], Step::ForEach(_)));
        assert_eq!(steps[0].name(), "fetch");
    }

    #[test]
    fn test_unknown_type_is_fatal() {
        let err = parse_steps("- type: graphql\n  name: nope\n").unwrap_err();
        assert!(err.to_string().contains("unsupported type 'graphql'"));
    }

    #[test]
    fn test_missing_type_is_fatal() {
        let err = parse_steps("- name: anonymous\n").unwrap_err();
        assert!(err.to_string().contains("missing 'type'"));
    }

    #[test]
    fn test_validation_failures_are_collected() {
        let err = parse_steps(
            r#"
- type: http
  name: first
  method: GET
- type: while
  name: second
  body: []
"#,
        )
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("'url' is required but not provided"));
        assert!(message.contains("'condition' is required but not provided"));
    }

    #[tokio::test]
    async fn test_sequence_stops_at_first_failure() {
        use crate::client::testing::FakeClient;
        use std::sync::Arc;

        let client = Arc::new(FakeClient::failing("down"));
        let mut context = ExecutionContext::builder()
            .http_client(client.clone())
            .global_options("https://api.example".to_string(), Default::default())
            .build()
            .unwrap();

        let steps = parse_steps(
            r#"
- type: http
  name: first
  url: one
  method: GET
- type: http
  name: second
  url: two
  method: GET
"#,
        )
        .unwrap();

        let err = execute_sequence(&steps, &mut context).await.unwrap_err();

        assert!(format!("{:#}", err).contains("http request 'first'"));
        assert_eq!(client.requests().len(), 1);
    }

    #[test]
    fn test_deeply_nested_steps_decode() {
        let steps = parse_steps(
            r#"
- type: while
  name: outer
  condition: "more"
  body:
    - type: forEach
      name: middle
      list: "pages"
      as: page
      body:
        - type: http
          name: leaf
          url: pages/:page
          method: GET
"#,
        )
        .unwrap();

        let Step::While(outer) = &steps[0] else {
            panic!("expected while step");
        };
        let Step::ForEach(middle) = &outer.body.as_deref().unwrap()[0] else {
            panic!("expected forEach step");
        };
        assert_eq!(middle.body.as_deref().unwrap().len(), 1);
    }

    #[test]
    fn test_nested_steps_decode() {
        let steps = parse_steps(
            r#"
- type: if
  name: outer
  condition: "ready"
  then:
    - type: http
      name: inner
      url: ping
      method: GET
  else:
    - type: forEach
      name: fallback
      list: "ids"
      as: id
      body: []
"#,
        )
        .unwrap();

        let Step::If(conditional) = &steps[0] else {
            panic!("expected if step");
        };
        assert_eq!(conditional.then.as_deref().unwrap().len(), 1);
        assert_eq!(conditional.otherwise.as_deref().unwrap().len(), 1);
    }
}
