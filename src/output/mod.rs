// Module: Output
// Projects final variables into the JSON document written on success.

use std::collections::HashMap;

use anyhow::{bail, Context as _, Result};
use serde_json::{json, Value};

use crate::expr;

/// Evaluates the output projection over the final variable snapshot.
///
/// With `output_all` the whole snapshot is emitted; otherwise each `output`
/// expression is evaluated and collected under its name. The result is the
/// pretty-printed `{"Variables": …}` document, without a trailing newline.
pub fn project(
    output: Option<&HashMap<String, String>>,
    vars: &HashMap<String, Value>,
    output_all: bool,
) -> Result<String> {
    let selected: HashMap<String, Value> = if output_all {
        vars.clone()
    } else {
        let Some(output) = output else {
            bail!("output error: please ensure output field exists");
        };

        let mut selected = HashMap::with_capacity(output.len());
        for (name, source) in output {
            let value =
                expr::eval(source, vars).with_context(|| format!("output '{}'", name))?;
            selected.insert(name.clone(), value);
        }
        selected
    };

    serde_json::to_string_pretty(&json!({ "Variables": selected }))
        .context("failed to encode output as json")
}
