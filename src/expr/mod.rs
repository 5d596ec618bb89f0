// Module: Expr
// Compiles and evaluates CEL expressions against the variable store.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cel::objects::{Key, Map};
use cel::{Context, Program, Value as CelValue};
use serde_json::{Number, Value};
use thiserror::Error;

/// Errors surfaced while compiling or evaluating an expression.
#[derive(Debug, Error)]
pub enum ExprError {
    #[error("invalid expression '{expr}': {message}")]
    Parse { expr: String, message: String },

    #[error("failed evaluating expression '{expr}': {message}")]
    Eval { expr: String, message: String },

    #[error("expression '{expr}' should evaluate to {expected}")]
    Kind {
        expr: String,
        expected: &'static str,
    },

    #[error("expression '{expr}' produced a value that cannot be represented as JSON")]
    Unrepresentable { expr: String },
}

/// A compiled, reusable expression program.
///
/// Compilation is context-free; the variable environment is supplied on
/// every run. Evaluation is pure: a run never mutates the environment.
pub struct CompiledExpr {
    source: String,
    program: Program,
}

impl fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompiledExpr").field(&self.source).finish()
    }
}

impl CompiledExpr {
    /// Compiles an expression source into a reusable program.
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        let program = Program::compile(source).map_err(|e| ExprError::Parse {
            expr: source.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            source: source.to_string(),
            program,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Runs the program against the given variables and returns the result
    /// as a JSON value.
    pub fn run(&self, vars: &HashMap<String, Value>) -> Result<Value, ExprError> {
        let out = self.run_raw(vars)?;

        cel_to_json(&out).ok_or_else(|| ExprError::Unrepresentable {
            expr: self.source.clone(),
        })
    }

    /// Runs the program, requiring a boolean result.
    pub fn run_bool(&self, vars: &HashMap<String, Value>) -> Result<bool, ExprError> {
        match self.run_raw(vars)? {
            CelValue::Bool(b) => Ok(b),
            _ => Err(ExprError::Kind {
                expr: self.source.clone(),
                expected: "a boolean",
            }),
        }
    }

    /// Runs the program, requiring a list result.
    pub fn run_list(&self, vars: &HashMap<String, Value>) -> Result<Vec<Value>, ExprError> {
        let out = self.run_raw(vars)?;

        let CelValue::List(items) = &out else {
            return Err(ExprError::Kind {
                expr: self.source.clone(),
                expected: "a list",
            });
        };

        items
            .iter()
            .map(|item| {
                cel_to_json(item).ok_or_else(|| ExprError::Unrepresentable {
                    expr: self.source.clone(),
                })
            })
            .collect()
    }

    /// Runs the program, requiring a string result.
    pub fn run_string(&self, vars: &HashMap<String, Value>) -> Result<String, ExprError> {
        match self.run_raw(vars)? {
            CelValue::String(s) => Ok(s.as_ref().clone()),
            _ => Err(ExprError::Kind {
                expr: self.source.clone(),
                expected: "a string",
            }),
        }
    }

    fn run_raw(&self, vars: &HashMap<String, Value>) -> Result<CelValue, ExprError> {
        let ctx = build_context(vars);

        self.program.execute(&ctx).map_err(|e| ExprError::Eval {
            expr: self.source.clone(),
            message: e.to_string(),
        })
    }
}

/// Compile-and-run convenience for expressions evaluated only once.
pub fn eval(source: &str, vars: &HashMap<String, Value>) -> Result<Value, ExprError> {
    CompiledExpr::compile(source)?.run(vars)
}

fn build_context(vars: &HashMap<String, Value>) -> Context<'static> {
    let mut ctx = Context::default();

    for (name, value) in vars {
        ctx.add_variable_from_value(name.clone(), json_to_cel(value));
    }

    ctx
}

fn json_to_cel(value: &Value) -> CelValue {
    match value {
        Value::Null => CelValue::Null,
        Value::Bool(b) => CelValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                CelValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                CelValue::UInt(u)
            } else {
                CelValue::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => CelValue::String(Arc::new(s.clone())),
        Value::Array(items) => CelValue::List(Arc::new(items.iter().map(json_to_cel).collect())),
        Value::Object(fields) => {
            let map: HashMap<Key, CelValue> = fields
                .iter()
                .map(|(k, v)| (Key::String(Arc::new(k.clone())), json_to_cel(v)))
                .collect();

            CelValue::Map(Map { map: Arc::new(map) })
        }
    }
}

fn cel_to_json(value: &CelValue) -> Option<Value> {
    match value {
        CelValue::Null => Some(Value::Null),
        CelValue::Bool(b) => Some(Value::Bool(*b)),
        CelValue::Int(i) => Some(Value::from(*i)),
        CelValue::UInt(u) => Some(Value::from(*u)),
        CelValue::Float(f) => Number::from_f64(*f).map(Value::Number),
        CelValue::String(s) => Some(Value::String(s.as_ref().clone())),
        CelValue::List(items) => items
            .iter()
            .map(cel_to_json)
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        CelValue::Map(map) => {
            let mut fields = serde_json::Map::with_capacity(map.map.len());

            for (key, val) in map.map.iter() {
                let name = match key {
                    Key::String(s) => s.as_ref().clone(),
                    Key::Int(i) => i.to_string(),
                    Key::Uint(u) => u.to_string(),
                    Key::Bool(b) => b.to_string(),
                };
                fields.insert(name, cel_to_json(val)?);
            }

            Some(Value::Object(fields))
        }
        _ => None,
    }
}
