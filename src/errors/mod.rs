// Module: Errors
// Validation error types shared by the definition parser and steps.

use std::fmt;

use thiserror::Error;

/// A single validation failure on a parsed step or definition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("'{0}' is required but not provided")]
    RequiredField(&'static str),
}

/// Collected validation failures for one step, labeled with the step kind.
#[derive(Debug)]
pub struct ValidationErrors {
    kind: &'static str,
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            errors: Vec::new(),
        }
    }

    /// Records a missing required field.
    pub fn require(&mut self, field: &'static str, present: bool) {
        if !present {
            self.errors.push(ValidationError::RequiredField(field));
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Converts the collection into a result: `Err` if anything was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.has_errors() {
            Err(self)
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        write!(
            f,
            "{} step: validation errors:\n\t{}",
            self.kind,
            messages.join("\n\t")
        )
    }
}

impl std::error::Error for ValidationErrors {}
