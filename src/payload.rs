//! JSON payload generation from a shared template.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::placeholder::{Expander, PlaceholderError};
use crate::template::Template;

/// Errors that abort generation of a single payload.
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("field '{field}': {cause}")]
    FieldExpansionFailed {
        field: String,
        #[source]
        cause: PlaceholderError,
    },

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Produces a fresh payload from the template on every call.
///
/// String fields go through the [`Expander`]; every other value is copied
/// verbatim. The template itself is never mutated, so one `Arc<Template>` is
/// shared by the generators of all workers.
pub struct PayloadGenerator<R = StdRng> {
    template: Arc<Template>,
    expander: Expander<R>,
}

impl<R: Rng> PayloadGenerator<R> {
    pub fn new(template: Arc<Template>, expander: Expander<R>) -> Self {
        Self { template, expander }
    }

    /// Expands every field into a JSON object.
    pub fn generate_value(&mut self) -> Result<Value, PayloadError> {
        let mut processed = Map::with_capacity(self.template.len());

        for (field, value) in self.template.fields() {
            let resolved = match value {
                Value::String(raw) => self.expander.expand(raw).map_err(|cause| {
                    PayloadError::FieldExpansionFailed {
                        field: field.clone(),
                        cause,
                    }
                })?,
                other => other.clone(),
            };
            processed.insert(field.clone(), resolved);
        }

        Ok(Value::Object(processed))
    }

    /// Expands the template and serializes it as compact JSON bytes.
    pub fn generate(&mut self) -> Result<Vec<u8>, PayloadError> {
        let value = self.generate_value()?;
        Ok(serde_json::to_vec(&value)?)
    }
}
