//! Payload template loading.
//!
//! A template file holds a single JSON object with a `template` key:
//!
//! ```json
//! {
//!   "template": {
//!     "id": "COUNTER_user",
//!     "age": "RANDOM_INT(18,65)",
//!     "active": true
//!   }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

/// Errors that can occur when loading a template.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Failed to read template file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse template: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct TemplateFile {
    template: Map<String, Value>,
}

/// Immutable field map that payloads are generated from.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    fields: Map<String, Value>,
}

impl Template {
    /// Loads a template file from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let template = Self::from_json(&content)?;

        info!(
            path = %path.display(),
            fields = template.len(),
            "Template loaded"
        );
        Ok(template)
    }

    /// Parses the `{"template": {...}}` document from a string.
    pub fn from_json(content: &str) -> Result<Self, TemplateError> {
        let file: TemplateFile = serde_json::from_str(content)?;
        Ok(Self::from_fields(file.template))
    }

    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
