//! Shared data model for backends, models and requests
//!
//! Everything here is pure data: no I/O, no locking. The registry, the
//! consumer mirror and the CLI all speak in these types.

pub mod wire;

use serde::{Deserialize, Serialize};

pub use wire::{
    normalize_backend_url, parse_backend_url, AvailableMessage, ParseError, UnavailableNotice,
    UnavailablePayload,
};

/// One (model, backend) pairing as seen on the bus
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model identifier exactly as reported by the backend
    #[serde(default)]
    pub name: String,
    /// Quantization token, e.g. "Q4_K"
    #[serde(default)]
    pub quantization: String,
    /// Base URL of the backend serving this model
    pub url: String,
    /// Last path segment of the model identifier
    #[serde(default)]
    pub filename: String,
}

impl ModelDescriptor {
    /// Derive a descriptor from a backend-reported model id.
    ///
    /// The filename is the last `/` segment of the id and the quantization
    /// is the second-to-last `.` segment. An id without any `.` has an empty
    /// quantization.
    pub fn from_model_id(model_id: &str, backend_url: &str) -> Self {
        let filename = model_id.rsplit('/').next().unwrap_or(model_id).to_string();

        let segments: Vec<&str> = model_id.split('.').collect();
        let quantization = if segments.len() >= 2 {
            segments[segments.len() - 2].to_string()
        } else {
            String::new()
        };

        Self {
            name: model_id.to_string(),
            quantization,
            url: backend_url.to_string(),
            filename,
        }
    }

    /// Identity of an entry: one model on one backend
    pub fn key(&self) -> (&str, &str) {
        (&self.url, &self.name)
    }
}

/// What a consumer is looking for.
///
/// An empty `name` means any model; an absent or empty `quantization` means
/// any quantization. Either field can be a regular expression, matched from
/// the start of the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPattern {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<String>,
    #[serde(default)]
    pub use_regex_model_name: bool,
    #[serde(default)]
    pub use_regex_quantization: bool,
}

impl RequestPattern {
    /// Pattern that matches any model on any backend
    pub fn any() -> Self {
        Self::default()
    }

    /// Exact match on model name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Treat the name as a regular expression
    pub fn with_name_regex(mut self) -> Self {
        self.use_regex_model_name = true;
        self
    }

    /// Restrict the quantization
    pub fn with_quantization(mut self, quantization: impl Into<String>) -> Self {
        self.quantization = Some(quantization.into());
        self
    }

    /// Treat the quantization as a regular expression
    pub fn with_quantization_regex(mut self) -> Self {
        self.use_regex_quantization = true;
        self
    }

    /// The quantization constraint, if there is a non-empty one
    pub fn quantization_filter(&self) -> Option<&str> {
        self.quantization.as_deref().filter(|q| !q.is_empty())
    }

    /// Whether this pattern places no constraint on the model name
    pub fn is_any_model(&self) -> bool {
        self.name.is_empty()
    }
}
