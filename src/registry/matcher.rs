//! Pattern matching between request patterns and model descriptors
//!
//! Each field is matched independently: an empty pattern field matches
//! anything, an exact field requires string equality and a regex field must
//! match at the start of the value (not the whole value).

use regex::Regex;
use thiserror::Error;

use crate::model::{ModelDescriptor, RequestPattern};

/// A request carried a regular expression that does not compile
#[derive(Error, Debug)]
#[error("Invalid {field} pattern '{pattern}': {source}")]
pub struct PatternError {
    pub field: &'static str,
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

#[derive(Debug, Clone)]
enum FieldMatcher {
    Any,
    Exact(String),
    Prefix(Regex),
}

impl FieldMatcher {
    fn compile(
        field: &'static str,
        pattern: Option<&str>,
        use_regex: bool,
    ) -> Result<Self, PatternError> {
        match pattern {
            None | Some("") => Ok(FieldMatcher::Any),
            Some(p) if use_regex => Regex::new(&format!("^(?:{})", p))
                .map(FieldMatcher::Prefix)
                .map_err(|source| PatternError {
                    field,
                    pattern: p.to_string(),
                    source,
                }),
            Some(p) => Ok(FieldMatcher::Exact(p.to_string())),
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            FieldMatcher::Any => true,
            FieldMatcher::Exact(expected) => expected == value,
            FieldMatcher::Prefix(re) => re.is_match(value),
        }
    }
}

/// A request pattern with its regular expressions compiled once
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    name: FieldMatcher,
    quantization: FieldMatcher,
}

impl CompiledPattern {
    pub fn compile(pattern: &RequestPattern) -> Result<Self, PatternError> {
        Ok(Self {
            name: FieldMatcher::compile(
                "name",
                Some(pattern.name.as_str()),
                pattern.use_regex_model_name,
            )?,
            quantization: FieldMatcher::compile(
                "quantization",
                pattern.quantization_filter(),
                pattern.use_regex_quantization,
            )?,
        })
    }

    pub fn name_matches(&self, model: &ModelDescriptor) -> bool {
        self.name.matches(&model.name)
    }

    pub fn quantization_matches(&self, model: &ModelDescriptor) -> bool {
        self.quantization.matches(&model.quantization)
    }

    pub fn matches(&self, model: &ModelDescriptor) -> bool {
        self.name_matches(model) && self.quantization_matches(model)
    }
}

/// One-shot match of a pattern against a descriptor
pub fn matches(pattern: &RequestPattern, model: &ModelDescriptor) -> Result<bool, PatternError> {
    Ok(CompiledPattern::compile(pattern)?.matches(model))
}
