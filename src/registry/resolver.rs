//! Resolution of a request pattern against the catalog
//!
//! Tie-breaks differ on purpose between the two modes and consumers rely on
//! them:
//! - `quantization` absent: the first name match wins
//! - `quantization` present, even empty: the last candidate matching both
//!   wins (an empty value matches any quantization)

use tracing::trace;

use super::catalog::Catalog;
use super::matcher::{CompiledPattern, PatternError};
use crate::model::{ModelDescriptor, RequestPattern};

/// Select at most one descriptor for `pattern`.
/// Pure function - no I/O.
pub fn resolve<'a>(
    pattern: &RequestPattern,
    catalog: &'a Catalog,
) -> Result<Option<&'a ModelDescriptor>, PatternError> {
    if pattern.is_any_model() {
        return Ok(catalog.first());
    }

    let compiled = CompiledPattern::compile(pattern)?;
    let candidates: Vec<&ModelDescriptor> = catalog
        .iter()
        .filter(|m| compiled.name_matches(m))
        .collect();
    trace!(
        "{} name candidates for '{}'",
        candidates.len(),
        pattern.name
    );

    if pattern.quantization.is_none() {
        return Ok(candidates.first().copied());
    }

    let mut selected = None;
    for candidate in candidates {
        if compiled.quantization_matches(candidate) {
            selected = Some(candidate);
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(name: &str, quantization: &str, url: &str) -> ModelDescriptor {
        ModelDescriptor {
            name: name.to_string(),
            quantization: quantization.to_string(),
            url: url.to_string(),
            filename: name.to_string(),
        }
    }

    fn catalog() -> Catalog {
        Catalog::from_models(vec![
            model("Llama-2-70B-Chat", "Q2_K", "http://b1"),
            model("Mistral-7B", "Q4_K", "http://b1"),
            model("Llama-2-70B-Chat", "Q4_K", "http://b2"),
            model("Llama-2-70B-Chat", "Q4_K", "http://b3"),
        ])
    }

    #[test]
    fn test_empty_name_returns_first() {
        let c = catalog();
        let selected = resolve(&RequestPattern::any(), &c).unwrap().unwrap();
        assert_eq!(selected, &c.models()[0]);
    }

    #[test]
    fn test_empty_name_ignores_quantization() {
        let c = catalog();
        let p = RequestPattern::any().with_quantization("Q4_K");
        assert_eq!(resolve(&p, &c).unwrap().unwrap().quantization, "Q2_K");
    }

    #[test]
    fn test_empty_catalog() {
        let c = Catalog::new();
        assert!(resolve(&RequestPattern::any(), &c).unwrap().is_none());
        assert!(resolve(&RequestPattern::named("x"), &c).unwrap().is_none());
    }

    #[test]
    fn test_name_only_returns_first_match() {
        let c = catalog();
        let selected = resolve(&RequestPattern::named("Llama-2-70B-Chat"), &c)
            .unwrap()
            .unwrap();
        assert_eq!(selected.url, "http://b1");
        assert_eq!(selected.quantization, "Q2_K");
    }

    #[test]
    fn test_quantization_returns_last_match() {
        let c = catalog();
        let p = RequestPattern::named("Llama-2-70B-Chat").with_quantization("Q4_K");
        let selected = resolve(&p, &c).unwrap().unwrap();
        assert_eq!(selected.url, "http://b3");
    }

    #[test]
    fn test_quantization_only_second_matches() {
        let c = Catalog::from_models(vec![
            model("m", "Q2_K", "http://b1"),
            model("m", "Q8_0", "http://b2"),
        ]);
        let p = RequestPattern::named("m").with_quantization("Q8_0");
        assert_eq!(resolve(&p, &c).unwrap().unwrap().url, "http://b2");
    }

    #[test]
    fn test_empty_quantization_returns_last_name_match() {
        let c = catalog();
        let p = RequestPattern::named("Llama-2-70B-Chat").with_quantization("");
        assert_eq!(resolve(&p, &c).unwrap().unwrap().url, "http://b3");

        let c = Catalog::from_models(vec![
            model("m.Q2_K.gguf", "Q2_K", "http://b1"),
            model("m.Q2_K.gguf", "Q2_K", "http://b2"),
        ]);
        let exact = RequestPattern::named("m.Q2_K.gguf").with_quantization("");
        assert_eq!(resolve(&exact, &c).unwrap().unwrap().url, "http://b2");

        let regex = RequestPattern::named("m\\.Q2")
            .with_name_regex()
            .with_quantization("");
        assert_eq!(resolve(&regex, &c).unwrap().unwrap().url, "http://b2");
    }

    #[test]
    fn test_empty_quantization_from_wire_request() {
        let c = catalog();
        let p: RequestPattern = serde_json::from_str(
            r#"{"name": "Llama-2-70B-Chat", "quantization": "", "use_regex_model_name": false, "use_regex_quantization": false}"#,
        )
        .unwrap();
        assert_eq!(resolve(&p, &c).unwrap().unwrap().url, "http://b3");
    }

    #[test]
    fn test_regex_name() {
        let c = catalog();
        let p = RequestPattern::named("Mis").with_name_regex();
        assert_eq!(resolve(&p, &c).unwrap().unwrap().name, "Mistral-7B");

        let p = RequestPattern::named("Llama.*")
            .with_name_regex()
            .with_quantization("Q2")
            .with_quantization_regex();
        assert_eq!(resolve(&p, &c).unwrap().unwrap().url, "http://b1");
    }

    #[test]
    fn test_no_match() {
        let c = catalog();
        assert!(resolve(&RequestPattern::named("Falcon"), &c).unwrap().is_none());

        let p = RequestPattern::named("Mistral-7B").with_quantization("Q8_0");
        assert!(resolve(&p, &c).unwrap().is_none());
    }

    #[test]
    fn test_bad_regex_is_rejected() {
        let c = catalog();
        let p = RequestPattern::named("[").with_name_regex();
        assert!(resolve(&p, &c).is_err());
    }
}
