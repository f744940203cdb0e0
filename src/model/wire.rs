//! Payload shapes for the `inference.*` subjects
//!
//! Decoding is deliberately forgiving about shape (a single descriptor or an
//! array, a raw URL or a JSON string) but strict about content: anything that
//! does not parse is reported as a [`ParseError`] and the caller drops it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{ModelDescriptor, RequestPattern};

/// Errors decoding a bus payload
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Empty payload")]
    Empty,

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Message published on `inference.available`.
///
/// Unsolicited announcements only carry `selected_model`; replies to a
/// request also echo the `requested_model` they answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_model: Option<RequestPattern>,
    pub selected_model: ModelDescriptor,
}

impl AvailableMessage {
    pub fn announcement(selected: ModelDescriptor) -> Self {
        Self {
            requested_model: None,
            selected_model: selected,
        }
    }

    pub fn reply(requested: RequestPattern, selected: ModelDescriptor) -> Self {
        Self {
            requested_model: Some(requested),
            selected_model: selected,
        }
    }

    pub fn is_reply(&self) -> bool {
        self.requested_model.is_some()
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self, ParseError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Descriptors withdrawn on `inference.unavailable`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnavailablePayload {
    Many(Vec<ModelDescriptor>),
    One(ModelDescriptor),
}

impl UnavailablePayload {
    pub fn into_descriptors(self) -> Vec<ModelDescriptor> {
        match self {
            UnavailablePayload::Many(models) => models,
            UnavailablePayload::One(model) => vec![model],
        }
    }
}

/// Anything that can arrive on `inference.unavailable`.
///
/// Registries withdraw descriptors; external registrants withdraw a whole
/// backend by publishing its bare URL.
#[derive(Debug, Clone, PartialEq)]
pub enum UnavailableNotice {
    Backend(String),
    Models(Vec<ModelDescriptor>),
}

impl UnavailableNotice {
    pub fn from_slice(payload: &[u8]) -> Result<Self, ParseError> {
        let text = payload_text(payload)?;
        if text.starts_with('{') || text.starts_with('[') {
            let models: UnavailablePayload = serde_json::from_str(text)?;
            return Ok(UnavailableNotice::Models(models.into_descriptors()));
        }
        Ok(UnavailableNotice::Backend(backend_url_from_text(text)?))
    }
}

/// Decode the backend URL carried by `inference.new_server`.
///
/// The URL is normally sent as raw text; a JSON string literal is accepted
/// as well.
pub fn parse_backend_url(payload: &[u8]) -> Result<String, ParseError> {
    backend_url_from_text(payload_text(payload)?)
}

fn payload_text(payload: &[u8]) -> Result<&str, ParseError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| ParseError::InvalidUtf8)?
        .trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(text)
}

fn backend_url_from_text(text: &str) -> Result<String, ParseError> {
    let url = if text.starts_with('"') {
        serde_json::from_str::<String>(text)?
    } else {
        text.to_string()
    };
    let url = normalize_backend_url(&url);
    if url.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(url)
}

/// Canonical form of a backend URL: no surrounding whitespace, no trailing `/`
pub fn normalize_backend_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, url: &str) -> ModelDescriptor {
        ModelDescriptor::from_model_id(name, url)
    }

    #[test]
    fn test_available_reply_roundtrip_shape() {
        let msg = AvailableMessage::reply(RequestPattern::any(), descriptor("a.Q4.gguf", "http://b1"));
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("requested_model").is_some());
        assert_eq!(json["selected_model"]["quantization"], "Q4");
    }

    #[test]
    fn test_unsolicited_announcement_has_no_request() {
        let json = r#"{"selected_model": {"name": "m", "quantization": "", "url": "http://b1", "filename": "m"}}"#;
        let msg = AvailableMessage::from_slice(json.as_bytes()).unwrap();
        assert!(!msg.is_reply());
        assert_eq!(msg.selected_model.url, "http://b1");
    }

    #[test]
    fn test_unavailable_array_and_single() {
        let one = serde_json::to_vec(&descriptor("m", "http://b1")).unwrap();
        let many = serde_json::to_vec(&vec![descriptor("m", "http://b1"), descriptor("n", "http://b2")]).unwrap();

        match UnavailableNotice::from_slice(&one).unwrap() {
            UnavailableNotice::Models(models) => assert_eq!(models.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
        match UnavailableNotice::from_slice(&many).unwrap() {
            UnavailableNotice::Models(models) => assert_eq!(models.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unavailable_raw_url() {
        let notice = UnavailableNotice::from_slice(b"http://b1:8000/v1/\n").unwrap();
        assert_eq!(notice, UnavailableNotice::Backend("http://b1:8000/v1".to_string()));
    }

    #[test]
    fn test_unavailable_malformed_json() {
        assert!(matches!(
            UnavailableNotice::from_slice(b"{not json"),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn test_parse_backend_url_variants() {
        assert_eq!(parse_backend_url(b"http://b1/v1").unwrap(), "http://b1/v1");
        assert_eq!(parse_backend_url(br#""http://b1/v1""#).unwrap(), "http://b1/v1");
        assert!(matches!(parse_backend_url(b"   "), Err(ParseError::Empty)));
        assert!(matches!(parse_backend_url(&[0xff, 0xfe]), Err(ParseError::InvalidUtf8)));
    }
}
