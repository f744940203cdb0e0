//! Subscriptions that drive the registry
//!
//! - `inference.requested`: resolve and reply
//! - `inference.new_server`: register a backend
//! - `inference.unavailable`: deregister a backend named by its bare URL
//!
//! Undecodable messages are logged and dropped; a bad message never ends a
//! subscription.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::Registry;
use crate::bus::{
    BusError, MessageBus, MessageStream, SUBJECT_NEW_SERVER, SUBJECT_REQUESTED,
    SUBJECT_UNAVAILABLE,
};
use crate::model::{parse_backend_url, ModelDescriptor, RequestPattern, UnavailableNotice};

/// Live subscriptions of a [`RequestListener`]
pub struct ListenerStreams {
    requested: MessageStream,
    new_server: MessageStream,
    unavailable: MessageStream,
}

#[derive(Clone)]
pub struct RequestListener {
    registry: Arc<Registry>,
}

impl RequestListener {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Subscribe to every subject the registry listens on.
    ///
    /// Kept separate from [`RequestListener::run`] so callers know the
    /// subscriptions exist before anything is published.
    pub async fn subscribe(bus: &dyn MessageBus) -> Result<ListenerStreams, BusError> {
        Ok(ListenerStreams {
            requested: bus.subscribe(SUBJECT_REQUESTED).await?,
            new_server: bus.subscribe(SUBJECT_NEW_SERVER).await?,
            unavailable: bus.subscribe(SUBJECT_UNAVAILABLE).await?,
        })
    }

    /// Dispatch messages until shutdown or until every subscription ends
    pub async fn run(self, mut streams: ListenerStreams, mut shutdown: watch::Receiver<bool>) {
        info!("Listening for inference requests");

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Request listener shutting down");
                        break;
                    }
                }
                Some(msg) = streams.requested.next() => {
                    self.handle_request(&msg.payload).await;
                }
                Some(msg) = streams.new_server.next() => {
                    self.handle_new_server(&msg.payload).await;
                }
                Some(msg) = streams.unavailable.next() => {
                    self.handle_unavailable(&msg.payload).await;
                }
                else => {
                    warn!("All registry subscriptions closed");
                    break;
                }
            }
        }
    }

    /// Resolve a request and reply when something matches.
    ///
    /// Returns the selected model. No match means no reply at all.
    pub async fn handle_request(&self, payload: &[u8]) -> Option<ModelDescriptor> {
        let pattern: RequestPattern = match serde_json::from_slice(payload) {
            Ok(p) => p,
            Err(e) => {
                warn!("Dropping malformed request: {}", e);
                return None;
            }
        };
        debug!("Received request: {:?}", pattern);

        let selected = match self.registry.resolve(&pattern).await {
            Ok(Some(model)) => model,
            Ok(None) => {
                debug!("No model matches request for '{}'", pattern.name);
                return None;
            }
            Err(e) => {
                warn!("Rejecting request: {}", e);
                return None;
            }
        };

        if let Err(e) = self.registry.announcer().reply(&pattern, &selected).await {
            warn!("Failed to reply to request for '{}': {}", pattern.name, e);
        }
        Some(selected)
    }

    /// Register the backend named by a `new_server` message
    pub async fn handle_new_server(&self, payload: &[u8]) -> Option<String> {
        match parse_backend_url(payload) {
            Ok(url) => {
                info!("New server announced: {}", url);
                self.registry.register_backend(&url).await;
                Some(url)
            }
            Err(e) => {
                warn!("Dropping malformed new_server message: {}", e);
                None
            }
        }
    }

    /// Deregister a backend withdrawn by URL.
    ///
    /// Descriptor withdrawals are what the registry itself publishes when a
    /// probe fails; the backend stays registered so later cycles can bring
    /// it back.
    pub async fn handle_unavailable(&self, payload: &[u8]) -> Option<String> {
        match UnavailableNotice::from_slice(payload) {
            Ok(UnavailableNotice::Backend(url)) => {
                if self.registry.deregister_backend(&url).await {
                    info!("Server unavailable: {}", url);
                } else {
                    debug!("Ignoring withdrawal of unknown server {}", url);
                }
                Some(url)
            }
            Ok(UnavailableNotice::Models(models)) => {
                debug!("Ignoring withdrawal of {} models", models.len());
                None
            }
            Err(e) => {
                warn!("Dropping malformed unavailable message: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, SUBJECT_AVAILABLE};
    use crate::model::AvailableMessage;
    use crate::registry::catalog::Catalog;
    use crate::registry::health_checker::mock::MockModelProbe;
    use crate::registry::RegistryConfig;

    async fn setup(models: Vec<ModelDescriptor>) -> (MemoryBus, Arc<Registry>, RequestListener) {
        let bus = MemoryBus::new();
        let (registry, _checker) = Registry::new(
            Arc::new(bus.clone()),
            Arc::new(MockModelProbe::new()),
            RegistryConfig::default(),
        );
        registry.catalog_store().replace(Catalog::from_models(models)).await;
        let registry = Arc::new(registry);
        let listener = RequestListener::new(registry.clone());
        (bus, registry, listener)
    }

    fn model(name: &str, url: &str) -> ModelDescriptor {
        ModelDescriptor::from_model_id(name, url)
    }

    #[tokio::test]
    async fn test_request_match_replies_on_available() {
        let (bus, _, listener) = setup(vec![
            model("org/Llama-2-7B.Q4_K.gguf", "http://b1"),
            model("org/Mistral-7B.Q8_0.gguf", "http://b2"),
        ])
        .await;

        let payload = br#"{"name": "org/Mistral.*", "use_regex_model_name": true, "use_regex_quantization": false}"#;
        let selected = listener.handle_request(payload).await.unwrap();
        assert_eq!(selected.url, "http://b2");

        let replies = bus.published_on(SUBJECT_AVAILABLE);
        assert_eq!(replies.len(), 1);
        let reply = AvailableMessage::from_slice(&replies[0].payload).unwrap();
        assert_eq!(reply.requested_model.unwrap().name, "org/Mistral.*");
        assert_eq!(reply.selected_model, selected);
    }

    #[tokio::test]
    async fn test_request_without_match_is_silent() {
        let (bus, _, listener) = setup(vec![model("a", "http://b1")]).await;
        assert!(listener.handle_request(br#"{"name": "b"}"#).await.is_none());
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_empty_request_returns_first() {
        let (_, _, listener) = setup(vec![model("a", "http://b1"), model("b", "http://b2")]).await;
        let payload = br#"{"name": "", "quantization": "", "use_regex_model_name": false, "use_regex_quantization": false}"#;
        assert_eq!(listener.handle_request(payload).await.unwrap().name, "a");
    }

    #[tokio::test]
    async fn test_malformed_and_bad_regex_requests_are_dropped() {
        let (bus, _, listener) = setup(vec![model("a", "http://b1")]).await;
        assert!(listener.handle_request(b"not json").await.is_none());
        assert!(listener
            .handle_request(br#"{"name": "(", "use_regex_model_name": true}"#)
            .await
            .is_none());
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_new_server_registers_backend() {
        let (_, registry, listener) = setup(vec![]).await;
        assert_eq!(
            listener.handle_new_server(b"http://b9:8000/v1").await.as_deref(),
            Some("http://b9:8000/v1")
        );
        assert!(registry.backends().contains("http://b9:8000/v1").await);
        assert!(listener.handle_new_server(b"").await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_url_deregisters_but_descriptors_do_not() {
        let (_, registry, listener) = setup(vec![]).await;
        registry.register_backend("http://b1").await;
        registry.register_backend("http://b2").await;

        let descriptors = serde_json::to_vec(&vec![model("a", "http://b2")]).unwrap();
        assert!(listener.handle_unavailable(&descriptors).await.is_none());
        assert!(registry.backends().contains("http://b2").await);

        listener.handle_unavailable(b"http://b1").await;
        assert!(!registry.backends().contains("http://b1").await);
    }
}
