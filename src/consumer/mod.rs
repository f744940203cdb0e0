//! Consumer-side mirror of the registry
//!
//! A consumer publishes the pattern it wants, then keeps a private list of
//! the backends the registry offers in reply. Replies are checked again
//! against the consumer's own pattern before they are accepted, so a
//! registry that resolves differently cannot hand over a model the consumer
//! did not ask for.
//!
//! Changes are reported as [`MirrorEvent`]s on a channel.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{
    publish_json, BusError, MessageBus, SUBJECT_AVAILABLE, SUBJECT_REQUESTED, SUBJECT_UNAVAILABLE,
};
use crate::model::{AvailableMessage, ModelDescriptor, ParseError, RequestPattern, UnavailableNotice};
use crate::registry::{CompiledPattern, PatternError};

/// Errors setting up a mirror
#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// Change to the mirror's list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorEvent {
    /// A reply matching our pattern was accepted
    ServerAvailable(ModelDescriptor),
    /// A held entry was withdrawn
    ServerUnavailable(ModelDescriptor),
}

/// The consumer's private list and its filter
pub struct ConsumerMirror {
    pattern: RequestPattern,
    matcher: CompiledPattern,
    models: Vec<ModelDescriptor>,
    events: mpsc::UnboundedSender<MirrorEvent>,
}

impl ConsumerMirror {
    pub fn new(
        pattern: RequestPattern,
    ) -> Result<(Self, mpsc::UnboundedReceiver<MirrorEvent>), PatternError> {
        let matcher = CompiledPattern::compile(&pattern)?;
        let (events, rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                pattern,
                matcher,
                models: Vec::new(),
                events,
            },
            rx,
        ))
    }

    pub fn pattern(&self) -> &RequestPattern {
        &self.pattern
    }

    /// Accepted models, in order of acceptance
    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Apply an `inference.available` message.
    ///
    /// Only replies are considered; unsolicited announcements are ignored.
    /// A reply is accepted if it passes our own pattern and we do not hold
    /// the same model on the same backend yet. Returns whether it was
    /// accepted.
    pub fn accept(&mut self, message: AvailableMessage) -> bool {
        if !message.is_reply() {
            return false;
        }

        let model = message.selected_model;
        if !self.matcher.matches(&model) {
            debug!("Discarding {} on {}: does not match our pattern", model.name, model.url);
            return false;
        }
        if self.models.iter().any(|m| m.key() == model.key()) {
            debug!("Already holding {} on {}", model.name, model.url);
            return false;
        }

        self.models.push(model.clone());
        let _ = self.events.send(MirrorEvent::ServerAvailable(model));
        true
    }

    /// Remove every held entry whose backend URL matches one of `withdrawn`.
    /// Returns the number of entries removed.
    pub fn withdraw(&mut self, withdrawn: &[ModelDescriptor]) -> usize {
        let mut removed = 0;
        for gone in withdrawn {
            let mut i = 0;
            while i < self.models.len() {
                if self.models[i].url == gone.url {
                    let model = self.models.remove(i);
                    let _ = self.events.send(MirrorEvent::ServerUnavailable(model));
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        }
        removed
    }

    pub fn handle_available(&mut self, payload: &[u8]) -> Result<bool, ParseError> {
        Ok(self.accept(AvailableMessage::from_slice(payload)?))
    }

    pub fn handle_unavailable(&mut self, payload: &[u8]) -> Result<usize, ParseError> {
        match UnavailableNotice::from_slice(payload)? {
            UnavailableNotice::Models(models) => Ok(self.withdraw(&models)),
            UnavailableNotice::Backend(url) => {
                let stub = ModelDescriptor {
                    name: String::new(),
                    quantization: String::new(),
                    url,
                    filename: String::new(),
                };
                Ok(self.withdraw(&[stub]))
            }
        }
    }
}

/// A mirror connected to the bus
pub struct MirrorClient {
    bus: Arc<dyn MessageBus>,
    mirror: Arc<Mutex<ConsumerMirror>>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MirrorClient {
    /// Subscribe to availability subjects and start applying messages.
    ///
    /// No request is sent yet; call [`MirrorClient::request_models`].
    pub async fn connect(
        bus: Arc<dyn MessageBus>,
        pattern: RequestPattern,
    ) -> Result<(Self, mpsc::UnboundedReceiver<MirrorEvent>), MirrorError> {
        let (mirror, events) = ConsumerMirror::new(pattern)?;
        let mirror = Arc::new(Mutex::new(mirror));

        let mut available = bus.subscribe(SUBJECT_AVAILABLE).await?;
        let mut unavailable = bus.subscribe(SUBJECT_UNAVAILABLE).await?;
        info!("Listening for available and unavailable models");

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let state = mirror.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(msg) = available.next() => {
                        if let Err(e) = state.lock().await.handle_available(&msg.payload) {
                            warn!("Dropping malformed available message: {}", e);
                        }
                    }
                    Some(msg) = unavailable.next() => {
                        if let Err(e) = state.lock().await.handle_unavailable(&msg.payload) {
                            warn!("Dropping malformed unavailable message: {}", e);
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    else => break,
                }
            }
        });

        Ok((
            Self {
                bus,
                mirror,
                shutdown_tx,
                task,
            },
            events,
        ))
    }

    /// Ask the registry for models matching our pattern
    pub async fn request_models(&self) -> Result<(), BusError> {
        let pattern = self.mirror.lock().await.pattern().clone();
        info!("Requesting models: {:?}", pattern);
        publish_json(self.bus.as_ref(), SUBJECT_REQUESTED, &pattern).await
    }

    /// Snapshot of the accepted models
    pub async fn models(&self) -> Vec<ModelDescriptor> {
        self.mirror.lock().await.models().to_vec()
    }

    /// Stop applying messages
    pub async fn close(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;

    fn model(name: &str, quantization: &str, url: &str) -> ModelDescriptor {
        ModelDescriptor {
            name: name.to_string(),
            quantization: quantization.to_string(),
            url: url.to_string(),
            filename: name.to_string(),
        }
    }

    fn reply(pattern: &RequestPattern, selected: ModelDescriptor) -> AvailableMessage {
        AvailableMessage::reply(pattern.clone(), selected)
    }

    #[test]
    fn test_accepts_matching_reply() {
        let pattern = RequestPattern::named("Llama.*").with_name_regex();
        let (mut mirror, mut events) = ConsumerMirror::new(pattern.clone()).unwrap();

        let m = model("Llama-2-70B-Chat", "Q2_K", "http://b1");
        assert!(mirror.accept(reply(&pattern, m.clone())));
        assert_eq!(mirror.models(), &[m.clone()]);
        assert_eq!(events.try_recv().unwrap(), MirrorEvent::ServerAvailable(m));
    }

    #[test]
    fn test_rejects_reply_failing_local_pattern() {
        let pattern = RequestPattern::named("Llama.*")
            .with_name_regex()
            .with_quantization("Q4_K");
        let (mut mirror, mut events) = ConsumerMirror::new(pattern.clone()).unwrap();

        assert!(!mirror.accept(reply(&pattern, model("Mistral-7B", "Q4_K", "http://b1"))));
        assert!(!mirror.accept(reply(&pattern, model("Llama-2", "Q8_0", "http://b1"))));
        assert!(mirror.models().is_empty());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_ignores_unsolicited_announcement() {
        let (mut mirror, mut events) = ConsumerMirror::new(RequestPattern::any()).unwrap();
        let payload =
            br#"{"selected_model": {"name": "m", "quantization": "", "url": "http://b1", "filename": "m"}}"#;
        assert!(!mirror.handle_available(payload).unwrap());
        assert!(mirror.models().is_empty());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_duplicate_reply_not_appended() {
        let pattern = RequestPattern::any();
        let (mut mirror, _events) = ConsumerMirror::new(pattern.clone()).unwrap();
        assert!(mirror.accept(reply(&pattern, model("a", "", "http://b1"))));
        assert!(!mirror.accept(reply(&pattern, model("a", "", "http://b1"))));
        assert!(mirror.accept(reply(&pattern, model("a", "", "http://b2"))));
        assert_eq!(mirror.models().len(), 2);
    }

    #[test]
    fn test_withdraw_by_url() {
        let pattern = RequestPattern::any();
        let (mut mirror, mut events) = ConsumerMirror::new(pattern.clone()).unwrap();
        mirror.accept(reply(&pattern, model("a", "", "http://b1")));
        mirror.accept(reply(&pattern, model("b", "", "http://b1")));
        mirror.accept(reply(&pattern, model("c", "", "http://b2")));
        while events.try_recv().is_ok() {}

        let payload = serde_json::to_vec(&model("whatever", "", "http://b1")).unwrap();
        assert_eq!(mirror.handle_unavailable(&payload).unwrap(), 2);
        assert_eq!(mirror.models().len(), 1);
        assert_eq!(mirror.models()[0].url, "http://b2");

        let mut removed = Vec::new();
        while let Ok(MirrorEvent::ServerUnavailable(m)) = events.try_recv() {
            removed.push(m.name);
        }
        assert_eq!(removed, vec!["a", "b"]);
    }

    #[test]
    fn test_withdraw_by_bare_url() {
        let pattern = RequestPattern::any();
        let (mut mirror, _events) = ConsumerMirror::new(pattern.clone()).unwrap();
        mirror.accept(reply(&pattern, model("a", "", "http://b1")));
        assert_eq!(mirror.handle_unavailable(b"http://b1").unwrap(), 1);
        assert!(mirror.models().is_empty());
    }

    #[test]
    fn test_malformed_payloads() {
        let (mut mirror, _events) = ConsumerMirror::new(RequestPattern::any()).unwrap();
        assert!(mirror.handle_available(b"{").is_err());
        assert!(mirror.handle_unavailable(b"[{").is_err());
    }

    #[test]
    fn test_bad_pattern_rejected_up_front() {
        let pattern = RequestPattern::named("(").with_name_regex();
        assert!(ConsumerMirror::new(pattern).is_err());
    }

    #[tokio::test]
    async fn test_client_over_bus() {
        let bus = MemoryBus::new();
        let pattern = RequestPattern::named("a");
        let (client, mut events) = MirrorClient::connect(Arc::new(bus.clone()), pattern.clone())
            .await
            .unwrap();

        client.request_models().await.unwrap();
        let request = bus.published_on(SUBJECT_REQUESTED);
        let sent: RequestPattern = serde_json::from_slice(&request[0].payload).unwrap();
        assert_eq!(sent, pattern);

        let message = serde_json::to_vec(&reply(&pattern, model("a", "", "http://b1"))).unwrap();
        bus.publish(SUBJECT_AVAILABLE, message).await.unwrap();

        let event = events.recv().await.unwrap();
        assert!(matches!(event, MirrorEvent::ServerAvailable(ref m) if m.url == "http://b1"));
        assert_eq!(client.models().await.len(), 1);

        client.close().await;
    }
}
