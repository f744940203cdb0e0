//! Publishes availability and withdrawal events
//!
//! Publication is fire-and-forget: a lost announcement is corrected by the
//! next health-check cycle, so nothing here retries.

use std::sync::Arc;

use tracing::{debug, info};

use super::catalog::CatalogStore;
use crate::bus::{publish_json, BusError, MessageBus, SUBJECT_AVAILABLE, SUBJECT_UNAVAILABLE};
use crate::model::{AvailableMessage, ModelDescriptor, RequestPattern};

#[derive(Clone)]
pub struct Announcer {
    bus: Arc<dyn MessageBus>,
    catalog: Arc<CatalogStore>,
}

impl Announcer {
    pub fn new(bus: Arc<dyn MessageBus>, catalog: Arc<CatalogStore>) -> Self {
        Self { bus, catalog }
    }

    /// Announce that one model is available
    pub async fn announce_available(&self, model: &ModelDescriptor) -> Result<(), BusError> {
        let message = AvailableMessage::announcement(model.clone());
        publish_json(self.bus.as_ref(), SUBJECT_AVAILABLE, &message).await?;
        debug!("Announced {} on {}", model.name, model.url);
        Ok(())
    }

    /// Withdraw one model, or every model in the current catalog when
    /// `model` is `None`
    pub async fn announce_unavailable(
        &self,
        model: Option<&ModelDescriptor>,
    ) -> Result<(), BusError> {
        match model {
            Some(model) => {
                publish_json(self.bus.as_ref(), SUBJECT_UNAVAILABLE, &[model]).await?;
                debug!("Withdrew {} on {}", model.name, model.url);
            }
            None => {
                let catalog = self.catalog.snapshot().await;
                publish_json(self.bus.as_ref(), SUBJECT_UNAVAILABLE, catalog.models()).await?;
                info!("Withdrew all {} models", catalog.len());
            }
        }
        Ok(())
    }

    /// Answer a request with the selected model
    pub async fn reply(
        &self,
        requested: &RequestPattern,
        selected: &ModelDescriptor,
    ) -> Result<(), BusError> {
        let message = AvailableMessage::reply(requested.clone(), selected.clone());
        publish_json(self.bus.as_ref(), SUBJECT_AVAILABLE, &message).await?;
        debug!(
            "Replied to request for '{}' with {} on {}",
            requested.name, selected.name, selected.url
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::model::UnavailablePayload;
    use crate::registry::catalog::Catalog;

    async fn setup() -> (MemoryBus, Announcer, Arc<CatalogStore>) {
        let bus = MemoryBus::new();
        let store = Arc::new(CatalogStore::new());
        store
            .replace(Catalog::from_models(vec![
                ModelDescriptor::from_model_id("a.Q4_K.gguf", "http://b1"),
                ModelDescriptor::from_model_id("b.Q8_0.gguf", "http://b2"),
            ]))
            .await;
        let announcer = Announcer::new(Arc::new(bus.clone()), store.clone());
        (bus, announcer, store)
    }

    fn withdrawn(bus: &MemoryBus) -> Vec<ModelDescriptor> {
        let msgs = bus.published_on(SUBJECT_UNAVAILABLE);
        let payload: UnavailablePayload = serde_json::from_slice(&msgs[0].payload).unwrap();
        payload.into_descriptors()
    }

    #[tokio::test]
    async fn test_unavailable_all() {
        let (bus, announcer, store) = setup().await;
        announcer.announce_unavailable(None).await.unwrap();

        let models = withdrawn(&bus);
        assert_eq!(models, store.snapshot().await.models());
    }

    #[tokio::test]
    async fn test_unavailable_single() {
        let (bus, announcer, store) = setup().await;
        let target = store.snapshot().await.models()[1].clone();
        announcer.announce_unavailable(Some(&target)).await.unwrap();

        assert_eq!(withdrawn(&bus), vec![target]);
    }

    #[tokio::test]
    async fn test_available_and_reply_shapes() {
        let (bus, announcer, store) = setup().await;
        let model = store.snapshot().await.models()[0].clone();

        announcer.announce_available(&model).await.unwrap();
        announcer
            .reply(&RequestPattern::named("a.Q4_K.gguf"), &model)
            .await
            .unwrap();

        let msgs = bus.published_on(SUBJECT_AVAILABLE);
        assert_eq!(msgs.len(), 2);
        let first = AvailableMessage::from_slice(&msgs[0].payload).unwrap();
        let second = AvailableMessage::from_slice(&msgs[1].payload).unwrap();
        assert!(!first.is_reply());
        assert!(second.is_reply());
        assert_eq!(second.selected_model, model);
    }
}
