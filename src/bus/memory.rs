//! In-process implementation of [`MessageBus`]
//!
//! Subjects are matched exactly (no NATS wildcards). Every published message
//! is also kept in a log so tests can assert on what was announced.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{BusError, BusMessage, MessageBus, MessageStream};

type Subscribers = Vec<(String, mpsc::UnboundedSender<BusMessage>)>;

#[derive(Clone, Default)]
pub struct MemoryBus {
    subscribers: Arc<Mutex<Subscribers>>,
    published: Arc<Mutex<Vec<BusMessage>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message published so far, in order
    pub fn published(&self) -> Vec<BusMessage> {
        self.published
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Messages published on one subject, in order
    pub fn published_on(&self, subject: &str) -> Vec<BusMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.subject == subject)
            .collect()
    }

    /// Forget the publish log
    pub fn clear_published(&self) {
        if let Ok(mut log) = self.published.lock() {
            log.clear();
        }
    }

    /// Number of live subscriptions on a subject
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.subscribers
            .lock()
            .map(|subs| {
                subs.iter()
                    .filter(|(s, tx)| s == subject && !tx.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let message = BusMessage::new(subject, payload);

        if let Ok(mut log) = self.published.lock() {
            log.push(message.clone());
        }

        let mut subs = self.subscribers.lock().map_err(|e| BusError::Publish {
            subject: subject.to_string(),
            message: e.to_string(),
        })?;
        subs.retain(|(_, tx)| !tx.is_closed());
        for (_, tx) in subs.iter().filter(|(s, _)| s == subject) {
            let _ = tx.send(message.clone());
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .map_err(|e| BusError::Subscribe {
                subject: subject.to_string(),
                message: e.to_string(),
            })?
            .push((subject.to_string(), tx));

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });
        Ok(stream.boxed())
    }

    async fn flush(&self) -> Result<(), BusError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delivers_to_matching_subject_only() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe("a").await.unwrap();
        let mut b = bus.subscribe("b").await.unwrap();

        bus.publish("a", b"one".to_vec()).await.unwrap();
        bus.publish("b", b"two".to_vec()).await.unwrap();

        assert_eq!(a.next().await.unwrap().payload, b"one");
        assert_eq!(b.next().await.unwrap().payload, b"two");
        assert_eq!(bus.published().len(), 2);
        assert_eq!(bus.published_on("a").len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let bus = MemoryBus::new();
        let stream = bus.subscribe("a").await.unwrap();
        assert_eq!(bus.subscriber_count("a"), 1);

        drop(stream);
        bus.publish("a", b"x".to_vec()).await.unwrap();
        assert_eq!(bus.subscriber_count("a"), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_logged() {
        let bus = MemoryBus::new();
        bus.publish("nobody", b"x".to_vec()).await.unwrap();
        assert_eq!(bus.published_on("nobody").len(), 1);

        bus.clear_published();
        assert!(bus.published().is_empty());
    }
}
