//! NATS implementation of [`MessageBus`]

use async_nats::Client;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

use super::{BusError, BusMessage, MessageBus, MessageStream};

/// Message bus backed by a single NATS connection
#[derive(Clone)]
pub struct NatsBus {
    client: Client,
    url: String,
}

impl NatsBus {
    /// Connect to a NATS server.
    ///
    /// Reconnection after the initial connect is handled by the client.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        info!("Connecting to NATS server at {}", url);
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Connect {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        info!("Connected to NATS server at {}", url);

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        debug!("Publishing {} bytes on '{}'", payload.len(), subject);
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BusError::Publish {
                subject: subject.to_string(),
                message: e.to_string(),
            })
    }

    async fn subscribe(&self, subject: &str) -> Result<MessageStream, BusError> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::Subscribe {
                subject: subject.to_string(),
                message: e.to_string(),
            })?;
        debug!("Subscribed to '{}'", subject);

        Ok(subscriber
            .map(|msg| BusMessage {
                subject: msg.subject.to_string(),
                payload: msg.payload.to_vec(),
            })
            .boxed())
    }

    async fn flush(&self) -> Result<(), BusError> {
        self.client
            .flush()
            .await
            .map_err(|e| BusError::Flush(e.to_string()))
    }
}
