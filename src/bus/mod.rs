//! Publish/subscribe transport
//!
//! The registry and the consumer mirror only need fire-and-forget publish,
//! plain subscriptions and a flush before shutdown. [`MessageBus`] captures
//! exactly that so the NATS client can be swapped for an in-process bus in
//! tests.

pub mod memory;
pub mod nats;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub use memory::MemoryBus;
pub use nats::NatsBus;

/// Consumers publish request patterns here
pub const SUBJECT_REQUESTED: &str = "inference.requested";

/// Availability announcements and replies to requests
pub const SUBJECT_AVAILABLE: &str = "inference.available";

/// Withdrawals of descriptors or whole backends
pub const SUBJECT_UNAVAILABLE: &str = "inference.unavailable";

/// External registrants announce new backend URLs here
pub const SUBJECT_NEW_SERVER: &str = "inference.new_server";

/// Transport failures
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Failed to publish on '{subject}': {message}")]
    Publish { subject: String, message: String },

    #[error("Failed to subscribe to '{subject}': {message}")]
    Subscribe { subject: String, message: String },

    #[error("Failed to flush: {0}")]
    Flush(String),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A message delivered by a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
        }
    }
}

/// Stream of messages for one subscription
pub type MessageStream = BoxStream<'static, BusMessage>;

// ============================================================================
// SBIO: Trait for abstraction (allows an in-memory bus in tests)
// ============================================================================

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload. Delivery is not acknowledged.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Subscribe to a subject. Messages published after this returns are
    /// delivered on the stream.
    async fn subscribe(&self, subject: &str) -> Result<MessageStream, BusError>;

    /// Wait until everything published so far has left the process
    async fn flush(&self) -> Result<(), BusError>;
}

/// Serialize `value` as JSON and publish it
pub async fn publish_json<T>(bus: &dyn MessageBus, subject: &str, value: &T) -> Result<(), BusError>
where
    T: serde::Serialize + ?Sized,
{
    let payload = serde_json::to_vec(value)?;
    bus.publish(subject, payload).await
}
