//! Transport contract consumed by the publisher and subscriber engines.
//!
//! Implementations are selected at construction time (the template-per-
//! transport pattern of the source engine, re-expressed as a trait object).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::pubsub::Result;

/// A replaceable PubSub delivery mechanism.
///
/// `add_topic`/`remove_topic` are filtering hints: a transport may ignore
/// them (see the UDP transport) and leave demultiplexing to the subscriber.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    fn add_topic(&self, topic_id: &str);

    fn remove_topic(&self, topic_id: &str);

    /// Best-effort fanout; blocks up to `timeout` (zero means wait forever).
    async fn send(&self, topic_id: &str, bytes: &[u8], timeout: Duration) -> Result<()>;

    /// Best-effort fanout without blocking the caller; completion is
    /// observed by the caller via the publisher's async-send queue.
    async fn async_send(&self, topic_id: &str, bytes: Vec<u8>) -> Result<()>;

    /// Deliver one envelope at a time, FIFO per source.
    async fn receive(&self) -> Result<Vec<u8>>;
}
