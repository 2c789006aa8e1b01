//! Per-topic, per-process writer endpoint. Non-copyable, moveable; removes
//! itself from the publisher on drop.

use std::sync::Arc;
use std::time::Duration;

use crate::error::pubsub::Result;
use crate::handle::Handle;
use crate::pubsub::publisher::Publisher;
use crate::pubsub::topic::Durability;
use crate::pubsub::transport::PubSubTransport;

pub struct DataWriter<T: PubSubTransport> {
    id: Handle,
    topic_id: String,
    publisher: Arc<Publisher<T>>,
}

impl<T: PubSubTransport + 'static> DataWriter<T> {
    pub fn new(
        publisher: Arc<Publisher<T>>,
        topic_name: impl Into<String>,
        topic_type_name: impl Into<String>,
        durability: Durability,
    ) -> Self {
        let id = Handle::next();
        let topic_id = publisher.add_writer(id, topic_name, topic_type_name, durability);
        Self {
            id,
            topic_id,
            publisher,
        }
    }

    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }

    pub async fn send(&self, payload: Vec<u8>, timeout: Duration) -> Result<()> {
        self.publisher
            .send(self.id, &self.topic_id, payload, timeout)
            .await
    }

    pub fn async_send<H>(&self, payload: Vec<u8>, handler: H)
    where
        H: FnOnce(Result<()>) + Send + 'static,
    {
        self.publisher.async_send(self.id, &self.topic_id, payload, handler)
    }
}

impl<T: PubSubTransport> Drop for DataWriter<T> {
    fn drop(&mut self) {
        self.publisher.remove_writer(self.id, &self.topic_id);
    }
}
