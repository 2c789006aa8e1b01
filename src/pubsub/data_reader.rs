//! Per-topic, per-process reader endpoint. Non-copyable, moveable; removes
//! itself from the subscriber on drop.

use std::sync::Arc;
use std::time::Duration;

use crate::error::pubsub::Result;
use crate::handle::Handle;
use crate::pubsub::subscriber::Subscriber;
use crate::pubsub::topic::Durability;
use crate::pubsub::transport::PubSubTransport;

pub struct DataReader<T: PubSubTransport> {
    id: Handle,
    topic_id: String,
    subscriber: Arc<Subscriber<T>>,
}

impl<T: PubSubTransport + 'static> DataReader<T> {
    pub fn new(
        subscriber: Arc<Subscriber<T>>,
        topic_name: impl Into<String>,
        topic_type_name: impl Into<String>,
        durability: Durability,
    ) -> Self {
        let id = Handle::next();
        let topic_id = subscriber.add_reader(id, topic_name, topic_type_name, durability, false);
        Self {
            id,
            topic_id,
            subscriber,
        }
    }

    pub fn topic_id(&self) -> &str {
        &self.topic_id
    }

    pub async fn receive(&self, timeout: Duration) -> Result<Vec<u8>> {
        self.subscriber.receive(self.id, &self.topic_id, timeout).await
    }

    pub fn async_receive<H>(&self, handler: H)
    where
        H: FnOnce(Result<Vec<u8>>) + Send + 'static,
    {
        self.subscriber.async_receive(self.id, &self.topic_id, handler)
    }

    pub fn cancel(&self) {
        self.subscriber.cancel(self.id, &self.topic_id)
    }
}

impl<T: PubSubTransport> Drop for DataReader<T> {
    fn drop(&mut self) {
        self.subscriber.remove_reader(self.id, &self.topic_id);
    }
}
