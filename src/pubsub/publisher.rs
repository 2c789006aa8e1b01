//! Transport-independent publisher engine: topic -> writer(s), envelope
//! construction, history replay on subscription.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::envelope::{PubSubEnvelope, SubscriptionAnnouncement};
use crate::error::pubsub::{Error, Result};
use crate::handle::Handle;
use crate::pubsub::topic::{Durability, TopicInfo};
use crate::pubsub::transport::PubSubTransport;
use crate::reactor::Reactor;

type AsyncSendHandler = Box<dyn FnOnce(Result<()>) + Send>;

struct WriterCtx {
    topic_name: String,
    topic_type_name: String,
    domain: String,
    op_queue: Mutex<VecDeque<AsyncSendHandler>>,
}

struct TopicContext {
    info: TopicInfo,
    writers: HashMap<Handle, Arc<WriterCtx>>,
    history: Option<VecDeque<Vec<u8>>>,
}

impl TopicContext {
    fn new(info: TopicInfo) -> Self {
        let history = match info.durability {
            Durability::TransientLocal { depth } => Some(VecDeque::with_capacity(depth)),
            Durability::None => None,
        };
        Self {
            info,
            writers: HashMap::new(),
            history,
        }
    }

    fn push_history(&mut self, payload: Vec<u8>) {
        if let (Some(ring), Durability::TransientLocal { depth }) =
            (&mut self.history, self.info.durability)
        {
            if ring.len() == depth {
                ring.pop_front();
            }
            ring.push_back(payload);
        }
    }
}

/// The publisher side of one PubSub service: one instance per domain/transport.
pub struct Publisher<T: PubSubTransport> {
    transport: Arc<T>,
    domain: String,
    topics: Mutex<HashMap<String, TopicContext>>,
    next_id: std::sync::atomic::AtomicU32,
    reactor: Reactor,
}

impl<T: PubSubTransport + 'static> Publisher<T> {
    pub fn new(transport: Arc<T>, domain: impl Into<String>) -> Self {
        Self {
            transport,
            domain: domain.into(),
            topics: Mutex::new(HashMap::new()),
            next_id: std::sync::atomic::AtomicU32::new(1),
            reactor: Reactor::current(),
        }
    }

    /// Insert or fetch the topic context, insert a writer context. Duplicate
    /// `(topic_id, id)` is a programmer error.
    pub fn add_writer(
        &self,
        id: Handle,
        topic_name: impl Into<String>,
        topic_type_name: impl Into<String>,
        durability: Durability,
    ) -> String {
        let topic_name = topic_name.into();
        let topic_type_name = topic_type_name.into();
        let info = TopicInfo::new(&self.domain, &topic_name, &topic_type_name, durability);
        let topic_id = info.topic_id();

        let mut topics = self.topics.lock();
        let ctx = topics
            .entry(topic_id.clone())
            .or_insert_with(|| TopicContext::new(info));
        let writer_ctx = Arc::new(WriterCtx {
            topic_name,
            topic_type_name,
            domain: self.domain.clone(),
            op_queue: Mutex::new(VecDeque::new()),
        });
        if ctx.writers.insert(id, writer_ctx).is_some() {
            panic!("duplicate data writer {id} registered for topic {topic_id}");
        }
        topic_id
    }

    /// Writers never register with the transport's topic registry — that
    /// registry tracks receivers, and a writer is not one. Only the local
    /// `TopicContext`/`WriterCtx` bookkeeping needs cleanup here.
    pub fn remove_writer(&self, id: Handle, topic_id: &str) {
        let mut topics = self.topics.lock();
        if let Some(ctx) = topics.get_mut(topic_id) {
            ctx.writers.remove(&id);
            if ctx.writers.is_empty() {
                topics.remove(topic_id);
            }
        }
    }

    fn build(&self, id: Handle, topic_id: &str, payload: Vec<u8>) -> Result<(Arc<WriterCtx>, Vec<u8>)> {
        let mut topics = self.topics.lock();
        let ctx = topics.get_mut(topic_id).ok_or(Error::UnknownTopic)?;
        let writer = ctx
            .writers
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownDataWriter)?;

        let envelope_id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let envelope = PubSubEnvelope::new(
            envelope_id,
            writer.domain.clone(),
            writer.topic_name.clone(),
            writer.topic_type_name.clone(),
            payload.clone(),
        );
        let bytes = envelope
            .encode()
            .map_err(|e| Error::SystemError(e.to_string()))?;

        ctx.push_history(payload);
        Ok((writer, bytes))
    }

    /// Synchronous send; blocks up to `timeout` (zero means wait forever).
    pub async fn send(
        &self,
        id: Handle,
        topic_id: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<()> {
        let (_writer, bytes) = self.build(id, topic_id, payload)?;
        self.transport.send(topic_id, &bytes, timeout).await
    }

    /// Asynchronous send; invokes `handler` on completion, preserving FIFO
    /// per-writer completion order (transports guarantee completions fire in
    /// enqueue order, so the head of the op queue is always the right one to
    /// pop).
    pub fn async_send<H>(&self, id: Handle, topic_id: &str, payload: Vec<u8>, handler: H)
    where
        H: FnOnce(Result<()>) + Send + 'static,
    {
        match self.build(id, topic_id, payload) {
            Err(e) => {
                self.reactor.post(async move { handler(Err(e)) });
            }
            Ok((writer, bytes)) => {
                writer.op_queue.lock().push_back(Box::new(handler));
                let transport = self.transport.clone();
                let topic_id = topic_id.to_string();
                let writer = writer.clone();
                self.reactor.post(async move {
                    let result = transport.async_send(&topic_id, bytes).await;
                    let cb = writer
                        .op_queue
                        .lock()
                        .pop_front()
                        .expect("async_send completion with empty op queue");
                    cb(result);
                });
            }
        }
    }

    /// Called when the subscriber component receives a subscription
    /// announcement: replay the history ring for the matching topic, if any.
    /// Best-effort; errors are logged and do not abort the replay.
    pub async fn notify(&self, subscription: &SubscriptionAnnouncement) {
        let topic_id = subscription.topic_id();
        let replay = {
            let topics = self.topics.lock();
            topics
                .get(&topic_id)
                .and_then(|ctx| ctx.history.clone().map(|ring| (ctx.info.clone(), ring)))
        };
        let Some((info, ring)) = replay else {
            return;
        };
        for payload in ring {
            let envelope_id = self
                .next_id
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let envelope = PubSubEnvelope::new(
                envelope_id,
                info.domain.clone(),
                info.name.clone(),
                info.type_name.clone(),
                payload,
            );
            match envelope.encode() {
                Ok(bytes) => {
                    if let Err(e) = self.transport.send(&topic_id, &bytes, Duration::ZERO).await {
                        warn!("history replay send failed for {topic_id}: {e}");
                    }
                }
                Err(e) => warn!("history replay encode failed for {topic_id}: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeTransport {
        sent: StdMutex<Vec<(String, Vec<u8>)>>,
        fail_next: AtomicUsize,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                sent: StdMutex::new(Vec::new()),
                fail_next: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl PubSubTransport for FakeTransport {
        fn add_topic(&self, _topic_id: &str) {}
        fn remove_topic(&self, _topic_id: &str) {}

        async fn send(&self, topic_id: &str, bytes: &[u8], _timeout: Duration) -> Result<()> {
            self.sent.lock().unwrap().push((topic_id.to_string(), bytes.to_vec()));
            Ok(())
        }

        async fn async_send(&self, topic_id: &str, bytes: Vec<u8>) -> Result<()> {
            if self.fail_next.swap(0, Ordering::SeqCst) > 0 {
                return Err(Error::SystemError("boom".into()));
            }
            self.sent.lock().unwrap().push((topic_id.to_string(), bytes));
            Ok(())
        }

        async fn receive(&self) -> Result<Vec<u8>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn send_unknown_topic_errors() {
        let publisher = Publisher::new(Arc::new(FakeTransport::new()), "");
        let err = publisher
            .send(Handle::next(), "missing", vec![1], Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, Error::UnknownTopic);
    }

    #[tokio::test]
    async fn send_unknown_writer_errors() {
        let publisher = Publisher::new(Arc::new(FakeTransport::new()), "");
        let topic_id = publisher.add_writer(Handle::next(), "t", "T", Durability::None);
        let err = publisher
            .send(Handle::next(), &topic_id, vec![1], Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, Error::UnknownDataWriter);
    }

    #[tokio::test]
    async fn send_builds_and_forwards_envelope() {
        let transport = Arc::new(FakeTransport::new());
        let publisher = Publisher::new(transport.clone(), "");
        let writer = Handle::next();
        let topic_id = publisher.add_writer(writer, "hello", "Hello", Durability::None);
        publisher
            .send(writer, &topic_id, b"payload".to_vec(), Duration::ZERO)
            .await
            .unwrap();
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, topic_id);
    }

    #[tokio::test]
    async fn history_ring_bounded_by_depth() {
        let transport = Arc::new(FakeTransport::new());
        let publisher = Publisher::new(transport, "");
        let writer = Handle::next();
        let topic_id = publisher.add_writer(
            writer,
            "t",
            "T",
            Durability::TransientLocal { depth: 2 },
        );
        for i in 0..5u8 {
            publisher
                .send(writer, &topic_id, vec![i], Duration::ZERO)
                .await
                .unwrap();
        }
        let topics = publisher.topics.lock();
        let ring = topics.get(&topic_id).unwrap().history.as_ref().unwrap();
        assert_eq!(ring.len(), 2);
        assert_eq!(ring[0], vec![3]);
        assert_eq!(ring[1], vec![4]);
    }
}
