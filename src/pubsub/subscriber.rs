//! Transport-independent subscriber engine: topic -> reader(s), incoming
//! dispatch, synchronous/asynchronous receive with timeout and cancellation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::warn;

use crate::envelope::PubSubEnvelope;
use crate::error::pubsub::{Error, Result};
use crate::handle::Handle;
use crate::pubsub::topic::{Durability, TopicInfo};
use crate::pubsub::transport::PubSubTransport;
use crate::reactor::Reactor;

type AsyncRecvHandler = Box<dyn FnOnce(Result<Vec<u8>>) + Send>;

enum PendingOp {
    Sync(oneshot::Sender<Result<Vec<u8>>>),
    Async(AsyncRecvHandler),
}

struct ReaderCtx {
    pending_ops: Mutex<VecDeque<PendingOp>>,
    data_queue: Mutex<VecDeque<Vec<u8>>>,
}

impl ReaderCtx {
    fn new() -> Self {
        Self {
            pending_ops: Mutex::new(VecDeque::new()),
            data_queue: Mutex::new(VecDeque::new()),
        }
    }
}

struct TopicContext {
    info: TopicInfo,
    readers: HashMap<Handle, Arc<ReaderCtx>>,
}

/// Callback invoked when a new durable reader is created; used by the
/// service layer to emit a subscription announcement.
pub type AnnounceFn = dyn Fn(&TopicInfo) + Send + Sync;

/// The subscriber side of one PubSub service: one instance per domain/transport.
pub struct Subscriber<T: PubSubTransport> {
    transport: Arc<T>,
    domain: String,
    topics: Mutex<HashMap<String, TopicContext>>,
    announce: Mutex<Option<Arc<AnnounceFn>>>,
    reactor: Reactor,
}

impl<T: PubSubTransport + 'static> Subscriber<T> {
    pub fn new(transport: Arc<T>, domain: impl Into<String>) -> Self {
        Self {
            transport,
            domain: domain.into(),
            topics: Mutex::new(HashMap::new()),
            announce: Mutex::new(None),
            reactor: Reactor::current(),
        }
    }

    /// Install the callback used to emit subscription announcements for
    /// newly created durable readers. Set once by the owning service.
    pub fn set_announce_fn(&self, f: Arc<AnnounceFn>) {
        *self.announce.lock() = Some(f);
    }

    /// Insert or fetch the topic context, insert a reader context. If this
    /// is the first reader for the topic, notifies the transport via
    /// `add_topic`. If the topic is non-builtin and durable, also emits a
    /// subscription announcement.
    pub fn add_reader(
        &self,
        id: Handle,
        topic_name: impl Into<String>,
        topic_type_name: impl Into<String>,
        durability: Durability,
        builtin: bool,
    ) -> String {
        let topic_name = topic_name.into();
        let topic_type_name = topic_type_name.into();
        let info = TopicInfo::new(&self.domain, &topic_name, &topic_type_name, durability);
        let topic_id = info.topic_id();

        let (first_reader, is_durable) = {
            let mut topics = self.topics.lock();
            let first = !topics.contains_key(&topic_id);
            let ctx = topics
                .entry(topic_id.clone())
                .or_insert_with(|| TopicContext {
                    info: info.clone(),
                    readers: HashMap::new(),
                });
            if ctx.readers.insert(id, Arc::new(ReaderCtx::new())).is_some() {
                panic!("duplicate data reader {id} registered for topic {topic_id}");
            }
            (first, ctx.info.is_durable())
        };

        if first_reader {
            self.transport.add_topic(&topic_id);
        }
        if !builtin && is_durable {
            if let Some(announce) = self.announce.lock().clone() {
                announce(&info);
            }
        }
        topic_id
    }

    pub fn remove_reader(&self, id: Handle, topic_id: &str) {
        let mut topics = self.topics.lock();
        if let Some(ctx) = topics.get_mut(topic_id) {
            ctx.readers.remove(&id);
            if ctx.readers.is_empty() {
                topics.remove(topic_id);
                self.transport.remove_topic(topic_id);
            }
        }
    }

    fn resolve(&self, id: Handle, topic_id: &str) -> Result<Arc<ReaderCtx>> {
        let topics = self.topics.lock();
        let ctx = topics.get(topic_id).ok_or(Error::UnknownTopic)?;
        ctx.readers.get(&id).cloned().ok_or(Error::UnknownDataReader)
    }

    /// Synchronous receive: blocks up to `timeout` (zero means wait
    /// forever). On timeout returns `Cancelled`.
    pub async fn receive(&self, id: Handle, topic_id: &str, timeout: Duration) -> Result<Vec<u8>> {
        let reader = self.resolve(id, topic_id)?;

        if let Some(payload) = reader.data_queue.lock().pop_front() {
            return Ok(payload);
        }

        let (tx, rx) = oneshot::channel();
        reader.pending_ops.lock().push_back(PendingOp::Sync(tx));

        if timeout.is_zero() {
            rx.await.map_err(|_| Error::Cancelled)?
        } else {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => result,
                _ => Err(Error::Cancelled),
            }
        }
    }

    /// Asynchronous receive: `handler` runs when data arrives, or
    /// immediately (on a reactor task) if data is already queued.
    pub fn async_receive<H>(&self, id: Handle, topic_id: &str, handler: H)
    where
        H: FnOnce(Result<Vec<u8>>) + Send + 'static,
    {
        let reader = match self.resolve(id, topic_id) {
            Ok(r) => r,
            Err(e) => {
                self.reactor.post(async move { handler(Err(e)) });
                return;
            }
        };

        if let Some(payload) = reader.data_queue.lock().pop_front() {
            self.reactor.post(async move { handler(Ok(payload)) });
            return;
        }

        reader
            .pending_ops
            .lock()
            .push_back(PendingOp::Async(Box::new(handler)));
    }

    /// Completes every pending async op for `id` with `Cancelled`.
    /// Synchronous waiters are left untouched; they time out or receive data
    /// on their own.
    pub fn cancel(&self, id: Handle, topic_id: &str) {
        let Ok(reader) = self.resolve(id, topic_id) else {
            return;
        };
        let mut remaining = VecDeque::new();
        let mut ops = reader.pending_ops.lock();
        while let Some(op) = ops.pop_front() {
            match op {
                PendingOp::Sync(tx) => remaining.push_back(PendingOp::Sync(tx)),
                PendingOp::Async(handler) => {
                    self.reactor.post(async move { handler(Err(Error::Cancelled)) });
                }
            }
        }
        *ops = remaining;
    }

    /// Parses an inbound envelope and dispatches its payload to the matching
    /// topic's readers. Parse failures and version/kind mismatches are
    /// logged and dropped.
    pub fn process_incoming(&self, bytes: &[u8]) {
        let envelope = match PubSubEnvelope::decode(bytes) {
            Ok(e) => e,
            Err(e) => {
                warn!("dropping unparseable pubsub envelope: {e}");
                return;
            }
        };
        let topic_id = envelope.topic_id();
        let topics = self.topics.lock();
        let Some(ctx) = topics.get(&topic_id) else {
            return;
        };
        for reader in ctx.readers.values() {
            dispatch_one(reader, envelope.topic_data.clone(), &self.reactor);
        }
    }
}

/// Fulfils the head-of-queue pending op with `payload`, falling through to
/// the next op if a synchronous waiter has already abandoned its channel
/// (timed out), or queues the payload if no op is pending.
fn dispatch_one(reader: &Arc<ReaderCtx>, payload: Vec<u8>, reactor: &Reactor) {
    let mut payload = Some(payload);
    loop {
        let op = reader.pending_ops.lock().pop_front();
        match op {
            None => {
                reader.data_queue.lock().push_back(payload.take().unwrap());
                return;
            }
            Some(PendingOp::Sync(tx)) => match tx.send(Ok(payload.take().unwrap())) {
                Ok(()) => return,
                Err(Ok(p)) => {
                    payload = Some(p);
                    continue;
                }
                Err(Err(_)) => unreachable!(),
            },
            Some(PendingOp::Async(handler)) => {
                let p = payload.take().unwrap();
                reactor.post(async move { handler(Ok(p)) });
                return;
            }
        }
    }
}
