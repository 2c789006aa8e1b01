//! Binds a publisher, a subscriber, and the builtin subscription-announcement
//! topic to one transport and domain.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::envelope::{SubscriptionAnnouncement, SUBSCRIPTION_ANNOUNCEMENT_TOPIC};
use crate::error::pubsub::Result;
use crate::handle::Handle;
use crate::pubsub::publisher::Publisher;
use crate::pubsub::subscriber::Subscriber;
use crate::pubsub::topic::Durability;
use crate::pubsub::transport::PubSubTransport;
use crate::reactor::Reactor;

const BUILTIN_TYPE_NAME: &str = "__subscription_announcement__";

/// A bound PubSub service: one publisher, one subscriber, one domain, one
/// transport, plus the builtin writer/reader used to announce and react to
/// new durable subscriptions.
pub struct Service<T: PubSubTransport> {
    pub publisher: Arc<Publisher<T>>,
    pub subscriber: Arc<Subscriber<T>>,
    transport: Arc<T>,
    announcement_writer: Handle,
    announcement_reader: Handle,
    announcement_topic_id: String,
    reactor: Reactor,
}

impl<T: PubSubTransport + 'static> Service<T> {
    pub fn new(transport: Arc<T>, domain: impl Into<String>) -> Arc<Self> {
        let domain = domain.into();
        let publisher = Arc::new(Publisher::new(transport.clone(), domain.clone()));
        let subscriber = Arc::new(Subscriber::new(transport.clone(), domain));

        let announcement_writer = Handle::next();
        let announcement_reader = Handle::next();
        let announcement_topic_id = publisher.add_writer(
            announcement_writer,
            SUBSCRIPTION_ANNOUNCEMENT_TOPIC,
            BUILTIN_TYPE_NAME,
            Durability::None,
        );
        subscriber.add_reader(
            announcement_reader,
            SUBSCRIPTION_ANNOUNCEMENT_TOPIC,
            BUILTIN_TYPE_NAME,
            Durability::None,
            true,
        );

        let service = Arc::new(Self {
            publisher,
            subscriber,
            transport,
            announcement_writer,
            announcement_reader,
            announcement_topic_id,
            reactor: Reactor::current(),
        });

        // Wire: subscriber emits an announcement whenever a non-builtin
        // durable reader is created.
        let announce_publisher = service.publisher.clone();
        let announce_writer = service.announcement_writer;
        let announce_topic_id = service.announcement_topic_id.clone();
        let announce_reactor = service.reactor.clone();
        service.subscriber.set_announce_fn(Arc::new(move |info| {
            let announcement = SubscriptionAnnouncement {
                domain: info.domain.clone(),
                topic_name: info.name.clone(),
                topic_type_name: info.type_name.clone(),
            };
            let Ok(bytes) = bincode::serialize(&announcement) else {
                error!("failed to encode subscription announcement");
                return;
            };
            let publisher = announce_publisher.clone();
            let writer = announce_writer;
            let topic_id = announce_topic_id.clone();
            announce_reactor.post(async move {
                if let Err(e) = publisher.send(writer, &topic_id, bytes, Duration::ZERO).await {
                    error!("failed to send subscription announcement: {e}");
                }
            });
        }));

        service.spawn_announcement_listener();
        service.spawn_receive_pump();
        service
    }

    /// Drains the transport's inbound envelope stream and dispatches each
    /// one to the matching topic's readers. One task per service instance.
    fn spawn_receive_pump(self: &Arc<Self>) {
        let service = self.clone();
        self.reactor.post(async move {
            loop {
                match service.transport.receive().await {
                    Ok(bytes) => {
                        if let Err(e) = service.dispatch_incoming(&bytes).await {
                            warn!("failed to dispatch incoming pubsub envelope: {e}");
                        }
                    }
                    Err(e) => {
                        warn!("pubsub transport receive stopped: {e}");
                        break;
                    }
                }
            }
        });
    }

    /// Listens for incoming subscription announcements and replays history
    /// for matching topics on the publisher side.
    fn spawn_announcement_listener(self: &Arc<Self>) {
        let service = self.clone();
        self.reactor.post(async move {
            loop {
                match service
                    .subscriber
                    .receive(service.announcement_reader, &service.announcement_topic_id, Duration::ZERO)
                    .await
                {
                    Ok(bytes) => match bincode::deserialize::<SubscriptionAnnouncement>(&bytes) {
                        Ok(announcement) => service.publisher.notify(&announcement).await,
                        Err(e) => error!("failed to decode subscription announcement: {e}"),
                    },
                    Err(e) => {
                        error!("announcement reader stopped: {e}");
                        break;
                    }
                }
            }
        });
    }

    /// The public entry point for feeding a raw, already-received envelope
    /// into this service's subscriber dispatch. `spawn_receive_pump` is the
    /// only built-in caller, but this stays public for callers driving their
    /// own transport I/O loop (e.g. a custom reactor integration) instead of
    /// using `receive()` directly.
    pub async fn dispatch_incoming(&self, bytes: &[u8]) -> Result<()> {
        self.subscriber.process_incoming(bytes);
        Ok(())
    }
}
