//! End-to-end PubSub coverage: `Service` + `SharedMemoryTransport` +
//! `DataWriter`/`DataReader`, exercising the scenarios and invariants.

use std::sync::Arc;
use std::time::Duration;

use pslink::codec::{default_codec, Codec};
use pslink::pubsub::{DataReader, DataWriter, Durability, Service};
use pslink::transports::{SharedMemoryConfig, SharedMemoryTransport};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct HelloMessage {
    msg: String,
    seq: u32,
    data: String,
    checksum: u32,
}

fn checksum(msg: &str, seq: u32, data: &str) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for byte in msg.bytes().chain(seq.to_le_bytes()).chain(data.bytes()) {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

impl HelloMessage {
    fn new(msg: impl Into<String>, seq: u32, data: impl Into<String>) -> Self {
        let msg = msg.into();
        let data = data.into();
        let checksum = checksum(&msg, seq, &data);
        Self { msg, seq, data, checksum }
    }

    fn verify(&self) -> bool {
        checksum(&self.msg, self.seq, &self.data) == self.checksum
    }
}

fn service(segment_name: &str) -> Arc<Service<SharedMemoryTransport>> {
    let config = SharedMemoryConfig {
        segment_name: segment_name.into(),
        ..Default::default()
    };
    let transport = Arc::new(SharedMemoryTransport::new(config).unwrap());
    Service::new(transport, "")
}

#[tokio::test]
async fn hello_round_trip_preserves_payload_and_checksum() {
    let service = service("pslink_test_hello");
    let writer = DataWriter::new(service.publisher.clone(), "hello", "HelloMessage", Durability::None);
    let reader = DataReader::new(service.subscriber.clone(), "hello", "HelloMessage", Durability::None);

    let codec = default_codec::<HelloMessage>();
    let payload = HelloMessage::new("hello", 1, "A".repeat(1024));
    let bytes = codec.encode(&payload).unwrap();
    writer.send(bytes, Duration::ZERO).await.unwrap();

    let received = reader.receive(Duration::from_secs(5)).await.unwrap();
    let decoded: HelloMessage = codec.decode(&received).unwrap();
    assert_eq!(decoded, payload);
    assert!(decoded.verify());
}

#[tokio::test]
async fn codec_round_trip_preserves_checksum_validity() {
    let codec = default_codec::<HelloMessage>();
    let payload = HelloMessage::new("x", 7, "y");
    let bytes = codec.encode(&payload).unwrap();
    let decoded: HelloMessage = codec.decode(&bytes).unwrap();
    assert_eq!(decoded, payload);
    assert!(decoded.verify());
}

#[tokio::test]
async fn single_writer_single_reader_observes_contiguous_sequence() {
    let service = service("pslink_test_sequence");
    let writer = DataWriter::new(service.publisher.clone(), "events", "HelloMessage", Durability::None);
    let reader = DataReader::new(service.subscriber.clone(), "events", "HelloMessage", Durability::None);
    let codec = default_codec::<HelloMessage>();

    const N: u32 = 50;
    for seq in 1..=N {
        let bytes = codec.encode(&HelloMessage::new("e", seq, "")).unwrap();
        writer.send(bytes, Duration::ZERO).await.unwrap();
    }

    for expected_seq in 1..=N {
        let bytes = reader.receive(Duration::from_secs(5)).await.unwrap();
        let decoded: HelloMessage = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.seq, expected_seq);
    }
}

#[tokio::test]
async fn durability_replay_delivers_history_in_order() {
    let service = service("pslink_test_replay");
    let durability = Durability::TransientLocal { depth: 8 };
    let writer = DataWriter::new(service.publisher.clone(), "events", "HelloMessage", durability);
    let codec = default_codec::<HelloMessage>();

    for seq in 1..=5u32 {
        let bytes = codec.encode(&HelloMessage::new("e", seq, "")).unwrap();
        writer.send(bytes, Duration::ZERO).await.unwrap();
    }

    // The reader is created after every publish; creating it triggers a
    // subscription announcement that replays the bounded history.
    let reader = DataReader::new(service.subscriber.clone(), "events", "HelloMessage", durability);
    for expected_seq in 1..=5u32 {
        let bytes = reader.receive(Duration::from_secs(5)).await.unwrap();
        let decoded: HelloMessage = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.seq, expected_seq);
    }
}

#[tokio::test]
async fn durability_replay_is_bounded_by_depth() {
    let service = service("pslink_test_replay_bounded");
    let durability = Durability::TransientLocal { depth: 3 };
    let writer = DataWriter::new(service.publisher.clone(), "events", "HelloMessage", durability);
    let codec = default_codec::<HelloMessage>();

    for seq in 1..=10u32 {
        let bytes = codec.encode(&HelloMessage::new("e", seq, "")).unwrap();
        writer.send(bytes, Duration::ZERO).await.unwrap();
    }

    let reader = DataReader::new(service.subscriber.clone(), "events", "HelloMessage", durability);
    // Only the last `depth` (8, 9, 10) should replay.
    for expected_seq in 8..=10u32 {
        let bytes = reader.receive(Duration::from_secs(5)).await.unwrap();
        let decoded: HelloMessage = codec.decode(&bytes).unwrap();
        assert_eq!(decoded.seq, expected_seq);
    }
    let timed_out = reader.receive(Duration::from_millis(200)).await;
    assert!(timed_out.is_err());
}

#[tokio::test]
async fn sync_receive_times_out_when_nothing_arrives() {
    let service = service("pslink_test_timeout");
    let reader = DataReader::new(service.subscriber.clone(), "quiet", "HelloMessage", Durability::None);

    let started = std::time::Instant::now();
    let result = reader.receive(Duration::from_millis(100)).await;
    assert!(result.is_err());
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn late_subscriber_drop_count_accounts_for_every_published_message() {
    let service = service("pslink_test_drop_count");
    let writer = DataWriter::new(service.publisher.clone(), "events", "HelloMessage", Durability::None);
    let codec = default_codec::<HelloMessage>();

    const TOTAL: u32 = 1000;
    const LATE_AT: u32 = 401;

    // Published before any reader exists; with no durability these are
    // simply never delivered anywhere, i.e. dropped.
    for seq in 1..LATE_AT {
        let bytes = codec.encode(&HelloMessage::new("e", seq, "")).unwrap();
        writer.send(bytes, Duration::ZERO).await.unwrap();
    }

    let reader = DataReader::new(service.subscriber.clone(), "events", "HelloMessage", Durability::None);
    // Let the reader's add_reader registration land before the remaining
    // sends race it.
    tokio::time::sleep(Duration::from_millis(50)).await;

    for seq in LATE_AT..=TOTAL {
        let bytes = codec.encode(&HelloMessage::new("e", seq, "")).unwrap();
        writer.send(bytes, Duration::ZERO).await.unwrap();
    }

    let mut received_seqs = Vec::new();
    loop {
        match reader.receive(Duration::from_millis(200)).await {
            Ok(bytes) => {
                let decoded: HelloMessage = codec.decode(&bytes).unwrap();
                received_seqs.push(decoded.seq);
            }
            Err(_) => break,
        }
    }

    let total_received = received_seqs.len() as u32;
    let total_dropped = TOTAL - total_received;
    assert_eq!(total_received + total_dropped, TOTAL);

    // Every message sent once the reader was registered must have arrived,
    // in order, with nothing dropped after the subscription took effect.
    let expected_received: Vec<u32> = (LATE_AT..=TOTAL).collect();
    assert_eq!(received_seqs, expected_received);
    assert_eq!(total_dropped, LATE_AT - 1);
}

#[tokio::test]
async fn cancel_completes_pending_async_receive_with_cancelled() {
    let service = service("pslink_test_cancel");
    let reader = DataReader::new(service.subscriber.clone(), "quiet", "HelloMessage", Durability::None);

    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = std::sync::Mutex::new(Some(tx));
    reader.async_receive(move |result| {
        if let Some(tx) = tx.lock().unwrap().take() {
            let _ = tx.send(result);
        }
    });
    reader.cancel();

    let result = rx.await.unwrap();
    assert_eq!(result.unwrap_err(), pslink::pubsub::Error::Cancelled);
}
