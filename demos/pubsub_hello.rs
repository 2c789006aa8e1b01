//! PubSub demo over the shared-memory transport: a hello round trip with a
//! checksum, and a durability-replay walkthrough.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
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

/// FNV-1a over every field except `checksum`, computed with the checksum
/// field cleared; not a real CRC, just a cheap corruption detector for the
/// demo.
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

#[derive(Parser)]
#[command(name = "pubsub-hello", about = "pslink PubSub shared-memory demo")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish one message, receive it back, verify its checksum.
    HelloRoundTrip,
    /// Publish N<=depth messages, then subscribe and observe history replay.
    DurabilityReplay {
        #[arg(long, default_value_t = 8)]
        depth: usize,
        #[arg(long, default_value_t = 5)]
        count: u32,
    },
    /// Standalone writer role for cross-process tests: publish one message
    /// with the given sequence number to a named segment/topic, then exit.
    WriteOnce {
        #[arg(long)]
        segment: String,
        #[arg(long)]
        topic: String,
        #[arg(long)]
        seq: u32,
    },
    /// Standalone reader role for cross-process tests: wait for one message
    /// on a named segment/topic, print its sequence number, then exit.
    ReadOnce {
        #[arg(long)]
        segment: String,
        #[arg(long)]
        topic: String,
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .event_format(pslink::logging::ColorizedFormatter)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::HelloRoundTrip => hello_round_trip().await,
        Command::DurabilityReplay { depth, count } => durability_replay(depth, count).await,
        Command::WriteOnce { segment, topic, seq } => write_once(segment, topic, seq).await,
        Command::ReadOnce { segment, topic, timeout_ms } => read_once(segment, topic, timeout_ms).await,
    }
}

async fn hello_round_trip() -> anyhow::Result<()> {
    let config = SharedMemoryConfig {
        segment_name: "pslink_demo_hello".into(),
        ..Default::default()
    };
    let transport = Arc::new(SharedMemoryTransport::new(config)?);
    let service = Service::new(transport, "");

    let writer = DataWriter::new(service.publisher.clone(), "hello", "HelloMessage", Durability::None);
    let reader = DataReader::new(service.subscriber.clone(), "hello", "HelloMessage", Durability::None);

    let codec = default_codec::<HelloMessage>();
    let payload = HelloMessage::new("hello", 1, "A".repeat(1024));
    let bytes = codec.encode(&payload).map_err(|e| anyhow::anyhow!(e))?;
    writer.send(bytes, Duration::ZERO).await?;

    let received = reader.receive(Duration::from_secs(5)).await?;
    let decoded: HelloMessage = codec.decode(&received).map_err(|e| anyhow::anyhow!(e))?;

    if decoded != payload || !decoded.verify() {
        anyhow::bail!("round trip mismatch or checksum failure");
    }
    println!("hello round trip OK: seq={} checksum verified", decoded.seq);
    Ok(())
}

async fn durability_replay(depth: usize, count: u32) -> anyhow::Result<()> {
    let config = SharedMemoryConfig {
        segment_name: "pslink_demo_replay".into(),
        ..Default::default()
    };
    let transport = Arc::new(SharedMemoryTransport::new(config)?);
    let service = Service::new(transport, "");
    let durability = Durability::TransientLocal { depth };

    let writer = DataWriter::new(service.publisher.clone(), "events", "HelloMessage", durability);
    let codec = default_codec::<HelloMessage>();
    for seq in 1..=count {
        let payload = HelloMessage::new("event", seq, "");
        let bytes = codec.encode(&payload).map_err(|e| anyhow::anyhow!(e))?;
        writer.send(bytes, Duration::ZERO).await?;
    }

    // A subsequent reader triggers a subscription announcement, which
    // replays up to `depth` history entries for this topic.
    let reader = DataReader::new(service.subscriber.clone(), "events", "HelloMessage", durability);
    let expected = count.min(depth as u32);
    for seq in 1..=expected {
        let bytes = reader.receive(Duration::from_secs(5)).await?;
        let decoded: HelloMessage = codec.decode(&bytes).map_err(|e| anyhow::anyhow!(e))?;
        if decoded.seq != seq {
            anyhow::bail!("expected replayed seq {seq}, got {}", decoded.seq);
        }
    }
    println!("durability replay OK: observed {expected} replayed messages");
    Ok(())
}

/// Attaches to `segment`, publishes one message with the given `seq` on
/// `topic`, and exits. Run as a separate OS process so the shared-memory
/// registry genuinely crosses a process boundary, unlike a writer and
/// reader sharing one process's `Service`.
async fn write_once(segment: String, topic: String, seq: u32) -> anyhow::Result<()> {
    let config = SharedMemoryConfig {
        segment_name: segment,
        ..Default::default()
    };
    let transport = Arc::new(SharedMemoryTransport::new(config)?);
    let service = Service::new(transport, "");
    let writer = DataWriter::new(service.publisher.clone(), &topic, "HelloMessage", Durability::None);

    let codec = default_codec::<HelloMessage>();
    let payload = HelloMessage::new("cross-process", seq, "");
    let bytes = codec.encode(&payload).map_err(|e| anyhow::anyhow!(e))?;
    writer.send(bytes, Duration::from_secs(2)).await?;
    println!("wrote seq={seq}");
    Ok(())
}

/// Attaches to `segment`, waits up to `timeout_ms` for one message on
/// `topic`, prints its sequence number, and exits.
async fn read_once(segment: String, topic: String, timeout_ms: u64) -> anyhow::Result<()> {
    let config = SharedMemoryConfig {
        segment_name: segment,
        ..Default::default()
    };
    let transport = Arc::new(SharedMemoryTransport::new(config)?);
    let service = Service::new(transport, "");
    let reader = DataReader::new(service.subscriber.clone(), &topic, "HelloMessage", Durability::None);

    let codec = default_codec::<HelloMessage>();
    let bytes = reader.receive(Duration::from_millis(timeout_ms)).await?;
    let decoded: HelloMessage = codec.decode(&bytes).map_err(|e| anyhow::anyhow!(e))?;
    if !decoded.verify() {
        anyhow::bail!("checksum mismatch on received message");
    }
    println!("read seq={}", decoded.seq);
    Ok(())
}
