//! Shared-memory PubSub transport.
//!
//! Discovery is a `topic_id -> receiver set` registry living in a named
//! shared-memory segment, guarded by an flock'd lock file so every process
//! attached to the segment serializes registry edits. Actual message bodies
//! never cross the segment: each receiver owns a POSIX message queue, and a
//! sender looks up the live receivers for a topic and delivers to each
//! queue directly. A dedicated OS thread per process blocks on this
//! process's own queue and forwards decoded payloads to an internal channel
//! that `receive()` awaits on.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::mqueue::{mq_close, mq_open, mq_receive, mq_timedsend, mq_unlink, MQ_OFlag, MqAttr, MqdT};
use nix::sys::stat::Mode;
use nix::sys::time::TimeSpec;
use nix::time::{clock_gettime, ClockId};
use serde::{Deserialize, Serialize};
use shared_memory::{Shmem, ShmemConf};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::pubsub::{Error, Result};
use crate::pubsub::transport::PubSubTransport;

/// Shared-memory transport configuration. Defaults match the reference
/// sizing: a 1 MiB registry segment, 32 queued envelopes per receiver, 4 KiB
/// max message size.
#[derive(Debug, Clone)]
pub struct SharedMemoryConfig {
    pub segment_name: String,
    pub segment_size: usize,
    pub queue_depth: i64,
    pub max_msg_size: i64,
}

impl Default for SharedMemoryConfig {
    fn default() -> Self {
        Self {
            segment_name: "pslink_registry".into(),
            segment_size: 1024 * 1024,
            queue_depth: 32,
            max_msg_size: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReceiverEntry {
    uuid: Uuid,
    pid: i32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Registry {
    receivers: HashMap<String, Vec<ReceiverEntry>>,
}

/// The registry segment plus the lock file guarding it. `shmem` is not Sync
/// on its own (it exposes a raw pointer); access is always mediated by the
/// flock below, so concurrent readers/writers within this process still
/// serialize through `lock_file`.
struct RegistrySegment {
    shmem: Shmem,
    lock_file: std::fs::File,
}

unsafe impl Send for RegistrySegment {}
unsafe impl Sync for RegistrySegment {}

impl RegistrySegment {
    fn open_or_create(config: &SharedMemoryConfig) -> anyhow::Result<Self> {
        let shmem = match ShmemConf::new()
            .size(config.segment_size)
            .os_id(&config.segment_name)
            .create()
        {
            Ok(shmem) => shmem,
            Err(_) => ShmemConf::new().os_id(&config.segment_name).open()?,
        };

        let lock_path = std::env::temp_dir().join(format!("{}.lock", config.segment_name));
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(lock_path)?;

        Ok(Self { shmem, lock_file })
    }

    /// Runs `f` with the registry decoded from the segment, re-encoding
    /// whatever `f` leaves behind. The lock file flock serializes this
    /// across every attached process.
    fn with_registry<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> anyhow::Result<R> {
        let fd = self.lock_file.as_raw_fd();
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if rc != 0 {
            return Err(anyhow::anyhow!("flock failed: {}", std::io::Error::last_os_error()));
        }
        let result = (|| -> anyhow::Result<R> {
            let bytes = unsafe { std::slice::from_raw_parts(self.shmem.as_ptr(), self.shmem.len()) };
            let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
            let mut registry: Registry = if len == 0 {
                Registry::default()
            } else {
                bincode::deserialize(&bytes[4..4 + len])?
            };

            let result = f(&mut registry);

            let encoded = bincode::serialize(&registry)?;
            if encoded.len() + 4 > self.shmem.len() {
                return Err(anyhow::anyhow!("registry segment too small for current receiver set"));
            }
            let out = unsafe { std::slice::from_raw_parts_mut(self.shmem.as_ptr(), self.shmem.len()) };
            out[0..4].copy_from_slice(&(encoded.len() as u32).to_le_bytes());
            out[4..4 + encoded.len()].copy_from_slice(&encoded);
            Ok(result)
        })();
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
        result
    }
}

/// True iff a process with this pid currently exists (signal 0 probe).
fn process_is_alive(pid: i32) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

fn receiver_queue_name(uuid: Uuid) -> String {
    format!("/pslink_{}", uuid.simple())
}

/// One receiver's inbound POSIX message queue, drained by a dedicated
/// worker thread into `inbox`.
struct Inbox {
    inbox: AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

fn spawn_receiver_worker(queue_name: String, max_msg_size: i64, queue_depth: i64, tx: mpsc::UnboundedSender<Vec<u8>>) {
    std::thread::spawn(move || {
        let attr = MqAttr::new(0, queue_depth, max_msg_size, 0);
        let mqd = match mq_open(
            queue_name.as_str(),
            MQ_OFlag::O_CREAT | MQ_OFlag::O_RDONLY,
            Mode::S_IRUSR | Mode::S_IWUSR,
            Some(&attr),
        ) {
            Ok(mqd) => mqd,
            Err(e) => {
                error!("failed to open receiver queue {queue_name}: {e}");
                return;
            }
        };
        let mut buf = vec![0u8; max_msg_size as usize];
        loop {
            let mut priority = 0u32;
            match mq_receive(&mqd, &mut buf, &mut priority) {
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("receiver queue {queue_name} closed: {e}");
                    break;
                }
            }
        }
        let _ = mq_close(mqd);
        let _ = mq_unlink(queue_name.as_str());
        debug!("receiver worker for {queue_name} exited");
    });
}

/// A full-but-alive receiver queue must not stall the sender forever: give
/// it one second to drain before treating it like a dead receiver.
const SEND_DEADLINE: Duration = Duration::from_secs(1);

async fn deliver_to_receiver(queue_name: String, payload: Vec<u8>) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let mqd = mq_open(queue_name.as_str(), MQ_OFlag::O_WRONLY, Mode::empty(), None)?;
        let deadline = clock_gettime(ClockId::CLOCK_REALTIME)? + TimeSpec::from_duration(SEND_DEADLINE);
        let send_result = mq_timedsend(&mqd, &payload, 0, &deadline);
        mq_close(mqd)?;
        send_result?;
        Ok(())
    })
    .await?
}

/// PubSub transport using the shared-memory registry + per-receiver mqueue
/// scheme described above. One instance per process; `add_topic`/
/// `remove_topic` register/deregister this process's single receiver
/// identity against the named topic.
pub struct SharedMemoryTransport {
    registry: Arc<RegistrySegment>,
    uuid: Uuid,
    pid: i32,
    queue_name: String,
    inbox: Inbox,
}

impl SharedMemoryTransport {
    pub fn new(config: SharedMemoryConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(RegistrySegment::open_or_create(&config)?);
        let uuid = Uuid::new_v4();
        let pid = std::process::id() as i32;
        let queue_name = receiver_queue_name(uuid);

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_receiver_worker(queue_name.clone(), config.max_msg_size, config.queue_depth, tx);

        Ok(Self {
            registry,
            uuid,
            pid,
            queue_name,
            inbox: Inbox {
                inbox: AsyncMutex::new(rx),
            },
        })
    }

    fn evict_dead_receivers(&self, topic_id: &str) {
        let _ = self.registry.with_registry(|registry| {
            if let Some(entries) = registry.receivers.get_mut(topic_id) {
                entries.retain(|e| process_is_alive(e.pid));
                if entries.is_empty() {
                    registry.receivers.remove(topic_id);
                }
            }
        });
    }

    async fn fanout(&self, topic_id: &str, bytes: &[u8]) -> Result<()> {
        let entries = self
            .registry
            .with_registry(|registry| registry.receivers.get(topic_id).cloned().unwrap_or_default())
            .map_err(|e| Error::SystemError(e.to_string()))?;

        let mut any_dead = false;
        for entry in entries {
            if !process_is_alive(entry.pid) {
                any_dead = true;
                continue;
            }
            let queue_name = receiver_queue_name(entry.uuid);
            if let Err(e) = deliver_to_receiver(queue_name.clone(), bytes.to_vec()).await {
                warn!("send to receiver {queue_name} failed, evicting: {e}");
                any_dead = true;
            }
        }
        if any_dead {
            self.evict_dead_receivers(topic_id);
        }
        Ok(())
    }
}

#[async_trait]
impl PubSubTransport for SharedMemoryTransport {
    fn add_topic(&self, topic_id: &str) {
        let entry = ReceiverEntry {
            uuid: self.uuid,
            pid: self.pid,
        };
        let result = self.registry.with_registry(|registry| {
            let entries = registry.receivers.entry(topic_id.to_string()).or_default();
            entries.retain(|e| process_is_alive(e.pid));
            if !entries.iter().any(|e| e.uuid == entry.uuid) {
                entries.push(entry.clone());
            }
        });
        if let Err(e) = result {
            error!("failed to register receiver for topic {topic_id}: {e}");
        }
    }

    fn remove_topic(&self, topic_id: &str) {
        let result = self.registry.with_registry(|registry| {
            if let Some(entries) = registry.receivers.get_mut(topic_id) {
                entries.retain(|e| e.uuid != self.uuid);
                if entries.is_empty() {
                    registry.receivers.remove(topic_id);
                }
            }
        });
        if let Err(e) = result {
            error!("failed to deregister receiver for topic {topic_id}: {e}");
        }
    }

    async fn send(&self, topic_id: &str, bytes: &[u8], timeout: std::time::Duration) -> Result<()> {
        if timeout.is_zero() {
            self.fanout(topic_id, bytes).await
        } else {
            tokio::time::timeout(timeout, self.fanout(topic_id, bytes))
                .await
                .map_err(|_| Error::Cancelled)?
        }
    }

    async fn async_send(&self, topic_id: &str, bytes: Vec<u8>) -> Result<()> {
        self.fanout(topic_id, &bytes).await
    }

    async fn receive(&self) -> Result<Vec<u8>> {
        self.inbox
            .inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::SystemError("receiver queue closed".into()))
    }
}

impl Drop for SharedMemoryTransport {
    fn drop(&mut self) {
        let _ = self.registry.with_registry(|registry| {
            for entries in registry.receivers.values_mut() {
                entries.retain(|e| e.uuid != self.uuid);
            }
            registry.receivers.retain(|_, v| !v.is_empty());
        });
    }
}
