//! Wire framing: versioned PubSub envelopes, the subscription-announcement
//! payload, RPC request/response envelopes, and length-prefixed stream
//! framing used by the UNIX-domain RPC transport.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Current (and only) wire version.
pub const VERSION: u8 = 1;

/// PubSub envelope kind. `DATA` is the only kind defined so far; receivers
/// reject unknown kinds with a warning and drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum EnvelopeKind {
    Data = 0,
}

/// One logical PubSub message, as built by the publisher and interpreted by
/// the subscriber. `id` is monotonic per publisher; it is exposed for
/// diagnostics only (see Open Questions in DESIGN.md) and is never validated
/// for duplicate detection at the receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubSubEnvelope {
    pub version: u8,
    pub kind: EnvelopeKind,
    pub id: u32,
    pub domain: String,
    pub topic_name: String,
    pub topic_type_name: String,
    pub topic_data: Vec<u8>,
}

impl PubSubEnvelope {
    pub fn new(
        id: u32,
        domain: impl Into<String>,
        topic_name: impl Into<String>,
        topic_type_name: impl Into<String>,
        topic_data: Vec<u8>,
    ) -> Self {
        Self {
            version: VERSION,
            kind: EnvelopeKind::Data,
            id,
            domain: domain.into(),
            topic_name: topic_name.into(),
            topic_type_name: topic_type_name.into(),
            topic_data,
        }
    }

    /// `topic_id = domain ‖ topic_name ‖ topic_type_name`.
    pub fn topic_id(&self) -> String {
        topic_id(&self.domain, &self.topic_name, &self.topic_type_name)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| anyhow!("envelope encode failed: {e}"))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Self =
            bincode::deserialize(bytes).map_err(|e| anyhow!("envelope decode failed: {e}"))?;
        if envelope.version != VERSION {
            return Err(anyhow!(
                "unsupported envelope version: {}",
                envelope.version
            ));
        }
        Ok(envelope)
    }
}

pub fn topic_id(domain: &str, topic_name: &str, topic_type_name: &str) -> String {
    format!("{domain}{topic_name}{topic_type_name}")
}

/// Name of the builtin topic carrying subscription announcements.
pub const SUBSCRIPTION_ANNOUNCEMENT_TOPIC: &str = "__INTERNAL_SUBSCRIPTION__";

/// Payload of a subscription announcement: identifies the topic a newly
/// created durable reader wants history replayed for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionAnnouncement {
    pub domain: String,
    pub topic_name: String,
    pub topic_type_name: String,
}

impl SubscriptionAnnouncement {
    pub fn topic_id(&self) -> String {
        topic_id(&self.domain, &self.topic_name, &self.topic_type_name)
    }
}

/// Fields common to RPC requests and responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcCommon {
    pub version: u8,
    pub id: u32,
    pub service_name: String,
    pub rpc_name: String,
    pub rpc_type_name: String,
}

impl RpcCommon {
    /// `rpc_id = service_name ‖ rpc_name ‖ rpc_type_name`.
    pub fn rpc_id(&self) -> String {
        rpc_id(&self.service_name, &self.rpc_name, &self.rpc_type_name)
    }
}

pub fn rpc_id(service_name: &str, rpc_name: &str, rpc_type_name: &str) -> String {
    format!("{service_name}{rpc_name}{rpc_type_name}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub common: RpcCommon,
    pub data: Vec<u8>,
}

impl RpcRequest {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| anyhow!("rpc request encode failed: {e}"))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| anyhow!("rpc request decode failed: {e}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub common: RpcCommon,
    pub status: bool,
    pub data: Vec<u8>,
}

impl RpcResponse {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| anyhow!("rpc response encode failed: {e}"))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| anyhow!("rpc response decode failed: {e}"))
    }

    /// Correlation rule: valid iff version, id, and the name triple all match
    /// the original request.
    pub fn matches_request(&self, request: &RpcCommon) -> bool {
        self.common.version == request.version
            && self.common.id == request.id
            && self.common.service_name == request.service_name
            && self.common.rpc_name == request.rpc_name
            && self.common.rpc_type_name == request.rpc_type_name
    }
}

/// Maximum accepted frame length, guarding against corrupt/hostile peers.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Read one length-prefixed frame: a 4-byte big-endian length, then that many
/// bytes.
pub async fn read_framed<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(anyhow!("frame too large: {len} bytes"));
    }
    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).await?;
    Ok(data)
}

/// Write one length-prefixed frame: a 4-byte big-endian length, then `data`.
pub async fn write_framed<W: AsyncWrite + Unpin>(stream: &mut W, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len()).map_err(|_| anyhow!("frame too large to send"))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}
