//! UDP multicast PubSub transport. Every datagram is multicast to every
//! subscriber in the group; there is no per-topic join/leave at the socket
//! level, so `add_topic`/`remove_topic` are no-ops here (see the Open
//! Questions note in DESIGN.md) — filtering happens at the envelope level,
//! same as any other receiver on the group.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::pubsub::{Error, Result};
use crate::pubsub::transport::PubSubTransport;

#[derive(Debug, Clone)]
pub struct UdpConfig {
    pub local_addr: SocketAddr,
    pub multicast_addr: SocketAddr,
}

pub struct UdpMulticastTransport {
    socket: UdpSocket,
    multicast_addr: SocketAddr,
}

impl UdpMulticastTransport {
    pub async fn bind(config: UdpConfig) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(config.local_addr).await?;
        if let (SocketAddr::V4(multicast), _) = (config.multicast_addr, ()) {
            socket.join_multicast_v4(*multicast.ip(), std::net::Ipv4Addr::UNSPECIFIED)?;
            socket.set_multicast_loop_v4(true)?;
        } else {
            anyhow::bail!("IPv6 multicast is not supported");
        }
        Ok(Self {
            socket,
            multicast_addr: config.multicast_addr,
        })
    }

    const MAX_DATAGRAM: usize = 64 * 1024;
}

#[async_trait]
impl PubSubTransport for UdpMulticastTransport {
    fn add_topic(&self, topic_id: &str) {
        debug!("add_topic is a no-op on the UDP transport (unfiltered multicast): {topic_id}");
    }

    fn remove_topic(&self, topic_id: &str) {
        debug!("remove_topic is a no-op on the UDP transport (unfiltered multicast): {topic_id}");
    }

    async fn send(&self, _topic_id: &str, bytes: &[u8], timeout: Duration) -> Result<()> {
        let send = self.socket.send_to(bytes, self.multicast_addr);
        if timeout.is_zero() {
            send.await.map_err(|e| Error::SystemError(e.to_string()))?;
        } else {
            tokio::time::timeout(timeout, send)
                .await
                .map_err(|_| Error::Cancelled)?
                .map_err(|e| Error::SystemError(e.to_string()))?;
        }
        Ok(())
    }

    async fn async_send(&self, _topic_id: &str, bytes: Vec<u8>) -> Result<()> {
        self.socket
            .send_to(&bytes, self.multicast_addr)
            .await
            .map_err(|e| Error::SystemError(e.to_string()))?;
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; Self::MAX_DATAGRAM];
        let (n, _src) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| Error::SystemError(e.to_string()))?;
        buf.truncate(n);
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn self_addressed_multicast_loops_back() {
        // multicast_loop is enabled, so a single socket that has joined its
        // own group observes its own sends; this avoids the port-reuse
        // pitfalls of binding two sockets to the same multicast port.
        let group: SocketAddr = "239.15.15.15:48123".parse().unwrap();
        let transport = UdpMulticastTransport::bind(UdpConfig {
            local_addr: "0.0.0.0:48123".parse().unwrap(),
            multicast_addr: group,
        })
        .await
        .unwrap();

        transport.send("topic", b"hello", Duration::ZERO).await.unwrap();
        let got = tokio::time::timeout(Duration::from_secs(2), transport.receive())
            .await
            .expect("timed out waiting for multicast datagram")
            .unwrap();
        assert_eq!(got, b"hello");
    }
}
