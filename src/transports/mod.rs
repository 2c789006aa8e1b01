//! Reference transport implementations: shared memory and UDP multicast for
//! PubSub, UNIX-domain sockets for RPC.

#[cfg(target_os = "linux")]
pub mod shared_memory;
pub mod udp;
pub mod unix_domain;

#[cfg(target_os = "linux")]
pub use shared_memory::{SharedMemoryConfig, SharedMemoryTransport};
pub use udp::{UdpConfig, UdpMulticastTransport};
pub use unix_domain::{UnixDomainConfig, UnixDomainRpcTransport};
