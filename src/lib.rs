//! # pslink
//!
//! Transport-agnostic typed PubSub and RPC primitives for inter-process
//! communication. Two composable engines — [`pubsub`] and [`rpc`] — are
//! generic over a pluggable transport trait, selected once at construction
//! time; [`transports`] ships reference implementations (shared memory and
//! UDP multicast for PubSub, UNIX-domain sockets for RPC).

pub mod buffer;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod handle;
pub mod logging;
pub mod pubsub;
pub mod reactor;
pub mod rpc;
pub mod transports;

pub use buffer::Buffer;
pub use codec::Codec;
pub use handle::Handle;
pub use reactor::Reactor;

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
