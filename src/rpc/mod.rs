//! Typed RPC fabric: service/rpc/type-named request-response calls between a
//! client and a server, with support for out-of-order delayed replies.

pub mod client;
pub mod locator;
pub mod server;
pub mod transport;
pub mod types;

pub use client::RpcClient;
pub use locator::ServiceLocator;
pub use server::{RpcServer, TxCtx};
pub use transport::{Endpoint, ReceiveHandler, RpcClientTransport, RpcServerTransport, SessionId};
pub use types::RpcTypeDef;

pub use crate::error::rpc::{Error, Result};
