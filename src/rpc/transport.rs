//! Transport contract consumed by the RPC client and server engines.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::rpc::Result;
use crate::handle::Handle;

/// Service endpoint; a filesystem path for the UNIX-domain transport.
pub type Endpoint = String;

/// Opaque handle identifying one server-side connection/request session.
pub type SessionId = Handle;

/// Invoked by the transport on accept + full-request read, with the
/// request bytes; the server core decodes the envelope from there.
pub type ReceiveHandler = Arc<dyn Fn(SessionId, Vec<u8>) + Send + Sync>;

#[async_trait]
pub trait RpcClientTransport: Send + Sync {
    async fn client_send_n_receive(
        &self,
        ep: &Endpoint,
        req: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait RpcServerTransport: Send + Sync {
    async fn server_add(&self, ep: Endpoint, handler: ReceiveHandler) -> Result<()>;

    /// Drops refcount; destroys and unlinks the socket path on zero.
    async fn server_remove(&self, ep: &Endpoint) -> Result<()>;

    async fn server_send(&self, session: SessionId, res: Vec<u8>) -> Result<()>;
}
