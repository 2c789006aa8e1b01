//! UNIX-domain socket RPC transport: connect-per-call client, accept-loop
//! server, 4-byte big-endian length-prefixed frames on both sides.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::envelope::{read_framed, write_framed};
use crate::error::rpc::{Error, Result};
use crate::handle::Handle;
use crate::rpc::transport::{Endpoint, ReceiveHandler, RpcClientTransport, RpcServerTransport, SessionId};

struct Acceptor {
    refcount: usize,
    shutdown: Arc<tokio::sync::Notify>,
}

type SessionMap = Arc<Mutex<HashMap<SessionId, UnixStream>>>;

/// UNIX-domain transport configuration. `socket_dir` is the root directory
/// service endpoints are derived under; defaults to `/var/run`, the
/// conventional location for UNIX-domain service sockets, but is
/// overridable for non-root test runs or sandboxed deployments.
#[derive(Debug, Clone)]
pub struct UnixDomainConfig {
    pub socket_dir: String,
}

impl Default for UnixDomainConfig {
    fn default() -> Self {
        Self {
            socket_dir: "/var/run".into(),
        }
    }
}

/// RPC transport over UNIX-domain sockets. One instance is shared between a
/// client and a server role; most processes use only one side.
pub struct UnixDomainRpcTransport {
    acceptors: Mutex<HashMap<Endpoint, Acceptor>>,
    sessions: SessionMap,
    config: UnixDomainConfig,
}

impl UnixDomainRpcTransport {
    pub fn new() -> Self {
        Self::with_config(UnixDomainConfig::default())
    }

    pub fn with_config(config: UnixDomainConfig) -> Self {
        Self {
            acceptors: Mutex::new(HashMap::new()),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    /// `<socket_dir>/<service_name>`, this instance's default service
    /// location.
    pub fn default_endpoint(&self, service_name: &str) -> Endpoint {
        format!("{}/{service_name}", self.config.socket_dir)
    }

    async fn accept_loop(
        ep: Endpoint,
        listener: UnixListener,
        handler: ReceiveHandler,
        shutdown: Arc<tokio::sync::Notify>,
        sessions: SessionMap,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("unix-domain acceptor for {ep} shutting down");
                    return;
                }
                accepted = listener.accept() => {
                    let (mut stream, _) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!("accept failed on {ep}: {e}");
                            continue;
                        }
                    };
                    let handler = handler.clone();
                    let sessions = sessions.clone();
                    tokio::spawn(async move {
                        let bytes = match read_framed(&mut stream).await {
                            Ok(b) => b,
                            Err(e) => {
                                warn!("failed to read request frame: {e}");
                                return;
                            }
                        };
                        let session = Handle::next();
                        sessions.lock().await.insert(session, stream);
                        handler(session, bytes);
                    });
                }
            }
        }
    }
}

impl Default for UnixDomainRpcTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RpcClientTransport for UnixDomainRpcTransport {
    /// Connects fresh for each call. The read races a timer when
    /// `timeout > 0`; `timeout == 0` waits forever.
    async fn client_send_n_receive(
        &self,
        ep: &Endpoint,
        req: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let mut stream = UnixStream::connect(ep)
            .await
            .map_err(|e| Error::SystemError(format!("connect {ep} failed: {e}")))?;
        write_framed(&mut stream, req)
            .await
            .map_err(|e| Error::SystemError(e.to_string()))?;

        let read = read_framed(&mut stream);
        if timeout.is_zero() {
            read.await.map_err(|e| Error::SystemError(e.to_string()))
        } else {
            match tokio::time::timeout(timeout, read).await {
                Ok(Ok(bytes)) => Ok(bytes),
                Ok(Err(e)) => Err(Error::SystemError(e.to_string())),
                Err(_) => Err(Error::Cancelled),
            }
        }
    }
}

#[async_trait]
impl RpcServerTransport for UnixDomainRpcTransport {
    /// Deletes any stale socket path first. Reference-counts repeat
    /// registrations of the same endpoint instead of erroring.
    async fn server_add(&self, ep: Endpoint, handler: ReceiveHandler) -> Result<()> {
        let mut acceptors = self.acceptors.lock().await;
        if let Some(acceptor) = acceptors.get_mut(&ep) {
            acceptor.refcount += 1;
            return Ok(());
        }

        if Path::new(&ep).exists() {
            let _ = std::fs::remove_file(&ep);
        }
        let listener = UnixListener::bind(&ep)
            .map_err(|e| Error::SystemError(format!("bind {ep} failed: {e}")))?;
        let shutdown = Arc::new(tokio::sync::Notify::new());

        tokio::spawn(Self::accept_loop(
            ep.clone(),
            listener,
            handler,
            shutdown.clone(),
            self.sessions.clone(),
        ));

        acceptors.insert(ep, Acceptor { refcount: 1, shutdown });
        Ok(())
    }

    async fn server_remove(&self, ep: &Endpoint) -> Result<()> {
        let mut acceptors = self.acceptors.lock().await;
        let Some(acceptor) = acceptors.get_mut(ep) else {
            return Ok(());
        };
        acceptor.refcount -= 1;
        if acceptor.refcount == 0 {
            acceptor.shutdown.notify_one();
            acceptors.remove(ep);
            let _ = std::fs::remove_file(ep);
        }
        Ok(())
    }

    async fn server_send(&self, session: SessionId, res: Vec<u8>) -> Result<()> {
        let mut stream = self
            .sessions
            .lock()
            .await
            .remove(&session)
            .ok_or_else(|| Error::SystemError(format!("unknown rpc session {session}")))?;
        write_framed(&mut stream, &res)
            .await
            .map_err(|e| Error::SystemError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn round_trips_a_call() {
        let dir = tempfile::tempdir().unwrap();
        let ep = dir.path().join("svc").to_string_lossy().to_string();

        let server = Arc::new(UnixDomainRpcTransport::new());
        let received = Arc::new(StdMutex::new(None));
        let received_clone = received.clone();
        let server_for_handler = server.clone();
        let handler: ReceiveHandler = Arc::new(move |session, bytes| {
            *received_clone.lock().unwrap() = Some(bytes.clone());
            let server = server_for_handler.clone();
            tokio::spawn(async move {
                server.server_send(session, b"pong".to_vec()).await.unwrap();
            });
        });
        server.server_add(ep.clone(), handler).await.unwrap();

        let client = UnixDomainRpcTransport::new();
        let res = client
            .client_send_n_receive(&ep, b"ping", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(res, b"pong");
        assert_eq!(received.lock().unwrap().as_deref(), Some(&b"ping"[..]));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_system_error() {
        let client = UnixDomainRpcTransport::new();
        let err = client
            .client_send_n_receive(&"/nonexistent/path".to_string(), b"x", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SystemError(_)));
    }
}
