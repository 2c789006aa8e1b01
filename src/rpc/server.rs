//! Transport-independent RPC server core.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::envelope::{rpc_id, RpcCommon, RpcRequest, RpcResponse, VERSION};
use crate::error::rpc::{Error, Result};
use crate::handle::Handle;
use crate::rpc::transport::{Endpoint, ReceiveHandler, RpcServerTransport, SessionId};
use crate::rpc::types::RpcTypeDef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxStatus {
    Open,
    Delayed,
    Replied,
}

/// One in-flight request. Held by user handler code across the call that
/// eventually replies; `request_common` is a full copy of the decoded
/// request's common fields rather than a back-reference into `rpc_map`, so
/// replying never needs to re-acquire the server's topic/rpc lock.
pub struct TxCtx {
    session: SessionId,
    request_common: RpcCommon,
    tx_handle: Handle,
    rpc_id: String,
    status: Mutex<TxStatus>,
}

type RpcHandler = Box<dyn Fn(Arc<TxCtx>, Vec<u8>) + Send + Sync>;

struct RpcContext {
    handler: RpcHandler,
    delayed_tx: Mutex<HashMap<Handle, Arc<TxCtx>>>,
}

/// The server side of one RPC service; one instance per transport.
pub struct RpcServer<T: RpcServerTransport> {
    transport: Arc<T>,
    rpc_map: Mutex<HashMap<String, Arc<RpcContext>>>,
}

impl<T: RpcServerTransport + 'static> RpcServer<T> {
    pub fn new(transport: Arc<T>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            rpc_map: Mutex::new(HashMap::new()),
        })
    }

    /// Registers the endpoint with the transport; the transport invokes the
    /// returned handler on accept + full-request read.
    pub async fn add_provider(self: &Arc<Self>, ep: Endpoint) -> Result<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handler: ReceiveHandler = Arc::new(move |session, bytes| {
            if let Some(server) = weak.upgrade() {
                server.dispatch(session, bytes);
            }
        });
        self.transport.server_add(ep, handler).await
    }

    pub async fn remove_provider(&self, ep: &Endpoint) -> Result<()> {
        self.transport.server_remove(ep).await
    }

    /// Duplicate `(service_name, rpc_name, rpc_type_name)` registration
    /// fails with `DuplicateRpc`.
    pub fn add_rpc<H>(
        &self,
        service_name: &str,
        rpc_name: &str,
        rpc_type_name: &str,
        handler: H,
    ) -> Result<()>
    where
        H: Fn(Arc<TxCtx>, Vec<u8>) + Send + Sync + 'static,
    {
        let id = rpc_id(service_name, rpc_name, rpc_type_name);
        let mut map = self.rpc_map.lock();
        if map.contains_key(&id) {
            return Err(Error::DuplicateRpc);
        }
        map.insert(
            id,
            Arc::new(RpcContext {
                handler: Box::new(handler),
                delayed_tx: Mutex::new(HashMap::new()),
            }),
        );
        Ok(())
    }

    /// Unknown rpc_id or unsupported version: logged and dropped, the
    /// session never replies and the client eventually times out.
    fn dispatch(&self, session: SessionId, bytes: Vec<u8>) {
        let request = match RpcRequest::decode(&bytes) {
            Ok(r) => r,
            Err(e) => {
                warn!("failed to decode rpc request: {e}");
                return;
            }
        };
        if request.common.version != VERSION {
            warn!("unsupported rpc version: {}", request.common.version);
            return;
        }
        let id = request.common.rpc_id();
        let rpc_ctx = self.rpc_map.lock().get(&id).cloned();
        let Some(rpc_ctx) = rpc_ctx else {
            warn!("unknown rpc: {id}");
            return;
        };

        let tx = Arc::new(TxCtx {
            session,
            request_common: request.common,
            tx_handle: Handle::next(),
            rpc_id: id,
            status: Mutex::new(TxStatus::Open),
        });
        (rpc_ctx.handler)(tx.clone(), request.data);

        let delayed = *tx.status.lock() == TxStatus::Delayed;
        if delayed {
            rpc_ctx.delayed_tx.lock().insert(tx.tx_handle, tx);
        }
    }

    fn validate_and_mark_replied<Req, Res>(
        &self,
        tx: &Arc<TxCtx>,
        type_def: &RpcTypeDef<Req, Res>,
    ) -> Result<()> {
        if tx.rpc_id != type_def.rpc_id() {
            return Err(Error::RpcMismatch);
        }
        let mut status = tx.status.lock();
        if *status == TxStatus::Replied {
            return Err(Error::AlreadyReplied);
        }
        *status = TxStatus::Replied;
        Ok(())
    }

    fn remove_delayed(&self, tx: &Arc<TxCtx>) {
        if let Some(rpc_ctx) = self.rpc_map.lock().get(&tx.rpc_id).cloned() {
            rpc_ctx.delayed_tx.lock().remove(&tx.tx_handle);
        }
    }

    pub async fn reply_ok<Req, Res>(
        &self,
        tx: &Arc<TxCtx>,
        type_def: &RpcTypeDef<Req, Res>,
        res: &Res,
    ) -> Result<()> {
        self.validate_and_mark_replied(tx, type_def)?;
        let data = type_def
            .res_codec
            .encode(res)
            .map_err(Error::SerializationFailed)?;
        let response = RpcResponse {
            common: tx.request_common.clone(),
            status: true,
            data,
        };
        let bytes = response
            .encode()
            .map_err(|e| Error::SerializationFailed(e.to_string()))?;
        self.transport.server_send(tx.session, bytes).await?;
        self.remove_delayed(tx);
        Ok(())
    }

    pub async fn reply_error<Req, Res>(
        &self,
        tx: &Arc<TxCtx>,
        type_def: &RpcTypeDef<Req, Res>,
        errmsg: &str,
    ) -> Result<()> {
        self.validate_and_mark_replied(tx, type_def)?;
        let response = RpcResponse {
            common: tx.request_common.clone(),
            status: false,
            data: errmsg.as_bytes().to_vec(),
        };
        let bytes = response
            .encode()
            .map_err(|e| Error::SerializationFailed(e.to_string()))?;
        self.transport.server_send(tx.session, bytes).await?;
        self.remove_delayed(tx);
        Ok(())
    }

    /// Marks `tx` delayed; `dispatch` files it into `delayed_tx` once the
    /// handler that called this returns. No reply is sent here.
    pub fn reply_delayed<Req, Res>(
        &self,
        tx: &Arc<TxCtx>,
        type_def: &RpcTypeDef<Req, Res>,
    ) -> Result<()> {
        if tx.rpc_id != type_def.rpc_id() {
            return Err(Error::RpcMismatch);
        }
        let mut status = tx.status.lock();
        if *status == TxStatus::Replied {
            return Err(Error::AlreadyReplied);
        }
        *status = TxStatus::Delayed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::default_codec;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct Req {
        n: u32,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct Res {
        n: u32,
    }

    fn type_def() -> RpcTypeDef<Req, Res> {
        RpcTypeDef::new(
            "svc",
            "double",
            "double_t",
            Arc::new(default_codec::<Req>()),
            Arc::new(default_codec::<Res>()),
        )
    }

    struct RecordingTransport {
        sent: StdMutex<Vec<(SessionId, Vec<u8>)>>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self {
                sent: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RpcServerTransport for RecordingTransport {
        async fn server_add(&self, _ep: Endpoint, _handler: ReceiveHandler) -> Result<()> {
            Ok(())
        }

        async fn server_remove(&self, _ep: &Endpoint) -> Result<()> {
            Ok(())
        }

        async fn server_send(&self, session: SessionId, res: Vec<u8>) -> Result<()> {
            self.sent.lock().unwrap().push((session, res));
            Ok(())
        }
    }

    fn make_request(n: u32, id: u32) -> Vec<u8> {
        let common = RpcCommon {
            version: VERSION,
            id,
            service_name: "svc".into(),
            rpc_name: "double".into(),
            rpc_type_name: "double_t".into(),
        };
        let req = RpcRequest {
            common,
            data: bincode::serialize(&Req { n }).unwrap(),
        };
        req.encode().unwrap()
    }

    #[tokio::test]
    async fn immediate_reply_ok_sends_response() {
        let server = RpcServer::new(Arc::new(RecordingTransport::new()));
        let td = Arc::new(type_def());
        {
            let server = server.clone();
            let td = td.clone();
            server
                .add_rpc("svc", "double", "double_t", move |tx, data| {
                    let req: Req = bincode::deserialize(&data).unwrap();
                    let server = server.clone();
                    let td = td.clone();
                    tokio::spawn(async move {
                        server.reply_ok(&tx, &td, &Res { n: req.n * 2 }).await.unwrap();
                    });
                })
                .unwrap();
        }
        server.dispatch(Handle::next(), make_request(21, 1));
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let sent = server.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let response = RpcResponse::decode(&sent[0].1).unwrap();
        assert!(response.status);
    }

    #[tokio::test]
    async fn duplicate_rpc_registration_fails() {
        let server = RpcServer::new(Arc::new(RecordingTransport::new()));
        server.add_rpc("svc", "double", "double_t", |_, _| {}).unwrap();
        let err = server
            .add_rpc("svc", "double", "double_t", |_, _| {})
            .unwrap_err();
        assert_eq!(err, Error::DuplicateRpc);
    }

    #[tokio::test]
    async fn delayed_reply_is_filed_then_cleared_on_reply_ok() {
        let server = RpcServer::new(Arc::new(RecordingTransport::new()));
        let td = Arc::new(type_def());
        let (delayed_tx_slot, mut delayed_tx_rx) = tokio::sync::mpsc::unbounded_channel();
        {
            let server = server.clone();
            let td = td.clone();
            server
                .add_rpc("svc", "double", "double_t", move |tx, _data| {
                    server.reply_delayed(&tx, &td).unwrap();
                    delayed_tx_slot.send(tx).unwrap();
                })
                .unwrap();
        }
        server.dispatch(Handle::next(), make_request(5, 1));
        let tx = delayed_tx_rx.recv().await.unwrap();

        let rpc_ctx = server.rpc_map.lock().get(&td.rpc_id()).cloned().unwrap();
        assert_eq!(rpc_ctx.delayed_tx.lock().len(), 1);

        server.reply_ok(&tx, &td, &Res { n: 10 }).await.unwrap();
        assert_eq!(rpc_ctx.delayed_tx.lock().len(), 0);
    }

    #[tokio::test]
    async fn second_reply_is_already_replied() {
        let server = RpcServer::new(Arc::new(RecordingTransport::new()));
        let td = type_def();
        let tx = Arc::new(TxCtx {
            session: Handle::next(),
            request_common: RpcCommon {
                version: VERSION,
                id: 1,
                service_name: "svc".into(),
                rpc_name: "double".into(),
                rpc_type_name: "double_t".into(),
            },
            tx_handle: Handle::next(),
            rpc_id: td.rpc_id(),
            status: Mutex::new(TxStatus::Open),
        });
        server.reply_ok(&tx, &td, &Res { n: 1 }).await.unwrap();
        let err = server.reply_ok(&tx, &td, &Res { n: 1 }).await.unwrap_err();
        assert_eq!(err, Error::AlreadyReplied);
    }

    #[tokio::test]
    async fn mismatched_type_def_is_rpc_mismatch() {
        let server = RpcServer::new(Arc::new(RecordingTransport::new()));
        let td = type_def();
        let other = RpcTypeDef::<Req, Res>::new(
            "other",
            "double",
            "double_t",
            Arc::new(default_codec::<Req>()),
            Arc::new(default_codec::<Res>()),
        );
        let tx = Arc::new(TxCtx {
            session: Handle::next(),
            request_common: RpcCommon {
                version: VERSION,
                id: 1,
                service_name: "svc".into(),
                rpc_name: "double".into(),
                rpc_type_name: "double_t".into(),
            },
            tx_handle: Handle::next(),
            rpc_id: td.rpc_id(),
            status: Mutex::new(TxStatus::Open),
        });
        let err = server.reply_ok(&tx, &other, &Res { n: 1 }).await.unwrap_err();
        assert_eq!(err, Error::RpcMismatch);
    }
}
