//! Transport-independent RPC client core.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::envelope::{RpcCommon, RpcRequest, RpcResponse, VERSION};
use crate::error::rpc::{Error, Result};
use crate::reactor::Reactor;
use crate::rpc::locator::ServiceLocator;
use crate::rpc::transport::RpcClientTransport;
use crate::rpc::types::RpcTypeDef;

/// One client instance per transport/locator pair; `next_id` is the
/// monotonic request-id source shared across every RPC type called through
/// it.
pub struct RpcClient<T: RpcClientTransport> {
    transport: Arc<T>,
    locator: Arc<ServiceLocator>,
    next_id: AtomicU32,
    reactor: Reactor,
}

impl<T: RpcClientTransport> RpcClient<T> {
    pub fn new(transport: Arc<T>, locator: Arc<ServiceLocator>) -> Self {
        Self {
            transport,
            locator,
            next_id: AtomicU32::new(1),
            reactor: Reactor::current(),
        }
    }

    fn build_request<Req, Res>(
        &self,
        type_def: &RpcTypeDef<Req, Res>,
        req: &Req,
    ) -> Result<(RpcCommon, Vec<u8>)> {
        let req_data = type_def
            .req_codec
            .encode(req)
            .map_err(Error::SerializationFailed)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let common = RpcCommon {
            version: VERSION,
            id,
            service_name: type_def.service_name.clone(),
            rpc_name: type_def.rpc_name.clone(),
            rpc_type_name: type_def.rpc_type_name.clone(),
        };
        let request = RpcRequest {
            common: common.clone(),
            data: req_data,
        };
        let bytes = request
            .encode()
            .map_err(|e| Error::SerializationFailed(e.to_string()))?;
        Ok((common, bytes))
    }

    fn decode_response<Req, Res>(
        type_def: &RpcTypeDef<Req, Res>,
        common: &RpcCommon,
        bytes: &[u8],
    ) -> Result<Res> {
        let response = RpcResponse::decode(bytes).map_err(|e| {
            tracing::debug!("response decode failed: {e}");
            Error::InvalidResponse
        })?;
        if !response.matches_request(common) {
            return Err(Error::InvalidResponse);
        }
        if !response.status {
            return Err(Error::FailureResponse);
        }
        type_def
            .res_codec
            .decode(&response.data)
            .map_err(Error::DeserializationFailed)
    }

    /// Blocking call: resolves the endpoint, sends, and decodes the response
    /// or maps it to an error per the response-status/correlation rules.
    pub async fn call<Req, Res>(
        &self,
        type_def: &RpcTypeDef<Req, Res>,
        req: &Req,
        timeout: Duration,
    ) -> Result<Res> {
        let (common, req_bytes) = self.build_request(type_def, req)?;
        let ep = self.locator.get_service_location(&type_def.service_name)?;
        let res_bytes = self
            .transport
            .client_send_n_receive(&ep, &req_bytes, timeout)
            .await?;
        Self::decode_response(type_def, &common, &res_bytes)
    }

    /// Non-blocking call; `handler` receives the same result `call` would
    /// have returned.
    pub fn async_call<Req, Res, H>(
        self: &Arc<Self>,
        type_def: Arc<RpcTypeDef<Req, Res>>,
        req: Req,
        timeout: Duration,
        handler: H,
    ) where
        Req: Send + 'static,
        Res: Send + 'static,
        H: FnOnce(Result<Res>) + Send + 'static,
        T: 'static,
    {
        let client = self.clone();
        self.reactor.post(async move {
            let result = client.call(&type_def, &req, timeout).await;
            handler(result);
        });
    }
}
