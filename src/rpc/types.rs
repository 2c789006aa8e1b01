//! RPC type identity: the (service_name, rpc_name, rpc_type_name) triple plus
//! the codecs used to encode/decode its request and response.

use std::sync::Arc;

use crate::codec::Codec;
use crate::envelope::rpc_id;

/// One named request/response operation within a service.
pub struct RpcTypeDef<Req, Res> {
    pub service_name: String,
    pub rpc_name: String,
    pub rpc_type_name: String,
    pub req_codec: Arc<dyn Codec<Req> + Send + Sync>,
    pub res_codec: Arc<dyn Codec<Res> + Send + Sync>,
}

impl<Req, Res> RpcTypeDef<Req, Res> {
    pub fn new(
        service_name: impl Into<String>,
        rpc_name: impl Into<String>,
        rpc_type_name: impl Into<String>,
        req_codec: Arc<dyn Codec<Req> + Send + Sync>,
        res_codec: Arc<dyn Codec<Res> + Send + Sync>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            rpc_name: rpc_name.into(),
            rpc_type_name: rpc_type_name.into(),
            req_codec,
            res_codec,
        }
    }

    /// `rpc_id = service_name ‖ rpc_name ‖ rpc_type_name`.
    pub fn rpc_id(&self) -> String {
        rpc_id(&self.service_name, &self.rpc_name, &self.rpc_type_name)
    }
}
