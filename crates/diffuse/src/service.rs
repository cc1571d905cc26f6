//! # Diffuser service
//!
//! Maps request frames onto a [`DiffuserRegistry`] and wraps the outcome in a
//! reply frame. Transports call [`DiffuserService::handle`] with the raw bytes.

use std::sync::Arc;

use diffrpc::{Failure, FailureKind, Reply, ReplyFrame, Request, RequestFrame, decode_seq};
use tracing::{error, warn};

use crate::error::{Error, Result};
use crate::registry::DiffuserRegistry;
use crate::remote::{ExecuteRequest, ResultStatus};
use crate::signature::Signature;
use crate::store::RequestId;
use crate::strategy::EndpointSet;

pub struct DiffuserService {
    registry: Arc<DiffuserRegistry>,
}

impl DiffuserService {
    pub fn new(registry: Arc<DiffuserRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<DiffuserRegistry> {
        &self.registry
    }

    /// Handles one request frame and returns the encoded reply.
    ///
    /// A frame that does not decode is answered with a `Protocol` failure,
    /// echoing its sequence number when that much can be read.
    pub async fn handle(&self, payload: &[u8]) -> Vec<u8> {
        let reply = match RequestFrame::decode(payload) {
            Ok(frame) => {
                let status = self.dispatch(frame.request).await.map_err(|e| e.to_failure());
                ReplyFrame { seq: frame.seq, status }
            }
            Err(e) => {
                warn!(error = %e, "rejecting malformed request");
                let seq = decode_seq(payload).unwrap_or(0);
                ReplyFrame::err(seq, Failure::new(FailureKind::Protocol, e.to_string()))
            }
        };
        reply.to_bytes().unwrap_or_else(|e| {
            error!(error = %e, seq = reply.seq, "failed to encode reply");
            Vec::new()
        })
    }

    async fn dispatch(&self, request: Request) -> Result<Reply> {
        let registry = &self.registry;
        let reply = match request {
            Request::Create { signature, endpoints, serializer } => {
                let signature = Signature::parse(&signature)?;
                let created = registry.create(signature, EndpointSet::from_pairs(endpoints), &serializer)?;
                Reply::Created { signature: created.to_string() }
            }
            Request::Execute { signature, arg_types, return_type, args, target } => {
                let signature = Signature::parse(&signature)?;
                let request = ExecuteRequest { arg_types, return_type, args, target };
                let request_id = registry.execute(&signature, request).await?;
                Reply::Accepted { request_id: request_id.to_string() }
            }
            Request::Status { signature, request_id } => {
                let signature = Signature::parse(&signature)?;
                let status = registry.get_result_status(&signature, &RequestId::from(request_id));
                Reply::Status { ready: status == ResultStatus::Ready }
            }
            Request::Result { signature, request_id } => {
                let signature = Signature::parse(&signature)?;
                let bytes = registry.get_result(&signature, &RequestId::from(request_id)).await?;
                Reply::Value { bytes }
            }
            Request::Delete { signature } => {
                registry.delete(&Signature::parse(&signature)?)?;
                Reply::Deleted
            }
            Request::Class { name } => {
                let schema = registry
                    .context()
                    .classes()
                    .schema(&name)
                    .ok_or_else(|| Error::ClassResolution { class: name.clone(), tried: Vec::new() })?;
                let bytes = schema.to_bytes().map_err(|e| Error::serialization(crate::serializer::PACK, e))?;
                Reply::Class { bytes }
            }
        };
        Ok(reply)
    }
}
