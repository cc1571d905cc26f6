//! # Diffuser client
//!
//! Speaks the diffrpc frames over a [`Transport`]. Each exchange carries a fresh
//! sequence number, and a reply with any other number is rejected.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use diffrpc::{Reply, ReplyFrame, Request, RequestFrame};

use crate::class::ClassSource;
use crate::error::{Error, Result};
use crate::remote::{ExecuteRequest, RemoteDiffuser, ResultStatus};
use crate::signature::Signature;
use crate::store::RequestId;
use crate::strategy::EndpointSet;
use crate::transport::Transport;

pub struct DiffuserClient {
    peer: String,
    transport: Arc<dyn Transport>,
    seq: AtomicU64,
}

impl DiffuserClient {
    pub fn new(peer: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self { peer: peer.into(), transport, seq: AtomicU64::new(1) }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    fn protocol(&self, message: impl std::fmt::Display) -> Error {
        Error::Protocol { peer: self.peer.clone(), message: message.to_string() }
    }

    async fn exchange(&self, request: Request) -> Result<Reply> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let payload = RequestFrame::new(seq, request).to_bytes().map_err(|e| self.protocol(e))?;

        let bytes = self
            .transport
            .call(&payload)
            .await
            .map_err(|error| Error::Transport { peer: self.peer.clone(), error })?;

        let reply = ReplyFrame::decode(&bytes).map_err(|e| self.protocol(e))?;
        if reply.seq != seq {
            return Err(self.protocol(format!("sequence mismatch: sent {}, got {}", seq, reply.seq)));
        }
        reply.status.map_err(|failure| Error::Remote {
            peer: self.peer.clone(),
            kind: failure.kind,
            message: failure.message,
        })
    }

    fn unexpected(&self, reply: Reply) -> Error {
        self.protocol(format!("unexpected reply {:?}", reply))
    }
}

#[async_trait]
impl RemoteDiffuser for DiffuserClient {
    async fn create(&self, signature: &Signature, endpoints: &EndpointSet, serializer: &str) -> Result<Signature> {
        let request = Request::Create {
            signature: signature.to_string(),
            endpoints: endpoints.to_pairs(),
            serializer: serializer.to_string(),
        };
        match self.exchange(request).await? {
            Reply::Created { signature } => Ok(Signature::parse(&signature)?),
            other => Err(self.unexpected(other)),
        }
    }

    async fn execute(&self, signature: &Signature, request: ExecuteRequest) -> Result<RequestId> {
        let request = Request::Execute {
            signature: signature.to_string(),
            arg_types: request.arg_types,
            return_type: request.return_type,
            args: request.args,
            target: request.target,
        };
        match self.exchange(request).await? {
            Reply::Accepted { request_id } => Ok(RequestId::from(request_id)),
            other => Err(self.unexpected(other)),
        }
    }

    async fn status(&self, signature: &Signature, request_id: &RequestId) -> Result<ResultStatus> {
        let request = Request::Status { signature: signature.to_string(), request_id: request_id.to_string() };
        match self.exchange(request).await? {
            Reply::Status { ready: true } => Ok(ResultStatus::Ready),
            Reply::Status { ready: false } => Ok(ResultStatus::Pending),
            other => Err(self.unexpected(other)),
        }
    }

    async fn result(&self, signature: &Signature, request_id: &RequestId) -> Result<Vec<u8>> {
        let request = Request::Result { signature: signature.to_string(), request_id: request_id.to_string() };
        match self.exchange(request).await? {
            Reply::Value { bytes } => Ok(bytes),
            other => Err(self.unexpected(other)),
        }
    }

    async fn delete(&self, signature: &Signature) -> Result<()> {
        match self.exchange(Request::Delete { signature: signature.to_string() }).await? {
            Reply::Deleted => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }
}

#[async_trait]
impl ClassSource for DiffuserClient {
    fn describe(&self) -> String {
        self.peer.clone()
    }

    async fn fetch_class(&self, name: &str) -> Result<Vec<u8>> {
        match self.exchange(Request::Class { name: name.to_string() }).await? {
            Reply::Class { bytes } => Ok(bytes),
            other => Err(self.unexpected(other)),
        }
    }
}
