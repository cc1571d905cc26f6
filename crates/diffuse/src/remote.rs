//! # Remote diffusers
//!
//! [`RemoteDiffuser`] is everything a dispatcher needs from a peer. The local
//! [`DiffuserRegistry`](crate::registry::DiffuserRegistry) implements it directly,
//! and [`DiffuserClient`](crate::client::DiffuserClient) implements it over a
//! [`Transport`](crate::transport::Transport), so a dispatcher cannot tell an
//! in-process peer from a networked one.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::signature::Signature;
use crate::store::RequestId;
use crate::strategy::{Endpoint, EndpointSet};
use crate::transport::TransportError;

/// One invocation, with target and arguments already serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteRequest {
    pub arg_types: Vec<String>,
    pub return_type: String,
    pub args: Vec<Vec<u8>>,
    pub target: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Ready,
    /// Still running, or not known to the peer at all.
    Pending,
}

#[async_trait]
pub trait RemoteDiffuser: Send + Sync + 'static {
    /// Creates or replaces the diffuser for `signature`.
    async fn create(&self, signature: &Signature, endpoints: &EndpointSet, serializer: &str) -> Result<Signature>;

    /// Submits an invocation and returns at once with its request id.
    async fn execute(&self, signature: &Signature, request: ExecuteRequest) -> Result<RequestId>;

    async fn status(&self, signature: &Signature, request_id: &RequestId) -> Result<ResultStatus>;

    /// The serialized outcome, waiting for it if needed.
    async fn result(&self, signature: &Signature, request_id: &RequestId) -> Result<Vec<u8>>;

    async fn delete(&self, signature: &Signature) -> Result<()>;
}

/// Turns an endpoint into something to talk to.
pub trait PeerConnector: Send + Sync + 'static {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn RemoteDiffuser>>;
}

/// A fixed table of peers, for in-process deployments and tests.
#[derive(Default)]
pub struct PeerTable {
    peers: DashMap<Endpoint, Arc<dyn RemoteDiffuser>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, endpoint: impl Into<Endpoint>, peer: Arc<dyn RemoteDiffuser>) {
        self.peers.insert(endpoint.into(), peer);
    }

    pub fn remove(&self, endpoint: &Endpoint) -> Option<Arc<dyn RemoteDiffuser>> {
        self.peers.remove(endpoint).map(|(_, peer)| peer)
    }
}

impl PeerConnector for PeerTable {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn RemoteDiffuser>> {
        self.peers.get(endpoint).map(|p| p.clone()).ok_or_else(|| Error::Transport {
            peer: endpoint.to_string(),
            error: TransportError::ConnectionLost("unknown peer".into()),
        })
    }
}
