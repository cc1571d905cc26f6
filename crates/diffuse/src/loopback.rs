//! An in-process transport that hands frames straight to a [`DiffuserService`].
//!
//! Frames still go through full encoding and decoding, so a loopback peer
//! exercises the same path as a networked one.

use std::sync::Arc;

use crate::service::DiffuserService;
use crate::transport::{Result, Transport};

pub struct LoopbackTransport {
    service: Arc<DiffuserService>,
}

impl LoopbackTransport {
    pub fn new(service: Arc<DiffuserService>) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackTransport {
    async fn call(&self, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(self.service.handle(payload).await)
    }
}
