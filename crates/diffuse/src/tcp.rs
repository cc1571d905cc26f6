//! # TCP transport
//!
//! Frames are written as a little-endian `u32` length followed by the frame
//! bytes. The client opens one connection per exchange, so abandoning an
//! exchange (a timed-out result poll, say) just drops its socket, and the
//! server drops the request it was answering.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::client::DiffuserClient;
use crate::error::Result;
use crate::remote::{PeerConnector, RemoteDiffuser};
use crate::service::DiffuserService;
use crate::strategy::Endpoint;
use crate::transport::{self, Transport, TransportError};

/// Frames above this are refused in both directions.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> transport::Result<()> {
    let len = u32::try_from(frame.len())
        .ok()
        .filter(|n| *n as usize <= MAX_FRAME_LEN)
        .ok_or(TransportError::PayloadTooLarge(frame.len()))?;
    writer.write_u32_le(len).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame; `None` on a clean end of stream before the length prefix.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> transport::Result<Option<Vec<u8>>> {
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(TransportError::PayloadTooLarge(len));
    }
    let mut frame = vec![0; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

pub struct TcpTransport {
    addr: String,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        write_frame(&mut stream, payload).await?;
        read_frame(&mut stream)
            .await?
            .ok_or_else(|| TransportError::ConnectionLost(format!("{} closed before replying", self.addr)))
    }
}

/// Accepts connections forever, answering each frame with `service`.
pub async fn serve(listener: TcpListener, service: Arc<DiffuserService>) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "serving diffusers");
    loop {
        let (stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;

        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, service).await {
                warn!(%addr, error = %e, "connection ended");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, service: Arc<DiffuserService>) -> transport::Result<()> {
    while let Some(frame) = read_frame(&mut stream).await? {
        // a caller that gave up on a result poll hangs up; stop waiting for it
        let reply = tokio::select! {
            reply = service.handle(&frame) => reply,
            _ = hung_up(&stream) => {
                debug!("peer hung up mid-request");
                return Ok(());
            }
        };
        write_frame(&mut stream, &reply).await?;
    }
    debug!("peer closed connection");
    Ok(())
}

/// Resolves once the peer has closed its end. Pipelined bytes are left unread.
async fn hung_up(stream: &TcpStream) {
    let mut byte = [0; 1];
    match stream.peek(&mut byte).await {
        Ok(0) | Err(_) => {}
        Ok(_) => std::future::pending().await,
    }
}

/// Connects to endpoints given as `host:port`, reusing one client per endpoint.
#[derive(Default)]
pub struct TcpConnector {
    clients: DashMap<Endpoint, Arc<DiffuserClient>>,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeerConnector for TcpConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn RemoteDiffuser>> {
        let client = self
            .clients
            .entry(endpoint.clone())
            .or_insert_with(|| {
                let transport = Arc::new(TcpTransport::new(endpoint.address()));
                Arc::new(DiffuserClient::new(endpoint.address(), transport))
            })
            .clone();
        Ok(client)
    }
}
