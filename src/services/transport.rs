#[cfg(unix)]
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::{RelayError, Result};
use crate::interfaces::transport::{BoxedStream, Transport};

#[cfg(unix)]
pub struct UnixTransport {
    path: PathBuf,
}

#[cfg(unix)]
impl UnixTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[cfg(unix)]
#[async_trait]
impl Transport for UnixTransport {
    async fn connect(&self) -> Result<BoxedStream> {
        let stream = tokio::net::UnixStream::connect(&self.path)
            .await
            .map_err(|e| RelayError::Io(format!("{}: {e}", self.path.display())))?;
        Ok(Box::new(stream))
    }
}

pub struct TcpTransport {
    addr: String,
}

impl TcpTransport {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> Result<BoxedStream> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| RelayError::Io(format!("{}: {e}", self.addr)))?;
        Ok(Box::new(stream))
    }
}
