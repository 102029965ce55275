//! TCP transport implementation

use crate::stream::{BoxedReader, BoxedWriter, TransportLayer};
use async_trait::async_trait;
use secs_core::{SecsError, SecsResult};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// TCP transport settings
#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub address: SocketAddr,
    /// Limit for establishing the connection, `None` waits for the OS
    pub connect_timeout: Option<Duration>,
}

impl TcpSettings {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

/// TCP transport, either connecting actively or wrapping an accepted stream
#[derive(Debug)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    settings: TcpSettings,
    peer: Option<SocketAddr>,
}

fn not_connected() -> SecsError {
    SecsError::NotConnected
}

impl TcpTransport {
    pub fn new(settings: TcpSettings) -> Self {
        Self {
            stream: None,
            settings,
            peer: None,
        }
    }

    /// Wrap an already connected stream (passive mode)
    pub fn from_connected_stream(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        let address = peer.unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));
        Self {
            stream: Some(stream),
            settings: TcpSettings::new(address),
            peer,
        }
    }
}

#[async_trait]
impl TransportLayer for TcpTransport {
    async fn open(&mut self) -> SecsResult<()> {
        if self.stream.is_some() {
            return Err(SecsError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Connection has already been opened",
            )));
        }

        let stream = match self.settings.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, TcpStream::connect(self.settings.address))
                .await
                .map_err(|_| SecsError::Timeout)??,
            None => TcpStream::connect(self.settings.address).await?,
        };
        stream.set_nodelay(true)?;

        self.peer = stream.peer_addr().ok();
        self.stream = Some(stream);
        Ok(())
    }

    fn peer_address(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn into_split(self: Box<Self>) -> SecsResult<(BoxedReader, BoxedWriter)> {
        let stream = self.stream.ok_or_else(not_connected)?;
        let (reader, writer) = stream.into_split();
        Ok((Box::new(reader), Box::new(writer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_tcp_settings() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let settings = TcpSettings::new(addr).with_connect_timeout(Duration::from_secs(1));
        assert_eq!(settings.address, addr);
        assert_eq!(settings.connect_timeout, Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_open_and_split_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut transport = Box::new(TcpTransport::new(TcpSettings::new(addr)));
        assert_eq!(transport.peer_address(), None);
        transport.open().await.unwrap();
        assert_eq!(transport.peer_address(), Some(addr));
        assert!(transport.open().await.is_err());

        let (mut reader, mut writer) = transport.into_split().unwrap();
        writer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_split_unopened_fails() {
        let addr: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let transport = Box::new(TcpTransport::new(TcpSettings::new(addr)));
        assert!(matches!(transport.into_split(), Err(SecsError::NotConnected)));
    }
}
