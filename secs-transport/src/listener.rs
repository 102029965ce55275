//! Passive-mode TCP acceptor

use crate::tcp::TcpTransport;
use secs_core::{SecsError, SecsResult};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Listens for incoming connections and wraps each one in a [`TcpTransport`]
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Bind to `address`
    ///
    /// # Errors
    ///
    /// Returns a connection error if the address can't be bound
    pub async fn bind(address: SocketAddr) -> SecsResult<Self> {
        let listener = TcpListener::bind(address).await.map_err(|e| {
            SecsError::Connection(std::io::Error::new(
                e.kind(),
                format!("Failed to bind to {}: {}", address, e),
            ))
        })?;
        log::info!("listening on {}", address);
        Ok(Self { listener })
    }

    /// The bound address, useful when binding to port 0
    pub fn local_addr(&self) -> SecsResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait for the next connection
    pub async fn accept(&self) -> SecsResult<(TcpTransport, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        log::info!("accepted connection from {}", peer);
        Ok((TcpTransport::from_connected_stream(stream), peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::TransportLayer;
    use crate::tcp::TcpSettings;

    #[tokio::test]
    async fn test_accept() {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = acceptor.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut transport = TcpTransport::new(TcpSettings::new(addr));
            transport.open().await.unwrap();
            transport
        });

        let (accepted, peer) = acceptor.accept().await.unwrap();
        let client = client.await.unwrap();
        assert_eq!(accepted.peer_address(), Some(peer));
        assert!(client.peer_address().is_some());
    }
}
