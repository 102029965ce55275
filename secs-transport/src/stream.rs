//! Transport abstraction handed to the HSMS layer

use async_trait::async_trait;
use secs_core::SecsResult;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// Owned read half of an open transport
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Owned write half of an open transport
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A transport that can be opened and then split into independent halves
///
/// HSMS reads frames on a dedicated task while other tasks send, so an open
/// transport is handed over as a reader/writer pair.
#[async_trait]
pub trait TransportLayer: Send + Sync {
    /// Open the physical connection
    ///
    /// # Errors
    /// Fails if the transport is already open or the peer can't be reached.
    async fn open(&mut self) -> SecsResult<()>;

    /// Address of the remote peer, if connected
    fn peer_address(&self) -> Option<SocketAddr>;

    /// Split an open transport into its read and write halves
    ///
    /// # Returns
    /// The read and write halves; `SecsError::NotConnected` if the
    /// transport was never opened
    fn into_split(self: Box<Self>) -> SecsResult<(BoxedReader, BoxedWriter)>;
}
