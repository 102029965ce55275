//! Transport layer for SECS/GEM
//!
//! HSMS runs over TCP only: an active side connects out, a passive side
//! accepts.

pub mod listener;
pub mod stream;
pub mod tcp;

pub use listener::TcpAcceptor;
pub use secs_core::{SecsError, SecsResult};
pub use stream::{BoxedReader, BoxedWriter, TransportLayer};
pub use tcp::{TcpSettings, TcpTransport};
