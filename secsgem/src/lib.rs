//! secsgem - Rust implementation of the SECS/GEM protocol stack
//!
//! SECS/GEM is the SEMI communication standard between semiconductor
//! equipment and fab host controllers.
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `secs-core`: error handling, the SECS-II item model and the
//!   hierarchical state machine engine
//! - `secs-codec`: SECS-II binary codec, SML text format, SFDL structures
//! - `secs-transport`: TCP transport (active connect, passive accept)
//! - `secs-hsms`: HSMS framing, connection state machine and protocol
//! - `secs-gem`: GEM communication and control state machines, function
//!   catalog and message dispatch
//!
//! # Usage
//!
//! ```no_run
//! use secsgem::gem::{GemHostHandler, GemSettings};
//! use secsgem::hsms::HsmsSettings;
//!
//! # async fn run() -> secsgem::SecsResult<()> {
//! let host = GemHostHandler::new(GemSettings::new(
//!     HsmsSettings::new().with_address("10.0.0.5".parse().unwrap()),
//! ))?;
//! host.enable().await?;
//! host.request_online().await?;
//! # Ok(())
//! # }
//! ```

// Re-export core types
pub use secs_core::datatypes::*;
pub use secs_core::{ParseError, SecsError, SecsResult};

// Re-export the state machine engine
pub mod fsm {
    pub use secs_core::fsm::*;
}

// Re-export the codecs
pub mod codec {
    pub use secs_codec::*;
}

// Re-export the transport layer
pub mod transport {
    pub use secs_transport::*;
}

// Re-export the HSMS layer
pub mod hsms {
    pub use secs_hsms::*;
}

// Re-export the GEM layer
pub mod gem {
    pub use secs_gem::*;
}
