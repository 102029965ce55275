//! HSMS session layer for SECS/GEM
//!
//! This crate implements HSMS-SS (SEMI E37.1) over TCP: message framing,
//! the connection state machine, the select / linktest / separate control
//! procedures and request/reply correlation through system bytes.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use secs_hsms::{ConnectMode, HsmsProtocol, HsmsSettings};
//!
//! # async fn run() -> secs_core::SecsResult<()> {
//! let protocol = HsmsProtocol::new(
//!     HsmsSettings::new().with_port(5000).with_connect_mode(ConnectMode::Active),
//! )?;
//! protocol.enable().await?;
//!
//! let request = protocol.data_message(1, 1, true, None)?;
//! if let Some(reply) = protocol.send_and_wait_for_response(&request).await? {
//!     println!("{}", reply);
//! }
//! protocol.disable().await;
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod dispatcher;
pub mod events;
pub mod header;
pub mod message;
pub mod protocol;
pub mod settings;
pub mod state;
pub mod statistics;
pub mod timer;

pub use decoder::FrameReader;
pub use events::{CallbackHandler, ChannelHandler, HsmsDispatch, HsmsEvent, HsmsHandler};
pub use header::{CONTROL_SESSION_ID, HEADER_LENGTH, HsmsHeader, RejectReason, SType};
pub use message::HsmsMessage;
pub use protocol::HsmsProtocol;
pub use secs_core::{SecsError, SecsResult};
pub use settings::{ConnectMode, DEFAULT_MAX_MESSAGE_LENGTH, DeviceType, HsmsSettings, Timeouts};
pub use state::HsmsState;
pub use statistics::HsmsStatistics;
pub use timer::Timer;
