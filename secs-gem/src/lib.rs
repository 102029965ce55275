//! GEM layer for SECS/GEM
//!
//! This crate implements the SEMI E30 communication and control state
//! machines on top of an HSMS connection, the stream function catalog used
//! to check message bodies and the dispatch of incoming primaries to
//! registered handlers.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use secs_gem::{GemEquipmentHandler, GemSettings};
//! use secs_hsms::{ConnectMode, HsmsSettings};
//! use std::time::Duration;
//!
//! # async fn run() -> secs_core::SecsResult<()> {
//! let equipment = GemEquipmentHandler::new(
//!     GemSettings::new(HsmsSettings::new().with_connect_mode(ConnectMode::Passive))
//!         .with_mdln("etcher")
//!         .with_softrev("1.0"),
//! )?;
//! equipment.enable().await?;
//! if equipment.wait_for_communicating(Some(Duration::from_secs(30))).await {
//!     println!("control state {}", equipment.control_state());
//! }
//! equipment.disable().await?;
//! # Ok(())
//! # }
//! ```

pub mod communication;
pub mod control;
pub mod data_items;
pub mod equipment;
pub mod events;
pub mod functions;
pub mod handler;
pub mod host;
pub mod settings;

pub use communication::{CommunicationState, CommunicationStateMachine};
pub use control::{ControlState, ControlStateMachine, HostLink};
pub use data_items::{DataItemCatalog, DataItemDefinition};
pub use equipment::GemEquipmentHandler;
pub use events::{
    CallbackEventListener, ChannelEventListener, EventProducer, GemEvent, GemEventListener,
};
pub use functions::{FunctionCatalog, FunctionDefinition, StreamFunction};
pub use handler::{FnHandler, GemHandler, PrimaryFilter, StreamFunctionHandler};
pub use host::GemHostHandler;
pub use secs_core::{SecsError, SecsResult};
pub use settings::{GemSettings, InitialControlState, OnlineSubState};
