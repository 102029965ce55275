//! HSMS connection settings
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use secs_hsms::{ConnectMode, DeviceType, HsmsSettings};
//! use std::time::Duration;
//!
//! let settings = HsmsSettings::new()
//!     .with_address("10.0.0.5".parse().unwrap())
//!     .with_port(5000)
//!     .with_connect_mode(ConnectMode::Active)
//!     .with_device_type(DeviceType::Host)
//!     .with_t3(Duration::from_secs(30));
//! ```

use crate::protocol::HsmsProtocol;
use secs_core::SecsResult;
use secs_transport::{TcpAcceptor, TcpSettings, TcpTransport};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

/// Which side opens the TCP connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectMode {
    /// Connect out and send Select.req
    Active,
    /// Listen and wait for Select.req
    Passive,
}

/// Role of the local side in the GEM dialogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Host,
    Equipment,
}

/// HSMS protocol timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Reply timeout for data messages
    pub t3: Duration,
    /// Delay between active connection attempts
    pub t5: Duration,
    /// Reply timeout for control messages
    pub t6: Duration,
    /// Time allowed between connect and select
    pub t7: Duration,
    /// Maximum gap between bytes of one frame
    pub t8: Duration,
    /// Period of Linktest.req while connected, zero disables it
    pub linktest: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            t3: Duration::from_secs(45),
            t5: Duration::from_secs(10),
            t6: Duration::from_secs(5),
            t7: Duration::from_secs(10),
            t8: Duration::from_secs(5),
            linktest: Duration::from_secs(30),
        }
    }
}

/// Largest frame accepted from a peer by default (16 MiB)
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 16 * 1024 * 1024;

fn default_max_message_length() -> usize {
    DEFAULT_MAX_MESSAGE_LENGTH
}

/// Settings for one HSMS connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsmsSettings {
    /// Peer address (active) or listen address (passive)
    pub address: IpAddr,
    pub port: u16,
    pub connect_mode: ConnectMode,
    /// Device id carried in data message headers
    pub session_id: u16,
    pub device_type: DeviceType,
    pub timeouts: Timeouts,
    /// Largest frame (header plus body) accepted from the peer
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

impl Default for HsmsSettings {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 5000,
            connect_mode: ConnectMode::Active,
            session_id: 0,
            device_type: DeviceType::Host,
            timeouts: Timeouts::default(),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }
}

impl HsmsSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_mode(mut self, mode: ConnectMode) -> Self {
        self.connect_mode = mode;
        self
    }

    pub fn with_session_id(mut self, session_id: u16) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_t3(mut self, t3: Duration) -> Self {
        self.timeouts.t3 = t3;
        self
    }

    pub fn with_t5(mut self, t5: Duration) -> Self {
        self.timeouts.t5 = t5;
        self
    }

    pub fn with_t6(mut self, t6: Duration) -> Self {
        self.timeouts.t6 = t6;
        self
    }

    pub fn with_t7(mut self, t7: Duration) -> Self {
        self.timeouts.t7 = t7;
        self
    }

    pub fn with_t8(mut self, t8: Duration) -> Self {
        self.timeouts.t8 = t8;
        self
    }

    pub fn with_linktest(mut self, period: Duration) -> Self {
        self.timeouts.linktest = period;
        self
    }

    pub fn with_max_message_length(mut self, length: usize) -> Self {
        self.max_message_length = length;
        self
    }

    pub fn socket_address(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Transport for the active side
    pub fn create_transport(&self) -> TcpTransport {
        TcpTransport::new(TcpSettings::new(self.socket_address()).with_connect_timeout(self.timeouts.t5))
    }

    /// Listener for the passive side
    pub async fn create_acceptor(&self) -> SecsResult<TcpAcceptor> {
        TcpAcceptor::bind(self.socket_address()).await
    }

    /// Protocol instance running on these settings
    pub fn create_protocol(self) -> SecsResult<Arc<HsmsProtocol>> {
        HsmsProtocol::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = HsmsSettings::default();
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.session_id, 0);
        assert_eq!(settings.timeouts.t3, Duration::from_secs(45));
        assert_eq!(settings.timeouts.t6, Duration::from_secs(5));
        assert_eq!(settings.socket_address().to_string(), "127.0.0.1:5000");
        assert_eq!(settings.max_message_length, DEFAULT_MAX_MESSAGE_LENGTH);
    }

    #[test]
    fn test_builder() {
        let settings = HsmsSettings::new()
            .with_port(6000)
            .with_connect_mode(ConnectMode::Passive)
            .with_device_type(DeviceType::Equipment)
            .with_session_id(7)
            .with_t6(Duration::from_millis(100))
            .with_max_message_length(1024);
        assert_eq!(settings.max_message_length, 1024);
        assert_eq!(settings.connect_mode, ConnectMode::Passive);
        assert_eq!(settings.device_type, DeviceType::Equipment);
        assert_eq!(settings.session_id, 7);
        assert_eq!(settings.timeouts.t6, Duration::from_millis(100));
        assert_eq!(settings.timeouts.t7, Duration::from_secs(10));
    }
}
