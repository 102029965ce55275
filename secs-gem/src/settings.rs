//! GEM handler settings

use secs_hsms::{DeviceType, HsmsSettings};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Control state entered when the equipment starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitialControlState {
    EquipmentOffline,
    AttemptOnline,
    HostOffline,
    Online,
}

/// Online sub state entered when the control state becomes ONLINE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnlineSubState {
    Local,
    Remote,
}

/// Settings shared by the host and equipment handlers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GemSettings {
    pub hsms: HsmsSettings,
    /// Model name reported in S1F2 and S1F13/S1F14
    pub mdln: String,
    /// Software revision reported in S1F2 and S1F13/S1F14
    pub softrev: String,
    /// Wait between failed establish communication attempts
    pub establish_communication_delay: Duration,
    pub initial_control_state: InitialControlState,
    pub initial_online_state: OnlineSubState,
}

impl Default for GemSettings {
    fn default() -> Self {
        Self {
            hsms: HsmsSettings::default(),
            mdln: "secsgem".to_string(),
            softrev: env!("CARGO_PKG_VERSION").to_string(),
            establish_communication_delay: Duration::from_secs(10),
            initial_control_state: InitialControlState::Online,
            initial_online_state: OnlineSubState::Remote,
        }
    }
}

impl GemSettings {
    pub fn new(hsms: HsmsSettings) -> Self {
        Self {
            hsms,
            ..Self::default()
        }
    }

    pub fn with_hsms(mut self, hsms: HsmsSettings) -> Self {
        self.hsms = hsms;
        self
    }

    pub fn with_mdln(mut self, mdln: impl Into<String>) -> Self {
        self.mdln = mdln.into();
        self
    }

    pub fn with_softrev(mut self, softrev: impl Into<String>) -> Self {
        self.softrev = softrev.into();
        self
    }

    pub fn with_establish_communication_delay(mut self, delay: Duration) -> Self {
        self.establish_communication_delay = delay;
        self
    }

    pub fn with_initial_control_state(mut self, state: InitialControlState) -> Self {
        self.initial_control_state = state;
        self
    }

    pub fn with_initial_online_state(mut self, state: OnlineSubState) -> Self {
        self.initial_online_state = state;
        self
    }

    pub fn device_type(&self) -> DeviceType {
        self.hsms.device_type
    }

    pub fn is_equipment(&self) -> bool {
        self.hsms.device_type == DeviceType::Equipment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = GemSettings::default();
        assert_eq!(settings.mdln, "secsgem");
        assert_eq!(settings.establish_communication_delay, Duration::from_secs(10));
        assert_eq!(settings.initial_control_state, InitialControlState::Online);
        assert_eq!(settings.initial_online_state, OnlineSubState::Remote);
        assert!(!settings.is_equipment());
    }

    #[test]
    fn test_builder() {
        let settings = GemSettings::new(HsmsSettings::new().with_device_type(DeviceType::Equipment))
            .with_mdln("etcher")
            .with_softrev("2.1")
            .with_initial_control_state(InitialControlState::EquipmentOffline)
            .with_initial_online_state(OnlineSubState::Local);
        assert!(settings.is_equipment());
        assert_eq!(settings.mdln, "etcher");
        assert_eq!(settings.softrev, "2.1");
        assert_eq!(settings.initial_control_state, InitialControlState::EquipmentOffline);
        assert_eq!(settings.initial_online_state, OnlineSubState::Local);
    }
}
