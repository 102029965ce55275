//! Equipment side of the GEM dialogue

use crate::control::{ControlState, ControlStateMachine, HostLink};
use crate::data_items::{oflack, onlack};
use crate::functions::StreamFunction;
use crate::handler::{FnHandler, GemHandler};
use crate::settings::GemSettings;
use secs_core::{Item, SecsError, SecsResult};
use secs_hsms::{DeviceType, HsmsMessage};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// GEM equipment: a [`GemHandler`] plus the control state machine
///
/// Answers S1F15 (request offline) and S1F17 (request online) from the host
/// and checks the host with S1F1 when the operator switches online.
///
/// While the control state is offline (EQUIPMENT_OFFLINE, ATTEMPT_ONLINE or
/// HOST_OFFLINE) every primary except S1F13 and S1F17 is aborted with
/// function 0 and no event reports are sent.
pub struct GemEquipmentHandler {
    gem: Arc<GemHandler>,
    control: Arc<ControlStateMachine>,
}

impl GemEquipmentHandler {
    /// Create the equipment; the device type is forced to equipment
    ///
    /// The control state machine is started right away and sits in the
    /// configured initial state.
    pub fn new(mut settings: GemSettings) -> SecsResult<Self> {
        settings.hsms.device_type = DeviceType::Equipment;
        let gem = GemHandler::new(settings)?;
        let control = ControlStateMachine::new(gem.settings(), gem.events().clone())?;
        control.set_host_link(Arc::downgrade(&gem) as Weak<dyn HostLink>);

        let offline = control.clone();
        gem.register_stream_function_handler(
            1,
            15,
            Arc::new(FnHandler::new(move |_: &GemHandler, _: &HsmsMessage| {
                if offline.is_online() {
                    offline.remote_offline()?;
                }
                Ok(Some(Item::binary(vec![oflack::ACKNOWLEDGE])))
            })),
        );

        let online = control.clone();
        gem.register_stream_function_handler(
            1,
            17,
            Arc::new(FnHandler::new(move |_: &GemHandler, _: &HsmsMessage| {
                let ack = match online.current() {
                    ControlState::HostOffline => {
                        online.remote_online()?;
                        onlack::ACCEPTED
                    }
                    state if state.is_online() => onlack::ALREADY_ONLINE,
                    _ => onlack::NOT_ALLOWED,
                };
                Ok(Some(Item::binary(vec![ack])))
            })),
        );

        let gate = control.clone();
        gem.set_primary_filter(Arc::new(move |sf: StreamFunction| {
            gate.is_online() || accepted_offline(sf)
        }));

        control.start()?;
        Ok(Self { gem, control })
    }

    pub fn gem(&self) -> &Arc<GemHandler> {
        &self.gem
    }

    pub fn control(&self) -> &Arc<ControlStateMachine> {
        &self.control
    }

    pub fn control_state(&self) -> ControlState {
        self.control.current()
    }

    pub async fn enable(&self) -> SecsResult<()> {
        self.gem.enable().await
    }

    pub async fn disable(&self) -> SecsResult<()> {
        self.gem.disable().await
    }

    pub async fn wait_for_communicating(&self, timeout: Option<Duration>) -> bool {
        self.gem.wait_for_communicating(timeout).await
    }

    /// Send S6F11 and wait for the host's S6F12
    ///
    /// # Arguments
    /// * `data_id` - DATAID of the report
    /// * `ceid` - Collection event the reports belong to
    /// * `reports` - Report items, each `<L [2] <RPTID> <L [n] <V>...>>`
    ///
    /// # Returns
    /// The ACKC6 code, `None` if the host didn't answer
    ///
    /// # Errors
    /// Returns [`SecsError::Protocol`] while the control state is offline.
    pub async fn send_event_report(
        &self,
        data_id: u32,
        ceid: u32,
        reports: Vec<Item>,
    ) -> SecsResult<Option<u8>> {
        if !self.control.is_online() {
            return Err(SecsError::Protocol(format!(
                "S6F11 for CEID {} not sent in control state {}",
                ceid,
                self.control.current()
            )));
        }
        let body = Item::list(vec![Item::u4(data_id), Item::u4(ceid), Item::list(reports)]);
        let reply = self.gem.send_and_wait_for_response(6, 11, Some(&body)).await?;
        Ok(acknowledge(reply, 12))
    }
}

impl std::fmt::Debug for GemEquipmentHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GemEquipmentHandler")
            .field("gem", &self.gem)
            .field("control", &self.control.current())
            .finish()
    }
}

/// Primaries the equipment answers while offline
fn accepted_offline(sf: StreamFunction) -> bool {
    sf == StreamFunction::new(1, 13) || sf == StreamFunction::new(1, 17)
}

/// Single byte acknowledge code of a `function` reply
pub(crate) fn acknowledge(reply: Option<HsmsMessage>, function: u8) -> Option<u8> {
    let reply = reply?;
    if reply.header.function != function {
        log::warn!("gem: expected F{}, got {}", function, reply);
        return None;
    }
    let code = reply.item().ok()??.first_int()?;
    u8::try_from(code).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::GemHostHandler;
    use crate::settings::InitialControlState;
    use secs_hsms::{ConnectMode, HsmsSettings};

    const HANDSHAKE: Option<Duration> = Some(Duration::from_secs(5));

    async fn pair(initial: InitialControlState) -> (GemEquipmentHandler, GemHostHandler) {
        let equipment = GemEquipmentHandler::new(
            GemSettings::new(
                HsmsSettings::new()
                    .with_port(0)
                    .with_connect_mode(ConnectMode::Passive),
            )
            .with_initial_control_state(initial),
        )
        .unwrap();
        equipment.enable().await.unwrap();
        let port = equipment.gem().protocol().local_address().unwrap().port();

        let host = GemHostHandler::new(GemSettings::new(HsmsSettings::new().with_port(port))).unwrap();
        host.enable().await.unwrap();
        assert!(host.wait_for_communicating(HANDSHAKE).await);
        assert!(equipment.wait_for_communicating(HANDSHAKE).await);
        (equipment, host)
    }

    async fn wait_for_state(equipment: &GemEquipmentHandler, state: ControlState) {
        for _ in 0..200 {
            if equipment.control_state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("control state stuck in {}", equipment.control_state());
    }

    #[test]
    fn test_acknowledge_code() {
        let reply = HsmsMessage::data(1, 0, 1, 18, false, Some(&Item::binary(vec![2]))).unwrap();
        assert_eq!(acknowledge(Some(reply.clone()), 18), Some(2));
        assert_eq!(acknowledge(Some(reply), 16), None);
        assert_eq!(acknowledge(None, 18), None);
    }

    #[tokio::test]
    async fn test_remote_offline_and_online() {
        let (equipment, host) = pair(InitialControlState::Online).await;
        assert_eq!(equipment.control_state(), ControlState::OnlineRemote);

        assert_eq!(host.request_offline().await.unwrap(), Some(oflack::ACKNOWLEDGE));
        assert_eq!(equipment.control_state(), ControlState::HostOffline);
        // S1F15 is aborted while offline
        assert_eq!(host.request_offline().await.unwrap(), None);
        assert_eq!(equipment.control_state(), ControlState::HostOffline);

        assert_eq!(host.request_online().await.unwrap(), Some(onlack::ACCEPTED));
        assert_eq!(equipment.control_state(), ControlState::OnlineRemote);
        assert_eq!(host.request_online().await.unwrap(), Some(onlack::ALREADY_ONLINE));

        equipment.control().switch_offline().unwrap();
        assert_eq!(host.request_online().await.unwrap(), Some(onlack::NOT_ALLOWED));
        assert_eq!(equipment.control_state(), ControlState::EquipmentOffline);

        host.disable().await.unwrap();
        equipment.disable().await.unwrap();
    }

    #[test]
    fn test_accepted_offline() {
        assert!(accepted_offline(StreamFunction::new(1, 13)));
        assert!(accepted_offline(StreamFunction::new(1, 17)));
        assert!(!accepted_offline(StreamFunction::new(1, 1)));
        assert!(!accepted_offline(StreamFunction::new(1, 15)));
    }

    #[tokio::test]
    async fn test_offline_equipment_aborts_primaries() {
        let (equipment, host) = pair(InitialControlState::EquipmentOffline).await;
        assert_eq!(equipment.control_state(), ControlState::EquipmentOffline);

        let reply = host
            .gem()
            .send_and_wait_for_response(1, 1, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.header.stream, 1);
        assert_eq!(reply.header.function, 0);
        assert!(!host.are_you_there().await);

        // S1F17 still gets through and is refused by the control state
        assert_eq!(host.request_online().await.unwrap(), Some(onlack::NOT_ALLOWED));

        let err = equipment
            .send_event_report(1, 10, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, SecsError::Protocol(_)));

        host.disable().await.unwrap();
        equipment.disable().await.unwrap();
    }

    #[tokio::test]
    async fn test_switch_online_checks_host() {
        let (equipment, host) = pair(InitialControlState::EquipmentOffline).await;
        assert_eq!(equipment.control_state(), ControlState::EquipmentOffline);

        assert_eq!(
            equipment.control().switch_online().unwrap(),
            ControlState::AttemptOnline
        );
        wait_for_state(&equipment, ControlState::OnlineRemote).await;

        host.disable().await.unwrap();
        equipment.disable().await.unwrap();
    }
}
