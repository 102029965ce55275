//! Host side of the GEM dialogue

use crate::data_items::ackc6;
use crate::equipment::acknowledge;
use crate::events::GemEvent;
use crate::handler::{FnHandler, GemHandler};
use crate::settings::GemSettings;
use secs_core::{Item, SecsError, SecsResult};
use secs_hsms::{DeviceType, HsmsMessage};
use std::sync::Arc;
use std::time::Duration;

/// GEM host: a [`GemHandler`] that accepts event reports and can ask the
/// equipment to go online or offline
pub struct GemHostHandler {
    gem: Arc<GemHandler>,
}

impl GemHostHandler {
    /// Create the host; the device type is forced to host
    pub fn new(mut settings: GemSettings) -> SecsResult<Self> {
        settings.hsms.device_type = DeviceType::Host;
        let gem = GemHandler::new(settings)?;

        gem.register_stream_function_handler(
            6,
            11,
            Arc::new(FnHandler::new(|gem: &GemHandler, message: &HsmsMessage| {
                let report = message
                    .item()?
                    .ok_or_else(|| SecsError::InvalidData("S6F11 without body".to_string()))?;
                let ceid = report.get(1).and_then(Item::first_int);
                gem.events().fire(GemEvent::EventReportReceived { ceid, report });
                Ok(Some(Item::binary(vec![ackc6::ACCEPTED])))
            })),
        );
        Ok(Self { gem })
    }

    pub fn gem(&self) -> &Arc<GemHandler> {
        &self.gem
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

    pub async fn are_you_there(&self) -> bool {
        self.gem.are_you_there().await
    }

    /// S1F17; returns the ONLACK code
    pub async fn request_online(&self) -> SecsResult<Option<u8>> {
        let reply = self.gem.send_and_wait_for_response(1, 17, None).await?;
        Ok(acknowledge(reply, 18))
    }

    /// S1F15; returns the OFLACK code
    pub async fn request_offline(&self) -> SecsResult<Option<u8>> {
        let reply = self.gem.send_and_wait_for_response(1, 15, None).await?;
        Ok(acknowledge(reply, 16))
    }
}

impl std::fmt::Debug for GemHostHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GemHostHandler").field("gem", &self.gem).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equipment::GemEquipmentHandler;
    use crate::events::ChannelEventListener;
    use secs_hsms::{ConnectMode, HsmsSettings};

    #[tokio::test]
    async fn test_event_report_received() {
        let equipment = GemEquipmentHandler::new(GemSettings::new(
            HsmsSettings::new()
                .with_port(0)
                .with_connect_mode(ConnectMode::Passive),
        ))
        .unwrap();
        equipment.enable().await.unwrap();
        let port = equipment.gem().protocol().local_address().unwrap().port();

        let host = GemHostHandler::new(GemSettings::new(HsmsSettings::new().with_port(port))).unwrap();
        let (listener, mut events) = ChannelEventListener::new();
        host.gem().add_listener(Arc::new(listener));
        host.enable().await.unwrap();
        assert!(host.wait_for_communicating(Some(Duration::from_secs(5))).await);
        assert!(equipment.wait_for_communicating(Some(Duration::from_secs(5))).await);
        assert!(host.are_you_there().await);

        let reports = vec![Item::list(vec![
            Item::u4(10),
            Item::list(vec![Item::ascii("ONLINE").unwrap()]),
        ])];
        assert_eq!(
            equipment.send_event_report(1, 3, reports).await.unwrap(),
            Some(ackc6::ACCEPTED)
        );

        loop {
            match events.recv().await.unwrap() {
                GemEvent::EventReportReceived { ceid, report } => {
                    assert_eq!(ceid, Some(3));
                    assert_eq!(report.len(), 3);
                    break;
                }
                _ => continue,
            }
        }

        host.disable().await.unwrap();
        equipment.disable().await.unwrap();
    }
}
