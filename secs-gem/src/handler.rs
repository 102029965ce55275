//! GEM message handling on top of one HSMS connection
//!
//! [`GemHandler`] receives every unsolicited data message of its protocol,
//! checks it against the function catalog and hands it to the
//! [`StreamFunctionHandler`] registered for its stream and function. The
//! handler's result becomes the reply when the primary carried the W-bit.
//!
//! Messages that can't be handled are answered the SEMI E5 way: the
//! equipment sends stream 9 error messages (S9F1 unknown device id, S9F3
//! unknown stream, S9F5 unknown function, S9F7 illegal data), the host
//! aborts the transaction with function 0.

use crate::communication::CommunicationStateMachine;
use crate::communication::machine::identification;
use crate::control::HostLink;
use crate::data_items::commack;
use crate::events::{EventProducer, GemEvent, GemEventListener};
use crate::functions::{FunctionCatalog, FunctionDefinition, StreamFunction};
use crate::settings::GemSettings;
use async_trait::async_trait;
use secs_core::{Item, SecsError, SecsResult, Value};
use secs_hsms::{HsmsEvent, HsmsHandler, HsmsHeader, HsmsMessage, HsmsProtocol};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

/// Stream 9 error message functions
mod s9 {
    pub const UNRECOGNIZED_DEVICE_ID: u8 = 1;
    pub const UNRECOGNIZED_STREAM: u8 = 3;
    pub const UNRECOGNIZED_FUNCTION: u8 = 5;
    pub const ILLEGAL_DATA: u8 = 7;
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Decides whether an incoming primary reaches its handler
///
/// Primaries refused by the filter are aborted with function 0.
pub type PrimaryFilter = Arc<dyn Fn(StreamFunction) -> bool + Send + Sync>;

/// Outcome of checking an incoming primary against the catalog
enum Check {
    Passed,
    UnknownStream,
    UnknownFunction,
    Invalid(SecsError),
}

/// Handler for one stream function
///
/// Returns the body of the reply. The reply is only sent when the primary
/// asked for one; an error aborts the transaction with function 0.
#[async_trait]
pub trait StreamFunctionHandler: Send + Sync {
    async fn handle(&self, gem: &GemHandler, message: &HsmsMessage) -> SecsResult<Option<Item>>;
}

/// Adapter running a synchronous closure as a [`StreamFunctionHandler`]
pub struct FnHandler<F>
where
    F: Fn(&GemHandler, &HsmsMessage) -> SecsResult<Option<Item>> + Send + Sync,
{
    callback: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&GemHandler, &HsmsMessage) -> SecsResult<Option<Item>> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> StreamFunctionHandler for FnHandler<F>
where
    F: Fn(&GemHandler, &HsmsMessage) -> SecsResult<Option<Item>> + Send + Sync,
{
    async fn handle(&self, gem: &GemHandler, message: &HsmsMessage) -> SecsResult<Option<Item>> {
        (self.callback)(gem, message)
    }
}

/// GEM layer of one connection, shared by host and equipment
pub struct GemHandler {
    settings: GemSettings,
    protocol: Arc<HsmsProtocol>,
    communication: Arc<CommunicationStateMachine>,
    events: Arc<EventProducer>,
    catalog: RwLock<FunctionCatalog>,
    handlers: RwLock<HashMap<StreamFunction, Arc<dyn StreamFunctionHandler>>>,
    filter: RwLock<Option<PrimaryFilter>>,
}

impl GemHandler {
    /// Create the handler, its protocol and its communication state machine
    ///
    /// S1F1 and S1F13 are answered out of the box.
    ///
    /// # Arguments
    /// * `settings` - GEM settings; `settings.hsms` configures the connection
    ///
    /// # Returns
    /// The shared handler, registered as the HSMS handler of its protocol.
    /// The connection is not opened until [`GemHandler::enable`].
    pub fn new(settings: GemSettings) -> SecsResult<Arc<Self>> {
        let protocol = HsmsProtocol::new(settings.hsms.clone())?;
        let events = Arc::new(EventProducer::new());
        let communication =
            CommunicationStateMachine::new(protocol.clone(), &settings, events.clone())?;

        let gem = Arc::new(Self {
            settings,
            protocol,
            communication,
            events,
            catalog: RwLock::new(FunctionCatalog::builtin()?),
            handlers: RwLock::new(HashMap::new()),
            filter: RwLock::new(None),
        });
        gem.protocol.add_handler(Arc::new(HsmsBridge {
            gem: Arc::downgrade(&gem),
        }));

        gem.register_stream_function_handler(
            1,
            1,
            Arc::new(FnHandler::new(|gem: &GemHandler, _: &HsmsMessage| {
                Ok(Some(identification(gem.settings())?))
            })),
        );
        gem.register_stream_function_handler(
            1,
            13,
            Arc::new(FnHandler::new(|gem: &GemHandler, _: &HsmsMessage| {
                gem.communication.s1f13_received();
                Ok(Some(Item::list(vec![
                    Item::binary(vec![commack::ACCEPTED]),
                    identification(gem.settings())?,
                ])))
            })),
        );
        Ok(gem)
    }

    pub fn settings(&self) -> &GemSettings {
        &self.settings
    }

    pub fn protocol(&self) -> &Arc<HsmsProtocol> {
        &self.protocol
    }

    pub fn communication(&self) -> &Arc<CommunicationStateMachine> {
        &self.communication
    }

    pub fn events(&self) -> &Arc<EventProducer> {
        &self.events
    }

    pub fn add_listener(&self, listener: Arc<dyn GemEventListener>) {
        self.events.add_listener(listener);
    }

    pub fn is_communicating(&self) -> bool {
        self.communication.is_communicating()
    }

    /// Wait for the establish communications handshake
    ///
    /// # Arguments
    /// * `timeout` - Maximum time to wait; `None` waits indefinitely
    ///
    /// # Returns
    /// `true` once the communication state machine is COMMUNICATING, `false`
    /// if the timeout elapsed first
    pub async fn wait_for_communicating(&self, timeout: Option<Duration>) -> bool {
        self.communication.wait_for_communicating(timeout).await
    }

    /// Enable the communication state machine and start the connection
    ///
    /// # Errors
    /// Returns the protocol's error if the connection can't be started (for
    /// example a busy listen port); the communication state machine is
    /// disabled again in that case.
    pub async fn enable(&self) -> SecsResult<()> {
        if !self.communication.is_in(crate::communication::CommunicationState::Enabled) {
            self.communication.enable()?;
        }
        if let Err(e) = self.protocol.enable().await {
            self.communication.disable()?;
            return Err(e);
        }
        Ok(())
    }

    /// Close the connection and disable the communication state machine
    ///
    /// Must not be awaited from a stream function handler.
    pub async fn disable(&self) -> SecsResult<()> {
        self.protocol.disable().await;
        self.communication.disable()?;
        Ok(())
    }

    /// Route `stream`/`function` primaries to `handler`, replacing any previous one
    ///
    /// # Arguments
    /// * `stream` - Stream of the primary
    /// * `function` - Function of the primary (odd)
    /// * `handler` - Handler whose result becomes the reply body
    pub fn register_stream_function_handler(
        &self,
        stream: u8,
        function: u8,
        handler: Arc<dyn StreamFunctionHandler>,
    ) {
        write(&self.handlers).insert(StreamFunction::new(stream, function), handler);
    }

    /// Remove the handler of `stream`/`function`
    ///
    /// # Returns
    /// `true` if a handler was registered
    pub fn unregister_stream_function_handler(&self, stream: u8, function: u8) -> bool {
        write(&self.handlers)
            .remove(&StreamFunction::new(stream, function))
            .is_some()
    }

    /// Install the filter consulted for every primary before its handler runs
    ///
    /// S1F13 bypasses the filter while communication isn't established.
    pub fn set_primary_filter(&self, filter: PrimaryFilter) {
        *write(&self.filter) = Some(filter);
    }

    /// Declare an additional stream function
    pub fn register_function(&self, definition: FunctionDefinition) {
        write(&self.catalog).register(definition);
    }

    /// Declare an additional stream function from SFDL bodies
    ///
    /// # Arguments
    /// * `stream` - Stream number
    /// * `function` - Function number
    /// * `name` - Human readable name used in logs
    /// * `require_response` - Whether primaries carry the W-bit
    /// * `bodies` - Alternative SFDL body definitions; empty for header-only
    ///
    /// # Errors
    /// Returns a parse error if a body isn't valid SFDL or names an unknown
    /// data item.
    pub fn define_function(
        &self,
        stream: u8,
        function: u8,
        name: &str,
        require_response: bool,
        bodies: &[&str],
    ) -> SecsResult<()> {
        write(&self.catalog).define(stream, function, name, require_response, bodies)
    }

    pub fn function_definition(&self, stream: u8, function: u8) -> Option<FunctionDefinition> {
        read(&self.catalog).lookup(stream, function).cloned()
    }

    /// Build a body for a declared function from a generic value
    ///
    /// # Errors
    /// Returns [`SecsError::InvalidData`] for undeclared functions and a
    /// validation error if `value` fits none of the declared bodies.
    pub fn build_body(&self, stream: u8, function: u8, value: &Value) -> SecsResult<Item> {
        read(&self.catalog).build(stream, function, value)
    }

    /// Send a primary without the W-bit
    ///
    /// Bodies of declared functions are validated before sending.
    ///
    /// # Arguments
    /// * `stream` - Stream number
    /// * `function` - Function number
    /// * `item` - Message body, `None` for header-only messages
    ///
    /// # Errors
    /// Returns a validation error for a body not matching the catalog and
    /// the protocol's error if the connection isn't selected.
    pub async fn send_stream_function(
        &self,
        stream: u8,
        function: u8,
        item: Option<&Item>,
    ) -> SecsResult<()> {
        read(&self.catalog).validate(stream, function, item)?;
        let message = self.protocol.data_message(stream, function, false, item)?;
        self.protocol.send(&message).await
    }

    /// Send a primary with the W-bit and wait up to T3 for its reply
    ///
    /// # Arguments
    /// * `stream` - Stream number
    /// * `function` - Function number (odd)
    /// * `item` - Message body, `None` for header-only messages
    ///
    /// # Returns
    /// The reply, or `None` on T3 timeout, disable or disconnect
    pub async fn send_and_wait_for_response(
        &self,
        stream: u8,
        function: u8,
        item: Option<&Item>,
    ) -> SecsResult<Option<HsmsMessage>> {
        read(&self.catalog).validate(stream, function, item)?;
        let message = self.protocol.data_message(stream, function, true, item)?;
        self.protocol.send_and_wait_for_response(&message).await
    }

    /// Answer the primary with `header` using `function` of its stream
    ///
    /// # Arguments
    /// * `header` - Header of the primary being answered
    /// * `function` - Reply function, usually the primary's function + 1
    /// * `item` - Reply body
    pub async fn send_response(
        &self,
        header: &HsmsHeader,
        function: u8,
        item: Option<&Item>,
    ) -> SecsResult<()> {
        let reply = self
            .protocol
            .reply_message(header, header.stream, function, item)?;
        self.protocol.send(&reply).await
    }

    /// S1F1 / S1F2 round trip; `true` if the peer answered with S1F2
    pub async fn are_you_there(&self) -> bool {
        match self.send_and_wait_for_response(1, 1, None).await {
            Ok(Some(reply)) => reply.header.stream == 1 && reply.header.function == 2,
            Ok(None) => false,
            Err(e) => {
                log::warn!("gem: S1F1 failed: {}", e);
                false
            }
        }
    }

    fn on_connection_event(&self, event: HsmsEvent) {
        self.events.fire(match event {
            HsmsEvent::Connected => GemEvent::HsmsConnected,
            HsmsEvent::Selected => GemEvent::HsmsSelected,
            HsmsEvent::Deselected | HsmsEvent::Disconnected => GemEvent::HsmsDisconnected,
        });
        self.communication.on_hsms_event(event);
    }

    async fn dispatch(&self, message: HsmsMessage) {
        let header = message.header;
        let sf = StreamFunction::new(header.stream, header.function);
        let equipment = self.settings.is_equipment();

        if header.session_id != self.settings.hsms.session_id {
            log::warn!("gem: {} for unknown device {}", sf, header.session_id);
            if equipment {
                self.send_error(s9::UNRECOGNIZED_DEVICE_ID, &header).await;
            }
            return;
        }

        if !sf.is_primary() {
            log::warn!("gem: unexpected secondary {}", message);
            self.communication.message_received();
            return;
        }

        if !self.communication.is_communicating() && sf != StreamFunction::new(1, 13) {
            log::info!("gem: {} while not communicating", sf);
            self.communication.message_received();
            self.abort(&header).await;
            return;
        }

        let filter = read(&self.filter).clone();
        if let Some(filter) = filter {
            if sf != StreamFunction::new(1, 13) && !filter(sf) {
                log::info!("gem: {} refused in the current control state", sf);
                self.abort(&header).await;
                return;
            }
        }

        let item = match message.item() {
            Ok(item) => item,
            Err(e) => {
                log::warn!("gem: undecodable {}: {}", sf, e);
                self.illegal_data(&header).await;
                return;
            }
        };

        let handler = read(&self.handlers).get(&sf).cloned();
        match self.check(sf, item.as_ref(), handler.is_some()) {
            Check::Passed => {}
            Check::UnknownStream => return self.unrecognized(&header, false).await,
            Check::UnknownFunction => return self.unrecognized(&header, true).await,
            Check::Invalid(e) => {
                log::warn!("gem: {}", e);
                return self.illegal_data(&header).await;
            }
        }

        let Some(handler) = handler else {
            log::info!("gem: no handler for {}", sf);
            self.abort(&header).await;
            return;
        };

        match handler.handle(self, &message).await {
            Ok(body) if header.require_response => {
                if let Err(e) = self
                    .send_response(&header, sf.reply().function, body.as_ref())
                    .await
                {
                    log::warn!("gem: reply to {} not sent: {}", sf, e);
                }
            }
            Ok(Some(_)) => log::debug!("gem: {} handled, no reply requested", sf),
            Ok(None) => {}
            Err(e) => {
                log::warn!("gem: handler for {} failed: {}", sf, e);
                self.abort(&header).await;
            }
        }
    }

    /// Look `sf` up in the catalog and validate its body
    fn check(&self, sf: StreamFunction, item: Option<&Item>, has_handler: bool) -> Check {
        let catalog = read(&self.catalog);
        match catalog.lookup(sf.stream, sf.function) {
            Some(definition) => match definition.validate(item, catalog.data_items()) {
                Ok(()) => Check::Passed,
                Err(e) => Check::Invalid(e),
            },
            None if has_handler => Check::Passed,
            None => {
                let stream_known = catalog.knows_stream(sf.stream)
                    || read(&self.handlers).keys().any(|key| key.stream == sf.stream);
                if stream_known {
                    Check::UnknownFunction
                } else {
                    Check::UnknownStream
                }
            }
        }
    }

    /// Abort the transaction with function 0 if a reply was requested
    async fn abort(&self, header: &HsmsHeader) {
        if !header.require_response {
            return;
        }
        if let Err(e) = self.send_response(header, 0, None).await {
            log::warn!("gem: S{}F0 not sent: {}", header.stream, e);
        }
    }

    async fn unrecognized(&self, header: &HsmsHeader, stream_known: bool) {
        if self.settings.is_equipment() {
            let function = if stream_known {
                s9::UNRECOGNIZED_FUNCTION
            } else {
                s9::UNRECOGNIZED_STREAM
            };
            self.send_error(function, header).await;
        } else {
            self.abort(header).await;
        }
    }

    async fn illegal_data(&self, header: &HsmsHeader) {
        if self.settings.is_equipment() {
            self.send_error(s9::ILLEGAL_DATA, header).await;
        } else {
            self.abort(header).await;
        }
    }

    /// S9Fx carrying the header of the offending message
    async fn send_error(&self, function: u8, header: &HsmsHeader) {
        let mhead = Item::binary(header.encode().to_vec());
        log::warn!(
            "gem: S9F{} for S{}F{} system={:#010x}",
            function,
            header.stream,
            header.function,
            header.system
        );
        if let Err(e) = self.send_stream_function(9, function, Some(&mhead)).await {
            log::warn!("gem: S9F{} not sent: {}", function, e);
        }
    }
}

#[async_trait]
impl HostLink for GemHandler {
    fn is_communicating(&self) -> bool {
        GemHandler::is_communicating(self)
    }

    async fn are_you_there(&self) -> bool {
        GemHandler::are_you_there(self).await
    }
}

impl std::fmt::Debug for GemHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GemHandler")
            .field("device_type", &self.settings.device_type())
            .field("hsms", &self.protocol.state())
            .field("communication", &self.communication.current())
            .finish()
    }
}

/// Feeds HSMS events and messages into the GEM handler without owning it
struct HsmsBridge {
    gem: Weak<GemHandler>,
}

#[async_trait]
impl HsmsHandler for HsmsBridge {
    async fn on_connection_event(&self, event: HsmsEvent) {
        if let Some(gem) = self.gem.upgrade() {
            gem.on_connection_event(event);
        }
    }

    async fn on_data_message(&self, message: HsmsMessage) {
        if let Some(gem) = self.gem.upgrade() {
            gem.dispatch(message).await;
        }
    }
}
