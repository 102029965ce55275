//! HSMS protocol engine
//!
//! One [`HsmsProtocol`] owns one HSMS connection. It connects (active mode)
//! or accepts (passive mode), runs the select procedure, answers control
//! messages, routes replies to waiting requests and hands everything else to
//! the registered [`HsmsHandler`]s.
//!
//! Three kinds of tasks are involved:
//!
//! - the main task, which connects with T5 between attempts or accepts
//!   incoming connections
//! - the receive task of the current connection, which reads frames and
//!   handles control messages
//! - the dispatch task, which delivers events and unsolicited data messages
//!   to handlers in arrival order

use crate::decoder::FrameReader;
use crate::dispatcher::PendingReplies;
use crate::events::{HsmsDispatch, HsmsEvent, HsmsHandler};
use crate::header::{HsmsHeader, RejectReason, SType, deselect_status, select_status};
use crate::message::HsmsMessage;
use crate::settings::{ConnectMode, HsmsSettings};
use crate::state::{CONNECT, DESELECT, DISCONNECT, SELECT, HsmsState, connection_state_machine};
use crate::statistics::HsmsStatistics;
use crate::timer::Timer;
use secs_core::{Item, SecsError, SecsResult, StateMachine};
use secs_transport::{BoxedWriter, TcpAcceptor, TransportLayer};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

struct ConnectionTimers {
    t7: Timer,
    linktest: Timer,
}

#[derive(Default)]
struct Tasks {
    main: Option<JoinHandle<()>>,
    connection: Option<JoinHandle<()>>,
    dispatch: Option<JoinHandle<()>>,
}

/// Frees a reply slot when its waiter finishes or is cancelled
struct SlotGuard<'a> {
    pending: &'a PendingReplies,
    system: u32,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.system);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// HSMS connection endpoint
///
/// Created with [`HsmsProtocol::new`], started with [`HsmsProtocol::enable`]
/// and stopped with [`HsmsProtocol::disable`]. The background tasks keep the
/// protocol alive until it is disabled.
pub struct HsmsProtocol {
    settings: HsmsSettings,
    this: Weak<HsmsProtocol>,
    machine: Mutex<StateMachine<HsmsState>>,
    pending: PendingReplies,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    system_counter: AtomicU32,
    statistics: Mutex<HsmsStatistics>,
    timers: Mutex<ConnectionTimers>,
    tasks: Mutex<Tasks>,
    dispatch: Mutex<Option<mpsc::UnboundedSender<HsmsDispatch>>>,
    handlers: RwLock<Vec<Arc<dyn HsmsHandler>>>,
    close_signal: Mutex<Option<oneshot::Sender<()>>>,
    local_address: Mutex<Option<SocketAddr>>,
    enabled: AtomicBool,
}

impl HsmsProtocol {
    /// Create a disabled protocol
    ///
    /// # Arguments
    /// * `settings` - Address, connect mode, session id and timeouts
    ///
    /// # Returns
    /// The shared protocol in NOT_CONNECTED; nothing is opened until
    /// [`HsmsProtocol::enable`]
    pub fn new(settings: HsmsSettings) -> SecsResult<Arc<Self>> {
        let mut machine = connection_state_machine()?;
        Ok(Arc::new_cyclic(|this: &Weak<Self>| {
            install_hooks(&mut machine, this, settings.connect_mode);
            Self {
                settings,
                this: this.clone(),
                machine: Mutex::new(machine),
                pending: PendingReplies::new(),
                writer: tokio::sync::Mutex::new(None),
                system_counter: AtomicU32::new(rand::random()),
                statistics: Mutex::new(HsmsStatistics::new()),
                timers: Mutex::new(ConnectionTimers {
                    t7: Timer::new("T7"),
                    linktest: Timer::new("linktest"),
                }),
                tasks: Mutex::new(Tasks::default()),
                dispatch: Mutex::new(None),
                handlers: RwLock::new(Vec::new()),
                close_signal: Mutex::new(None),
                local_address: Mutex::new(None),
                enabled: AtomicBool::new(false),
            }
        }))
    }

    pub fn settings(&self) -> &HsmsSettings {
        &self.settings
    }

    pub fn state(&self) -> HsmsState {
        lock(&self.machine).current().unwrap_or(HsmsState::NotConnected)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn statistics(&self) -> HsmsStatistics {
        lock(&self.statistics).clone()
    }

    /// Address the passive side is listening on
    pub fn local_address(&self) -> Option<SocketAddr> {
        *lock(&self.local_address)
    }

    /// Register a handler for events and unsolicited data messages
    ///
    /// Handlers are called from the dispatch task in registration order.
    pub fn add_handler(&self, handler: Arc<dyn HsmsHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handler);
    }

    /// Next system bytes value, wrapping around
    pub fn next_system(&self) -> u32 {
        self.system_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// New primary data message with fresh system bytes
    ///
    /// # Arguments
    /// * `stream` - Stream number
    /// * `function` - Function number
    /// * `require_response` - W-bit
    /// * `item` - Body, `None` for a header-only message
    ///
    /// # Errors
    /// Returns an encode error if the body can't be encoded.
    pub fn data_message(
        &self,
        stream: u8,
        function: u8,
        require_response: bool,
        item: Option<&Item>,
    ) -> SecsResult<HsmsMessage> {
        HsmsMessage::data(
            self.next_system(),
            self.settings.session_id,
            stream,
            function,
            require_response,
            item,
        )
    }

    /// Secondary data message answering `primary`
    ///
    /// # Arguments
    /// * `primary` - Header of the message being answered; its system bytes
    ///   are reused
    /// * `stream` - Stream of the reply
    /// * `function` - Function of the reply
    /// * `item` - Reply body
    pub fn reply_message(
        &self,
        primary: &HsmsHeader,
        stream: u8,
        function: u8,
        item: Option<&Item>,
    ) -> SecsResult<HsmsMessage> {
        HsmsMessage::data(
            primary.system,
            self.settings.session_id,
            stream,
            function,
            false,
            item,
        )
    }

    /// Start connecting or listening
    ///
    /// In passive mode the listen address is bound before returning, so a
    /// busy port is reported here. Enabling twice is a no-op.
    ///
    /// # Errors
    /// Returns the bind error of the passive listener.
    pub async fn enable(self: &Arc<Self>) -> SecsResult<()> {
        if self.enabled.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let acceptor = match self.settings.connect_mode {
            ConnectMode::Active => None,
            ConnectMode::Passive => match self.settings.create_acceptor().await {
                Ok(acceptor) => {
                    *lock(&self.local_address) = acceptor.local_addr().ok();
                    Some(acceptor)
                }
                Err(e) => {
                    self.enabled.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            },
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        *lock(&self.dispatch) = Some(sender);
        let dispatch = tokio::spawn(self.clone().dispatch_loop(receiver));
        let main = match acceptor {
            Some(acceptor) => tokio::spawn(self.clone().passive_loop(acceptor)),
            None => tokio::spawn(self.clone().active_loop()),
        };

        let mut tasks = lock(&self.tasks);
        tasks.main = Some(main);
        tasks.dispatch = Some(dispatch);
        log::info!(
            "hsms: enabled ({:?}, {})",
            self.settings.connect_mode,
            self.settings.socket_address()
        );
        Ok(())
    }

    /// Stop all activity
    ///
    /// Sends Separate.req if selected, closes the connection and waits for
    /// the background tasks to finish. Outstanding requests complete with no
    /// reply. Handlers have received every pending event when this returns,
    /// so it must not be awaited from inside a handler.
    pub async fn disable(&self) {
        if !self.enabled.swap(false, Ordering::SeqCst) {
            return;
        }

        if self.state().can_send_data() {
            let separate = HsmsMessage::separate_req(self.next_system());
            if let Err(e) = self.send(&separate).await {
                log::debug!("hsms: separate.req not sent: {}", e);
            }
        }
        self.close_connection();

        let (main, connection, dispatch) = {
            let mut tasks = lock(&self.tasks);
            (tasks.main.take(), tasks.connection.take(), tasks.dispatch.take())
        };
        for handle in [main, connection].into_iter().flatten() {
            handle.abort();
            let _ = handle.await;
        }
        self.teardown().await;

        {
            let mut timers = lock(&self.timers);
            timers.t7.cancel();
            timers.linktest.cancel();
        }
        lock(&self.dispatch).take();
        if let Some(handle) = dispatch {
            let _ = handle.await;
        }
        log::info!("hsms: disabled");
    }

    /// Send a message without waiting for a reply
    ///
    /// # Arguments
    /// * `message` - Control or data message to write
    ///
    /// # Errors
    /// * `SecsError::Protocol` - a data message while not selected
    /// * `SecsError::NotConnected` - no connection is open
    /// * `SecsError::Connection` - the write failed; the connection is closed
    pub async fn send(&self, message: &HsmsMessage) -> SecsResult<()> {
        if message.is_data() {
            let state = self.state();
            if !state.can_send_data() {
                return Err(SecsError::Protocol(format!(
                    "can't send S{}F{} in state {}",
                    message.header.stream, message.header.function, state
                )));
            }
        }

        let frame = message.encode();
        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or(SecsError::NotConnected)?;
        log::debug!("hsms > {}", message);
        let result = write_frame(stream, &frame).await;
        drop(writer);

        match result {
            Ok(()) => {
                lock(&self.statistics).increment_sent();
                Ok(())
            }
            Err(e) => {
                log::warn!("hsms: write failed: {}", e);
                self.close_connection();
                Err(e.into())
            }
        }
    }

    /// Send a request and wait for the message carrying its system bytes
    ///
    /// Waits T6 for control messages and T3 for data messages.
    ///
    /// # Arguments
    /// * `message` - Request; its system bytes identify the reply
    ///
    /// # Returns
    /// The reply, or `None` if no reply arrived in time, the connection went
    /// away or the protocol was disabled meanwhile
    ///
    /// # Errors
    /// Send errors, see [`HsmsProtocol::send`].
    pub async fn send_and_wait_for_response(
        &self,
        message: &HsmsMessage,
    ) -> SecsResult<Option<HsmsMessage>> {
        let system = message.header.system;
        let receiver = self.pending.register(system);
        let _slot = SlotGuard {
            pending: &self.pending,
            system,
        };
        self.send(message).await?;

        let limit = if message.is_data() {
            self.settings.timeouts.t3
        } else {
            self.settings.timeouts.t6
        };
        match tokio::time::timeout(limit, receiver).await {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => {
                log::debug!("hsms: request {:#010x} dropped with the connection", system);
                Ok(None)
            }
            Err(_) => {
                lock(&self.statistics).increment_timeouts();
                log::warn!("hsms: no reply to {} within {:?}", message, limit);
                Ok(None)
            }
        }
    }

    /// Run the select procedure
    ///
    /// # Returns
    /// `true` once selected, `false` if the peer refused, rejected or didn't
    /// answer within T6
    ///
    /// The receive task switches to selected as soon as a positive
    /// Select.rsp arrives, before any data message following it is handled.
    pub async fn select(&self) -> SecsResult<bool> {
        let request = HsmsMessage::select_req(self.next_system());
        match self.send_and_wait_for_response(&request).await? {
            Some(reply) if reply.is_select_success() => {
                Ok(self.state() == HsmsState::ConnectedSelected)
            }
            Some(reply) => {
                log::warn!("hsms: select refused: {}", reply);
                Ok(false)
            }
            None => {
                log::warn!("hsms: select.req unanswered");
                Ok(false)
            }
        }
    }

    /// Run the deselect procedure
    ///
    /// # Returns
    /// `true` once deselected, `false` if the peer refused or didn't answer
    pub async fn deselect(&self) -> SecsResult<bool> {
        let request = HsmsMessage::deselect_req(self.next_system());
        match self.send_and_wait_for_response(&request).await? {
            Some(reply) if reply.is_deselect_success() => {
                Ok(self.state() == HsmsState::ConnectedNotSelected)
            }
            Some(reply) => {
                log::warn!("hsms: deselect refused: {}", reply);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Send Linktest.req; `true` if the peer answered
    pub async fn linktest(&self) -> SecsResult<bool> {
        let request = HsmsMessage::linktest_req(self.next_system());
        Ok(self
            .send_and_wait_for_response(&request)
            .await?
            .is_some_and(|reply| reply.s_type() == Some(SType::LinktestRsp)))
    }

    /// Send Separate.req and drop the connection
    ///
    /// The connection is closed even if the send fails; the send error is
    /// returned.
    pub async fn separate(&self) -> SecsResult<()> {
        let result = self.send(&HsmsMessage::separate_req(self.next_system())).await;
        self.close_connection();
        result
    }

    fn fire(&self, transition: &str) -> SecsResult<HsmsState> {
        lock(&self.machine).fire(transition)
    }

    fn emit(&self, item: HsmsDispatch) {
        if let Some(sender) = lock(&self.dispatch).as_ref() {
            if sender.send(item).is_err() {
                log::debug!("hsms: dispatch task gone");
            }
        }
    }

    fn close_connection(&self) {
        if let Some(signal) = lock(&self.close_signal).take() {
            let _ = signal.send(());
        }
    }

    async fn dispatch_loop(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<HsmsDispatch>) {
        while let Some(item) = receiver.recv().await {
            let handlers = self
                .handlers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone();
            for handler in handlers {
                match &item {
                    HsmsDispatch::Event(event) => handler.on_connection_event(*event).await,
                    HsmsDispatch::Message(message) => handler.on_data_message(message.clone()).await,
                }
            }
        }
    }

    async fn active_loop(self: Arc<Self>) {
        let address = self.settings.socket_address();
        while self.is_enabled() {
            let mut transport = self.settings.create_transport();
            match transport.open().await {
                Ok(()) => self.clone().run_connection(Box::new(transport)).await,
                Err(e) => log::info!("hsms: connecting to {} failed: {}", address, e),
            }
            if !self.is_enabled() {
                break;
            }
            tokio::time::sleep(self.settings.timeouts.t5).await;
        }
    }

    async fn passive_loop(self: Arc<Self>, acceptor: TcpAcceptor) {
        loop {
            match acceptor.accept().await {
                Ok((transport, peer)) => self.adopt_connection(Box::new(transport), peer),
                Err(e) => {
                    log::warn!("hsms: accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                }
            }
        }
    }

    fn adopt_connection(self: &Arc<Self>, transport: Box<dyn TransportLayer>, peer: SocketAddr) {
        let mut tasks = lock(&self.tasks);
        if tasks.connection.as_ref().is_some_and(|handle| !handle.is_finished()) {
            log::warn!("hsms: refusing connection from {}, already connected", peer);
            return;
        }
        tasks.connection = Some(tokio::spawn(self.clone().run_connection(transport)));
    }

    async fn run_connection(self: Arc<Self>, transport: Box<dyn TransportLayer>) {
        let peer = transport.peer_address();
        let (reader, writer) = match transport.into_split() {
            Ok(halves) => halves,
            Err(e) => {
                log::error!("hsms: unusable connection: {}", e);
                return;
            }
        };
        *self.writer.lock().await = Some(writer);
        let (close_sender, mut close_receiver) = oneshot::channel();
        *lock(&self.close_signal) = Some(close_sender);

        if let Err(e) = self.fire(CONNECT) {
            log::error!("hsms: {}", e);
            self.teardown().await;
            return;
        }
        lock(&self.statistics).increment_connections();
        log::info!("hsms: connected to {:?}", peer);
        self.emit(HsmsDispatch::Event(HsmsEvent::Connected));

        let mut frames = FrameReader::new(reader, self.settings.timeouts.t8)
            .with_max_length(self.settings.max_message_length);
        loop {
            let frame = tokio::select! {
                frame = frames.read_frame() => frame,
                _ = &mut close_receiver => break,
            };
            match frame {
                Ok(Some(message)) => self.handle_message(message).await,
                Ok(None) => {
                    log::info!("hsms: connection closed by peer");
                    break;
                }
                Err(e) => {
                    lock(&self.statistics).increment_framing_errors();
                    log::warn!("hsms: {}", e);
                    break;
                }
            }
        }
        self.teardown().await;
    }

    /// Release everything belonging to the current connection; idempotent
    async fn teardown(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
        lock(&self.close_signal).take();

        let was_connected = {
            let mut machine = lock(&self.machine);
            if machine.is_in(HsmsState::Connected) {
                if let Err(e) = machine.fire(DISCONNECT) {
                    log::error!("hsms: {}", e);
                }
                true
            } else {
                false
            }
        };
        self.pending.clear();

        if was_connected {
            log::info!("hsms: disconnected");
            self.emit(HsmsDispatch::Event(HsmsEvent::Disconnected));
        }
    }

    async fn handle_message(&self, message: HsmsMessage) {
        lock(&self.statistics).increment_received(!message.is_data());
        log::debug!("hsms < {}", message);

        if message.header.p_type != 0 {
            self.reject(&message.header, RejectReason::PTypeNotSupported).await;
            return;
        }
        let Some(s_type) = message.s_type() else {
            self.reject(&message.header, RejectReason::STypeNotSupported).await;
            return;
        };

        match s_type {
            SType::Data => self.handle_data(message).await,
            SType::SelectReq => self.handle_select_req(&message.header).await,
            SType::DeselectReq => self.handle_deselect_req(&message.header).await,
            SType::LinktestReq => {
                self.reply(HsmsMessage::linktest_rsp(message.header.system)).await;
            }
            SType::SeparateReq => {
                log::info!("hsms: separate.req from peer");
                self.close_connection();
            }
            SType::RejectReq => {
                if let Err(reject) = self.pending.deliver(message) {
                    log::warn!("hsms: reject for unknown transaction: {}", reject);
                }
            }
            SType::SelectRsp | SType::DeselectRsp | SType::LinktestRsp => {
                if self.pending.is_pending(message.header.system) {
                    self.apply_response(&message, s_type);
                }
                if let Err(unexpected) = self.pending.deliver(message) {
                    log::warn!("hsms: unexpected {}", unexpected);
                    self.reject(&unexpected.header, RejectReason::TransactionNotOpen)
                        .await;
                }
            }
        }
    }

    /// State change carried by a positive select or deselect response
    fn apply_response(&self, message: &HsmsMessage, s_type: SType) {
        let (transition, from, event) = match s_type {
            SType::SelectRsp if message.is_select_success() => {
                (SELECT, HsmsState::ConnectedNotSelected, HsmsEvent::Selected)
            }
            SType::DeselectRsp if message.is_deselect_success() => {
                (DESELECT, HsmsState::ConnectedSelected, HsmsEvent::Deselected)
            }
            _ => return,
        };
        let fired = {
            let mut machine = lock(&self.machine);
            machine.current() == Some(from) && machine.fire(transition).is_ok()
        };
        if fired {
            log::info!("hsms: {}", event);
            self.emit(HsmsDispatch::Event(event));
        } else {
            log::warn!("hsms: {} in state {}", message, self.state());
        }
    }

    async fn handle_data(&self, message: HsmsMessage) {
        if !self.state().can_send_data() {
            log::warn!(
                "hsms: S{}F{} received while not selected",
                message.header.stream,
                message.header.function
            );
            self.reject(&message.header, RejectReason::EntityNotSelected).await;
            return;
        }

        let message = if message.header.function % 2 == 0 {
            match self.pending.deliver(message) {
                Ok(()) => return,
                Err(unsolicited) => unsolicited,
            }
        } else {
            message
        };
        self.emit(HsmsDispatch::Message(message));
    }

    async fn handle_select_req(&self, header: &HsmsHeader) {
        let status = {
            let mut machine = lock(&self.machine);
            match machine.current() {
                Some(HsmsState::ConnectedNotSelected) => match machine.fire(SELECT) {
                    Ok(_) => select_status::SUCCESS,
                    Err(e) => {
                        log::error!("hsms: {}", e);
                        select_status::NOT_READY
                    }
                },
                Some(HsmsState::ConnectedSelected) => select_status::ALREADY_ACTIVE,
                _ => select_status::NOT_READY,
            }
        };
        self.reply(HsmsMessage::select_rsp(header.system, status)).await;
        if status == select_status::SUCCESS {
            log::info!("hsms: selected by peer");
            self.emit(HsmsDispatch::Event(HsmsEvent::Selected));
        }
    }

    async fn handle_deselect_req(&self, header: &HsmsHeader) {
        let status = {
            let mut machine = lock(&self.machine);
            if machine.current() == Some(HsmsState::ConnectedSelected) {
                match machine.fire(DESELECT) {
                    Ok(_) => deselect_status::SUCCESS,
                    Err(e) => {
                        log::error!("hsms: {}", e);
                        deselect_status::BUSY
                    }
                }
            } else {
                deselect_status::NOT_ESTABLISHED
            }
        };
        self.reply(HsmsMessage::deselect_rsp(header.system, status)).await;
        if status == deselect_status::SUCCESS {
            log::info!("hsms: deselected by peer");
            self.emit(HsmsDispatch::Event(HsmsEvent::Deselected));
        }
    }

    async fn reject(&self, header: &HsmsHeader, reason: RejectReason) {
        log::warn!("hsms: rejecting system {:#010x}: {}", header.system, reason);
        lock(&self.statistics).increment_rejects();
        self.reply(HsmsMessage::reject_req(header, reason)).await;
    }

    async fn reply(&self, message: HsmsMessage) {
        if let Err(e) = self.send(&message).await {
            log::warn!("hsms: couldn't send {}: {}", message, e);
        }
    }

    fn start_t7(&self) {
        let this = self.this.clone();
        let t7 = self.settings.timeouts.t7;
        lock(&self.timers).t7.start(t7, async move {
            if let Some(protocol) = this.upgrade() {
                protocol.t7_expired();
            }
        });
    }

    /// Close a connection still not selected; `true` if it was closed
    fn t7_expired(&self) -> bool {
        let state = self.state();
        if state != HsmsState::ConnectedNotSelected {
            log::debug!("hsms: T7 expired in state {}, ignored", state);
            return false;
        }
        log::warn!(
            "hsms: T7 expired, not selected within {:?}",
            self.settings.timeouts.t7
        );
        lock(&self.statistics).increment_timeouts();
        self.close_connection();
        true
    }

    fn start_linktest(&self) {
        let this = self.this.clone();
        lock(&self.timers)
            .linktest
            .start_repeating(self.settings.timeouts.linktest, move || {
                let this = this.clone();
                async move {
                    let Some(protocol) = this.upgrade() else {
                        return;
                    };
                    match protocol.linktest().await {
                        Ok(true) => {}
                        Ok(false) => {
                            log::warn!("hsms: linktest failed, closing connection");
                            protocol.close_connection();
                        }
                        Err(e) => log::warn!("hsms: linktest: {}", e),
                    }
                }
            });
    }

    fn spawn_select(&self) {
        let this = self.this.clone();
        tokio::spawn(async move {
            if let Some(protocol) = this.upgrade() {
                if let Err(e) = protocol.select().await {
                    log::warn!("hsms: select: {}", e);
                }
            }
        });
    }
}

fn install_hooks(machine: &mut StateMachine<HsmsState>, this: &Weak<HsmsProtocol>, mode: ConnectMode) {
    let weak = this.clone();
    machine.on_enter(HsmsState::Connected, move |_| {
        if let Some(protocol) = weak.upgrade() {
            protocol.start_linktest();
            if mode == ConnectMode::Active {
                protocol.spawn_select();
            }
        }
    });
    let weak = this.clone();
    machine.on_leave(HsmsState::Connected, move |_| {
        if let Some(protocol) = weak.upgrade() {
            lock(&protocol.timers).linktest.cancel();
        }
    });
    let weak = this.clone();
    machine.on_enter(HsmsState::ConnectedNotSelected, move |_| {
        if let Some(protocol) = weak.upgrade() {
            protocol.start_t7();
        }
    });
    let weak = this.clone();
    machine.on_leave(HsmsState::ConnectedNotSelected, move |_| {
        if let Some(protocol) = weak.upgrade() {
            lock(&protocol.timers).t7.cancel();
        }
    });
}

async fn write_frame(writer: &mut BoxedWriter, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

impl fmt::Debug for HsmsProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HsmsProtocol")
            .field("address", &self.settings.socket_address())
            .field("mode", &self.settings.connect_mode)
            .field("state", &self.state())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelHandler;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio::time::{Instant, timeout};

    const WAIT: Duration = Duration::from_secs(5);

    fn local_settings(mode: ConnectMode, port: u16) -> HsmsSettings {
        HsmsSettings::new()
            .with_address("127.0.0.1".parse().unwrap())
            .with_port(port)
            .with_connect_mode(mode)
            .with_t5(Duration::from_millis(100))
    }

    async fn passive() -> (Arc<HsmsProtocol>, UnboundedReceiver<HsmsDispatch>) {
        let protocol = HsmsProtocol::new(local_settings(ConnectMode::Passive, 0)).unwrap();
        let (handler, receiver) = ChannelHandler::new();
        protocol.add_handler(Arc::new(handler));
        protocol.enable().await.unwrap();
        (protocol, receiver)
    }

    async fn next_event(receiver: &mut UnboundedReceiver<HsmsDispatch>) -> HsmsEvent {
        loop {
            match timeout(WAIT, receiver.recv()).await.unwrap() {
                Some(HsmsDispatch::Event(event)) => return event,
                Some(HsmsDispatch::Message(_)) => continue,
                None => panic!("dispatch channel closed"),
            }
        }
    }

    async fn next_message(receiver: &mut UnboundedReceiver<HsmsDispatch>) -> HsmsMessage {
        loop {
            match timeout(WAIT, receiver.recv()).await.unwrap() {
                Some(HsmsDispatch::Message(message)) => return message,
                Some(HsmsDispatch::Event(_)) => continue,
                None => panic!("dispatch channel closed"),
            }
        }
    }

    #[tokio::test]
    async fn test_select_handshake_and_separate() {
        let (equipment, mut equipment_events) = passive().await;
        let port = equipment.local_address().unwrap().port();

        let host = HsmsProtocol::new(local_settings(ConnectMode::Active, port)).unwrap();
        let (handler, mut host_events) = ChannelHandler::new();
        host.add_handler(Arc::new(handler));
        host.enable().await.unwrap();

        assert_eq!(next_event(&mut equipment_events).await, HsmsEvent::Connected);
        assert_eq!(next_event(&mut equipment_events).await, HsmsEvent::Selected);
        assert_eq!(next_event(&mut host_events).await, HsmsEvent::Connected);
        assert_eq!(next_event(&mut host_events).await, HsmsEvent::Selected);
        assert_eq!(host.state(), HsmsState::ConnectedSelected);
        assert_eq!(equipment.state(), HsmsState::ConnectedSelected);
        assert!(host.linktest().await.unwrap());

        host.disable().await;
        assert_eq!(next_event(&mut equipment_events).await, HsmsEvent::Disconnected);
        assert_eq!(host.state(), HsmsState::NotConnected);
        equipment.disable().await;
        assert_eq!(equipment.state(), HsmsState::NotConnected);
    }

    #[tokio::test]
    async fn test_data_request_and_reply() {
        let (equipment, mut equipment_events) = passive().await;
        let port = equipment.local_address().unwrap().port();
        let host = HsmsProtocol::new(local_settings(ConnectMode::Active, port)).unwrap();
        let (handler, mut host_events) = ChannelHandler::new();
        host.add_handler(Arc::new(handler));
        host.enable().await.unwrap();
        assert_eq!(next_event(&mut host_events).await, HsmsEvent::Connected);
        assert_eq!(next_event(&mut host_events).await, HsmsEvent::Selected);

        let request = host.data_message(1, 1, true, None).unwrap();
        let requester = host.clone();
        let pending = tokio::spawn(async move { requester.send_and_wait_for_response(&request).await });

        let primary = next_message(&mut equipment_events).await;
        assert_eq!((primary.header.stream, primary.header.function), (1, 1));
        assert!(primary.header.require_response);
        let body = Item::list(vec![Item::ascii("MDLN").unwrap(), Item::ascii("1.0").unwrap()]);
        let reply = equipment
            .reply_message(&primary.header, 1, 2, Some(&body))
            .unwrap();
        equipment.send(&reply).await.unwrap();

        let answer = pending.await.unwrap().unwrap().unwrap();
        assert_eq!(answer.header.function, 2);
        assert_eq!(answer.item().unwrap(), Some(body));
        assert!(host.statistics().messages_received >= 2);

        host.disable().await;
        equipment.disable().await;
    }

    #[tokio::test]
    async fn test_reply_timeout_returns_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let silent = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let protocol = HsmsProtocol::new(
            local_settings(ConnectMode::Active, port).with_t6(Duration::from_millis(100)),
        )
        .unwrap();
        let (handler, mut events) = ChannelHandler::new();
        protocol.add_handler(Arc::new(handler));
        protocol.enable().await.unwrap();
        assert_eq!(next_event(&mut events).await, HsmsEvent::Connected);

        let started = Instant::now();
        let request = HsmsMessage::linktest_req(protocol.next_system());
        let reply = protocol.send_and_wait_for_response(&request).await.unwrap();
        let elapsed = started.elapsed();
        assert!(reply.is_none());
        assert!(elapsed >= Duration::from_millis(90), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(1), "{elapsed:?}");
        assert!(protocol.statistics().timeouts >= 1);

        protocol.disable().await;
        silent.abort();
    }

    async fn connect_raw(
        protocol: &HsmsProtocol,
    ) -> (FrameReader<tokio::net::tcp::OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
        let stream = TcpStream::connect(protocol.local_address().unwrap()).await.unwrap();
        let (reader, writer) = stream.into_split();
        (FrameReader::new(reader, WAIT), writer)
    }

    #[tokio::test]
    async fn test_data_rejected_while_not_selected() {
        let (protocol, mut events) = passive().await;
        let (mut frames, mut writer) = connect_raw(&protocol).await;
        assert_eq!(next_event(&mut events).await, HsmsEvent::Connected);

        let data = HsmsMessage::data(77, 0, 1, 1, true, None).unwrap();
        writer.write_all(&data.encode()).await.unwrap();

        let reject = timeout(WAIT, frames.read_frame()).await.unwrap().unwrap().unwrap();
        assert_eq!(reject.s_type(), Some(SType::RejectReq));
        assert_eq!(reject.header.system, 77);
        assert_eq!(reject.reject_reason(), Some(RejectReason::EntityNotSelected));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(protocol.statistics().rejects_sent, 1);
        protocol.disable().await;
    }

    #[tokio::test]
    async fn test_control_messages_from_raw_peer() {
        let (protocol, mut events) = passive().await;
        let (mut frames, mut writer) = connect_raw(&protocol).await;
        assert_eq!(next_event(&mut events).await, HsmsEvent::Connected);

        writer.write_all(&HsmsMessage::linktest_req(5).encode()).await.unwrap();
        let reply = timeout(WAIT, frames.read_frame()).await.unwrap().unwrap().unwrap();
        assert_eq!(reply.s_type(), Some(SType::LinktestRsp));
        assert_eq!(reply.header.system, 5);

        let mut unknown = HsmsHeader::control(6, SType::LinktestReq);
        unknown.s_type = 8;
        writer
            .write_all(&HsmsMessage::new(unknown, bytes::Bytes::new()).encode())
            .await
            .unwrap();
        let reject = timeout(WAIT, frames.read_frame()).await.unwrap().unwrap().unwrap();
        assert_eq!(reject.reject_reason(), Some(RejectReason::STypeNotSupported));
        assert_eq!(reject.header.stream, 8);

        writer.write_all(&HsmsMessage::select_req(7).encode()).await.unwrap();
        let reply = timeout(WAIT, frames.read_frame()).await.unwrap().unwrap().unwrap();
        assert!(reply.is_select_success());
        assert_eq!(next_event(&mut events).await, HsmsEvent::Selected);

        writer.write_all(&HsmsMessage::select_req(8).encode()).await.unwrap();
        let reply = timeout(WAIT, frames.read_frame()).await.unwrap().unwrap().unwrap();
        assert_eq!(reply.status(), select_status::ALREADY_ACTIVE);

        writer.write_all(&HsmsMessage::separate_req(9).encode()).await.unwrap();
        assert_eq!(next_event(&mut events).await, HsmsEvent::Disconnected);
        assert_eq!(protocol.state(), HsmsState::NotConnected);
        protocol.disable().await;
    }

    #[tokio::test]
    async fn test_second_connection_refused() {
        let (protocol, mut events) = passive().await;
        let (_frames, _writer) = connect_raw(&protocol).await;
        assert_eq!(next_event(&mut events).await, HsmsEvent::Connected);

        let mut second = TcpStream::connect(protocol.local_address().unwrap()).await.unwrap();
        let mut buffer = [0u8; 16];
        let read = timeout(WAIT, second.read(&mut buffer)).await.unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
        assert_eq!(protocol.state(), HsmsState::ConnectedNotSelected);
        protocol.disable().await;
    }

    #[tokio::test]
    async fn test_t7_closes_unselected_connection() {
        let protocol = HsmsProtocol::new(
            local_settings(ConnectMode::Passive, 0).with_t7(Duration::from_millis(100)),
        )
        .unwrap();
        let (handler, mut events) = ChannelHandler::new();
        protocol.add_handler(Arc::new(handler));
        protocol.enable().await.unwrap();

        let (_frames, _writer) = connect_raw(&protocol).await;
        assert_eq!(next_event(&mut events).await, HsmsEvent::Connected);
        assert_eq!(next_event(&mut events).await, HsmsEvent::Disconnected);
        protocol.disable().await;
    }

    #[tokio::test]
    async fn test_late_t7_keeps_selected_connection() {
        let protocol = HsmsProtocol::new(local_settings(ConnectMode::Passive, 0)).unwrap();
        let (close_sender, mut close_receiver) = oneshot::channel();
        *lock(&protocol.close_signal) = Some(close_sender);

        protocol.fire(CONNECT).unwrap();
        protocol.fire(SELECT).unwrap();
        assert!(!protocol.t7_expired());
        assert!(close_receiver.try_recv().is_err());
        assert!(lock(&protocol.close_signal).is_some());

        protocol.fire(DESELECT).unwrap();
        assert!(protocol.t7_expired());
        assert!(close_receiver.try_recv().is_ok());
        assert_eq!(protocol.statistics().timeouts, 1);
    }

    #[tokio::test]
    async fn test_disable_releases_waiting_request() {
        let protocol = HsmsProtocol::new(
            local_settings(ConnectMode::Passive, 0).with_t3(Duration::from_secs(30)),
        )
        .unwrap();
        let (handler, mut events) = ChannelHandler::new();
        protocol.add_handler(Arc::new(handler));
        protocol.enable().await.unwrap();

        let (mut frames, mut writer) = connect_raw(&protocol).await;
        writer.write_all(&HsmsMessage::select_req(1).encode()).await.unwrap();
        let reply = timeout(WAIT, frames.read_frame()).await.unwrap().unwrap().unwrap();
        assert!(reply.is_select_success());
        assert_eq!(next_event(&mut events).await, HsmsEvent::Connected);
        assert_eq!(next_event(&mut events).await, HsmsEvent::Selected);

        let request = protocol.data_message(1, 1, true, None).unwrap();
        let requester = protocol.clone();
        let waiting =
            tokio::spawn(async move { requester.send_and_wait_for_response(&request).await });

        // the peer reads the request and never answers
        let primary = timeout(WAIT, frames.read_frame()).await.unwrap().unwrap().unwrap();
        assert_eq!((primary.header.stream, primary.header.function), (1, 1));

        let started = Instant::now();
        protocol.disable().await;
        let result = timeout(WAIT, waiting).await.unwrap().unwrap();
        assert!(matches!(result, Ok(None)));
        assert!(started.elapsed() < WAIT);
    }

    #[tokio::test]
    async fn test_send_data_requires_selection() {
        let protocol = HsmsProtocol::new(HsmsSettings::default()).unwrap();
        let message = protocol.data_message(1, 1, true, None).unwrap();
        assert!(matches!(protocol.send(&message).await, Err(SecsError::Protocol(_))));
        assert!(matches!(
            protocol.send(&HsmsMessage::linktest_req(1)).await,
            Err(SecsError::NotConnected)
        ));
    }

    #[test]
    fn test_system_counter_increments() {
        let protocol = HsmsProtocol::new(HsmsSettings::default()).unwrap();
        let first = protocol.next_system();
        assert_eq!(protocol.next_system(), first.wrapping_add(1));
    }
}
