//! Shared fakes and fixtures for exercising the engine without a
//! transport.
//!
//! Everything here records what the engine did (octets sent, network
//! control calls, channel contract invocations) so tests assert on
//! observable behaviour rather than internals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::auth::StaticAuthenticator;
use crate::channel::{Channel, ChannelFactory};
use crate::config::{BrokerConfig, PortConfig};
use crate::connection::{AmqpConnection, EngineHandle};
use crate::error::{EngineError, ErrorCode};
use crate::frame::{encode_frame, Frame, FrameDecoder, InboundEvent};
use crate::message::ContentHeaderBody;
use crate::methods::ChannelMethod;
use crate::transport::{FrameSender, NetworkControl};
use crate::vhost::{AccessRefused, VirtualHost, VirtualHostRegistry, VirtualHostState};
use crate::wire::{put_long_string, put_short_string, FieldTable, ShortStr};

/// Everything a [`RecordingSender`] saw.
#[derive(Debug, Default)]
pub struct SenderState {
    pub sent: Vec<Bytes>,
    pub flushes: usize,
    pub closed: bool,
}

/// A [`FrameSender`] that records offered buffers.
#[derive(Clone, Default)]
pub struct RecordingSender(Arc<Mutex<SenderState>>);

impl RecordingSender {
    /// All octets sent so far, concatenated.
    #[must_use]
    pub fn raw(&self) -> Vec<u8> {
        let state = self.0.lock().expect("sender state poisoned");
        state.sent.iter().flat_map(|b| b.iter().copied()).collect()
    }

    /// Discard recorded output.
    pub fn clear(&self) {
        self.0.lock().expect("sender state poisoned").sent.clear();
    }

    /// Number of flushes observed.
    #[must_use]
    pub fn flushes(&self) -> usize {
        self.0.lock().expect("sender state poisoned").flushes
    }

    /// Number of buffers offered via `send`.
    #[must_use]
    pub fn send_count(&self) -> usize {
        self.0.lock().expect("sender state poisoned").sent.len()
    }

    /// Decode everything sent so far as frames.
    ///
    /// # Panics
    ///
    /// Panics if the output is not well-formed framing (tests want to know).
    #[must_use]
    pub fn frames(&self) -> Vec<Frame> {
        let mut decoder = FrameDecoder::new(u32::MAX);
        decoder.set_expect_protocol_initiation(false);
        decoder
            .decode(&self.raw())
            .expect("recorded output should decode")
            .into_iter()
            .map(|event| match event {
                InboundEvent::Frame(frame) => frame,
                InboundEvent::ProtocolHeader(_) => unreachable!(),
            })
            .collect()
    }

    /// Decode and summarise the method opcodes written, in order.
    #[must_use]
    pub fn method_opcodes(&self) -> Vec<(u16, u16)> {
        self.frames()
            .iter()
            .filter(|f| f.frame_type == crate::frame::FrameType::Method)
            .map(|f| {
                (
                    u16::from_be_bytes([f.payload[0], f.payload[1]]),
                    u16::from_be_bytes([f.payload[2], f.payload[3]]),
                )
            })
            .collect()
    }
}

impl FrameSender for RecordingSender {
    fn send(&mut self, data: Bytes) {
        self.0.lock().expect("sender state poisoned").sent.push(data);
    }

    fn flush(&mut self) {
        self.0.lock().expect("sender state poisoned").flushes += 1;
    }

    fn close(&mut self) {
        self.0.lock().expect("sender state poisoned").closed = true;
    }
}

/// Everything a [`RecordingNetwork`] was told to do.
#[derive(Debug)]
pub struct NetworkState {
    pub closed: bool,
    pub read_idle: Option<Duration>,
    pub write_idle: Option<Duration>,
    pub forced_close_after: Option<Duration>,
    pub remote: String,
    pub local: String,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            closed: false,
            read_idle: None,
            write_idle: None,
            forced_close_after: None,
            remote: "127.0.0.1:54321".to_owned(),
            local: "127.0.0.1:5672".to_owned(),
        }
    }
}

/// A [`NetworkControl`] that records control calls.
#[derive(Clone, Default)]
pub struct RecordingNetwork(Arc<Mutex<NetworkState>>);

impl RecordingNetwork {
    /// Whether `close` was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.0.lock().expect("network state poisoned").closed
    }

    /// The last read-idle setting.
    #[must_use]
    pub fn read_idle(&self) -> Option<Duration> {
        self.0.lock().expect("network state poisoned").read_idle
    }

    /// The last write-idle setting.
    #[must_use]
    pub fn write_idle(&self) -> Option<Duration> {
        self.0.lock().expect("network state poisoned").write_idle
    }

    /// The last forced-close deadline requested.
    #[must_use]
    pub fn forced_close_after(&self) -> Option<Duration> {
        self.0
            .lock()
            .expect("network state poisoned")
            .forced_close_after
    }
}

impl NetworkControl for RecordingNetwork {
    fn remote_address(&self) -> String {
        self.0.lock().expect("network state poisoned").remote.clone()
    }

    fn local_address(&self) -> String {
        self.0.lock().expect("network state poisoned").local.clone()
    }

    fn set_max_read_idle(&mut self, idle: Option<Duration>) {
        self.0.lock().expect("network state poisoned").read_idle = idle;
    }

    fn set_max_write_idle(&mut self, idle: Option<Duration>) {
        self.0.lock().expect("network state poisoned").write_idle = idle;
    }

    fn schedule_forced_close(&mut self, after: Duration) {
        self.0
            .lock()
            .expect("network state poisoned")
            .forced_close_after = Some(after);
    }

    fn close(&mut self) {
        self.0.lock().expect("network state poisoned").closed = true;
    }
}

/// Record of everything one scripted channel was told.
#[derive(Debug, Default)]
pub struct ChannelLog {
    pub methods: Vec<ChannelMethod>,
    pub headers: Vec<ContentHeaderBody>,
    pub bodies: Vec<Bytes>,
    pub complete_calls: usize,
    pub closed: Option<(Option<ErrorCode>, String)>,
    pub blocked: bool,
    pub transport_changes: usize,
    pub pending_runs: usize,
}

/// A [`Channel`] that records contract calls and performs a scripted
/// amount of pending work.
pub struct ScriptedChannel {
    id: u16,
    log: Arc<Mutex<ChannelLog>>,
    pending_budget: usize,
}

impl Channel for ScriptedChannel {
    fn id(&self) -> u16 {
        self.id
    }

    fn receive_method(&mut self, method: ChannelMethod) -> Result<(), EngineError> {
        self.log
            .lock()
            .expect("channel log poisoned")
            .methods
            .push(method);
        Ok(())
    }

    fn receive_content_header(&mut self, header: ContentHeaderBody) -> Result<(), EngineError> {
        self.log
            .lock()
            .expect("channel log poisoned")
            .headers
            .push(header);
        Ok(())
    }

    fn receive_content_body(&mut self, payload: Bytes) -> Result<(), EngineError> {
        self.log
            .lock()
            .expect("channel log poisoned")
            .bodies
            .push(payload);
        Ok(())
    }

    fn receive_complete(&mut self) -> Result<(), EngineError> {
        self.log.lock().expect("channel log poisoned").complete_calls += 1;
        Ok(())
    }

    fn close(&mut self, cause: Option<ErrorCode>, message: &str) {
        self.log.lock().expect("channel log poisoned").closed = Some((cause, message.to_owned()));
    }

    fn block(&mut self) {
        self.log.lock().expect("channel log poisoned").blocked = true;
    }

    fn unblock(&mut self) {
        self.log.lock().expect("channel log poisoned").blocked = false;
    }

    fn transport_state_changed(&mut self) {
        self.log.lock().expect("channel log poisoned").transport_changes += 1;
    }

    fn process_pending(&mut self) -> bool {
        if self.pending_budget == 0 {
            return false;
        }
        self.pending_budget -= 1;
        self.log.lock().expect("channel log poisoned").pending_runs += 1;
        self.pending_budget > 0
    }

    fn is_closing(&self) -> bool {
        false
    }
}

/// Factory producing [`ScriptedChannel`]s and retaining their logs.
#[derive(Clone, Default)]
pub struct ScriptedChannelFactory {
    logs: Arc<Mutex<HashMap<u16, Arc<Mutex<ChannelLog>>>>>,
    pending_budget: usize,
}

impl ScriptedChannelFactory {
    /// Channels created by this factory report `budget` rounds of pending
    /// work.
    #[must_use]
    pub fn with_pending_budget(mut self, budget: usize) -> Self {
        self.pending_budget = budget;
        self
    }

    /// The log of the channel created for `id`, if any.
    #[must_use]
    pub fn log(&self, id: u16) -> Option<Arc<Mutex<ChannelLog>>> {
        self.logs
            .lock()
            .expect("factory logs poisoned")
            .get(&id)
            .map(Arc::clone)
    }

    /// Number of channels created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.logs.lock().expect("factory logs poisoned").len()
    }
}

impl ChannelFactory for ScriptedChannelFactory {
    fn create(&self, _engine: EngineHandle, channel_id: u16) -> Box<dyn Channel> {
        let log = Arc::new(Mutex::new(ChannelLog::default()));
        self.logs
            .lock()
            .expect("factory logs poisoned")
            .insert(channel_id, Arc::clone(&log));
        Box::new(ScriptedChannel {
            id: channel_id,
            log,
            pending_budget: self.pending_budget,
        })
    }
}

/// A virtual host with scripted state and authorisation.
pub struct FakeVirtualHost {
    pub name: String,
    pub state: VirtualHostState,
    pub redirect: Option<String>,
    pub refuse: Option<String>,
    pub registrations: Arc<std::sync::atomic::AtomicI64>,
}

impl FakeVirtualHost {
    /// An active host named `name`.
    #[must_use]
    pub fn active(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: VirtualHostState::Active,
            redirect: None,
            refuse: None,
            registrations: Arc::default(),
        }
    }
}

impl VirtualHost for FakeVirtualHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> VirtualHostState {
        self.state
    }

    fn redirect_host(&self) -> Option<String> {
        self.redirect.clone()
    }

    fn authorise_create_connection(
        &self,
        _security: &crate::auth::SecurityContext,
    ) -> Result<(), AccessRefused> {
        match &self.refuse {
            Some(message) => Err(AccessRefused(message.clone())),
            None => Ok(()),
        }
    }

    fn connection_registered(&self, _connection_id: u64) {
        self.registrations
            .fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }

    fn connection_deregistered(&self, _connection_id: u64) {
        self.registrations
            .fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
    }
}

/// Registry over a fixed set of fake hosts.
#[derive(Default)]
pub struct FakeVirtualHostRegistry {
    hosts: HashMap<String, Arc<dyn VirtualHost>>,
}

impl FakeVirtualHostRegistry {
    /// Add `host` under its own name.
    #[must_use]
    pub fn with(mut self, host: FakeVirtualHost) -> Self {
        self.hosts.insert(host.name.clone(), Arc::new(host));
        self
    }
}

impl VirtualHostRegistry for FakeVirtualHostRegistry {
    fn virtual_host(&self, name: &str) -> Option<Arc<dyn VirtualHost>> {
        self.hosts.get(name).map(Arc::clone)
    }
}

/// An engine wired to recording fakes.
pub struct EngineFixture {
    pub engine: AmqpConnection,
    pub sender: RecordingSender,
    pub network: RecordingNetwork,
    pub channels: ScriptedChannelFactory,
}

/// Build a fixture with guest/guest PLAIN auth and an active `""` and
/// `"test"` virtual host.
#[must_use]
pub fn fixture() -> EngineFixture {
    fixture_with(BrokerConfig::default(), PortConfig::default())
}

/// Build a fixture with explicit configuration.
#[must_use]
pub fn fixture_with(broker: BrokerConfig, port: PortConfig) -> EngineFixture {
    fixture_with_factory(broker, port, ScriptedChannelFactory::default())
}

/// Build a fixture with explicit configuration and channel factory.
#[must_use]
pub fn fixture_with_factory(
    broker: BrokerConfig,
    port: PortConfig,
    channels: ScriptedChannelFactory,
) -> EngineFixture {
    let mut users = HashMap::new();
    users.insert("guest".to_owned(), "guest".to_owned());
    let authenticator = Arc::new(StaticAuthenticator::new(users));
    let registry = FakeVirtualHostRegistry::default()
        .with(FakeVirtualHost::active(""))
        .with(FakeVirtualHost::active("test"));

    let sender = RecordingSender::default();
    let network = RecordingNetwork::default();
    let mut engine = AmqpConnection::new(
        broker,
        port,
        1,
        authenticator,
        Arc::new(registry),
        Box::new(channels.clone()),
        Box::new(network.clone()),
        Box::new(sender.clone()),
    );
    engine.set_io_thread();
    EngineFixture {
        engine,
        sender,
        network,
        channels,
    }
}

/// Encode `frame` to raw octets as a client would send them.
#[must_use]
pub fn client_frame(frame: &Frame) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_frame(frame, &mut buf);
    buf.to_vec()
}

/// Build a client method frame from an opcode and argument writer.
#[must_use]
pub fn client_method(channel: u16, class_id: u16, method_id: u16, args: impl FnOnce(&mut BytesMut)) -> Vec<u8> {
    let mut payload = BytesMut::new();
    payload.put_u16(class_id);
    payload.put_u16(method_id);
    args(&mut payload);
    client_frame(&Frame::method(channel, payload.freeze()))
}

/// `Connection.Start-Ok` with PLAIN guest/guest and `properties`.
#[must_use]
pub fn client_start_ok(properties: &FieldTable) -> Vec<u8> {
    client_method(0, 10, 11, |buf| {
        properties.encode(buf);
        put_short_string(buf, &ShortStr::new("PLAIN").expect("literal"));
        put_long_string(buf, b"\0guest\0guest");
        put_short_string(buf, &ShortStr::new("en_US").expect("literal"));
    })
}

/// `Connection.Tune-Ok` with the given values.
#[must_use]
pub fn client_tune_ok(channel_max: u16, frame_max: u32, heartbeat: u16) -> Vec<u8> {
    client_method(0, 10, 31, |buf| {
        buf.put_u16(channel_max);
        buf.put_u32(frame_max);
        buf.put_u16(heartbeat);
    })
}

/// `Connection.Open` for `virtual_host`.
#[must_use]
pub fn client_open(virtual_host: &str) -> Vec<u8> {
    client_method(0, 10, 40, |buf| {
        put_short_string(buf, &ShortStr::new(virtual_host).expect("vhost fits"));
        put_short_string(buf, &ShortStr::default());
        buf.put_u8(0);
    })
}

/// `Channel.Open` for `channel`.
#[must_use]
pub fn client_channel_open(channel: u16) -> Vec<u8> {
    client_method(channel, 20, 10, |buf| {
        put_short_string(buf, &ShortStr::default());
    })
}

/// Drive the fixture's engine through the happy-path 0-9-1 handshake.
///
/// # Panics
///
/// Panics if any handshake step fails.
pub fn perform_handshake(fixture: &mut EngineFixture) {
    fixture
        .engine
        .received(b"AMQP\x00\x00\x09\x01")
        .expect("protocol header");
    fixture
        .engine
        .received(&client_start_ok(&FieldTable::new()))
        .expect("start-ok");
    fixture
        .engine
        .received(&client_tune_ok(256, 65536, 0))
        .expect("tune-ok");
    fixture
        .engine
        .received(&client_open("/"))
        .expect("open");
    assert_eq!(fixture.engine.state(), crate::connection::ConnectionState::Open);
    fixture.sender.clear();
}
