//! The per-connection protocol engine.
//!
//! One [`AmqpConnection`] owns everything about a single client
//! connection: the inbound decoder, the handshake state machine, the
//! channel registry, outbound frame writing and teardown. All of it runs
//! on the connection's own I/O task; producers on other threads hand work
//! across via [`EngineHandle::enqueue`] and the work notifier.

pub mod channels;
pub mod pending;
pub mod state;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use log::{debug, error};

pub use channels::ChannelRegistry;
pub use pending::{PendingWork, WorkNotifier};
pub use state::ConnectionState;

use crate::auth::{Authenticator, SaslServer, SecurityContext};
use crate::channel::{ChannelFactory, ChannelLookup};
use crate::config::{BrokerConfig, PortConfig};
use crate::error::{EngineError, ErrorCode};
use crate::events::EventLogger;
use crate::frame::{encode_frame, Frame, FrameDecoder, FrameType, InboundEvent, MIN_FRAME_SIZE};
use crate::message::ContentHeaderBody;
use crate::methods::{ChannelMethod, MethodKind, MethodRegistry};
use crate::transport::{FrameSender, NetworkControl};
use crate::vhost::{VirtualHost, VirtualHostRegistry};
use crate::wire::ShortStr;

/// How long a peer gets to answer a `Close` before the socket dies.
pub const CLOSE_OK_TIMEOUT: Duration = Duration::from_secs(10);

/// Multiplier applied to the heartbeat period for the read-idle bound.
pub const HEARTBEAT_TIMEOUT_FACTOR: u32 = 2;

/// A unit of work handed to the engine from another thread.
pub type EngineTask = Box<dyn FnOnce(&mut AmqpConnection) + Send>;

struct FrameWriter {
    sender: Box<dyn FrameSender>,
    defer_flush: bool,
}

impl FrameWriter {
    fn write_frames(&mut self, frames: &[Frame]) {
        let mut buf = BytesMut::new();
        for frame in frames {
            encode_frame(frame, &mut buf);
        }
        self.sender.send(buf.freeze());
        if !self.defer_flush {
            self.sender.flush();
        }
    }

    fn flush(&mut self) {
        self.sender.flush();
    }
}

/// State shared between the engine and its cross-thread handles.
pub(crate) struct ConnectionShared {
    writer: Mutex<FrameWriter>,
    registry: Mutex<MethodRegistry>,
    current_method: AtomicU32,
    max_frame_size: AtomicU32,
    max_message_size: AtomicU64,
    compression_supported: AtomicBool,
    compression_threshold: AtomicUsize,
    send_queue_delete_ok_regardless: AtomicBool,
    orderly_close: AtomicBool,
    transport_blocked: AtomicBool,
    work: WorkNotifier,
    tasks: Mutex<VecDeque<EngineTask>>,
}

impl ConnectionShared {
    fn set_current_method(&self, class_id: u16, method_id: u16) {
        self.current_method
            .store((u32::from(class_id) << 16) | u32::from(method_id), Ordering::Release);
    }

    fn current_method(&self) -> (u16, u16) {
        let packed = self.current_method.load(Ordering::Acquire);
        ((packed >> 16) as u16, (packed & 0xFFFF) as u16)
    }
}

/// Non-owning handle to an engine, passed to channels and producers.
///
/// The handle carries only what collaborators need: frame output, the
/// negotiated sizes and flags, and the async hand-off machinery. Channels
/// keep the engine as their only parent in the ownership graph.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<ConnectionShared>,
}

impl EngineHandle {
    /// Serialise and send one frame.
    pub fn write_frame(&self, frame: &Frame) {
        self.write_frames(std::slice::from_ref(frame));
    }

    /// Serialise `frames` as one buffer and send them together.
    ///
    /// Composite deliveries (method, header, first body chunk) use this so
    /// the sequence reaches the transport in a single offer.
    pub fn write_frames(&self, frames: &[Frame]) {
        self.shared
            .writer
            .lock()
            .expect("frame writer poisoned")
            .write_frames(frames);
    }

    /// Flush any deferred output.
    pub fn flush(&self) {
        self.shared.writer.lock().expect("frame writer poisoned").flush();
    }

    /// The registry for the negotiated protocol version.
    #[must_use]
    pub fn registry(&self) -> MethodRegistry {
        *self.shared.registry.lock().expect("registry poisoned")
    }

    /// The (class, method) pair currently being dispatched.
    #[must_use]
    pub fn current_method(&self) -> (u16, u16) {
        self.shared.current_method()
    }

    /// The negotiated maximum frame size.
    #[must_use]
    pub fn max_frame_size(&self) -> u32 {
        self.shared.max_frame_size.load(Ordering::Acquire)
    }

    /// Largest message this connection accepts.
    #[must_use]
    pub fn max_message_size(&self) -> u64 {
        self.shared.max_message_size.load(Ordering::Acquire)
    }

    /// Whether gzip bridging towards this client is enabled.
    #[must_use]
    pub fn is_compression_supported(&self) -> bool {
        self.shared.compression_supported.load(Ordering::Acquire)
    }

    /// Body size above which outbound content is deflated.
    #[must_use]
    pub fn message_compression_threshold(&self) -> usize {
        self.shared.compression_threshold.load(Ordering::Acquire)
    }

    /// Whether `Queue.Delete-Ok` must be sent regardless of `nowait`.
    #[must_use]
    pub fn send_queue_delete_ok_regardless(&self) -> bool {
        self.shared
            .send_queue_delete_ok_regardless
            .load(Ordering::Acquire)
    }

    /// Whether an orderly close is underway.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.shared.orderly_close.load(Ordering::Acquire)
    }

    /// Whether the transport is currently unwritable.
    #[must_use]
    pub fn is_transport_blocked_for_writing(&self) -> bool {
        self.shared.transport_blocked.load(Ordering::Acquire)
    }

    /// Level-triggered pending-work flag.
    #[must_use]
    pub fn has_work(&self) -> bool {
        self.shared.work.has_work()
    }

    /// Raise the pending-work flag and wake the I/O task.
    pub fn notify_work(&self) {
        self.shared.work.notify_work();
    }

    /// Clear the pending-work flag.
    pub fn clear_work(&self) {
        self.shared.work.clear_work();
    }

    /// Install the wake-up callback invoked by [`EngineHandle::notify_work`].
    pub fn set_work_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.shared.work.set_listener(listener);
    }

    /// Enqueue `task` for execution on the I/O task and wake it.
    pub fn enqueue(&self, task: impl FnOnce(&mut AmqpConnection) + Send + 'static) {
        self.shared
            .tasks
            .lock()
            .expect("task queue poisoned")
            .push_back(Box::new(task));
        self.notify_work();
    }

    /// Ask the I/O task to close `channel_id` with an error reply.
    pub fn close_channel_async(&self, channel_id: u16, code: ErrorCode, message: String) {
        self.enqueue(move |engine| {
            engine.close_channel_with_error(channel_id, code, &message);
        });
    }

    /// Ask the I/O task to close the whole connection.
    pub fn send_connection_close_async(&self, code: ErrorCode, message: String) {
        self.enqueue(move |engine| {
            let _ = engine.send_connection_close(code, &message, 0);
        });
    }
}

/// The connection engine.
pub struct AmqpConnection {
    pub(crate) broker: BrokerConfig,
    pub(crate) port: PortConfig,
    connection_id: u64,
    pub(crate) authenticator: Arc<dyn Authenticator>,
    pub(crate) vhosts: Arc<dyn VirtualHostRegistry>,
    channel_factory: Box<dyn ChannelFactory>,
    pub(crate) network: Box<dyn NetworkControl>,
    pub(crate) events: EventLogger,
    pub(crate) shared: Arc<ConnectionShared>,
    pub(crate) decoder: FrameDecoder,
    pub(crate) state: ConnectionState,
    pub(crate) sasl: Option<Box<dyn SaslServer>>,
    pub(crate) security: SecurityContext,
    pub(crate) virtual_host: Option<Arc<dyn VirtualHost>>,
    pub(crate) channels: ChannelRegistry,
    touched: HashMap<u16, crate::channel::ChannelRef>,
    pub(crate) heartbeat_delay: u16,
    pub(crate) max_channels: u16,
    pub(crate) client_product: Option<String>,
    pub(crate) client_version: Option<String>,
    pub(crate) client_id: Option<String>,
    pub(crate) client_pid: Option<String>,
    pub(crate) close_when_no_route: bool,
    pub(crate) client_ver_regex: Option<regex::Regex>,
    io_thread: Option<ThreadId>,
}

impl AmqpConnection {
    /// Create an engine for a freshly accepted transport.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broker: BrokerConfig,
        port: PortConfig,
        connection_id: u64,
        authenticator: Arc<dyn Authenticator>,
        vhosts: Arc<dyn VirtualHostRegistry>,
        channel_factory: Box<dyn ChannelFactory>,
        network: Box<dyn NetworkControl>,
        sender: Box<dyn FrameSender>,
    ) -> Self {
        let max_message_size = if port.max_message_size > 0 {
            u64::from(port.max_message_size)
        } else {
            u64::MAX
        };
        let compression_threshold = if port.message_compression_threshold > 0 {
            port.message_compression_threshold
        } else {
            usize::MAX
        };
        let shared = Arc::new(ConnectionShared {
            writer: Mutex::new(FrameWriter {
                sender,
                defer_flush: false,
            }),
            registry: Mutex::new(MethodRegistry::new(
                crate::frame::ProtocolVersion::latest_supported(),
            )),
            current_method: AtomicU32::new(0),
            max_frame_size: AtomicU32::new(0),
            max_message_size: AtomicU64::new(max_message_size),
            compression_supported: AtomicBool::new(false),
            compression_threshold: AtomicUsize::new(compression_threshold),
            send_queue_delete_ok_regardless: AtomicBool::new(false),
            orderly_close: AtomicBool::new(false),
            transport_blocked: AtomicBool::new(false),
            work: WorkNotifier::new(),
            tasks: Mutex::new(VecDeque::new()),
        });
        let max_channels = broker.session_count_limit;
        let heartbeat_delay = broker.heart_beat_delay;
        let close_when_no_route = broker.close_when_no_route;
        // Full-match semantics: the configured expression must cover the
        // whole client version string.
        let client_ver_regex = regex::Regex::new(&format!(
            "^(?:{})$",
            port.send_queue_delete_ok_regardless_client_ver_regexp
        ))
        .map_err(|e| error!("invalid client version pattern: {e}"))
        .ok();
        Self {
            broker,
            port,
            connection_id,
            authenticator,
            vhosts,
            channel_factory,
            network,
            events: EventLogger,
            shared,
            decoder: FrameDecoder::new(MIN_FRAME_SIZE),
            state: ConnectionState::Init,
            sasl: None,
            security: SecurityContext::default(),
            virtual_host: None,
            channels: ChannelRegistry::new(),
            touched: HashMap::new(),
            heartbeat_delay,
            max_channels,
            client_product: None,
            client_version: None,
            client_id: None,
            client_pid: None,
            close_when_no_route,
            client_ver_regex,
            io_thread: None,
        }
    }

    /// Identifier assigned by the accepting port.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Current handshake state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// A cloneable non-owning handle for channels and producers.
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// The registry for the negotiated protocol version.
    #[must_use]
    pub fn registry(&self) -> MethodRegistry {
        *self.shared.registry.lock().expect("registry poisoned")
    }

    /// The security context accumulated by the handshake.
    #[must_use]
    pub fn security(&self) -> &SecurityContext {
        &self.security
    }

    /// Whether an orderly close has begun.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.shared.orderly_close.load(Ordering::Acquire)
    }

    /// The negotiated channel cap.
    #[must_use]
    pub fn max_channels(&self) -> u16 {
        self.max_channels
    }

    /// The heartbeat period in effect, in seconds (zero when disabled).
    #[must_use]
    pub fn heartbeat_delay(&self) -> u16 {
        self.heartbeat_delay
    }

    /// Product name reported by the client, if any.
    #[must_use]
    pub fn client_product(&self) -> Option<&str> {
        self.client_product.as_deref()
    }

    /// Version reported by the client, if any.
    #[must_use]
    pub fn client_version(&self) -> Option<&str> {
        self.client_version.as_deref()
    }

    /// Client identifier: reported, or generated when absent.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Process id reported by the client, if any.
    #[must_use]
    pub fn client_pid(&self) -> Option<&str> {
        self.client_pid.as_deref()
    }

    /// Whether unroutable mandatory messages close the connection.
    #[must_use]
    pub fn close_when_no_route(&self) -> bool {
        self.close_when_no_route
    }

    /// Defer `flush` calls until the current batch completes.
    pub fn set_defer_flush(&mut self, defer_flush: bool) {
        self.shared
            .writer
            .lock()
            .expect("frame writer poisoned")
            .defer_flush = defer_flush;
    }

    /// Install the negotiated max frame size in encoder and decoder.
    pub fn set_max_frame_size(&mut self, frame_max: u32) {
        self.shared.max_frame_size.store(frame_max, Ordering::Release);
        self.decoder.set_max_frame_size(frame_max);
    }

    /// The broker-side default for `frame_max`.
    ///
    /// Some old clients send payloads equal to the max frame size, so the
    /// frame overhead is subtracted to keep those frames inside the
    /// network buffer.
    #[must_use]
    pub fn default_max_frame_size(&self) -> u32 {
        let size = self
            .broker
            .network_buffer_size
            .saturating_sub(crate::frame::FRAME_OVERHEAD as u32);
        if size == 0 {
            u32::MAX
        } else {
            size
        }
    }

    /// Consume one inbound buffer.
    ///
    /// Frames are dispatched in wire order; after the whole buffer is
    /// decoded every channel it touched gets exactly one
    /// `receive_complete`.
    ///
    /// # Errors
    ///
    /// Decode failures and channel-raised errors propagate for the driver
    /// to tear the transport down; store failures are scoped according to
    /// the virtual host's state.
    pub fn received(&mut self, buf: &[u8]) -> Result<(), EngineError> {
        let result = self.received_inner(buf);
        match result {
            Err(EngineError::Store(message)) => {
                let active = self
                    .virtual_host
                    .as_ref()
                    .is_some_and(|vh| vh.state() == crate::vhost::VirtualHostState::Active);
                if active {
                    Err(EngineError::ServerScoped(message))
                } else {
                    Err(EngineError::ConnectionScoped(message))
                }
            }
            other => other,
        }
    }

    fn received_inner(&mut self, buf: &[u8]) -> Result<(), EngineError> {
        let events = self.decoder.decode(buf).map_err(|e| {
            error!("frame decoding failed: {e}");
            EngineError::from(e)
        })?;
        for event in events {
            match event {
                InboundEvent::ProtocolHeader(pi) => self.protocol_initiation_received(pi),
                InboundEvent::Frame(frame) => self.frame_received(frame)?,
            }
        }
        self.receive_complete_all_channels()
    }

    fn frame_received(&mut self, frame: Frame) -> Result<(), EngineError> {
        match frame.frame_type {
            FrameType::Heartbeat => {
                debug!("RECV heartbeat");
                Ok(())
            }
            FrameType::Method => self.method_received(frame),
            FrameType::ContentHeader => self.content_header_received(frame),
            FrameType::ContentBody => {
                if log::log_enabled!(log::Level::Debug) {
                    debug!(
                        "RECV[{}] ContentBody[{}]",
                        frame.channel,
                        hex_preview(&frame.payload, self.port.debug_binary_data_length)
                    );
                }
                self.content_body_received(frame)
            }
        }
    }

    fn method_received(&mut self, frame: Frame) -> Result<(), EngineError> {
        let decoded = self.registry().decode(frame.payload)?;
        self.shared
            .set_current_method(decoded.class_id, decoded.method_id);

        let result = match decoded.kind {
            MethodKind::Connection(method) => {
                if frame.channel != 0 {
                    self.send_connection_close(
                        ErrorCode::CommandInvalid,
                        "Connection class method on non-zero channel",
                        frame.channel,
                    )
                } else {
                    self.connection_method_received(method)
                }
            }
            MethodKind::Channel(method) => self.channel_method_received(frame.channel, method),
        };

        self.shared.set_current_method(0, 0);
        result
    }

    fn channel_method_received(
        &mut self,
        channel_id: u16,
        method: ChannelMethod,
    ) -> Result<(), EngineError> {
        if self.is_closing() {
            debug!("DROP[{channel_id}] channel method while connection closing");
            return Ok(());
        }
        if channel_id == 0 {
            return self.send_connection_close(
                ErrorCode::CommandInvalid,
                "Channel class method on the connection control channel",
                0,
            );
        }
        match method {
            ChannelMethod::Open => self.receive_channel_open(channel_id),
            ChannelMethod::CloseOk => {
                debug!("RECV[{channel_id}] ChannelCloseOk");
                self.channels.close_ok(channel_id);
                if let Some(channel) = self.channels.remove(channel_id) {
                    channel
                        .lock()
                        .expect("channel poisoned")
                        .close(None, "closed by peer");
                }
                Ok(())
            }
            ChannelMethod::Close(body) => match self.channels.lookup(channel_id) {
                ChannelLookup::Open(channel) => {
                    debug!(
                        "RECV[{channel_id}] ChannelClose[ replyCode: {} replyText: {} ]",
                        body.reply_code, body.reply_text
                    );
                    channel
                        .lock()
                        .expect("channel poisoned")
                        .close(None, body.reply_text.as_str());
                    self.channels.remove(channel_id);
                    let frame = self.registry().channel_close_ok_frame(channel_id);
                    self.write_frame(&frame);
                    Ok(())
                }
                ChannelLookup::Closing => Ok(()),
                ChannelLookup::Missing => self.unknown_channel(channel_id),
            },
            other => match self.channels.lookup(channel_id) {
                ChannelLookup::Open(channel) => {
                    self.touched.entry(channel_id).or_insert_with(|| Arc::clone(&channel));
                    channel
                        .lock()
                        .expect("channel poisoned")
                        .receive_method(other)
                }
                ChannelLookup::Closing => Ok(()),
                ChannelLookup::Missing => self.unknown_channel(channel_id),
            },
        }
    }

    fn content_header_received(&mut self, frame: Frame) -> Result<(), EngineError> {
        if self.is_closing() {
            return Ok(());
        }
        let mut payload = frame.payload;
        let header = ContentHeaderBody::decode(&mut payload)?;
        match self.channels.lookup(frame.channel) {
            ChannelLookup::Open(channel) => {
                self.touched
                    .entry(frame.channel)
                    .or_insert_with(|| Arc::clone(&channel));
                channel
                    .lock()
                    .expect("channel poisoned")
                    .receive_content_header(header)
            }
            ChannelLookup::Closing => Ok(()),
            ChannelLookup::Missing => self.unknown_channel(frame.channel),
        }
    }

    fn content_body_received(&mut self, frame: Frame) -> Result<(), EngineError> {
        if self.is_closing() {
            return Ok(());
        }
        match self.channels.lookup(frame.channel) {
            ChannelLookup::Open(channel) => {
                self.touched
                    .entry(frame.channel)
                    .or_insert_with(|| Arc::clone(&channel));
                channel
                    .lock()
                    .expect("channel poisoned")
                    .receive_content_body(frame.payload)
            }
            ChannelLookup::Closing => Ok(()),
            ChannelLookup::Missing => self.unknown_channel(frame.channel),
        }
    }

    fn unknown_channel(&mut self, channel_id: u16) -> Result<(), EngineError> {
        self.send_connection_close(
            ErrorCode::ChannelError,
            &format!("Unknown channel id: {channel_id}"),
            channel_id,
        )
    }

    pub(crate) fn receive_channel_open(&mut self, channel_id: u16) -> Result<(), EngineError> {
        debug!("RECV[{channel_id}] ChannelOpen");
        if !self.assert_state(ConnectionState::Open)? {
            return Ok(());
        }

        if self.virtual_host.is_none() {
            self.send_connection_close(
                ErrorCode::CommandInvalid,
                "Virtualhost has not yet been set. ConnectionOpen has not been called.",
                channel_id,
            )
        } else if self.channels.contains(channel_id) || self.channels.awaiting_close_ok(channel_id)
        {
            self.send_connection_close(
                ErrorCode::ChannelError,
                &format!("Channel {channel_id} already exists"),
                channel_id,
            )
        } else if channel_id > self.max_channels {
            self.send_connection_close(
                ErrorCode::ChannelError,
                &format!(
                    "Channel {channel_id} cannot be created as the max allowed channel id is {}",
                    self.max_channels
                ),
                channel_id,
            )
        } else {
            let channel = self.channel_factory.create(self.handle(), channel_id);
            self.channels.add(channel_id, channel);
            let frame = self.registry().channel_open_ok_frame(channel_id);
            self.write_frame(&frame);
            Ok(())
        }
    }

    /// Write one frame towards the peer.
    pub fn write_frame(&self, frame: &Frame) {
        self.shared
            .writer
            .lock()
            .expect("frame writer poisoned")
            .write_frames(std::slice::from_ref(frame));
    }

    pub(crate) fn flush(&self) {
        self.shared.writer.lock().expect("frame writer poisoned").flush();
    }

    fn receive_complete_all_channels(&mut self) -> Result<(), EngineError> {
        let mut first_error = None;
        for (id, channel) in self.touched.drain() {
            let result = channel
                .lock()
                .expect("channel poisoned")
                .receive_complete();
            if let Err(e) = result {
                error!("error informing channel {id} that receiving is complete: {e}");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close `channel_id` without an error reply (orderly, broker side).
    pub fn close_channel(&mut self, channel_id: u16) {
        self.close_channel_inner(channel_id, None, "", false);
    }

    /// Close `channel_id`, writing `Channel.Close` with the failing
    /// method reference first.
    pub fn close_channel_with_error(&mut self, channel_id: u16, code: ErrorCode, message: &str) {
        let (class_id, method_id) = self.shared.current_method();
        let frame = self.registry().channel_close_frame(
            channel_id,
            code.code(),
            &ShortStr::truncated(message),
            class_id,
            method_id,
        );
        self.write_frame(&frame);
        self.close_channel_inner(channel_id, Some(code), message, true);
    }

    fn close_channel_inner(
        &mut self,
        channel_id: u16,
        cause: Option<ErrorCode>,
        message: &str,
        mark: bool,
    ) {
        let Some(channel) = self.channels.remove(channel_id) else {
            return;
        };
        channel
            .lock()
            .expect("channel poisoned")
            .close(cause, message);
        if mark {
            self.channels.mark_awaiting_close_ok(channel_id);
        }
    }

    fn close_all_channels(&mut self) {
        for channel in self.channels.drain() {
            let mut guard = channel.lock().expect("channel poisoned");
            let id = guard.id();
            guard.close(None, "connection closed");
            debug!("closed channel {id} during connection teardown");
        }
    }

    fn complete_and_close_all_channels(&mut self) -> Result<(), EngineError> {
        let completion = self.receive_complete_all_channels();
        self.close_all_channels();
        completion
    }

    /// Begin an orderly close with an error reply.
    ///
    /// The close frame carries the (class, method) pair recorded at
    /// dispatch time. Channel completion errors are surfaced after the
    /// frame is written and the close timeout armed, so teardown always
    /// makes it onto the wire.
    ///
    /// # Errors
    ///
    /// Propagates the first channel-completion failure.
    pub fn send_connection_close(
        &mut self,
        code: ErrorCode,
        message: &str,
        channel_id: u16,
    ) -> Result<(), EngineError> {
        let (class_id, method_id) = self.shared.current_method();
        let frame = self.registry().connection_close_frame(
            code.code(),
            &ShortStr::truncated(message),
            class_id,
            method_id,
        );
        self.send_connection_close_frame(channel_id, frame)
    }

    pub(crate) fn send_connection_close_frame(
        &mut self,
        channel_id: u16,
        frame: Frame,
    ) -> Result<(), EngineError> {
        if self
            .shared
            .orderly_close
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        self.channels.mark_awaiting_close_ok(channel_id);
        let completion = self.complete_and_close_all_channels();
        self.write_frame(&frame);
        self.network.schedule_forced_close(CLOSE_OK_TIMEOUT);
        completion
    }

    pub(crate) fn receive_connection_close(
        &mut self,
        reply_code: u16,
        reply_text: &str,
    ) -> Result<(), EngineError> {
        debug!("RECV ConnectionClose[ replyCode: {reply_code} replyText: {reply_text} ]");
        if self
            .shared
            .orderly_close
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Err(e) = self.complete_and_close_all_channels() {
                error!(
                    "error closing connection for {}: {e}",
                    self.network.remote_address()
                );
            }
            let frame = self.registry().connection_close_ok_frame();
            self.write_frame(&frame);
        }
        self.network.close();
        Ok(())
    }

    pub(crate) fn receive_connection_close_ok(&mut self) -> Result<(), EngineError> {
        debug!("RECV ConnectionCloseOk");
        self.network.close();
        Ok(())
    }

    /// The transport is gone; finish bookkeeping and log the outcome.
    pub fn closed(&mut self) {
        if !self.is_closing() {
            if let Err(e) = self.complete_and_close_all_channels() {
                error!("could not close protocol engine: {e}");
            }
        }
        if let Some(virtual_host) = self.virtual_host.take() {
            virtual_host.connection_deregistered(self.connection_id);
        }
        let remote = self.network.remote_address();
        if self.is_closing() {
            self.events.connection_close(&remote);
        } else {
            self.events.connection_dropped(&remote);
        }
    }

    /// The peer has been silent past its read-idle allowance.
    pub fn reader_idle(&mut self) {
        self.events
            .connection_idle_close(&self.network.remote_address());
        self.network.close();
    }

    /// Nothing has been written for a heartbeat period.
    pub fn writer_idle(&mut self) {
        self.write_frame(&Frame::heartbeat());
    }

    /// Periodic housekeeping: force-close when a channel has been awaiting
    /// `Close-Ok` for longer than [`CLOSE_OK_TIMEOUT`].
    pub fn tick(&mut self, now: Instant) {
        if self.channels.has_closing_older_than(CLOSE_OK_TIMEOUT, now) {
            error!(
                "forcibly closing {}: Close-Ok overdue",
                self.network.remote_address()
            );
            self.network.close();
        }
    }

    /// Stop delivery on every channel (connection-wide flow control).
    pub fn block(&mut self) {
        self.channels.block_all();
    }

    /// Resume delivery on every channel.
    pub fn unblock(&mut self) {
        self.channels.unblock_all();
    }

    /// Record transport writability and notify every channel on change.
    pub fn set_transport_blocked_for_writing(&mut self, blocked: bool) {
        let previous = self.shared.transport_blocked.swap(blocked, Ordering::AcqRel);
        if previous != blocked {
            self.channels.transport_state_changed_all();
        }
    }

    pub(crate) fn set_io_thread_field(&mut self, thread: Option<ThreadId>) {
        self.io_thread = thread;
    }

    pub(crate) fn io_thread_field(&self) -> Option<ThreadId> {
        self.io_thread
    }

    pub(crate) fn pop_task(&mut self) -> Option<EngineTask> {
        self.shared
            .tasks
            .lock()
            .expect("task queue poisoned")
            .pop_front()
    }

    pub(crate) fn tasks_empty(&self) -> bool {
        self.shared
            .tasks
            .lock()
            .expect("task queue poisoned")
            .is_empty()
    }
}

/// Hex dump of at most `limit` octets, with an ellipsis when truncated.
fn hex_preview(data: &[u8], limit: usize) -> String {
    use std::fmt::Write as _;

    let shown = &data[..data.len().min(limit)];
    let mut out = String::with_capacity(shown.len() * 2 + 16);
    for octet in shown {
        let _ = write!(out, "{octet:02x}");
    }
    if data.len() > limit {
        let _ = write!(out, "... ({} octets)", data.len());
    }
    out
}

#[cfg(test)]
mod tests;
