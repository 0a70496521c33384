//! TCP accept loop and per-connection driver.
//!
//! Each accepted socket gets its own task owning an [`AmqpConnection`].
//! The driver feeds inbound bytes to the engine, drains pending work when
//! producers raise the work flag, ticks heartbeat/idle/close timers, and
//! pumps outbound buffers through a writer half. Shutdown is observed
//! first in the select loop, then work wake-ups, then socket reads, then
//! the timer tick.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use log::{debug, error, info};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::admission::ConnectionAdmission;
use crate::auth::Authenticator;
use crate::channel::{Channel, ChannelFactory};
use crate::config::{BrokerConfig, PortConfig};
use crate::connection::{AmqpConnection, EngineHandle};
use crate::events::EventLogger;
use crate::transport::{FrameSender, NetworkControl};
use crate::vhost::VirtualHostRegistry;

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// A TCP listener running the connection engine on every accepted socket.
pub struct AmqpServer {
    broker: BrokerConfig,
    port: PortConfig,
    authenticator: Arc<dyn Authenticator>,
    vhosts: Arc<dyn VirtualHostRegistry>,
    channel_factory: Arc<dyn ChannelFactory + Sync>,
    events: EventLogger,
}

impl AmqpServer {
    /// Assemble a server from its collaborators.
    #[must_use]
    pub fn new(
        broker: BrokerConfig,
        port: PortConfig,
        authenticator: Arc<dyn Authenticator>,
        vhosts: Arc<dyn VirtualHostRegistry>,
        channel_factory: Arc<dyn ChannelFactory + Sync>,
    ) -> Self {
        Self {
            broker,
            port,
            authenticator,
            vhosts,
            channel_factory,
            events: EventLogger,
        }
    }

    /// Bind, accept until `shutdown` fires, then drain.
    ///
    /// # Errors
    ///
    /// Returns the bind error; accept errors are logged and survived.
    pub async fn run(self, bind_address: &str, shutdown: CancellationToken) -> io::Result<()> {
        let listener = TcpListener::bind((bind_address, self.port.port)).await?;
        self.events.broker_listening("TCP", self.port.port);

        let admission = Arc::new(ConnectionAdmission::new(&self.port, self.events));
        let mut next_connection_id: u64 = 0;

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!("accept failed: {e}");
                            continue;
                        }
                    };
                    if !admission.can_accept(&remote.to_string()) {
                        drop(stream);
                        continue;
                    }
                    admission.increment();
                    next_connection_id += 1;

                    let connection = ConnectionDriver {
                        broker: self.broker.clone(),
                        port: self.port.clone(),
                        connection_id: next_connection_id,
                        authenticator: Arc::clone(&self.authenticator),
                        vhosts: Arc::clone(&self.vhosts),
                        channel_factory: Arc::clone(&self.channel_factory),
                        admission: Arc::clone(&admission),
                        shutdown: shutdown.child_token(),
                    };
                    tokio::spawn(connection.run(stream));
                }
            }
        }

        self.events.broker_shutting_down("TCP", self.port.port);
        admission.begin_close();
        admission.wait_drained().await;
        Ok(())
    }
}

/// Per-connection shared control state between the engine's
/// [`NetworkControl`] view and the driver loop.
struct NetworkShared {
    close: CancellationToken,
    read_idle: Mutex<Option<Duration>>,
    write_idle: Mutex<Option<Duration>>,
    forced_close_at: Mutex<Option<Instant>>,
}

struct DriverNetwork {
    shared: Arc<NetworkShared>,
    remote: String,
    local: String,
}

impl NetworkControl for DriverNetwork {
    fn remote_address(&self) -> String {
        self.remote.clone()
    }

    fn local_address(&self) -> String {
        self.local.clone()
    }

    fn set_max_read_idle(&mut self, idle: Option<Duration>) {
        *self.shared.read_idle.lock().expect("idle setting poisoned") = idle;
    }

    fn set_max_write_idle(&mut self, idle: Option<Duration>) {
        *self.shared.write_idle.lock().expect("idle setting poisoned") = idle;
    }

    fn schedule_forced_close(&mut self, after: Duration) {
        *self
            .shared
            .forced_close_at
            .lock()
            .expect("deadline poisoned") = Some(Instant::now() + after);
    }

    fn close(&mut self) {
        self.shared.close.cancel();
    }
}

/// Sender batching engine output towards the writer half.
struct QueueSender {
    pending: Vec<Bytes>,
    tx: mpsc::UnboundedSender<Bytes>,
    last_write: Arc<Mutex<Instant>>,
}

impl FrameSender for QueueSender {
    fn send(&mut self, data: Bytes) {
        self.pending.push(data);
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let total: usize = self.pending.iter().map(Bytes::len).sum();
        let mut buf = BytesMut::with_capacity(total);
        for chunk in self.pending.drain(..) {
            buf.extend_from_slice(&chunk);
        }
        *self.last_write.lock().expect("write clock poisoned") = Instant::now();
        // The writer half has gone if this fails; the read side will see
        // the closed socket shortly.
        let _ = self.tx.send(buf.freeze());
    }

    fn close(&mut self) {
        self.flush();
    }
}

struct ConnectionDriver {
    broker: BrokerConfig,
    port: PortConfig,
    connection_id: u64,
    authenticator: Arc<dyn Authenticator>,
    vhosts: Arc<dyn VirtualHostRegistry>,
    channel_factory: Arc<dyn ChannelFactory + Sync>,
    admission: Arc<ConnectionAdmission>,
    shutdown: CancellationToken,
}

struct SharedChannelFactory(Arc<dyn ChannelFactory + Sync>);

impl ChannelFactory for SharedChannelFactory {
    fn create(&self, engine: EngineHandle, channel_id: u16) -> Box<dyn Channel> {
        self.0.create(engine, channel_id)
    }
}

impl ConnectionDriver {
    async fn run(self, stream: TcpStream) {
        let Self {
            broker,
            port,
            connection_id,
            authenticator,
            vhosts,
            channel_factory,
            admission,
            shutdown,
        } = self;

        let remote = stream
            .peer_addr()
            .map_or_else(|_| "unknown".to_owned(), |a| a.to_string());
        let local = stream
            .local_addr()
            .map_or_else(|_| "unknown".to_owned(), |a| a.to_string());
        debug!("connection {connection_id} accepted from {remote}");

        let (mut read_half, mut write_half) = stream.into_split();

        let network_shared = Arc::new(NetworkShared {
            close: shutdown.child_token(),
            read_idle: Mutex::new(None),
            write_idle: Mutex::new(None),
            forced_close_at: Mutex::new(None),
        });
        let last_write = Arc::new(Mutex::new(Instant::now()));
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

        let mut engine = AmqpConnection::new(
            broker,
            port,
            connection_id,
            authenticator,
            vhosts,
            Box::new(SharedChannelFactory(channel_factory)),
            Box::new(DriverNetwork {
                shared: Arc::clone(&network_shared),
                remote,
                local,
            }),
            Box::new(QueueSender {
                pending: Vec::new(),
                tx,
                last_write: Arc::clone(&last_write),
            }),
        );

        let wake = Arc::new(Notify::new());
        {
            let wake = Arc::clone(&wake);
            // notify_one stores a permit, so a notification raised while
            // the loop is busy elsewhere is not lost.
            engine.handle().set_work_listener(move || wake.notify_one());
        }

        // Writer half: pump queued buffers to the socket; a write failure
        // is transport-scoped and force-closes the connection.
        let writer_close = network_shared.close.clone();
        let writer = tokio::spawn(async move {
            while let Some(buf) = rx.recv().await {
                if let Err(e) = write_half.write_all(&buf).await {
                    error!("write failed: {e}");
                    writer_close.cancel();
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        let mut read_buf = BytesMut::with_capacity(64 * 1024);
        let mut last_read = Instant::now();
        let mut tick = tokio::time::interval(TICK_PERIOD);
        let close = network_shared.close.clone();

        loop {
            // The driver task is the engine's I/O thread; re-pin after any
            // runtime migration so the pending pass stays enabled.
            engine.set_io_thread();
            engine.handle().clear_work();
            let mut pass = engine.begin_process_pending();
            while engine.process_next(&mut pass) {}

            tokio::select! {
                biased;

                () = close.cancelled() => break,
                () = wake.notified() => {}
                read = read_half.read_buf(&mut read_buf) => {
                    match read {
                        Ok(0) => break,
                        Ok(_) => {
                            last_read = Instant::now();
                            let result = engine.received(&read_buf.split().freeze());
                            if let Err(e) = result {
                                if e.is_connection_scoped() {
                                    error!("closing connection: {e}");
                                } else {
                                    error!("server-scoped failure on connection: {e}");
                                }
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("read failed: {e}");
                            break;
                        }
                    }
                }
                _ = tick.tick() => {
                    let now = Instant::now();
                    if deadline_passed(&network_shared, now) {
                        debug!("close-ok deadline passed");
                        break;
                    }
                    if let Some(limit) = *network_shared.read_idle.lock().expect("idle setting poisoned") {
                        if now.duration_since(last_read) > limit {
                            engine.reader_idle();
                        }
                    }
                    if let Some(limit) = *network_shared.write_idle.lock().expect("idle setting poisoned") {
                        let idle = now.duration_since(*last_write.lock().expect("write clock poisoned"));
                        if idle > limit {
                            engine.writer_idle();
                        }
                    }
                    engine.tick(now.into_std());
                }
            }
        }

        engine.closed();
        engine.handle().flush();
        // Dropping the engine closes the writer queue; give buffered
        // output a bounded chance to reach the socket.
        drop(engine);
        if tokio::time::timeout(Duration::from_secs(5), writer).await.is_err() {
            debug!("writer half did not finish in time");
        }
        admission.decrement();
        debug!("connection {connection_id} finished");
    }
}

fn deadline_passed(shared: &NetworkShared, now: Instant) -> bool {
    shared
        .forced_close_at
        .lock()
        .expect("deadline poisoned")
        .is_some_and(|deadline| now >= deadline)
}

/// Convenience: run a server until ctrl-c.
///
/// # Errors
///
/// Returns bind or signal-handling errors.
pub async fn run_until_interrupted(server: AmqpServer, bind_address: &str) -> io::Result<()> {
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            trigger.cancel();
        }
    });
    server.run(bind_address, shutdown).await
}
