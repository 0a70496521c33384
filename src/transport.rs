//! Transport seams between the engine and the network layer.
//!
//! The engine never touches a socket. It serialises frames through a
//! [`FrameSender`] and steers the connection's lifetime through a
//! [`NetworkControl`]; the server module provides the tokio-backed
//! implementations and tests substitute recording fakes.

use std::time::Duration;

use bytes::Bytes;

/// Consumer of serialised outbound octets.
///
/// `send` transfers ownership of the buffer; the implementation is free
/// to batch until `flush`.
pub trait FrameSender: Send {
    /// Accept a buffer of encoded frames.
    fn send(&mut self, data: Bytes);

    /// Push everything accepted so far towards the peer.
    fn flush(&mut self);

    /// Release the sender; no further calls follow.
    fn close(&mut self);
}

/// Control surface of the underlying network connection.
pub trait NetworkControl: Send {
    /// Peer address, for logging.
    fn remote_address(&self) -> String;

    /// Local address, for SASL server naming.
    fn local_address(&self) -> String;

    /// Arm or disarm the read-idle watchdog.
    fn set_max_read_idle(&mut self, idle: Option<Duration>);

    /// Arm or disarm the write-idle (heartbeat) timer.
    fn set_max_write_idle(&mut self, idle: Option<Duration>);

    /// Force-close the transport after `after`, regardless of traffic.
    ///
    /// Used while awaiting `Close-Ok` so an unresponsive peer cannot pin
    /// the socket open.
    fn schedule_forced_close(&mut self, after: Duration);

    /// Close the transport now.
    fn close(&mut self);
}
