//! Operational event log lines.
//!
//! Connection and port lifecycle events are emitted under a dedicated log
//! target with stable symbolic names, so operators can alert on them
//! independently of ordinary diagnostics.

use log::{info, warn};

/// Log target carrying operational events.
pub const OPERATIONAL_TARGET: &str = "ferrumq::operational";

pub const CONNECTION_OPEN: &str = "CONNECTION.OPEN";
pub const CONNECTION_CLOSE: &str = "CONNECTION.CLOSE";
pub const CONNECTION_DROPPED: &str = "CONNECTION.DROPPED";
pub const CONNECTION_IDLE_CLOSE: &str = "CONNECTION.IDLE_CLOSE";
pub const PORT_CONNECTION_COUNT_WARN: &str = "PORT.CONNECTION_COUNT_WARN";
pub const PORT_CONNECTION_REJECTED_CLOSED: &str = "PORT.CONNECTION_REJECTED_CLOSED";
pub const PORT_CONNECTION_REJECTED_TOO_MANY: &str = "PORT.CONNECTION_REJECTED_TOO_MANY";
pub const BROKER_LISTENING: &str = "BROKER.LISTENING";
pub const BROKER_SHUTTING_DOWN: &str = "BROKER.SHUTTING_DOWN";

/// Emitter for the operational event lines.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventLogger;

impl EventLogger {
    /// A connection finished its handshake.
    pub fn connection_open(&self, remote_address: &str, principal: &str, virtual_host: &str) {
        info!(
            target: OPERATIONAL_TARGET,
            "{CONNECTION_OPEN} : {remote_address} : user {principal} : vhost {virtual_host}"
        );
    }

    /// A connection closed after an orderly handshake.
    pub fn connection_close(&self, remote_address: &str) {
        info!(target: OPERATIONAL_TARGET, "{CONNECTION_CLOSE} : {remote_address}");
    }

    /// A connection's transport vanished without a close handshake.
    pub fn connection_dropped(&self, remote_address: &str) {
        info!(target: OPERATIONAL_TARGET, "{CONNECTION_DROPPED} : {remote_address}");
    }

    /// A connection exceeded its read-idle allowance.
    pub fn connection_idle_close(&self, remote_address: &str) {
        info!(target: OPERATIONAL_TARGET, "{CONNECTION_IDLE_CLOSE} : {remote_address}");
    }

    /// The port's connection count crossed the warning threshold.
    pub fn port_connection_count_warn(&self, current: u32, warn_percent: u32, max: u32) {
        warn!(
            target: OPERATIONAL_TARGET,
            "{PORT_CONNECTION_COUNT_WARN} : {current} connections open ({warn_percent}% of limit {max})"
        );
    }

    /// A connection was refused because the port is draining.
    pub fn port_connection_rejected_closed(&self, remote_address: &str) {
        warn!(
            target: OPERATIONAL_TARGET,
            "{PORT_CONNECTION_REJECTED_CLOSED} : {remote_address}"
        );
    }

    /// A connection was refused because the port is at its cap.
    pub fn port_connection_rejected_too_many(&self, remote_address: &str, max: u32) {
        warn!(
            target: OPERATIONAL_TARGET,
            "{PORT_CONNECTION_REJECTED_TOO_MANY} : {remote_address} : limit {max}"
        );
    }

    /// A transport started accepting.
    pub fn broker_listening(&self, transport: &str, port: u16) {
        info!(target: OPERATIONAL_TARGET, "{BROKER_LISTENING} : {transport} port {port}");
    }

    /// A transport stopped accepting.
    pub fn broker_shutting_down(&self, transport: &str, port: u16) {
        info!(target: OPERATIONAL_TARGET, "{BROKER_SHUTTING_DOWN} : {transport} port {port}");
    }
}
