//! Per-port connection admission and drain control.
//!
//! The counter enforces the port's connection cap and fires a one-shot
//! warning as the count approaches it. The warning re-arms only after the
//! count has fallen below the *square* of the warning fraction; the gap
//! between the two thresholds stops the log flapping around the boundary.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::sync::Notify;

use crate::config::PortConfig;
use crate::events::EventLogger;

/// Admission gate and connection counter for one port.
pub struct ConnectionAdmission {
    max_open_connections: u32,
    warn_percent: u32,
    count: AtomicU32,
    warning_given: AtomicBool,
    closing: AtomicBool,
    drained: Notify,
    events: EventLogger,
}

impl ConnectionAdmission {
    /// Create an admission gate from the port's configuration.
    #[must_use]
    pub fn new(config: &PortConfig, events: EventLogger) -> Self {
        Self {
            max_open_connections: config.max_open_connections,
            warn_percent: config.open_connections_warn_percent,
            count: AtomicU32::new(0),
            warning_given: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            drained: Notify::new(),
            events,
        }
    }

    /// Current number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    fn warn_threshold(&self) -> u32 {
        (u64::from(self.max_open_connections) * u64::from(self.warn_percent) / 100) as u32
    }

    fn rearm_threshold(&self) -> u32 {
        (u64::from(self.max_open_connections)
            * u64::from(self.warn_percent)
            * u64::from(self.warn_percent)
            / 10_000) as u32
    }

    /// Record an accepted connection; returns the new count.
    pub fn increment(&self) -> u32 {
        let open = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        if self.max_open_connections > 0
            && open > self.warn_threshold()
            && self
                .warning_given
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.events
                .port_connection_count_warn(open, self.warn_percent, self.max_open_connections);
        }
        open
    }

    /// Record a finished connection; returns the new count.
    pub fn decrement(&self) -> u32 {
        let open = self.count.fetch_sub(1, Ordering::AcqRel) - 1;
        if self.max_open_connections > 0 && open < self.rearm_threshold() {
            let _ = self
                .warning_given
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire);
        }
        if self.closing.load(Ordering::Acquire) && self.count.load(Ordering::Acquire) == 0 {
            self.drained.notify_waiters();
        }
        open
    }

    /// Decide whether a new connection from `remote_address` may proceed.
    ///
    /// Rejections are logged as operational events before the handshake
    /// would begin.
    #[must_use]
    pub fn can_accept(&self, remote_address: &str) -> bool {
        if self.closing.load(Ordering::Acquire) {
            self.events.port_connection_rejected_closed(remote_address);
            return false;
        }
        if self.max_open_connections > 0
            && self.count.load(Ordering::Acquire) >= self.max_open_connections
        {
            self.events
                .port_connection_rejected_too_many(remote_address, self.max_open_connections);
            return false;
        }
        true
    }

    /// Latch the gate shut; subsequent `can_accept` calls refuse.
    pub fn begin_close(&self) {
        self.closing.store(true, Ordering::Release);
        if self.count.load(Ordering::Acquire) == 0 {
            self.drained.notify_waiters();
        }
    }

    /// Wait until the gate is closed and no connections remain.
    pub async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // Register before re-checking so a decrement landing between
            // the check and the await cannot be missed.
            notified.as_mut().enable();
            if self.closing.load(Ordering::Acquire) && self.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}
