//! The channel registry.
//!
//! Lookups run lock-free on the concurrent maps so the I/O task never
//! blocks behind async producers; mutations that add or remove channels
//! serialise on one mutation lock, held across the map change and the
//! block-state propagation so observers see a consistent view.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::channel::{Channel, ChannelLookup, ChannelRef};

#[derive(Default)]
struct MutationState {
    blocking: bool,
}

/// Mapping from channel number to open channel, plus the table of
/// channels awaiting `Close-Ok`.
pub struct ChannelRegistry {
    channels: DashMap<u16, ChannelRef>,
    closing: DashMap<u16, Instant>,
    mutation: Mutex<MutationState>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            closing: DashMap::new(),
            mutation: Mutex::new(MutationState::default()),
        }
    }

    /// Number of open channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channels are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Whether `id` maps to an open channel.
    #[must_use]
    pub fn contains(&self, id: u16) -> bool {
        self.channels.contains_key(&id)
    }

    /// Register a freshly created channel.
    ///
    /// If connection-wide flow control is active the channel is blocked
    /// before it becomes visible.
    pub fn add(&self, id: u16, channel: Box<dyn Channel>) {
        let guard = self.mutation.lock().expect("registry mutation lock poisoned");
        let channel: ChannelRef = Arc::new(Mutex::new(channel));
        if guard.blocking {
            channel.lock().expect("channel poisoned").block();
        }
        self.channels.insert(id, channel);
    }

    /// Remove and return the channel for `id`.
    pub fn remove(&self, id: u16) -> Option<ChannelRef> {
        let _guard = self.mutation.lock().expect("registry mutation lock poisoned");
        self.channels.remove(&id).map(|(_, channel)| channel)
    }

    /// Raw reference to the channel for `id`, ignoring closing state.
    #[must_use]
    pub fn get(&self, id: u16) -> Option<ChannelRef> {
        self.channels.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Resolve `id` for dispatch.
    #[must_use]
    pub fn lookup(&self, id: u16) -> ChannelLookup {
        if let Some(entry) = self.channels.get(&id) {
            let channel = Arc::clone(entry.value());
            drop(entry);
            if channel.lock().expect("channel poisoned").is_closing() {
                return ChannelLookup::Closing;
            }
            return ChannelLookup::Open(channel);
        }
        if self.closing.contains_key(&id) {
            ChannelLookup::Closing
        } else {
            ChannelLookup::Missing
        }
    }

    /// Whether `id` is awaiting `Close-Ok`.
    #[must_use]
    pub fn awaiting_close_ok(&self, id: u16) -> bool {
        !self.closing.is_empty() && self.closing.contains_key(&id)
    }

    /// Record that `id` now awaits `Close-Ok`.
    pub fn mark_awaiting_close_ok(&self, id: u16) {
        self.closing.insert(id, Instant::now());
    }

    /// `Close-Ok` arrived for `id`.
    pub fn close_ok(&self, id: u16) {
        self.closing.remove(&id);
    }

    /// Whether any channel has been awaiting `Close-Ok` longer than
    /// `timeout` as of `now`.
    #[must_use]
    pub fn has_closing_older_than(&self, timeout: Duration, now: Instant) -> bool {
        self.closing
            .iter()
            .any(|entry| now.saturating_duration_since(*entry.value()) > timeout)
    }

    /// Block every channel; channels added later are born blocked.
    pub fn block_all(&self) {
        let mut guard = self.mutation.lock().expect("registry mutation lock poisoned");
        if !guard.blocking {
            guard.blocking = true;
            for entry in self.channels.iter() {
                entry.value().lock().expect("channel poisoned").block();
            }
        }
    }

    /// Unblock every channel.
    pub fn unblock_all(&self) {
        let mut guard = self.mutation.lock().expect("registry mutation lock poisoned");
        if guard.blocking {
            guard.blocking = false;
            for entry in self.channels.iter() {
                entry.value().lock().expect("channel poisoned").unblock();
            }
        }
    }

    /// Tell every channel the transport's writability changed.
    pub fn transport_state_changed_all(&self) {
        for entry in self.channels.iter() {
            entry
                .value()
                .lock()
                .expect("channel poisoned")
                .transport_state_changed();
        }
    }

    /// Channel numbers currently open, in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.channels.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Remove every channel, returning them for teardown.
    pub fn drain(&self) -> Vec<ChannelRef> {
        let _guard = self.mutation.lock().expect("registry mutation lock poisoned");
        let ids: Vec<u16> = self.channels.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.channels.remove(&id).map(|(_, channel)| channel))
            .collect()
    }
}
