//! The level-triggered work notifier and the pending-work pump.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::AmqpConnection;

type WorkListener = Box<dyn Fn() + Send + Sync>;

/// "Has pending work" flag plus the wake-up callback.
///
/// Producers set the flag from any thread; the listener (typically the
/// I/O task's waker) is invoked on every notify so a parked task resumes
/// promptly.
pub struct WorkNotifier {
    state_changed: AtomicBool,
    listener: Mutex<Option<WorkListener>>,
}

impl WorkNotifier {
    pub(crate) fn new() -> Self {
        Self {
            state_changed: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }

    /// Whether work is pending.
    #[must_use]
    pub fn has_work(&self) -> bool {
        self.state_changed.load(Ordering::Acquire)
    }

    /// Raise the flag and invoke the listener.
    pub fn notify_work(&self) {
        self.state_changed.store(true, Ordering::Release);
        if let Some(listener) = self.listener.lock().expect("work listener poisoned").as_ref() {
            listener();
        }
    }

    /// Lower the flag.
    pub fn clear_work(&self) {
        self.state_changed.store(false, Ordering::Release);
    }

    /// Install the wake-up callback.
    pub fn set_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
        *self.listener.lock().expect("work listener poisoned") = Some(Box::new(listener));
    }
}

/// Rotation state for one pass over the connection's pending work.
///
/// Channels are visited round-robin, each performing one unit of work per
/// visit and leaving the rotation when it reports none remains; the async
/// task queue drains afterwards.
pub struct PendingWork {
    rotation: VecDeque<u16>,
}

impl PendingWork {
    fn empty() -> Self {
        Self {
            rotation: VecDeque::new(),
        }
    }
}

impl AmqpConnection {
    /// Pin the engine to the calling thread as its I/O thread.
    pub fn set_io_thread(&mut self) {
        self.set_io_thread_field(Some(std::thread::current().id()));
    }

    /// Whether the calling thread is the engine's I/O thread.
    #[must_use]
    pub fn is_io_thread(&self) -> bool {
        self.io_thread_field() == Some(std::thread::current().id())
    }

    /// Start a pass over pending work.
    ///
    /// Only meaningful on the I/O thread; elsewhere the pass is empty.
    #[must_use]
    pub fn begin_process_pending(&self) -> PendingWork {
        if !self.is_io_thread() {
            return PendingWork::empty();
        }
        PendingWork {
            rotation: self.channels.ids().into(),
        }
    }

    /// Run the next unit of pending work; `false` when the pass is done.
    pub fn process_next(&mut self, work: &mut PendingWork) -> bool {
        while let Some(id) = work.rotation.pop_front() {
            let Some(channel) = self.channels.get(id) else {
                continue;
            };
            let more = channel.lock().expect("channel poisoned").process_pending();
            if more {
                work.rotation.push_back(id);
            }
            return true;
        }
        if let Some(task) = self.pop_task() {
            task(self);
            return true;
        }
        false
    }

    /// Whether any channel work or async task remains queued.
    #[must_use]
    pub fn has_pending(&self, work: &PendingWork) -> bool {
        !work.rotation.is_empty() || !self.tasks_empty()
    }
}
