//! Core dispatch loop
//!
//! Drains the shared [`EventBuffer`] on a dedicated thread and invokes the
//! listener referenced by each event, one event per iteration, in FIFO order.
//! When the buffer is empty the worker waits for at most one poll interval
//! before checking again.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::events::{KeyCode, KeyEvent, Transition};
use crate::hook::{EventBuffer, Pop};

/// Errors that can occur while running the dispatcher
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("dispatcher is already running")]
    AlreadyRunning,

    #[error("failed to spawn dispatcher thread: {0}")]
    ThreadSpawn(String),

    #[error("listener panicked on {transition} of key {key_code}: {message}")]
    ListenerPanicked {
        key_code: KeyCode,
        transition: Transition,
        message: String,
    },
}

/// Snapshot of the dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Callbacks that returned normally
    pub delivered: u64,
    /// Callbacks that panicked
    pub listener_failures: u64,
    /// Idle waits that ran the full poll interval
    pub idle_polls: u64,
    /// Idle waits cut short by an interrupt
    pub idle_interrupts: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    listener_failures: AtomicU64,
    idle_polls: AtomicU64,
    idle_interrupts: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            listener_failures: self.listener_failures.load(Ordering::Relaxed),
            idle_polls: self.idle_polls.load(Ordering::Relaxed),
            idle_interrupts: self.idle_interrupts.load(Ordering::Relaxed),
        }
    }
}

/// Background worker delivering buffered key events to their listeners
///
/// Once started the worker runs until [`stop`](Self::stop) is called or the
/// process exits. Dropping the `Dispatcher` does not stop the thread. At most
/// one worker drains the buffer at any time.
pub struct Dispatcher {
    buffer: Arc<EventBuffer>,
    poll_interval: Duration,
    counters: Arc<Counters>,
    worker: Mutex<Option<WorkerHandle>>,
}

/// A spawned worker and the flag that keeps it looping
///
/// Every start gets a fresh flag, so a worker that was told to stop can
/// never be revived by a later run.
struct WorkerHandle {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    fn is_current_thread(&self) -> bool {
        self.thread.thread().id() == thread::current().id()
    }
}

impl Dispatcher {
    /// Create a dispatcher draining `buffer`
    pub fn new(buffer: Arc<EventBuffer>, poll_interval: Duration) -> Self {
        Self {
            buffer,
            poll_interval,
            counters: Arc::new(Counters::default()),
            worker: Mutex::new(None),
        }
    }

    /// Start the dispatcher
    ///
    /// Spawns the `key-dispatcher` thread. Listener callbacks run on that
    /// thread, one at a time. A worker that is still finishing a callback
    /// after [`stop`](Self::stop) is joined before the new one is spawned.
    /// Called from a callback of a stopped worker, that worker resumes.
    pub fn start(&self) -> Result<(), DispatchError> {
        let previous = {
            let mut slot = self.lock_worker();
            if let Some(current) = slot.as_ref() {
                if current.running.load(Ordering::SeqCst) {
                    return Err(DispatchError::AlreadyRunning);
                }
                if current.is_current_thread() {
                    self.buffer.clear_interrupt();
                    current.running.store(true, Ordering::SeqCst);
                    debug!("dispatcher resumed from its own callback");
                    return Ok(());
                }
            }
            slot.take()
        };

        // Joined without the lock held; its last callback may still query us
        if let Some(previous) = previous {
            if previous.thread.join().is_err() {
                warn!("previous dispatcher thread panicked");
            }
        }

        let mut slot = self.lock_worker();
        if slot.is_some() {
            return Err(DispatchError::AlreadyRunning);
        }

        // An interrupt aimed at an earlier run must not cut the first wait short
        self.buffer.clear_interrupt();

        let running = Arc::new(AtomicBool::new(true));
        let worker = Worker {
            buffer: Arc::clone(&self.buffer),
            poll_interval: self.poll_interval,
            running: Arc::clone(&running),
            counters: Arc::clone(&self.counters),
        };

        let thread = thread::Builder::new()
            .name("key-dispatcher".to_string())
            .spawn(move || {
                info!(
                    poll_interval_ms = worker.poll_interval.as_millis() as u64,
                    "dispatcher thread started"
                );
                worker.run();
                info!("dispatcher thread stopped");
            })
            .map_err(|e| DispatchError::ThreadSpawn(e.to_string()))?;

        *slot = Some(WorkerHandle { running, thread });
        Ok(())
    }

    /// Stop the dispatcher and wait for the worker to exit
    ///
    /// The callback in progress completes; events still queued stay in the
    /// buffer. When called from a listener callback the worker is not joined;
    /// the next [`start`](Self::start) from another thread joins it.
    pub fn stop(&self) {
        let handle = {
            let mut slot = self.lock_worker();
            let Some(current) = slot.as_ref() else {
                return;
            };

            current.running.store(false, Ordering::SeqCst);
            self.buffer.interrupt();

            if current.is_current_thread() {
                debug!("stop requested from dispatcher thread");
                return;
            }
            slot.take()
        };

        if let Some(handle) = handle {
            if handle.thread.join().is_err() {
                warn!("dispatcher thread panicked");
            }
        }
    }

    /// Check if the dispatcher is currently running
    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .map_or(false, |current| current.running.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<WorkerHandle>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// State moved onto the dispatcher thread
struct Worker {
    buffer: Arc<EventBuffer>,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl Worker {
    fn run(&self) {
        while self.running.load(Ordering::SeqCst) {
            match self.buffer.pop_timeout(self.poll_interval) {
                Pop::Event(event) => self.dispatch(&event),
                Pop::Idle => {
                    self.counters.idle_polls.fetch_add(1, Ordering::Relaxed);
                }
                Pop::Interrupted => {
                    self.counters.idle_interrupts.fetch_add(1, Ordering::Relaxed);
                    debug!("idle wait interrupted, continuing");
                }
            }
        }
    }

    /// Deliver one event and record the outcome
    fn dispatch(&self, event: &KeyEvent) {
        match deliver(event) {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    key_code = event.key_code(),
                    transition = %event.transition(),
                    latency_us = event.latency().as_micros() as u64,
                    "key event dispatched"
                );
            }
            Err(e) => {
                self.counters.listener_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "listener callback failed, continuing");
            }
        }
    }
}

/// Route an event to its listener based on the transition flag
///
/// A panicking listener is reported as [`DispatchError::ListenerPanicked`].
fn deliver(event: &KeyEvent) -> Result<(), DispatchError> {
    let listener = event.listener();

    panic::catch_unwind(AssertUnwindSafe(|| {
        if event.is_pressed() {
            listener.key_pressed(event);
        } else {
            listener.key_released(event);
        }
    }))
    .map_err(|payload| DispatchError::ListenerPanicked {
        key_code: event.key_code(),
        transition: event.transition(),
        message: panic_message(payload.as_ref()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
