//! Shared FIFO between the hook producers and the dispatcher
//!
//! Emptiness check and removal always happen under the same lock, so a
//! consumer never observes a non-empty buffer and then pops nothing.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::events::KeyEvent;

/// Result of one bounded wait on the buffer
#[derive(Debug)]
pub enum Pop {
    /// The oldest queued event
    Event(KeyEvent),
    /// The wait interval elapsed with nothing queued
    Idle,
    /// The wait was interrupted before any event arrived
    Interrupted,
}

#[derive(Default)]
struct Inner {
    events: VecDeque<KeyEvent>,
    interrupted: bool,
}

/// Unbounded, internally synchronized event queue
#[derive(Default)]
pub struct EventBuffer {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and wake the consumer
    pub fn push(&self, event: KeyEvent) {
        self.lock().events.push_back(event);
        self.available.notify_one();
    }

    /// Remove the oldest event without waiting
    pub fn try_pop(&self) -> Option<KeyEvent> {
        self.lock().events.pop_front()
    }

    /// Remove the oldest event, waiting up to `interval` for one to arrive
    ///
    /// Spurious condvar wakeups are absorbed here; only an explicit
    /// [`interrupt`](Self::interrupt) ends the wait early without an event.
    pub fn pop_timeout(&self, interval: Duration) -> Pop {
        let guard = self.lock();
        let (mut guard, _timeout) = self
            .available
            .wait_timeout_while(guard, interval, |inner| {
                inner.events.is_empty() && !inner.interrupted
            })
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(event) = guard.events.pop_front() {
            return Pop::Event(event);
        }

        if std::mem::take(&mut guard.interrupted) {
            Pop::Interrupted
        } else {
            trace!(?interval, "event buffer idle");
            Pop::Idle
        }
    }

    /// Wake a consumer blocked in [`pop_timeout`](Self::pop_timeout)
    ///
    /// Queued events are unaffected; if events are pending the consumer
    /// still receives them first.
    pub fn interrupt(&self) {
        self.lock().interrupted = true;
        self.available.notify_all();
    }

    /// Drop a pending interrupt that no consumer picked up
    pub fn clear_interrupt(&self) {
        self.lock().interrupted = false;
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    // Listeners never run under this lock; a poisoned queue is still consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::hook::KeyListener;

    struct Silent;

    impl KeyListener for Silent {}

    fn event(code: u32) -> KeyEvent {
        KeyEvent::new(code % 2 == 0, code, Arc::new(Silent))
    }

    fn expect_event(pop: Pop) -> KeyEvent {
        match pop {
            Pop::Event(event) => event,
            other => panic!("expected an event, got {:?}", other),
        }
    }

    #[test]
    fn test_fifo_order() {
        let buffer = EventBuffer::new();
        for code in 1..=3 {
            buffer.push(event(code));
        }
        assert_eq!(buffer.len(), 3);

        let codes: Vec<u32> = std::iter::from_fn(|| buffer.try_pop())
            .map(|e| e.key_code())
            .collect();
        assert_eq!(codes, vec![1, 2, 3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_pop_timeout_idle_waits_interval() {
        let buffer = EventBuffer::new();
        let interval = Duration::from_millis(20);

        let started = Instant::now();
        assert!(matches!(buffer.pop_timeout(interval), Pop::Idle));
        assert!(started.elapsed() >= interval);
    }

    #[test]
    fn test_pop_timeout_returns_queued_event_immediately() {
        let buffer = EventBuffer::new();
        buffer.push(event(4));

        let started = Instant::now();
        let popped = expect_event(buffer.pop_timeout(Duration::from_secs(5)));
        assert_eq!(popped.key_code(), 4);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_push_wakes_waiting_consumer() {
        let buffer = Arc::new(EventBuffer::new());
        let producer = Arc::clone(&buffer);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(event(8));
        });

        let popped = expect_event(buffer.pop_timeout(Duration::from_secs(5)));
        assert_eq!(popped.key_code(), 8);
        handle.join().unwrap();
    }

    #[test]
    fn test_interrupt_ends_wait_once() {
        let buffer = Arc::new(EventBuffer::new());
        let waker = Arc::clone(&buffer);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.interrupt();
        });

        assert!(matches!(
            buffer.pop_timeout(Duration::from_secs(5)),
            Pop::Interrupted
        ));
        handle.join().unwrap();

        // The interrupt is consumed; the next wait is a plain idle wait
        assert!(matches!(
            buffer.pop_timeout(Duration::from_millis(5)),
            Pop::Idle
        ));
    }

    #[test]
    fn test_cleared_interrupt_does_not_end_wait() {
        let buffer = EventBuffer::new();
        buffer.interrupt();
        buffer.clear_interrupt();

        assert!(matches!(
            buffer.pop_timeout(Duration::from_millis(5)),
            Pop::Idle
        ));
    }

    #[test]
    fn test_interrupt_does_not_hide_pending_events() {
        let buffer = EventBuffer::new();
        buffer.push(event(1));
        buffer.interrupt();

        let popped = expect_event(buffer.pop_timeout(Duration::from_millis(5)));
        assert_eq!(popped.key_code(), 1);
        assert!(matches!(
            buffer.pop_timeout(Duration::from_millis(5)),
            Pop::Interrupted
        ));
    }
}
