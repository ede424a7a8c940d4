//! Keyboard hook facade
//!
//! Native backends report raw transitions through [`KeyboardHook::process_key`].
//! The hook turns each transition into one [`KeyEvent`] per registered
//! listener and queues them for the dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::dispatch::{DispatchError, DispatchStats, Dispatcher};
use crate::events::{KeyCode, KeyEvent};

use super::buffer::EventBuffer;
use super::listener::KeyListener;

/// Handle returned by [`KeyboardHook::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener registry, shared event buffer and dispatcher in one place
pub struct KeyboardHook {
    buffer: Arc<EventBuffer>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn KeyListener>)>>,
    next_id: AtomicU64,
    dispatcher: Dispatcher,
}

impl KeyboardHook {
    /// Create the hook and start its dispatcher
    pub fn start(poll_interval: Duration) -> Result<Self, DispatchError> {
        let buffer = Arc::new(EventBuffer::new());
        let dispatcher = Dispatcher::new(Arc::clone(&buffer), poll_interval);
        dispatcher.start()?;

        info!(?poll_interval, "keyboard hook started");

        Ok(Self {
            buffer,
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            dispatcher,
        })
    }

    /// Register a listener for all subsequent key transitions
    pub fn add_listener(&self, listener: Arc<dyn KeyListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        debug!(?id, "listener registered");
        id
    }

    /// Unregister a listener
    ///
    /// Events already queued for it are still delivered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        let removed = listeners.len() != before;
        if removed {
            debug!(?id, "listener removed");
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Queue one transition for every registered listener
    ///
    /// Returns the number of events queued. Never waits on listener callbacks.
    pub fn process_key(&self, pressed: bool, key_code: KeyCode) -> usize {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for (_, listener) in listeners.iter() {
            self.buffer
                .push(KeyEvent::new(pressed, key_code, Arc::clone(listener)));
        }
        trace!(key_code, pressed, queued = listeners.len(), "key transition captured");
        listeners.len()
    }

    /// Events waiting for the dispatcher
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher.is_running()
    }

    /// Stop the dispatcher and discard events it did not reach
    ///
    /// Returns the number of discarded events.
    pub fn shutdown(&self) -> usize {
        self.dispatcher.stop();

        let mut discarded = 0;
        if !self.buffer.is_empty() {
            discarded = std::iter::from_fn(|| self.buffer.try_pop()).count();
            warn!(discarded, "discarding undelivered key events");
        }

        info!(stats = ?self.stats(), "keyboard hook stopped");
        discarded
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::events::Transition;

    struct Recorder {
        calls: Mutex<Vec<(KeyCode, Transition)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(KeyCode, Transition)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl KeyListener for Recorder {
        fn key_pressed(&self, event: &KeyEvent) {
            self.calls.lock().unwrap().push((event.key_code(), Transition::Pressed));
        }

        fn key_released(&self, event: &KeyEvent) {
            self.calls.lock().unwrap().push((event.key_code(), Transition::Released));
        }
    }

    fn create_hook() -> KeyboardHook {
        KeyboardHook::start(Duration::from_millis(10)).unwrap()
    }

    fn wait_for(recorder: &Recorder, count: usize) -> Vec<(KeyCode, Transition)> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.calls().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        recorder.calls()
    }

    #[test]
    fn test_hook_starts_dispatcher() {
        let hook = create_hook();
        assert!(hook.is_running());
        assert_eq!(hook.listener_count(), 0);

        hook.shutdown();
        assert!(!hook.is_running());
    }

    #[test]
    fn test_process_key_without_listeners() {
        let hook = create_hook();
        assert_eq!(hook.process_key(true, 4), 0);
        assert_eq!(hook.pending(), 0);
        hook.shutdown();
    }

    #[test]
    fn test_process_key_fans_out_to_listeners() {
        let hook = create_hook();
        let first = Recorder::new();
        let second = Recorder::new();
        hook.add_listener(first.clone());
        hook.add_listener(second.clone());

        assert_eq!(hook.process_key(true, 0x0C), 2);
        assert_eq!(hook.process_key(false, 0x0C), 2);

        let expected = vec![(0x0C, Transition::Pressed), (0x0C, Transition::Released)];
        assert_eq!(wait_for(&first, 2), expected);
        assert_eq!(wait_for(&second, 2), expected);

        hook.shutdown();
        assert_eq!(hook.stats().delivered, 4);
    }

    #[test]
    fn test_removed_listener_gets_no_new_events() {
        let hook = create_hook();
        let kept = Recorder::new();
        let dropped = Recorder::new();
        hook.add_listener(kept.clone());
        let dropped_id = hook.add_listener(dropped.clone());

        assert!(hook.remove_listener(dropped_id));
        assert!(!hook.remove_listener(dropped_id));
        assert_eq!(hook.listener_count(), 1);

        hook.process_key(true, 1);
        assert_eq!(wait_for(&kept, 1), vec![(1, Transition::Pressed)]);
        hook.shutdown();

        assert!(dropped.calls().is_empty());
    }

    #[test]
    fn test_shutdown_discards_undelivered_events() {
        let hook = create_hook();
        let recorder = Recorder::new();
        hook.add_listener(recorder.clone());
        assert_eq!(hook.shutdown(), 0);

        // Nothing drains the buffer once the dispatcher is stopped
        hook.process_key(true, 3);
        hook.process_key(false, 3);
        assert_eq!(hook.pending(), 2);

        assert_eq!(hook.shutdown(), 2);
        assert_eq!(hook.pending(), 0);
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn test_listener_ids_are_unique() {
        let hook = create_hook();
        let a = hook.add_listener(Recorder::new());
        let b = hook.add_listener(Recorder::new());
        assert_ne!(a, b);
        hook.shutdown();
    }
}
