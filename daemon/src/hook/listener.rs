//! Listener capability invoked by the dispatcher
//!
//! Callbacks run synchronously on the dispatcher thread, so a slow
//! listener delays every event queued behind it.

use tokio::sync::mpsc;
use tracing::warn;

use crate::events::{KeyCode, KeyEvent, Transition};

/// Receives pressed/released notifications for the events addressed to it
///
/// Both methods default to doing nothing, so a listener only needs to
/// implement the side it cares about.
pub trait KeyListener: Send + Sync {
    /// Called for events whose transition flag is set
    fn key_pressed(&self, _event: &KeyEvent) {}

    /// Called for events whose transition flag is cleared
    fn key_released(&self, _event: &KeyEvent) {}
}

/// Key notification forwarded into the async side of the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyNotification {
    pub key_code: KeyCode,
    pub transition: Transition,
    /// Microseconds between capture and dispatch
    pub latency_us: u64,
}

impl From<&KeyEvent> for KeyNotification {
    fn from(event: &KeyEvent) -> Self {
        Self {
            key_code: event.key_code(),
            transition: event.transition(),
            latency_us: event.latency().as_micros() as u64,
        }
    }
}

/// Listener that forwards every dispatched event to a tokio channel
///
/// Uses `try_send` so a lagging consumer never stalls the dispatcher;
/// notifications that do not fit are dropped with a warning.
pub struct ChannelListener {
    tx: mpsc::Sender<KeyNotification>,
}

impl ChannelListener {
    pub fn new(tx: mpsc::Sender<KeyNotification>) -> Self {
        Self { tx }
    }

    fn forward(&self, event: &KeyEvent) {
        let notification = KeyNotification::from(event);
        match self.tx.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(key_code = notification.key_code, "key channel full, dropping notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(
                    key_code = notification.key_code,
                    "key channel closed, dropping notification"
                );
            }
        }
    }
}

impl KeyListener for ChannelListener {
    fn key_pressed(&self, event: &KeyEvent) {
        self.forward(event);
    }

    fn key_released(&self, event: &KeyEvent) {
        self.forward(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_default_methods_are_noops() {
        struct PressOnly;
        impl KeyListener for PressOnly {}

        let listener: Arc<dyn KeyListener> = Arc::new(PressOnly);
        let event = KeyEvent::new(true, 1, Arc::clone(&listener));
        listener.key_pressed(&event);
        listener.key_released(&event);
    }

    #[test]
    fn test_channel_listener_forwards_both_transitions() {
        let (tx, mut rx) = mpsc::channel(4);
        let listener: Arc<dyn KeyListener> = Arc::new(ChannelListener::new(tx));

        let down = KeyEvent::new(true, 0x31, Arc::clone(&listener));
        let up = KeyEvent::new(false, 0x31, Arc::clone(&listener));
        listener.key_pressed(&down);
        listener.key_released(&up);

        let first = tokio_test::block_on(rx.recv()).unwrap();
        let second = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(first.key_code, 0x31);
        assert_eq!(first.transition, Transition::Pressed);
        assert_eq!(second.transition, Transition::Released);
    }

    #[test]
    fn test_channel_listener_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let listener: Arc<dyn KeyListener> = Arc::new(ChannelListener::new(tx));

        for code in 0..3 {
            let event = KeyEvent::new(true, code, Arc::clone(&listener));
            listener.key_pressed(&event);
        }

        let kept = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(kept.key_code, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_listener_survives_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let listener: Arc<dyn KeyListener> = Arc::new(ChannelListener::new(tx));
        let event = KeyEvent::new(false, 9, Arc::clone(&listener));
        listener.key_released(&event);
    }
}
