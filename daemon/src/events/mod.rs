//! Events module for captured key transitions
//!
//! A [`KeyEvent`] is created by the hook for one interested listener,
//! queued in the shared buffer and consumed exactly once by the dispatcher.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::hook::KeyListener;

/// Platform virtual key code as reported by the native hook
pub type KeyCode = u32;

/// Direction of a key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Key went down
    Pressed,
    /// Key went up
    Released,
}

impl From<bool> for Transition {
    fn from(pressed: bool) -> Self {
        if pressed {
            Transition::Pressed
        } else {
            Transition::Released
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transition::Pressed => write!(f, "pressed"),
            Transition::Released => write!(f, "released"),
        }
    }
}

/// One captured key transition addressed to a single listener
#[derive(Clone)]
pub struct KeyEvent {
    key_code: KeyCode,
    /// true = pressed, false = released
    pressed: bool,
    captured_at: Instant,
    listener: Arc<dyn KeyListener>,
}

impl KeyEvent {
    /// Create an event captured now
    pub fn new(pressed: bool, key_code: KeyCode, listener: Arc<dyn KeyListener>) -> Self {
        Self {
            key_code,
            pressed,
            captured_at: Instant::now(),
            listener,
        }
    }

    pub fn key_code(&self) -> KeyCode {
        self.key_code
    }

    /// The raw transition flag
    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    pub fn transition(&self) -> Transition {
        Transition::from(self.pressed)
    }

    /// The listener this event is addressed to
    pub fn listener(&self) -> &Arc<dyn KeyListener> {
        &self.listener
    }

    /// Time elapsed since the hook captured this event
    pub fn latency(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

impl std::fmt::Debug for KeyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEvent")
            .field("key_code", &self.key_code)
            .field("transition", &self.transition())
            .field("captured_at", &self.captured_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl KeyListener for Silent {}

    #[test]
    fn test_transition_from_flag() {
        assert_eq!(Transition::from(true), Transition::Pressed);
        assert_eq!(Transition::from(false), Transition::Released);
        assert_eq!(Transition::Pressed.to_string(), "pressed");
        assert_eq!(Transition::Released.to_string(), "released");
    }

    #[test]
    fn test_event_accessors() {
        let listener: Arc<dyn KeyListener> = Arc::new(Silent);
        let event = KeyEvent::new(false, 0x24, Arc::clone(&listener));

        assert_eq!(event.key_code(), 0x24);
        assert!(!event.is_pressed());
        assert_eq!(event.transition(), Transition::Released);
        assert!(Arc::ptr_eq(event.listener(), &listener));
        assert!(event.latency() < Duration::from_secs(60));
    }

    #[test]
    fn test_debug_omits_listener() {
        let event = KeyEvent::new(true, 7, Arc::new(Silent));
        let debug = format!("{:?}", event);
        assert!(debug.contains("key_code: 7"));
        assert!(debug.contains("Pressed"));
        assert!(!debug.contains("listener"));
    }
}
