//! Global keyboard capture using macOS CGEventTap
//!
//! Feeds key down/up and modifier flag changes into a [`KeyboardHook`].
//! Runs on a dedicated thread with its own CFRunLoop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventTapProxy, CGEventType, EventField,
};
use tracing::{debug, error, info, warn};

use super::keyboard::KeyboardHook;
use super::keys::ModifierState;
use crate::events::KeyCode;

/// Messages handed from the tap callback to the run loop thread
#[derive(Debug)]
enum TapMessage {
    Key { key_code: KeyCode, pressed: bool },
    FlagsChanged(CGEventFlags),
    Disabled,
}

/// Event tap feeding system-wide key transitions into the hook
pub struct EventTap {
    hook: Arc<KeyboardHook>,
    running: Arc<AtomicBool>,
}

impl EventTap {
    pub fn new(hook: Arc<KeyboardHook>) -> Self {
        Self {
            hook,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the event tap
    ///
    /// This spawns a dedicated thread that runs a CFRunLoop to receive
    /// CGEventTap callbacks. The tap runs until `stop()` is called or the
    /// program exits.
    pub fn start(&self) -> Result<(), TapError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TapError::AlreadyRunning);
        }

        let hook = Arc::clone(&self.hook);
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("event-tap".to_string())
            .spawn(move || {
                info!("event tap thread started");

                if let Err(e) = run_event_loop(hook, running.clone()) {
                    error!(?e, "event tap error");
                }

                running.store(false, Ordering::SeqCst);
                info!("event tap thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                TapError::ThreadSpawn(e.to_string())
            })?;

        Ok(())
    }

    /// Stop the event tap; the run loop exits on its next slice
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Errors that can occur in the event tap
#[derive(Debug, thiserror::Error)]
pub enum TapError {
    #[error("event tap is already running")]
    AlreadyRunning,

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to create run loop source for event tap")]
    RunLoopSource,

    #[error("failed to spawn event tap thread: {0}")]
    ThreadSpawn(String),
}

/// Run the CFRunLoop with the event tap
fn run_event_loop(hook: Arc<KeyboardHook>, running: Arc<AtomicBool>) -> Result<(), TapError> {
    let mut modifiers = ModifierState::default();

    let (callback_tx, callback_rx) = std_mpsc::channel::<TapMessage>();

    // CGEventTap callback - must be fast and non-blocking
    let callback = move |_proxy: CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
                         -> Option<CGEvent> {
        let message = match event_type {
            CGEventType::KeyDown | CGEventType::KeyUp => {
                // A held key repeats KeyDown; only the first one is a transition
                let repeat = event.get_integer_value_field(EventField::KEYBOARD_EVENT_AUTOREPEAT);
                if repeat != 0 {
                    return Some(event.clone());
                }
                let key_code =
                    event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as KeyCode;
                let pressed = matches!(event_type, CGEventType::KeyDown);
                TapMessage::Key { key_code, pressed }
            }
            CGEventType::FlagsChanged => TapMessage::FlagsChanged(event.get_flags()),
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                TapMessage::Disabled
            }
            _ => return Some(event.clone()),
        };
        let _ = callback_tx.send(message);
        Some(event.clone())
    };

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![
            CGEventType::KeyDown,
            CGEventType::KeyUp,
            CGEventType::FlagsChanged,
        ],
        callback,
    )
    .map_err(|_| {
        error!("failed to create event tap - is Accessibility permission granted?");
        TapError::EventTapCreation
    })?;

    tap.enable();

    let run_loop_source = tap
        .mach_port
        .create_runloop_source(0)
        .map_err(|_| TapError::RunLoopSource)?;
    let run_loop = CFRunLoop::get_current();

    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }

    info!("event tap created and enabled");

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
        }

        while let Ok(message) = callback_rx.try_recv() {
            match message {
                TapMessage::Key { key_code, pressed } => {
                    hook.process_key(pressed, key_code);
                }
                TapMessage::FlagsChanged(event_flags) => {
                    let next = ModifierState::from_flags(event_flags);
                    for (key_code, pressed) in modifiers.transitions(&next) {
                        debug!(key_code, pressed, "modifier transition");
                        hook.process_key(pressed, key_code);
                    }
                    modifiers = next;
                }
                TapMessage::Disabled => {
                    warn!("event tap disabled by the system, re-enabling");
                    tap.enable();
                }
            }
        }
    }

    Ok(())
}
