//! Keyboard state polling on Linux
//!
//! Reads the pressed-key state of every keyboard under `/dev/input` at a
//! fixed interval and feeds the differences into a [`KeyboardHook`].
//! The first snapshot is the baseline, so keys already held at start
//! produce no press.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use evdev::{Device, KeyCode as EvKey};
use tracing::{debug, info};

use super::keyboard::KeyboardHook;
use super::keys::{keymap_set, keymap_transitions, Keymap, KEYMAP_BYTES};

/// Polls keyboard devices and reports key transitions to the hook
pub struct KeymapPoller {
    hook: Arc<KeyboardHook>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl KeymapPoller {
    pub fn new(hook: Arc<KeyboardHook>, interval: Duration) -> Self {
        Self {
            hook,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the keyboards and start the `keymap-poller` thread
    pub fn start(&self) -> Result<(), PollError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PollError::AlreadyRunning);
        }

        let devices = open_keyboards();
        if devices.is_empty() {
            self.running.store(false, Ordering::SeqCst);
            return Err(PollError::NoKeyboard);
        }
        info!(keyboards = devices.len(), "keyboard devices opened");

        let hook = Arc::clone(&self.hook);
        let running = Arc::clone(&self.running);
        let interval = self.interval;

        thread::Builder::new()
            .name("keymap-poller".to_string())
            .spawn(move || {
                info!("keymap poller thread started");
                run_poll_loop(&hook, &devices, interval, &running);
                running.store(false, Ordering::SeqCst);
                info!("keymap poller thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                PollError::ThreadSpawn(e.to_string())
            })?;

        Ok(())
    }

    /// Stop polling; the thread exits after its current interval
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Errors that can occur in the keymap poller
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("keymap poller is already running")]
    AlreadyRunning,

    #[error("no readable keyboard device - check read access to /dev/input")]
    NoKeyboard,

    #[error("failed to spawn keymap poller thread: {0}")]
    ThreadSpawn(String),
}

/// Input devices that look like keyboards
fn open_keyboards() -> Vec<Device> {
    evdev::enumerate()
        .filter_map(|(path, device)| {
            let keys = device.supported_keys()?;
            if keys.contains(EvKey::KEY_A) && keys.contains(EvKey::KEY_ENTER) {
                debug!(path = %path.display(), name = ?device.name(), "keyboard found");
                Some(device)
            } else {
                None
            }
        })
        .collect()
}

/// Merged pressed-key state of all devices
///
/// A device that fails to report its state counts as having no keys down.
fn snapshot(devices: &[Device]) -> Keymap {
    let mut keymap = [0u8; KEYMAP_BYTES];
    for device in devices {
        match device.get_key_state() {
            Ok(state) => {
                for key in state.iter() {
                    keymap_set(&mut keymap, u32::from(key.code()));
                }
            }
            Err(e) => debug!(?e, name = ?device.name(), "failed to read key state"),
        }
    }
    keymap
}

fn run_poll_loop(
    hook: &KeyboardHook,
    devices: &[Device],
    interval: Duration,
    running: &AtomicBool,
) {
    let mut previous = snapshot(devices);

    while running.load(Ordering::SeqCst) {
        thread::sleep(interval);

        let current = snapshot(devices);
        for (key_code, pressed) in keymap_transitions(&previous, &current) {
            hook.process_key(pressed, key_code);
        }
        previous = current;
    }
}
