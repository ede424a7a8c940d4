//! Hook module for captured keyboard transitions
//!
//! Owns the shared event buffer and the listener registry. Native backends
//! feed it: a CGEventTap on macOS, keyboard state polling on Linux.

mod buffer;
mod keyboard;
#[cfg(any(target_os = "macos", target_os = "linux", test))]
mod keys;
mod listener;
#[cfg(target_os = "linux")]
mod poll;
#[cfg(target_os = "macos")]
mod tap;

pub use buffer::{EventBuffer, Pop};
pub use keyboard::KeyboardHook;
pub use listener::{ChannelListener, KeyListener, KeyNotification};
#[cfg(target_os = "linux")]
pub use poll::KeymapPoller;
#[cfg(target_os = "macos")]
pub use tap::EventTap;
