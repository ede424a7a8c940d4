//! Key state snapshots and transition tracking
//!
//! Native backends that report key state rather than key events are turned
//! into press/release transitions here:
//! - macOS reports modifier keys as flag changes ([`ModifierState`])
//! - Linux key state is polled as a 256-key bitmap ([`Keymap`])

use crate::events::KeyCode;

/// macOS virtual key codes of the tracked modifiers
#[cfg(any(target_os = "macos", test))]
pub mod codes {
    use crate::events::KeyCode;

    pub const COMMAND: KeyCode = 0x37;
    pub const SHIFT: KeyCode = 0x38;
    pub const OPTION: KeyCode = 0x3A;
    pub const CONTROL: KeyCode = 0x3B;
}

/// Modifier key flag masks from macOS CGEventFlags
#[cfg(target_os = "macos")]
pub mod flags {
    use core_graphics::event::CGEventFlags;

    pub const CONTROL: CGEventFlags = CGEventFlags::CGEventFlagControl;
    pub const OPTION: CGEventFlags = CGEventFlags::CGEventFlagAlternate;
    pub const COMMAND: CGEventFlags = CGEventFlags::CGEventFlagCommand;
    pub const SHIFT: CGEventFlags = CGEventFlags::CGEventFlagShift;
}

/// Tracks which modifier keys are currently pressed
#[cfg(any(target_os = "macos", test))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    pub control: bool,
    pub option: bool,
    pub command: bool,
    pub shift: bool,
}

#[cfg(any(target_os = "macos", test))]
impl ModifierState {
    /// Create a new ModifierState from CGEventFlags
    #[cfg(target_os = "macos")]
    pub fn from_flags(event_flags: core_graphics::event::CGEventFlags) -> Self {
        Self {
            control: event_flags.contains(flags::CONTROL),
            option: event_flags.contains(flags::OPTION),
            command: event_flags.contains(flags::COMMAND),
            shift: event_flags.contains(flags::SHIFT),
        }
    }

    /// Press/release transitions that lead from `self` to `next`
    ///
    /// Ordered by key code: Command, Shift, Option, Control.
    pub fn transitions(&self, next: &ModifierState) -> Vec<(KeyCode, bool)> {
        [
            (codes::COMMAND, self.command, next.command),
            (codes::SHIFT, self.shift, next.shift),
            (codes::OPTION, self.option, next.option),
            (codes::CONTROL, self.control, next.control),
        ]
        .into_iter()
        .filter(|(_, before, after)| before != after)
        .map(|(code, _, after)| (code, after))
        .collect()
    }
}

/// Bytes in a key bitmap, one bit per key code
#[cfg(any(target_os = "linux", test))]
pub const KEYMAP_BYTES: usize = 32;

/// Pressed-key bitmap: key code `n` is bit `n % 8` of byte `n / 8`
#[cfg(any(target_os = "linux", test))]
pub type Keymap = [u8; KEYMAP_BYTES];

/// Mark `key_code` as pressed; codes past the bitmap are ignored
///
/// Returns whether the code fits in the bitmap.
#[cfg(any(target_os = "linux", test))]
pub fn keymap_set(keymap: &mut Keymap, key_code: KeyCode) -> bool {
    let byte = (key_code / 8) as usize;
    match keymap.get_mut(byte) {
        Some(slot) => {
            *slot |= 1 << (key_code % 8);
            true
        }
        None => false,
    }
}

/// One transition per bit that differs between two snapshots
///
/// A bit that was clear is a press, a bit that was set is a release.
/// Ordered by ascending key code.
#[cfg(any(target_os = "linux", test))]
pub fn keymap_transitions(prev: &Keymap, curr: &Keymap) -> Vec<(KeyCode, bool)> {
    let mut transitions = Vec::new();

    for (byte, (&before, &after)) in prev.iter().zip(curr.iter()).enumerate() {
        let changed = before ^ after;
        if changed == 0 {
            continue;
        }
        for bit in 0..8 {
            let mask = 1u8 << bit;
            if changed & mask != 0 {
                let key_code = (byte * 8 + bit) as KeyCode;
                transitions.push((key_code, after & mask != 0));
            }
        }
    }

    transitions
}
