//! Key code representation shared by every engine module.
//!
//! A [`KeyCode`] is a thin newtype over the host's evdev key/button number
//! space. The engine never interprets the number beyond "zero is
//! undefined" and "this many bits fit in a keymap slot" — name-to-number
//! translation for config parsing and for the real evdev device lives at
//! the I/O boundary (`oskbd::linux`), not here.

use std::fmt;

/// Zero is reserved as "undefined" throughout the engine (unbound keymap
/// slots, a cleared `Activation::code`, etc).
pub const KEY_UNDEFINED: KeyCode = KeyCode(0);

/// Maximum number of distinct key codes a layer's keymap can address.
pub const MAX_KEYMAP_CODE: usize = 255;
pub const MAX_KEYMAP: usize = MAX_KEYMAP_CODE + 1;

#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub u16);

impl KeyCode {
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    pub const fn is_undefined(self) -> bool {
        self.0 == 0
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u16> for KeyCode {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

impl From<KeyCode> for u16 {
    fn from(k: KeyCode) -> Self {
        k.0
    }
}

impl From<KeyCode> for usize {
    fn from(k: KeyCode) -> Self {
        k.0 as usize
    }
}

impl fmt::Debug for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.0)
    }
}

/// The value carried by an evdev `EV_KEY` event.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyValue {
    Release = 0,
    Press = 1,
    Repeat = 2,
}

impl KeyValue {
    pub const fn is_press_or_repeat(self) -> bool {
        !matches!(self, KeyValue::Release)
    }

    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        match v {
            0 => KeyValue::Release,
            1 => KeyValue::Press,
            _ => KeyValue::Repeat,
        }
    }
}

/// A single input event as delivered by the device I/O shim, already
/// stripped of its `EV_KEY` type tag (non-key events bypass the engine
/// entirely, per spec.md §6).
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub value: KeyValue,
    /// Milliseconds, monotonic, used for overload timeout comparisons.
    pub timestamp_ms: u64,
}

impl KeyEvent {
    pub fn new(code: KeyCode, value: KeyValue, timestamp_ms: u64) -> Self {
        Self {
            code,
            value,
            timestamp_ms,
        }
    }
}

impl fmt::Debug for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.value {
            KeyValue::Press => "\u{2193}",
            KeyValue::Release => "\u{2191}",
            KeyValue::Repeat => "\u{27f3}",
        };
        write!(f, "{dir}{:?}@{}", self.code, self.timestamp_ms)
    }
}

/// Bitset of the four modifiers the spec's `mod_layers` table is indexed
/// by. Bit order is fixed by spec.md §3: SHIFT | CTRL | ALT | META.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct ModMask(pub u8);

impl ModMask {
    pub const SHIFT: u8 = 0b0001;
    pub const CTRL: u8 = 0b0010;
    pub const ALT: u8 = 0b0100;
    pub const META: u8 = 0b1000;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn set(&mut self, bit: u8, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub const fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub const fn index(self) -> usize {
        (self.0 & 0b1111) as usize
    }
}

/// Well-known modifier key codes. These are ordinary `KeyCode`s; the
/// engine has no built-in notion of "the" shift key beyond what the
/// config loader wires up via `ModLayerTable`, but a handful of output
/// sequences (compose/iso14755/gtk) need concrete left-hand variants.
pub mod well_known {
    use super::KeyCode;

    pub const LEFTSHIFT: KeyCode = KeyCode(42);
    pub const LEFTCTRL: KeyCode = KeyCode(29);
    pub const LEFTALT: KeyCode = KeyCode(56);
    pub const LEFTMETA: KeyCode = KeyCode(125);
    pub const RIGHTSHIFT: KeyCode = KeyCode(54);
    pub const RIGHTCTRL: KeyCode = KeyCode(97);
    pub const RIGHTALT: KeyCode = KeyCode(100);
    pub const RIGHTMETA: KeyCode = KeyCode(126);

    pub const fn is_modifier(code: KeyCode) -> bool {
        matches!(
            code.0,
            42 | 29 | 56 | 125 | 54 | 97 | 100 | 126
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_undefined() {
        assert!(KEY_UNDEFINED.is_undefined());
        assert!(!KeyCode::new(30).is_undefined());
    }

    #[test]
    fn key_value_from_raw() {
        assert_eq!(KeyValue::from(0), KeyValue::Release);
        assert_eq!(KeyValue::from(1), KeyValue::Press);
        assert_eq!(KeyValue::from(2), KeyValue::Repeat);
    }

    #[test]
    fn mod_mask_index_matches_bit_order() {
        let mut m = ModMask::empty();
        m.set(ModMask::SHIFT, true);
        m.set(ModMask::ALT, true);
        assert_eq!(m.index(), 0b0101);
    }

    #[test]
    fn well_known_modifiers_detected() {
        assert!(well_known::is_modifier(well_known::LEFTSHIFT));
        assert!(!well_known::is_modifier(KeyCode::new(30)));
    }
}
