//! The codepoint emitter: turns a 21-bit Unicode codepoint into a
//! sequence of output key events, per the process-wide input method
//! (spec.md §4.2).

use crate::keys::{well_known, KeyCode, KeyValue};
use crate::output::{KeyOutput, ModifierTracker};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InputMethod {
    None,
    Compose,
    Iso14755,
    Gtk,
}

impl Default for InputMethod {
    fn default() -> Self {
        InputMethod::None
    }
}

/// Something that can pause between codepoints (spec.md §5's one
/// non-beep suspension point). A real daemon sleeps on the OS thread;
/// tests use a no-op so scenario assertions don't actually block.
pub trait Sleeper {
    fn sleep_us(&mut self, us: u64);
}

pub struct RealSleeper;

impl Sleeper for RealSleeper {
    fn sleep_us(&mut self, us: u64) {
        std::thread::sleep(std::time::Duration::from_micros(us));
    }
}

#[derive(Default)]
pub struct NullSleeper {
    pub slept_us: Vec<u64>,
}

impl Sleeper for NullSleeper {
    fn sleep_us(&mut self, us: u64) {
        self.slept_us.push(us);
    }
}

/// Something that can be told "a non-ASCII codepoint was requested in
/// `none` mode but can't be represented" (spec.md §4.2, §7). Wired to the
/// beep collaborator in the real binary, a no-op in tests.
pub trait UnrepresentableCodepointSink {
    fn on_unrepresentable(&mut self, codepoint: u32);
}

pub struct NullUnrepresentable;
impl UnrepresentableCodepointSink for NullUnrepresentable {
    fn on_unrepresentable(&mut self, _codepoint: u32) {}
}

const SHIFT_FLAG: u16 = 0x8000;

/// 128-entry direct-ASCII table: each slot is `0` (ignore), a bare
/// keycode (tap), or a keycode OR'd with [`SHIFT_FLAG`] (shift-tap).
/// Key numbers are the standard Linux `input-event-codes.h` values.
pub fn ascii_table() -> [u16; 128] {
    use well_known::*;
    let _ = (LEFTALT, LEFTMETA, RIGHTSHIFT, RIGHTCTRL, RIGHTALT, RIGHTMETA);
    let mut t = [0u16; 128];
    const KEY_1: u16 = 2;
    const KEY_0: u16 = 11;
    const KEY_MINUS: u16 = 12;
    const KEY_EQUAL: u16 = 13;
    const KEY_Q: u16 = 16;
    const KEY_A: u16 = 30;
    const KEY_Z: u16 = 44;
    const KEY_SPACE: u16 = 57;
    const KEY_LEFTBRACE: u16 = 26;
    const KEY_RIGHTBRACE: u16 = 27;
    const KEY_SEMICOLON: u16 = 39;
    const KEY_APOSTROPHE: u16 = 40;
    const KEY_GRAVE: u16 = 41;
    const KEY_BACKSLASH: u16 = 43;
    const KEY_COMMA: u16 = 51;
    const KEY_DOT: u16 = 52;
    const KEY_SLASH: u16 = 53;
    const KEY_ENTER: u16 = 28;
    const KEY_TAB: u16 = 15;

    // digits 1..9 then 0, per the physical row order; '1' maps to KEY_1, ... '0' to KEY_0.
    for (i, ch) in "123456789".chars().enumerate() {
        t[ch as usize] = KEY_1 + i as u16;
    }
    t['0' as usize] = KEY_0;

    // qwerty row mapping for letters, by physical position, matching the
    // evdev code layout (not alphabetical).
    let qwerty_rows: [(&str, u16); 3] = [("qwertyuiop", KEY_Q), ("asdfghjkl", KEY_A), ("zxcvbnm", KEY_Z)];
    for (row, base) in qwerty_rows {
        for (i, ch) in row.chars().enumerate() {
            let code = base + i as u16;
            t[ch as usize] = code;
            t[ch.to_ascii_uppercase() as usize] = code | SHIFT_FLAG;
        }
    }

    let shifted_digits = [
        ('!', KEY_1),
        ('@', KEY_1 + 1),
        ('#', KEY_1 + 2),
        ('$', KEY_1 + 3),
        ('%', KEY_1 + 4),
        ('^', KEY_1 + 5),
        ('&', KEY_1 + 6),
        ('*', KEY_1 + 7),
        ('(', KEY_1 + 8),
        (')', KEY_0),
    ];
    for (ch, code) in shifted_digits {
        t[ch as usize] = code | SHIFT_FLAG;
    }

    t[' ' as usize] = KEY_SPACE;
    t['\n' as usize] = KEY_ENTER;
    t['\t' as usize] = KEY_TAB;
    t['-' as usize] = KEY_MINUS;
    t['_' as usize] = KEY_MINUS | SHIFT_FLAG;
    t['=' as usize] = KEY_EQUAL;
    t['+' as usize] = KEY_EQUAL | SHIFT_FLAG;
    t['[' as usize] = KEY_LEFTBRACE;
    t['{' as usize] = KEY_LEFTBRACE | SHIFT_FLAG;
    t[']' as usize] = KEY_RIGHTBRACE;
    t['}' as usize] = KEY_RIGHTBRACE | SHIFT_FLAG;
    t[';' as usize] = KEY_SEMICOLON;
    t[':' as usize] = KEY_SEMICOLON | SHIFT_FLAG;
    t['\'' as usize] = KEY_APOSTROPHE;
    t['"' as usize] = KEY_APOSTROPHE | SHIFT_FLAG;
    t['`' as usize] = KEY_GRAVE;
    t['~' as usize] = KEY_GRAVE | SHIFT_FLAG;
    t['\\' as usize] = KEY_BACKSLASH;
    t['|' as usize] = KEY_BACKSLASH | SHIFT_FLAG;
    t[',' as usize] = KEY_COMMA;
    t['<' as usize] = KEY_COMMA | SHIFT_FLAG;
    t['.' as usize] = KEY_DOT;
    t['>' as usize] = KEY_DOT | SHIFT_FLAG;
    t['/' as usize] = KEY_SLASH;
    t['?' as usize] = KEY_SLASH | SHIFT_FLAG;

    t
}

fn tap(tracker: &mut ModifierTracker<impl KeyOutput>, code: KeyCode) {
    tracker.emit(code, KeyValue::Press);
    tracker.emit(code, KeyValue::Release);
}

fn emit_none(
    tracker: &mut ModifierTracker<impl KeyOutput>,
    codepoint: u32,
    unrep: &mut impl UnrepresentableCodepointSink,
) {
    if codepoint >= 128 {
        unrep.on_unrepresentable(codepoint);
        return;
    }
    let entry = ascii_table()[codepoint as usize];
    if entry == 0 {
        unrep.on_unrepresentable(codepoint);
        return;
    }
    let shifted = entry & SHIFT_FLAG != 0;
    let code = KeyCode::new(entry & !SHIFT_FLAG);
    if shifted {
        tracker.emit(well_known::LEFTSHIFT, KeyValue::Press);
        tap(tracker, code);
        tracker.emit(well_known::LEFTSHIFT, KeyValue::Release);
    } else {
        tap(tracker, code);
    }
}

const BASE32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHIJKLMNOPQRSTUV";
const HEX_ALPHABET: &[u8; 16] = b"0123456789ABCDEF";

fn char_to_digit_code(ch: u8) -> KeyCode {
    let ascii_table = ascii_table();
    let entry = ascii_table[(ch as char).to_ascii_lowercase() as usize];
    KeyCode::new(entry & !SHIFT_FLAG)
}

fn tap_digit(tracker: &mut ModifierTracker<impl KeyOutput>, digit: u8) {
    tap(tracker, char_to_digit_code(digit));
}

fn emit_compose(
    tracker: &mut ModifierTracker<impl KeyOutput>,
    compose_key: KeyCode,
    codepoint: u32,
) {
    tap(tracker, compose_key);
    // Five base32 digits, most-significant first.
    for shift in (0..5).rev() {
        let digit = ((codepoint >> (shift * 5)) & 0x1F) as usize;
        tap_digit(tracker, BASE32_ALPHABET[digit]);
    }
}

/// Hex digits for `codepoint`, most-significant first, with leading
/// zeroes trimmed but at least one digit emitted.
fn hex_digits(codepoint: u32) -> Vec<u8> {
    let mut started = false;
    let mut out = Vec::with_capacity(6);
    for shift in (0..6).rev() {
        let nibble = ((codepoint >> (shift * 4)) & 0xF) as usize;
        if nibble != 0 {
            started = true;
        }
        if started || shift == 0 {
            out.push(HEX_ALPHABET[nibble]);
        }
    }
    if out.is_empty() {
        out.push(HEX_ALPHABET[0]);
    }
    out
}

fn emit_iso14755(tracker: &mut ModifierTracker<impl KeyOutput>, codepoint: u32) {
    tracker.emit(well_known::LEFTCTRL, KeyValue::Press);
    tracker.emit(well_known::LEFTSHIFT, KeyValue::Press);
    for digit in hex_digits(codepoint) {
        tap_digit(tracker, digit);
    }
    tracker.emit(well_known::LEFTSHIFT, KeyValue::Release);
    tracker.emit(well_known::LEFTCTRL, KeyValue::Release);
}

fn emit_gtk(tracker: &mut ModifierTracker<impl KeyOutput>, codepoint: u32) {
    const KEY_U: u16 = 22;
    const KEY_SPACE: u16 = 57;
    tracker.emit(well_known::LEFTCTRL, KeyValue::Press);
    tracker.emit(well_known::LEFTSHIFT, KeyValue::Press);
    tap(tracker, KeyCode::new(KEY_U));
    tracker.emit(well_known::LEFTSHIFT, KeyValue::Release);
    tracker.emit(well_known::LEFTCTRL, KeyValue::Release);
    for digit in hex_digits(codepoint) {
        tap_digit(tracker, digit);
    }
    tap(tracker, KeyCode::new(KEY_SPACE));
}

/// Emits one codepoint using `method`. Does not perform the
/// release/restore of output modifiers around the call — callers run
/// that once around a whole multi-codepoint action (spec.md §4.2).
pub fn emit_one_codepoint(
    tracker: &mut ModifierTracker<impl KeyOutput>,
    method: InputMethod,
    compose_key: KeyCode,
    codepoint: u32,
    unrep: &mut impl UnrepresentableCodepointSink,
) {
    match method {
        InputMethod::None => emit_none(tracker, codepoint, unrep),
        InputMethod::Compose => emit_compose(tracker, compose_key, codepoint),
        InputMethod::Iso14755 => emit_iso14755(tracker, codepoint),
        InputMethod::Gtk => emit_gtk(tracker, codepoint),
    }
}

/// Emits a full codepoint sequence for a `UKey`/`UKeys`/`UKeysStr`
/// action: releases held output modifiers, emits each codepoint with
/// `sleeper`-governed delay between them, restores modifiers.
pub fn emit_codepoints(
    tracker: &mut ModifierTracker<impl KeyOutput>,
    method: InputMethod,
    compose_key: KeyCode,
    codepoints: &[u32],
    delay_us: u64,
    sleeper: &mut impl Sleeper,
    unrep: &mut impl UnrepresentableCodepointSink,
) {
    let mask = tracker.release_all_output_modifiers();
    for (i, &cp) in codepoints.iter().enumerate() {
        if i > 0 && delay_us > 0 {
            sleeper.sleep_us(delay_us);
        }
        emit_one_codepoint(tracker, method, compose_key, cp, unrep);
    }
    tracker.restore_all_output_modifiers(&mask);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RecordingOutput;

    #[test]
    fn gtk_alpha_matches_scenario_8() {
        // U+03B1 (alpha) = 0x3B1 -> hex digits "3","B","1"
        let mut tracker = ModifierTracker::new(RecordingOutput::default());
        let mut unrep = NullUnrepresentable;
        emit_one_codepoint(&mut tracker, InputMethod::Gtk, KeyCode::new(0), 0x3B1, &mut unrep);
        let events = &tracker.inner_mut().events;
        // Ctrl down, Shift down, U down, U up, Shift up, Ctrl up, 3,3,B,B,1,1, space,space
        assert_eq!(events[0], (well_known::LEFTCTRL, KeyValue::Press));
        assert_eq!(events[1], (well_known::LEFTSHIFT, KeyValue::Press));
        assert_eq!(events[2].1, KeyValue::Press); // U
        assert_eq!(events[3].1, KeyValue::Release); // U
        assert_eq!(events[4], (well_known::LEFTSHIFT, KeyValue::Release));
        assert_eq!(events[5], (well_known::LEFTCTRL, KeyValue::Release));
        // remaining: 3 down/up, B down/up, 1 down/up, space down/up = 8 events
        assert_eq!(events.len(), 6 + 8);
    }

    #[test]
    fn hex_digits_trims_leading_zero_but_keeps_one() {
        assert_eq!(hex_digits(0), vec![b'0']);
        assert_eq!(hex_digits(0x3B1), vec![b'3', b'B', b'1']);
        assert_eq!(hex_digits(0x10FFFF), vec![b'1', b'0', b'F', b'F', b'F', b'F']);
    }

    #[test]
    fn compose_emits_five_base32_digits_msb_first() {
        let mut tracker = ModifierTracker::new(RecordingOutput::default());
        emit_compose(&mut tracker, KeyCode::new(100), 1);
        // compose tap (2 events) + 5 digits * 2 events = 12
        assert_eq!(tracker.inner_mut().events.len(), 12);
    }

    #[test]
    fn none_mode_shift_taps_uppercase() {
        let mut tracker = ModifierTracker::new(RecordingOutput::default());
        let mut unrep = NullUnrepresentable;
        emit_none(&mut tracker, 'A' as u32, &mut unrep);
        let events = &tracker.inner_mut().events;
        assert_eq!(events[0], (well_known::LEFTSHIFT, KeyValue::Press));
        assert_eq!(events[3], (well_known::LEFTSHIFT, KeyValue::Release));
    }

    #[test]
    fn none_mode_non_ascii_reports_unrepresentable() {
        struct Flag(bool);
        impl UnrepresentableCodepointSink for Flag {
            fn on_unrepresentable(&mut self, _cp: u32) {
                self.0 = true;
            }
        }
        let mut tracker = ModifierTracker::new(RecordingOutput::default());
        let mut flag = Flag(false);
        emit_none(&mut tracker, 0x3B1, &mut flag);
        assert!(flag.0);
        assert!(tracker.inner_mut().events.is_empty());
    }

    #[test]
    fn emit_codepoints_sleeps_between_but_not_before_first() {
        let mut tracker = ModifierTracker::new(RecordingOutput::default());
        let mut sleeper = NullSleeper::default();
        let mut unrep = NullUnrepresentable;
        emit_codepoints(
            &mut tracker,
            InputMethod::Gtk,
            KeyCode::new(0),
            &[0x41, 0x42, 0x43],
            500,
            &mut sleeper,
            &mut unrep,
        );
        assert_eq!(sleeper.slept_us, vec![500, 500]);
    }
}
