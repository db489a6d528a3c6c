//! The process-global output boundary: every emitted event funnels through
//! one `KeyOutput` implementation backed by the single virtual device
//! (spec.md §5, "Shared-resource policy"). `ModifierTracker` layers the
//! modifier save/restore behaviour the codepoint emitter needs on top of
//! any sink.

use crate::keys::{well_known, KeyCode, KeyValue};
use smallvec::SmallVec;

/// Anything that can accept a transformed key event. The real
/// implementation (`oskbd::linux::KbdOut`) writes to `/dev/uinput`; tests
/// use a `Vec`-backed recorder.
pub trait KeyOutput {
    fn emit(&mut self, code: KeyCode, value: KeyValue);

    /// Lets a test harness downcast back to a concrete sink (typically
    /// `RecordingOutput`) through the `Engine`'s boxed trait object.
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

impl KeyOutput for Box<dyn KeyOutput> {
    fn emit(&mut self, code: KeyCode, value: KeyValue) {
        (**self).emit(code, value)
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        (**self).as_any_mut()
    }
}

/// Records every `(code, value)` pair it receives, in order. Used by the
/// engine's own unit tests and by `tests/scenarios.rs`.
#[derive(Default, Debug)]
pub struct RecordingOutput {
    pub events: Vec<(KeyCode, KeyValue)>,
}

impl KeyOutput for RecordingOutput {
    fn emit(&mut self, code: KeyCode, value: KeyValue) {
        self.events.push((code, value));
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Wraps an output sink and keeps track of which modifier keys are
/// currently held on the *output* side, so the codepoint emitter can
/// temporarily clear them before writing an escape sequence and restore
/// them afterward (spec.md §4.2).
pub struct ModifierTracker<O> {
    inner: O,
    held: SmallVec<[KeyCode; 8]>,
}

impl<O: KeyOutput> ModifierTracker<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            held: SmallVec::new(),
        }
    }

    pub fn inner_mut(&mut self) -> &mut O {
        &mut self.inner
    }

    pub fn emit(&mut self, code: KeyCode, value: KeyValue) {
        if well_known::is_modifier(code) {
            match value {
                KeyValue::Press | KeyValue::Repeat => {
                    if !self.held.contains(&code) {
                        self.held.push(code);
                    }
                }
                KeyValue::Release => {
                    self.held.retain(|c| *c != code);
                }
            }
        }
        self.inner.emit(code, value);
    }

    /// Releases every currently-held output modifier and returns the set
    /// so it can be restored later. Idempotent: calling it twice in a row
    /// returns an empty mask the second time.
    pub fn release_all_output_modifiers(&mut self) -> SmallVec<[KeyCode; 8]> {
        let held = std::mem::take(&mut self.held);
        for &code in &held {
            self.inner.emit(code, KeyValue::Release);
        }
        held
    }

    /// Re-presses every modifier in `mask`, in order.
    pub fn restore_all_output_modifiers(&mut self, mask: &[KeyCode]) {
        for &code in mask {
            self.emit(code, KeyValue::Press);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_all_then_restore_round_trips() {
        let mut t = ModifierTracker::new(RecordingOutput::default());
        t.emit(well_known::LEFTSHIFT, KeyValue::Press);
        t.emit(well_known::LEFTCTRL, KeyValue::Press);
        let mask = t.release_all_output_modifiers();
        assert_eq!(mask.len(), 2);
        assert_eq!(
            t.inner_mut().events,
            vec![
                (well_known::LEFTSHIFT, KeyValue::Press),
                (well_known::LEFTCTRL, KeyValue::Press),
                (well_known::LEFTSHIFT, KeyValue::Release),
                (well_known::LEFTCTRL, KeyValue::Release),
            ]
        );
        t.inner_mut().events.clear();
        t.restore_all_output_modifiers(&mask);
        assert_eq!(
            t.inner_mut().events,
            vec![
                (well_known::LEFTSHIFT, KeyValue::Press),
                (well_known::LEFTCTRL, KeyValue::Press),
            ]
        );
    }

    #[test]
    fn release_all_is_idempotent() {
        let mut t = ModifierTracker::new(RecordingOutput::default());
        t.emit(well_known::LEFTSHIFT, KeyValue::Press);
        let _ = t.release_all_output_modifiers();
        let second = t.release_all_output_modifiers();
        assert!(second.is_empty());
    }
}
