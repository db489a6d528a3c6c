//! LED I/O collaborator (spec.md §1: "LED I/O wire formats" is explicitly
//! out of core scope). The engine only needs to know "turn these LED
//! codes on/off"; the real wire protocol (an `EV_LED` write per
//! `original_source/src/leds.c`) lives behind this trait so the engine
//! core stays testable without a real device.

use crate::layers::LedSpec;

pub trait LedSink {
    fn set_led(&mut self, led_code: u16, on: bool);
}

/// Test/default backend: does nothing.
#[derive(Default)]
pub struct NullLeds;

impl LedSink for NullLeds {
    fn set_led(&mut self, _led_code: u16, _on: bool) {}
}

/// Applies every spec in `specs` in order.
pub fn apply_all(sink: &mut impl LedSink, specs: &[LedSpec]) {
    for spec in specs {
        sink.set_led(spec.led_code, spec.on);
    }
}

/// Turns every LED in `specs` off, regardless of the spec's own `on`
/// flag — used when unwinding an activation's LEDs on deactivation
/// (spec.md §4.1: "turns off that layer's 'on' LEDs").
pub fn turn_off_all(sink: &mut impl LedSink, specs: &[LedSpec]) {
    for spec in specs {
        if spec.on {
            sink.set_led(spec.led_code, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        events: Vec<(u16, bool)>,
    }
    impl LedSink for Recording {
        fn set_led(&mut self, led_code: u16, on: bool) {
            self.events.push((led_code, on));
        }
    }

    #[test]
    fn turn_off_all_only_reverts_specs_that_were_on() {
        let mut r = Recording::default();
        let specs = vec![
            LedSpec { led_code: 1, on: true },
            LedSpec { led_code: 2, on: false },
        ];
        turn_off_all(&mut r, &specs);
        assert_eq!(r.events, vec![(1, false)]);
    }
}
