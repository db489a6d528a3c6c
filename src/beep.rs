//! PC-speaker beep collaborator (spec.md §1: "beep I/O" is explicitly out
//! of core scope). Grounded on `original_source/src/beep.c`: a single
//! fixed-frequency tone written to `/dev/input/by-path/
//! platform-pcspkr-event-spkr`, parameterized by frequency and duration
//! from `[Settings]`.

pub trait Beep {
    fn beep(&mut self, freq_hz: u32, duration_ms: u32);
}

#[derive(Default)]
pub struct NullBeep;

impl Beep for NullBeep {
    fn beep(&mut self, _freq_hz: u32, _duration_ms: u32) {}
}

/// Optional settings parsed from `[Settings]`'s `beep-on-disabled-press`
/// and `beep-on-invalid-codepoint` directives.
#[derive(Copy, Clone, Debug, Default)]
pub struct BeepSettings {
    pub on_disabled_press: Option<(u32, u32)>,
    pub on_invalid_codepoint: Option<(u32, u32)>,
}

pub fn beep_on_disabled_press(sink: &mut impl Beep, settings: &BeepSettings) {
    if let Some((freq, ms)) = settings.on_disabled_press {
        sink.beep(freq, ms);
    }
}

pub fn beep_on_invalid_codepoint(sink: &mut impl Beep, settings: &BeepSettings) {
    if let Some((freq, ms)) = settings.on_invalid_codepoint {
        sink.beep(freq, ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        calls: Vec<(u32, u32)>,
    }
    impl Beep for Recording {
        fn beep(&mut self, freq_hz: u32, duration_ms: u32) {
            self.calls.push((freq_hz, duration_ms));
        }
    }

    #[test]
    fn beep_skipped_when_unconfigured() {
        let mut r = Recording::default();
        beep_on_disabled_press(&mut r, &BeepSettings::default());
        assert!(r.calls.is_empty());
    }

    #[test]
    fn beep_fires_when_configured() {
        let mut r = Recording::default();
        let settings = BeepSettings {
            on_disabled_press: Some((440, 50)),
            ..Default::default()
        };
        beep_on_disabled_press(&mut r, &settings);
        assert_eq!(r.calls, vec![(440, 50)]);
    }
}
