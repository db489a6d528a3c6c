//! The per-device runtime state: remap table, root layer, the
//! `pressed[]` array, activation stack, and LED bookkeeping (spec.md
//! §3, "Input device").

use crate::activation::{ActionOrigin, ActivationId, ActivationKind, ActivationStack};
use crate::keys::{KeyCode, MAX_KEYMAP};
use crate::layers::{LayerIndex, Layers};
use crate::leds::{self, LedSink};

pub struct InputDevice {
    pub name: String,
    /// `:N` disambiguator from the legacy `[Device]` section, if any.
    pub disambiguator: Option<u32>,
    /// Applied to every incoming code before layer lookup. Unset slots
    /// default to identity (index == value) by loader convention.
    pub remap: Box<[KeyCode; MAX_KEYMAP]>,
    pub root_layer: LayerIndex,
    /// `0` = not pressed; otherwise `layer_index + 1`, the layer that
    /// originally handled the press (invariant 2, spec.md §3).
    pressed: Box<[u8; MAX_KEYMAP]>,
    pub stack: ActivationStack,
    pub inherit_remap: bool,
}

impl InputDevice {
    pub fn new(name: impl Into<String>, root_layer: LayerIndex) -> Self {
        let mut remap: Box<[KeyCode; MAX_KEYMAP]> = Box::new(std::array::from_fn(|_| KeyCode::new(0)));
        for (i, slot) in remap.iter_mut().enumerate() {
            *slot = KeyCode::new(i as u16);
        }
        Self {
            name: name.into(),
            disambiguator: None,
            remap,
            root_layer,
            pressed: Box::new([0u8; MAX_KEYMAP]),
            stack: ActivationStack::new(),
            inherit_remap: false,
        }
    }

    fn slot(code: KeyCode) -> usize {
        code.as_usize().min(MAX_KEYMAP - 1)
    }

    /// Applies `remap[code]`. A remap entry of 0 means "unset", treated
    /// as identity — the Open Question in spec.md §9 is resolved this
    /// way, following the original's `remap[r] != 0 ? remap[r] : r`.
    pub fn remap_code(&self, code: KeyCode) -> KeyCode {
        let mapped = self.remap[Self::slot(code)];
        if mapped.is_undefined() {
            code
        } else {
            mapped
        }
    }

    pub fn set_remap(&mut self, from: KeyCode, to: KeyCode) {
        self.remap[Self::slot(from)] = to;
    }

    pub fn pressed_layer(&self, code: KeyCode) -> Option<LayerIndex> {
        let v = self.pressed[Self::slot(code)];
        if v == 0 {
            None
        } else {
            Some(v - 1)
        }
    }

    pub fn is_pressed(&self, code: KeyCode) -> bool {
        self.pressed[Self::slot(code)] != 0
    }

    pub fn set_pressed(&mut self, code: KeyCode, layer: Option<LayerIndex>) {
        self.pressed[Self::slot(code)] = layer.map(|l| l + 1).unwrap_or(0);
    }

    /// Pushes a new activation and applies its layer's LEDs (spec.md
    /// §4.1: "turns on `layer.leds`").
    pub fn push_activation(
        &mut self,
        layers: &Layers,
        led_sink: &mut impl LedSink,
        layer: LayerIndex,
        kind: ActivationKind,
        code: KeyCode,
        origin: ActionOrigin,
    ) -> ActivationId {
        let id = self.stack.activate(layer, kind, code, origin);
        leds::apply_all(led_sink, &layers.get(layer).leds);
        id
    }

    /// Pops an activation: turns off its layer's "on" LEDs, then
    /// re-applies the remaining top's LEDs so previously-masked LEDs
    /// resurface (spec.md §4.1, invariant 5).
    pub fn pop_activation(&mut self, layers: &Layers, led_sink: &mut impl LedSink, id: ActivationId) {
        let layer = self.stack.get(id).layer;
        self.stack.deactivate(id);
        leds::turn_off_all(led_sink, &layers.get(layer).leds);
        if let Some(top) = self.stack.top() {
            leds::apply_all(led_sink, &layers.get(top.layer).leds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remap_defaults_to_identity() {
        let d = InputDevice::new("kbd", 0);
        assert_eq!(d.remap_code(KeyCode::new(30)), KeyCode::new(30));
    }

    #[test]
    fn explicit_zero_remap_still_identity() {
        // Open question resolution: remap-to-0 means "unset", not swallow.
        let d = InputDevice::new("kbd", 0);
        assert_eq!(d.remap_code(KeyCode::new(0)), KeyCode::new(0));
    }

    #[test]
    fn pressed_roundtrip() {
        let mut d = InputDevice::new("kbd", 0);
        assert_eq!(d.pressed_layer(KeyCode::new(10)), None);
        d.set_pressed(KeyCode::new(10), Some(3));
        assert_eq!(d.pressed_layer(KeyCode::new(10)), Some(3));
        d.set_pressed(KeyCode::new(10), None);
        assert_eq!(d.pressed_layer(KeyCode::new(10)), None);
    }
}
