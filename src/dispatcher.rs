//! The event dispatcher: the single `process_key` entry point every
//! incoming `EV_KEY` event passes through (spec.md §4.4).
//!
//! Ordering matters and mirrors the spec's numbered algorithm exactly:
//! remap, then (1) empty-stack routing, (2) the activation-creating
//! key's own repeat/release, (3) the modifier-passthrough exception,
//! (4) the delayed-first-keystroke protocol for `Overload*`, (5) plain
//! routing through whatever the top of the stack provides.

use crate::activation::ActivationKind;
use crate::device::InputDevice;
use crate::executor::{self, Collaborators};
use crate::keys::{well_known, KeyCode, KeyValue, ModMask};
use crate::layers::{Action, LayerIndex, Layers};
use crate::output::{KeyOutput, ModifierTracker};

/// Bitmask of modifiers currently physically held on `device`, used to
/// select a layer's `mod_layers` override (spec.md §3).
fn current_mods(device: &InputDevice) -> ModMask {
    let mut m = ModMask::empty();
    m.set(ModMask::SHIFT, device.is_pressed(well_known::LEFTSHIFT) || device.is_pressed(well_known::RIGHTSHIFT));
    m.set(ModMask::CTRL, device.is_pressed(well_known::LEFTCTRL) || device.is_pressed(well_known::RIGHTCTRL));
    m.set(ModMask::ALT, device.is_pressed(well_known::LEFTALT) || device.is_pressed(well_known::RIGHTALT));
    m.set(ModMask::META, device.is_pressed(well_known::LEFTMETA) || device.is_pressed(well_known::RIGHTMETA));
    m
}

/// Applies a layer's `mod_layers` override, if the currently-held
/// modifiers select one, before consulting its keymap.
fn effective_layer(layers: &Layers, device: &InputDevice, layer: LayerIndex) -> LayerIndex {
    let mods = current_mods(device);
    layers.get(layer).mod_layers[mods.index()].unwrap_or(layer)
}

/// Walks the activation stack from the top down looking for the first
/// layer (after `mod_layers` substitution) whose binding for `code` is
/// not `Transparent`; falls back to `device.root_layer`, which is always
/// complete after the loader's finalization pass (spec.md §4.4, §4.5).
fn find_key_layer(device: &InputDevice, layers: &Layers, code: KeyCode) -> LayerIndex {
    for (_, activation) in device.stack.iter_top_down() {
        let candidate = effective_layer(layers, device, activation.layer);
        if !layers.get(candidate).action_at(code).is_transparent() {
            return candidate;
        }
    }
    effective_layer(layers, device, device.root_layer)
}

/// Routes `code` through whatever layer currently owns it (searching
/// fresh on press, reusing the previously-resolved layer on
/// repeat/release so a key's release always matches the layer that saw
/// its press — invariant 2, spec.md §3).
fn route_normally(
    device: &mut InputDevice,
    layers: &Layers,
    output: &mut ModifierTracker<Box<dyn KeyOutput>>,
    collab: &mut Collaborators,
    code: KeyCode,
    value: KeyValue,
    timestamp_ms: u64,
) {
    let layer = if value == KeyValue::Press {
        find_key_layer(device, layers, code)
    } else {
        device.pressed_layer(code).unwrap_or_else(|| find_key_layer(device, layers, code))
    };
    executor::execute(device, layers, output, collab, layer, code, value, timestamp_ms);
}

/// Top-level entry point: one call per raw `EV_KEY` event from a grabbed
/// device (spec.md §4.4).
pub fn process_key(
    device: &mut InputDevice,
    layers: &Layers,
    output: &mut ModifierTracker<Box<dyn KeyOutput>>,
    collab: &mut Collaborators,
    raw_code: KeyCode,
    value: KeyValue,
    timestamp_ms: u64,
) {
    let code = device.remap_code(raw_code);

    // 1. Empty stack: route directly, no special casing.
    if device.stack.is_empty() {
        route_normally(device, layers, output, collab, code, value, timestamp_ms);
        return;
    }

    let top = device.stack.top().expect("checked non-empty above").clone();

    // 2. Repeat/release of the key that created the current top
    //    activation: route through the layer that originally resolved
    //    it (its own action), letting the executor's per-kind release
    //    logic run.
    if code == top.code {
        route_normally(device, layers, output, collab, code, value, timestamp_ms);
        return;
    }

    // 3. Modifier passthrough: a modifier key that the top layer leaves
    //    transparent (or that's already pressed through a different
    //    layer) bypasses the top activation's hold/tap logic entirely.
    let top_effective = effective_layer(layers, device, top.layer);
    let top_is_transparent_here = layers.get(top_effective).action_at(code).is_transparent();
    let pressed_elsewhere = device.is_pressed(code) && device.pressed_layer(code) != Some(top_effective);
    if well_known::is_modifier(code) && (top_is_transparent_here || pressed_elsewhere) {
        route_normally(device, layers, output, collab, code, value, timestamp_ms);
        return;
    }

    // 4/5. Branch on the top activation's kind.
    match top.kind {
        ActivationKind::OverloadMod | ActivationKind::OverloadLayer => {
            dispatch_overload(device, layers, output, collab, code, value, timestamp_ms);
        }
        ActivationKind::ShiftLayer => {
            route_normally(device, layers, output, collab, code, value, timestamp_ms);
        }
        ActivationKind::LatchLayer => {
            dispatch_latch(device, layers, output, collab, code, value, timestamp_ms);
        }
        ActivationKind::LockLayer => {
            dispatch_lock(device, layers, output, collab, code, value, timestamp_ms);
        }
    }
}

/// The delayed-first-keystroke protocol (spec.md §4.4): the first
/// foreign key press while an overload is undecided is buffered; a
/// second foreign key (or a repeat/release of the buffered one) promotes
/// to the hold path and replays it.
fn dispatch_overload(
    device: &mut InputDevice,
    layers: &Layers,
    output: &mut ModifierTracker<Box<dyn KeyOutput>>,
    collab: &mut Collaborators,
    code: KeyCode,
    value: KeyValue,
    timestamp_ms: u64,
) {
    let id = device.stack.top_id().expect("overload dispatch only runs with a top activation");
    let active = device.stack.get(id).active;
    if active {
        route_normally(device, layers, output, collab, code, value, timestamp_ms);
        return;
    }
    let expired = device
        .stack
        .get(id)
        .timeout_at_ms
        .map(|t| timestamp_ms >= t)
        .unwrap_or(false);
    if expired {
        executor::take_hold_path(device, output, collab.leds, layers, id);
        route_normally(device, layers, output, collab, code, value, timestamp_ms);
        return;
    }
    let delayed = device.stack.get(id).delayed_code;
    match delayed {
        None => {
            if value == KeyValue::Press {
                device.stack.get_mut(id).delayed_code = Some(code);
            } else {
                // A repeat/release of a code we never saw press for
                // (e.g. held across startup): route through normally.
                route_normally(device, layers, output, collab, code, value, timestamp_ms);
            }
        }
        Some(dc) => {
            // The buffered key's press was never routed; replay it now,
            // even when this same key's own repeat/release is what
            // triggered the promotion (dc == code), otherwise that
            // release would arrive with no matching press.
            executor::take_hold_path(device, output, collab.leds, layers, id);
            route_normally(device, layers, output, collab, dc, KeyValue::Press, timestamp_ms);
            route_normally(device, layers, output, collab, code, value, timestamp_ms);
        }
    }
}

fn dispatch_latch(
    device: &mut InputDevice,
    layers: &Layers,
    output: &mut ModifierTracker<Box<dyn KeyOutput>>,
    collab: &mut Collaborators,
    code: KeyCode,
    value: KeyValue,
    timestamp_ms: u64,
) {
    if value != KeyValue::Press {
        route_normally(device, layers, output, collab, code, value, timestamp_ms);
        return;
    }
    let id = device.stack.top_id().expect("latch dispatch only runs with a top activation");
    let pending = device.stack.get(id).is_pending_latch_or_lock();
    if pending {
        // Route through the still-present latch layer first (spec.md
        // §4.3: "deactivates this activation after routing that key
        // through its layer"); if this turns out to be the latch key's
        // own action re-triggering, the pop below simply clears the old
        // pending slot while the fresh action (executed by
        // `route_normally`) re-arms a brand-new latch of its own.
        let origin = device.stack.get(id).origin;
        let resolved_layer = find_key_layer(device, layers, code);
        route_normally(device, layers, output, collab, code, value, timestamp_ms);
        let same_key_as_latch = resolved_layer == origin.layer && code == origin.code;
        let _ = same_key_as_latch;
        device.pop_activation(layers, collab.leds, id);
    } else {
        device.stack.get_mut(id).promoted_to_shift = true;
        route_normally(device, layers, output, collab, code, value, timestamp_ms);
    }
}

fn dispatch_lock(
    device: &mut InputDevice,
    layers: &Layers,
    output: &mut ModifierTracker<Box<dyn KeyOutput>>,
    collab: &mut Collaborators,
    code: KeyCode,
    value: KeyValue,
    timestamp_ms: u64,
) {
    if value != KeyValue::Press {
        route_normally(device, layers, output, collab, code, value, timestamp_ms);
        return;
    }
    let id = device.stack.top_id().expect("lock dispatch only runs with a top activation");
    let pending = device.stack.get(id).is_pending_latch_or_lock();
    if !pending {
        device.stack.get_mut(id).promoted_to_shift = true;
    }
    route_normally(device, layers, output, collab, code, value, timestamp_ms);
}

#[allow(dead_code)]
fn is_input_method_binding(layers: &Layers, layer: LayerIndex, code: KeyCode) -> bool {
    matches!(layers.get(layer).action_at(code), Action::InputMethod(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beep::NullBeep;
    use crate::executor::GlobalState;
    use crate::layers::Layer;
    use crate::leds::NullLeds;
    use crate::output::RecordingOutput;
    use crate::unicode::{NullSleeper, NullUnrepresentable};

    fn harness() -> (Layers, InputDevice) {
        let mut layers = Layers::new();
        let mut base = Layer::new(0, "base");
        base.device_index = 0;
        layers.layers.push(base);
        layers.complete_device_root_layers();
        let device = InputDevice::new("kbd", 0);
        (layers, device)
    }

    struct Fixture {
        output: ModifierTracker<Box<dyn KeyOutput>>,
        global: GlobalState,
        leds: NullLeds,
        beep: NullBeep,
        sleeper: NullSleeper,
        unrep: NullUnrepresentable,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                output: ModifierTracker::new(Box::new(RecordingOutput::default()) as Box<dyn KeyOutput>),
                global: GlobalState::new(),
                leds: NullLeds,
                beep: NullBeep,
                sleeper: NullSleeper::default(),
                unrep: NullUnrepresentable,
            }
        }

        fn collab(&mut self) -> Collaborators<'_> {
            Collaborators {
                global: &mut self.global,
                leds: &mut self.leds,
                beep: &mut self.beep,
                sleeper: &mut self.sleeper,
                unrep: &mut self.unrep,
            }
        }
    }

    #[test]
    fn empty_stack_routes_directly() {
        let (mut layers, mut device) = harness();
        layers.get_mut(0).bind(KeyCode::new(30), Action::Key(KeyCode::new(31)));
        let mut fixture = Fixture::new();
        let mut collab = fixture.collab();
        process_key(&mut device, &layers, &mut fixture.output, &mut collab, KeyCode::new(30), KeyValue::Press, 0);
        assert_eq!(device.pressed_layer(KeyCode::new(30)), Some(0));
    }

    #[test]
    fn overload_buffers_then_promotes_on_second_key() {
        let (mut layers, mut device) = harness();
        // key 30 = OverloadMod(shift, tap=30, timeout=200), key 31 = plain 'a'
        layers.get_mut(0).bind(
            KeyCode::new(30),
            Action::overload_mod(&[well_known::LEFTSHIFT], KeyCode::new(30), 200),
        );
        layers.get_mut(0).bind(KeyCode::new(31), Action::Key(KeyCode::new(31)));
        let mut fixture = Fixture::new();
        let mut collab = fixture.collab();

        process_key(&mut device, &layers, &mut fixture.output, &mut collab, KeyCode::new(30), KeyValue::Press, 0);
        assert_eq!(device.stack.len(), 1);
        let id = device.stack.top_id().unwrap();
        assert!(!device.stack.get(id).active);

        process_key(&mut device, &layers, &mut fixture.output, &mut collab, KeyCode::new(31), KeyValue::Press, 10);
        assert_eq!(device.stack.get(id).delayed_code, Some(KeyCode::new(31)));
        assert!(!device.stack.get(id).active);

        process_key(&mut device, &layers, &mut fixture.output, &mut collab, KeyCode::new(32), KeyValue::Press, 20);
        assert!(device.stack.get(id).active, "second foreign key promotes to hold");
    }

    #[test]
    fn overload_tap_path_on_quick_release() {
        let (mut layers, mut device) = harness();
        layers.get_mut(0).bind(
            KeyCode::new(30),
            Action::overload_mod(&[well_known::LEFTSHIFT], KeyCode::new(30), 200),
        );
        let mut fixture = Fixture::new();
        let mut collab = fixture.collab();
        process_key(&mut device, &layers, &mut fixture.output, &mut collab, KeyCode::new(30), KeyValue::Press, 0);
        process_key(&mut device, &layers, &mut fixture.output, &mut collab, KeyCode::new(30), KeyValue::Release, 10);
        assert!(device.stack.is_empty());
    }
}
