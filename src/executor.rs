//! The action executor: given a resolved `(layer, code)` binding and an
//! incoming key value, performs that action's effects and updates
//! activation-stack / `pressed[]` state (spec.md §4.3).
//!
//! Every function here takes its collaborators explicitly rather than
//! through a god-object, so the dispatcher can borrow `InputDevice` and
//! `Layers` independently without fighting the borrow checker.

use crate::activation::{ActionOrigin, ActivationId, ActivationKind};
use crate::beep::{self, Beep, BeepSettings};
use crate::device::InputDevice;
use crate::keys::{well_known, KeyCode, KeyValue};
use crate::layers::{Action, LayerIndex, Layers, ModBit};
use crate::leds::LedSink;
use crate::output::{KeyOutput, ModifierTracker};
use crate::unicode::{self, InputMethod, Sleeper, UnrepresentableCodepointSink};

/// Process-wide state that isn't per-device: the active Unicode input
/// method, the compose key, the inter-codepoint delay, and beep settings
/// (spec.md §4.5, "settings that aren't per-device").
pub struct GlobalState {
    pub input_method: InputMethod,
    pub compose_key: KeyCode,
    pub ukeys_delay_us: u64,
    pub beep: BeepSettings,
}

impl GlobalState {
    pub fn new() -> Self {
        Self {
            input_method: InputMethod::None,
            compose_key: KeyCode::new(0),
            ukeys_delay_us: 0,
            beep: BeepSettings::default(),
        }
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrowed bundle of the non-output collaborators every action needs,
/// so call sites don't thread five separate parameters through.
pub struct Collaborators<'a> {
    pub global: &'a mut GlobalState,
    pub leds: &'a mut dyn LedSink,
    pub beep: &'a mut dyn Beep,
    pub sleeper: &'a mut dyn Sleeper,
    pub unrep: &'a mut dyn UnrepresentableCodepointSink,
}

fn mod_bit_to_keycode(bit: ModBit) -> KeyCode {
    use crate::keys::ModMask;
    match bit {
        ModMask::SHIFT => well_known::LEFTSHIFT,
        ModMask::CTRL => well_known::LEFTCTRL,
        ModMask::ALT => well_known::LEFTALT,
        ModMask::META => well_known::LEFTMETA,
        _ => KeyCode::new(0),
    }
}

fn resolve_menu_layer(layers: &Layers, mut layer: LayerIndex) -> Option<LayerIndex> {
    loop {
        let l = layers.get(layer);
        if let Some(m) = l.menu_layer {
            return Some(m);
        }
        layer = l.parent_layer?;
    }
}

/// Executes the action bound at `(layer, code)` against `value`, then
/// updates `device.pressed[code]` unconditionally (spec.md §4.3's
/// "update `device.pressed[code]`" applies to every action kind alike).
pub fn execute(
    device: &mut InputDevice,
    layers: &Layers,
    output: &mut ModifierTracker<Box<dyn KeyOutput>>,
    collab: &mut Collaborators,
    layer: LayerIndex,
    code: KeyCode,
    value: KeyValue,
    timestamp_ms: u64,
) {
    let action = layers.get(layer).action_at(code).clone();
    match &action {
        Action::Transparent => {
            log::error!(
                "internal error: routed to a Transparent binding at layer {layer} code {code:?}"
            );
        }
        Action::Disabled => {
            if value == KeyValue::Press {
                beep::beep_on_disabled_press(collab.beep, &collab.global.beep);
            }
        }
        Action::Key(out_code) => output.emit(*out_code, value),
        Action::Keys { codes, len } => {
            let codes = &codes[..*len as usize];
            if value.is_press_or_repeat() {
                for &c in codes {
                    output.emit(c, value);
                }
            } else {
                for &c in codes.iter().rev() {
                    output.emit(c, KeyValue::Release);
                }
            }
        }
        Action::UKey(cp) => {
            if value.is_press_or_repeat() {
                emit_ukeys(output, collab, &[*cp]);
            }
        }
        Action::UKeys { codepoints, len } => {
            if value.is_press_or_repeat() {
                emit_ukeys(output, collab, &codepoints[..*len as usize]);
            }
        }
        Action::UKeysStr(r) => {
            if value.is_press_or_repeat() {
                let cps = layers.codepoints_for(*r).to_vec();
                emit_ukeys(output, collab, &cps);
            }
        }
        Action::OverloadMod { codes, codes_len, tap_code, timeout_ms } => exec_overload(
            device,
            layers,
            output,
            collab,
            layer,
            code,
            value,
            timestamp_ms,
            ActivationKind::OverloadMod,
            &codes[..*codes_len as usize],
            *tap_code,
            *timeout_ms,
            None,
        ),
        Action::OverloadLayer { layer: target, tap_code, timeout_ms } => exec_overload(
            device,
            layers,
            output,
            collab,
            layer,
            code,
            value,
            timestamp_ms,
            ActivationKind::OverloadLayer,
            &[],
            *tap_code,
            *timeout_ms,
            Some(*target),
        ),
        Action::ShiftLayer(target) => exec_shift(device, layers, collab.leds, layer, code, value, *target),
        Action::LatchLayer(target) => exec_latch(device, layers, collab.leds, layer, code, value, *target),
        Action::LatchMenu => match resolve_menu_layer(layers, layer) {
            Some(target) => exec_latch(device, layers, collab.leds, layer, code, value, target),
            None => log::error!("latch-menu at layer {layer} has no enclosing menu_layer"),
        },
        Action::LockLayer { layer: target, is_overlay } => {
            exec_lock(device, layers, collab.leds, layer, code, value, *target, *is_overlay)
        }
        Action::LockModIf { mod_bit, if_mod } => {
            exec_lock_mod_if(device, layers, output, collab.leds, layer, code, value, *mod_bit, *if_mod)
        }
        Action::Unlock { all } => exec_unlock(device, layers, collab.leds, layer, value, *all),
        Action::InputMethod(mode) => {
            if value == KeyValue::Press {
                collab.global.input_method = *mode;
            }
        }
    }
    match value {
        KeyValue::Press | KeyValue::Repeat => device.set_pressed(code, Some(layer)),
        KeyValue::Release => device.set_pressed(code, None),
    }
    // A release may also retire a LockModIf that is waiting on this exact
    // code as its unlocking modifier.
    if value == KeyValue::Release {
        release_matching_lock_mod_if(device, layers, output, collab.leds, code);
    }
}

fn emit_ukeys(output: &mut ModifierTracker<Box<dyn KeyOutput>>, collab: &mut Collaborators, codepoints: &[u32]) {
    unicode::emit_codepoints(
        output,
        collab.global.input_method,
        collab.global.compose_key,
        codepoints,
        collab.global.ukeys_delay_us,
        collab.sleeper,
        collab.unrep,
    );
}

#[allow(clippy::too_many_arguments)]
fn exec_overload(
    device: &mut InputDevice,
    layers: &Layers,
    output: &mut ModifierTracker<Box<dyn KeyOutput>>,
    collab: &mut Collaborators,
    layer: LayerIndex,
    code: KeyCode,
    value: KeyValue,
    timestamp_ms: u64,
    kind: ActivationKind,
    mod_codes: &[KeyCode],
    tap_code: KeyCode,
    timeout_ms: u32,
    overload_layer_target: Option<LayerIndex>,
) {
    match value {
        KeyValue::Press => {
            let origin = ActionOrigin { layer, code };
            let activation_layer = match kind {
                ActivationKind::OverloadMod => layers
                    .transparent_layer
                    .expect("transparent_layer must exist once any OverloadMod action is configured"),
                ActivationKind::OverloadLayer => overload_layer_target.expect("OverloadLayer always carries a target"),
                _ => unreachable!(),
            };
            let id = device.push_activation(layers, collab.leds, activation_layer, kind, code, origin);
            device.stack.get_mut(id).timeout_at_ms = if timeout_ms > 0 { Some(timestamp_ms + timeout_ms as u64) } else { None };
            let _ = output;
        }
        KeyValue::Repeat => {
            if let Some(id) = device.stack.find_by_code(code) {
                if is_timeout_expired(device, id, timestamp_ms) {
                    maybe_take_hold_path(device, output, collab.leds, layers, id, mod_codes);
                }
            }
        }
        KeyValue::Release => {
            if let Some(id) = device.stack.find_by_code(code) {
                if is_timeout_expired(device, id, timestamp_ms) {
                    maybe_take_hold_path(device, output, collab.leds, layers, id, mod_codes);
                }
                let delayed = device.stack.get(id).delayed_code;
                let active = device.stack.get(id).active;
                if !active {
                    output.emit(tap_code, KeyValue::Press);
                    if let Some(dc) = delayed {
                        output.emit(dc, KeyValue::Press);
                    }
                    output.emit(tap_code, KeyValue::Release);
                } else if kind == ActivationKind::OverloadMod {
                    for &c in mod_codes.iter().rev() {
                        output.emit(c, KeyValue::Release);
                    }
                }
                device.pop_activation(layers, collab.leds, id);
            }
        }
    }
}

fn is_timeout_expired(device: &InputDevice, id: ActivationId, now_ms: u64) -> bool {
    let act = device.stack.get(id);
    !act.active && act.timeout_at_ms.map(|t| now_ms >= t).unwrap_or(false)
}

/// Marks `id` active and, for `OverloadMod`, presses its held modifier
/// sequence. No-op if already active. Does not touch `OverloadLayer`
/// beyond the flag — its layer was already pushed onto the stack at
/// press time (spec.md §4.3).
fn maybe_take_hold_path(
    device: &mut InputDevice,
    output: &mut ModifierTracker<Box<dyn KeyOutput>>,
    leds: &mut dyn LedSink,
    layers: &Layers,
    id: ActivationId,
    mod_codes: &[KeyCode],
) {
    let _ = leds;
    let _ = layers;
    let act = device.stack.get_mut(id);
    if act.active {
        return;
    }
    act.active = true;
    if act.kind == ActivationKind::OverloadMod {
        for &c in mod_codes {
            output.emit(c, KeyValue::Press);
        }
    }
}

/// Called by the dispatcher's delayed-first-keystroke protocol (spec.md
/// §4.4) once it has decided to promote `id` to the hold path, either
/// because a second foreign key arrived or because the timeout expired.
pub fn take_hold_path(
    device: &mut InputDevice,
    output: &mut ModifierTracker<Box<dyn KeyOutput>>,
    leds: &mut dyn LedSink,
    layers: &Layers,
    id: ActivationId,
) {
    let mod_codes: Vec<KeyCode> = match layers.get(device.stack.get(id).origin.layer).action_at(device.stack.get(id).origin.code) {
        Action::OverloadMod { codes, codes_len, .. } => codes[..*codes_len as usize].to_vec(),
        _ => Vec::new(),
    };
    maybe_take_hold_path(device, output, leds, layers, id, &mod_codes);
}

fn exec_shift(
    device: &mut InputDevice,
    layers: &Layers,
    leds: &mut dyn LedSink,
    layer: LayerIndex,
    code: KeyCode,
    value: KeyValue,
    target: LayerIndex,
) {
    match value {
        KeyValue::Press => {
            let origin = ActionOrigin { layer, code };
            device.push_activation(layers, leds, target, ActivationKind::ShiftLayer, code, origin);
        }
        KeyValue::Release => {
            if let Some(id) = device.stack.find_by_code(code) {
                device.pop_activation(layers, leds, id);
            }
        }
        KeyValue::Repeat => {}
    }
}

fn exec_latch(
    device: &mut InputDevice,
    layers: &Layers,
    leds: &mut dyn LedSink,
    layer: LayerIndex,
    code: KeyCode,
    value: KeyValue,
    target: LayerIndex,
) {
    match value {
        KeyValue::Press => {
            let origin = ActionOrigin { layer, code };
            device.push_activation(layers, leds, target, ActivationKind::LatchLayer, code, origin);
        }
        KeyValue::Release => {
            if let Some(id) = device.stack.find_by_code(code) {
                if device.stack.get(id).promoted_to_shift {
                    device.pop_activation(layers, leds, id);
                } else {
                    device.stack.get_mut(id).code = KeyCode::new(0);
                }
            }
        }
        KeyValue::Repeat => {}
    }
}

#[allow(clippy::too_many_arguments)]
fn exec_lock(
    device: &mut InputDevice,
    layers: &Layers,
    leds: &mut dyn LedSink,
    layer: LayerIndex,
    code: KeyCode,
    value: KeyValue,
    target: LayerIndex,
    is_overlay: bool,
) {
    match value {
        KeyValue::Press => {
            let origin = ActionOrigin { layer, code };
            if let Some(existing_id) = device.stack.find_by_origin(origin) {
                if layers.get(target).is_layout {
                    // Unlocking a layout layer clears everything (GLOSSARY).
                    let all: Vec<_> = device.stack.iter_top_down().map(|(id, _)| id).collect();
                    for id in all {
                        device.pop_activation(layers, leds, id);
                    }
                } else {
                    if !device.stack.get(existing_id).is_overlay {
                        device.stack.deactivate_overlays_above(existing_id);
                    }
                    device.pop_activation(layers, leds, existing_id);
                }
            } else {
                if layers.get(target).is_layout {
                    // Locking a layout layer unlocks other non-layout locks.
                    let others: Vec<_> = device
                        .stack
                        .iter_top_down()
                        .filter(|(_, a)| a.kind == ActivationKind::LockLayer && !layers.get(a.layer).is_layout)
                        .map(|(id, _)| id)
                        .collect();
                    for o in others {
                        device.pop_activation(layers, leds, o);
                    }
                }
                let id = device.push_activation(layers, leds, target, ActivationKind::LockLayer, code, origin);
                device.stack.get_mut(id).is_overlay = is_overlay;
            }
        }
        KeyValue::Release => {
            if let Some(id) = device.stack.find_by_code(code) {
                if device.stack.get(id).promoted_to_shift {
                    device.pop_activation(layers, leds, id);
                    return;
                }
                let is_overlay_ = device.stack.get(id).is_overlay;
                device.stack.get_mut(id).code = KeyCode::new(0);
                if !is_overlay_ && !layers.get(target).is_layout {
                    // Mutual exclusion among non-layout locks, applied on
                    // release-to-pending (spec.md §4.3).
                    let others: Vec<_> = device
                        .stack
                        .iter_top_down()
                        .filter(|(oid, a)| *oid != id && a.kind == ActivationKind::LockLayer && !layers.get(a.layer).is_layout)
                        .map(|(oid, _)| oid)
                        .collect();
                    for o in others {
                        device.pop_activation(layers, leds, o);
                    }
                }
            }
        }
        KeyValue::Repeat => {}
    }
}

#[allow(clippy::too_many_arguments)]
fn exec_lock_mod_if(
    device: &mut InputDevice,
    layers: &Layers,
    output: &mut ModifierTracker<Box<dyn KeyOutput>>,
    leds: &mut dyn LedSink,
    layer: LayerIndex,
    code: KeyCode,
    value: KeyValue,
    mod_bit: ModBit,
    if_mod: ModBit,
) {
    if value != KeyValue::Press {
        return;
    }
    let origin = ActionOrigin { layer, code };
    if device.stack.find_by_origin(origin).is_some() {
        // Already locked; a second press is a no-op, it can only be
        // released by `if_mod` (spec.md §3, "unlockable only by ... ").
        return;
    }
    output.emit(mod_bit_to_keycode(mod_bit), KeyValue::Press);
    let target = layers.transparent_layer.expect("transparent_layer must exist once LockModIf is configured");
    let id = device.push_activation(layers, leds, target, ActivationKind::LockLayer, code, origin);
    let act = device.stack.get_mut(id);
    act.is_overlay = true;
    act.code = KeyCode::new(0);
    act.lock_if_mod = Some(if_mod);
}

fn release_matching_lock_mod_if(
    device: &mut InputDevice,
    layers: &Layers,
    output: &mut ModifierTracker<Box<dyn KeyOutput>>,
    leds: &mut dyn LedSink,
    released_code: KeyCode,
) {
    let matches: Vec<(ActivationId, KeyCode)> = device
        .stack
        .iter_top_down()
        .filter_map(|(id, a)| {
            let if_mod = a.lock_if_mod?;
            if mod_bit_to_keycode(if_mod) == released_code {
                let mod_bit = match layers.get(a.origin.layer).action_at(a.origin.code) {
                    Action::LockModIf { mod_bit, .. } => *mod_bit,
                    _ => return None,
                };
                Some((id, mod_bit_to_keycode(mod_bit)))
            } else {
                None
            }
        })
        .collect();
    for (id, held_code) in matches {
        output.emit(held_code, KeyValue::Release);
        device.pop_activation(layers, leds, id);
    }
}

fn exec_unlock(device: &mut InputDevice, layers: &Layers, leds: &mut dyn LedSink, layer: LayerIndex, value: KeyValue, all: bool) {
    if value != KeyValue::Release {
        return;
    }
    if all {
        let all_ids: Vec<_> = device.stack.iter_top_down().map(|(id, _)| id).collect();
        for id in all_ids {
            device.pop_activation(layers, leds, id);
        }
        return;
    }
    if let Some(id) = device
        .stack
        .iter_top_down()
        .find(|(_, a)| a.kind == ActivationKind::LockLayer && a.layer == layer)
        .map(|(id, _)| id)
    {
        if !device.stack.get(id).is_overlay {
            device.stack.deactivate_overlays_above(id);
        }
        device.pop_activation(layers, leds, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::Layer;
    use crate::output::RecordingOutput;

    fn test_layers() -> Layers {
        let mut layers = Layers::new();
        let mut base = Layer::new(0, "base");
        base.device_index = 0;
        let mut shifted = Layer::new(1, "shifted");
        shifted.bind(KeyCode::new(36), Action::Key(KeyCode::new(105))); // j -> left
        layers.layers.push(base);
        layers.layers.push(shifted);
        layers.complete_device_root_layers();
        layers
    }

    fn collab<'a>(global: &'a mut GlobalState, leds: &'a mut dyn LedSink, beep: &'a mut dyn Beep, sleeper: &'a mut dyn Sleeper, unrep: &'a mut dyn UnrepresentableCodepointSink) -> Collaborators<'a> {
        Collaborators { global, leds, beep, sleeper, unrep }
    }

    #[test]
    fn shift_layer_pushes_and_pops() {
        let layers = test_layers();
        let mut device = InputDevice::new("kbd", 0);
        let mut output = ModifierTracker::new(Box::new(RecordingOutput::default()) as Box<dyn KeyOutput>);
        let mut global = GlobalState::new();
        let mut leds = crate::leds::NullLeds;
        let mut beep = crate::beep::NullBeep;
        let mut sleeper = crate::unicode::NullSleeper::default();
        let mut unrep = crate::unicode::NullUnrepresentable;
        let mut c = collab(&mut global, &mut leds, &mut beep, &mut sleeper, &mut unrep);

        exec_shift(&mut device, &layers, c.leds, 0, KeyCode::new(57), KeyValue::Press, 1);
        assert_eq!(device.stack.len(), 1);
        exec_shift(&mut device, &layers, c.leds, 0, KeyCode::new(57), KeyValue::Release, 1);
        assert!(device.stack.is_empty());
        let _ = &mut c;
    }

    #[test]
    fn latch_enters_pending_then_consumed_on_next_press() {
        let layers = test_layers();
        let mut device = InputDevice::new("kbd", 0);
        let mut leds = crate::leds::NullLeds;
        exec_latch(&mut device, &layers, &mut leds, 0, KeyCode::new(52), KeyValue::Press, 1);
        let id = device.stack.top_id().unwrap();
        exec_latch(&mut device, &layers, &mut leds, 0, KeyCode::new(52), KeyValue::Release, 1);
        assert!(device.stack.get(id).is_pending_latch_or_lock());
    }

    #[test]
    fn lock_toggles_off_on_second_press() {
        let layers = test_layers();
        let mut device = InputDevice::new("kbd", 0);
        let mut leds = crate::leds::NullLeds;
        exec_lock(&mut device, &layers, &mut leds, 0, KeyCode::new(58), KeyValue::Press, 1, false);
        assert_eq!(device.stack.len(), 1);
        exec_lock(&mut device, &layers, &mut leds, 0, KeyCode::new(58), KeyValue::Release, 1, false);
        assert_eq!(device.stack.len(), 1, "lock persists past release, pending next press");
        exec_lock(&mut device, &layers, &mut leds, 0, KeyCode::new(58), KeyValue::Press, 1, false);
        assert!(device.stack.is_empty(), "second press toggles the lock off");
    }
}
