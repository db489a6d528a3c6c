//! Engine core + ambient collaborators for the layered keyboard
//! remapper. `main.rs` is the only thing that knows about real devices;
//! everything in this crate is testable against trait-object
//! collaborators (spec.md §5).

pub mod activation;
pub mod beep;
pub mod cfg;
pub mod device;
pub mod dispatcher;
pub mod executor;
pub mod keys;
pub mod layers;
pub mod leds;
#[cfg(target_os = "linux")]
pub mod oskbd;
pub mod output;
#[cfg(target_os = "linux")]
pub mod reload;
pub mod unicode;

use beep::Beep;
use device::InputDevice;
use executor::{Collaborators, GlobalState};
use keys::{KeyCode, KeyValue};
use layers::Layers;
use leds::LedSink;
use output::{KeyOutput, ModifierTracker};
use unicode::{Sleeper, UnrepresentableCodepointSink};

/// Owns every piece of mutable engine state and the collaborator trait
/// objects that let it run against either real devices or test doubles.
/// A config reload replaces `layers`/`devices` wholesale and atomically
/// (spec.md §5's single-threaded model needs no lock for this: reload
/// happens between dispatch calls, on the same thread).
pub struct Engine {
    pub layers: Layers,
    pub devices: Vec<InputDevice>,
    output: ModifierTracker<Box<dyn KeyOutput>>,
    leds: Box<dyn LedSink>,
    beep: Box<dyn Beep>,
    sleeper: Box<dyn Sleeper>,
    unrep: Box<dyn UnrepresentableCodepointSink>,
    global: GlobalState,
}

impl Engine {
    pub fn new(
        layers: Layers,
        devices: Vec<InputDevice>,
        output: Box<dyn KeyOutput>,
        leds: Box<dyn LedSink>,
        beep: Box<dyn Beep>,
        sleeper: Box<dyn Sleeper>,
        unrep: Box<dyn UnrepresentableCodepointSink>,
    ) -> Self {
        let mut global = GlobalState::new();
        global.ukeys_delay_us = layers.ukeys_delay_us;
        global.compose_key = layers.compose_key;
        Self {
            layers,
            devices,
            output: ModifierTracker::new(output),
            leds,
            beep,
            sleeper,
            unrep,
            global,
        }
    }

    /// Replaces the keymap model and per-device runtime state in one
    /// shot. Any activation stacks from before the reload are simply
    /// dropped along with the old `InputDevice`s — there is no valid way
    /// to carry a mid-hold activation across a layer/action renumbering.
    pub fn reload(&mut self, layers: Layers, devices: Vec<InputDevice>) {
        self.global.ukeys_delay_us = layers.ukeys_delay_us;
        self.global.compose_key = layers.compose_key;
        self.layers = layers;
        self.devices = devices;
    }

    /// Feeds one raw `(device_index, code, value, timestamp_ms)` event
    /// through the dispatcher (spec.md §4.4).
    pub fn process_key(&mut self, device_index: usize, raw_code: KeyCode, value: KeyValue, timestamp_ms: u64) {
        let device = &mut self.devices[device_index];
        let mut collab = Collaborators {
            global: &mut self.global,
            leds: self.leds.as_mut(),
            beep: self.beep.as_mut(),
            sleeper: self.sleeper.as_mut(),
            unrep: self.unrep.as_mut(),
        };
        dispatcher::process_key(device, &self.layers, &mut self.output, &mut collab, raw_code, value, timestamp_ms);
    }

    pub fn device_index_by_name(&self, name: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.name == name)
    }

    /// Downcasting escape hatch for test harnesses that need to inspect
    /// the concrete output sink (typically `output::RecordingOutput`)
    /// behind the engine's boxed `KeyOutput`.
    pub fn output_as_any(&mut self) -> &mut dyn std::any::Any {
        self.output.inner_mut().as_any_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beep::NullBeep;
    use crate::device::InputDevice;
    use crate::layers::{Action, Layer};
    use crate::leds::NullLeds;
    use crate::output::RecordingOutput;
    use crate::unicode::{NullSleeper, NullUnrepresentable};

    #[test]
    fn engine_round_trips_a_plain_key() {
        let mut layers = Layers::new();
        let mut base = Layer::new(0, "base");
        base.device_index = 0;
        base.bind(KeyCode::new(30), Action::Key(KeyCode::new(31)));
        layers.layers.push(base);
        layers.complete_device_root_layers();

        let device = InputDevice::new("kbd", 0);
        let mut engine = Engine::new(
            layers,
            vec![device],
            Box::new(RecordingOutput::default()),
            Box::new(NullLeds),
            Box::new(NullBeep),
            Box::new(NullSleeper::default()),
            Box::new(NullUnrepresentable),
        );
        engine.process_key(0, KeyCode::new(30), KeyValue::Press, 0);
        assert_eq!(engine.devices[0].pressed_layer(KeyCode::new(30)), Some(0));
    }
}
