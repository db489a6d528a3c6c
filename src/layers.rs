//! The keymap model: layers, actions, and the immutable configuration the
//! engine consumes. Built once by the config loader (`cfg`) and never
//! mutated afterward except by a full, atomic reload swap (spec.md §5).

use rustc_hash::FxHashMap as HashMap;

use crate::beep::BeepSettings;
use crate::keys::{KeyCode, MAX_KEYMAP};
use crate::unicode::InputMethod;

pub type LayerIndex = u8;

/// Sentinel meaning "this layer is not the root layer of any device".
pub const NO_DEVICE: u8 = 0xFF;

/// Maximum number of layers a configuration may define (spec.md §3).
pub const MAX_LAYERS: usize = 255;

/// Maximum codes in a `Keys` action (spec.md §3, confirmed by
/// `original_source/src/config.h`'s `MAX_SEQUENCE`).
pub const MAX_SEQUENCE: usize = 5;

/// Maximum codes in an `OverloadMod` action's held sequence (confirmed by
/// `original_source/src/config.h`'s `MAX_SEQUENCE_OVERLOAD_MOD`).
pub const MAX_SEQUENCE_OVERLOAD_MOD: usize = 2;

/// Maximum codepoints held inline by a `UKeys` action before the loader
/// must spill to the `codepoint_strings` heap via `UKeysStr`.
pub const MAX_INLINE_UKEYS: usize = 3;

/// A reference into the loader-owned heap of long Unicode codepoint
/// sequences (the `codepoint_strings` heap of spec.md §4.5).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CodepointRef {
    pub start: u32,
    pub len: u32,
}

/// Which modifier created a `LockModIf` lock — used at unlock time to
/// check whether the releasing key matches the one allowed to unlock it.
pub type ModBit = u8;

/// A single keymap slot. Tagged variant over every action kind spec.md §3
/// defines.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Defer to the layer below in the activation stack.
    Transparent,
    /// Consume the event, emit nothing.
    Disabled,
    /// Emit `code` with the input value unchanged.
    Key(KeyCode),
    /// On press/repeat emit each code in order; on release, the reverse
    /// order. `len` of the `codes` array is meaningful, the rest are
    /// zero-padding (mirrors the original's fixed-size `uint16_t[5]`).
    Keys {
        codes: [KeyCode; MAX_SEQUENCE],
        len: u8,
    },
    /// A single Unicode codepoint, emitted only on non-zero value.
    UKey(u32),
    /// Up to three codepoints stored inline.
    UKeys {
        codepoints: [u32; MAX_INLINE_UKEYS],
        len: u8,
    },
    /// A longer codepoint sequence stored in the loader's heap.
    UKeysStr(CodepointRef),
    /// Hold: emit the modifier `codes` sequence. Tap: emit `tap_code`.
    OverloadMod {
        codes: [KeyCode; MAX_SEQUENCE_OVERLOAD_MOD],
        codes_len: u8,
        tap_code: KeyCode,
        timeout_ms: u32,
    },
    /// Hold: activate `layer`. Tap: emit `tap_code`.
    OverloadLayer {
        layer: LayerIndex,
        tap_code: KeyCode,
        timeout_ms: u32,
    },
    /// Activate `layer` while held, deactivate on release.
    ShiftLayer(LayerIndex),
    /// Activate `layer`; stays active for exactly the next keypress if
    /// released without an intervening key.
    LatchLayer(LayerIndex),
    /// Like `LatchLayer` but the target layer is resolved at press time
    /// as the nearest enclosing layer's `menu_layer`.
    LatchMenu,
    /// Toggle persistent activation of `layer`. `is_overlay` activations
    /// coexist with a non-overlay lock instead of being mutually
    /// exclusive with it.
    LockLayer { layer: LayerIndex, is_overlay: bool },
    /// Lock a modifier; unlockable only by releasing `if_mod`.
    LockModIf { mod_bit: ModBit, if_mod: ModBit },
    /// Pop the matching lock activation, or every activation if `all`.
    Unlock { all: bool },
    /// Mutate the process-wide Unicode input method.
    InputMethod(InputMethod),
}

impl Default for Action {
    fn default() -> Self {
        Action::Transparent
    }
}

impl Action {
    pub const fn is_transparent(&self) -> bool {
        matches!(self, Action::Transparent)
    }

    pub fn keys(codes: &[KeyCode]) -> Self {
        assert!(codes.len() <= MAX_SEQUENCE, "too many codes for Keys action");
        let mut arr = [KeyCode::new(0); MAX_SEQUENCE];
        arr[..codes.len()].copy_from_slice(codes);
        Action::Keys {
            codes: arr,
            len: codes.len() as u8,
        }
    }

    pub fn overload_mod(codes: &[KeyCode], tap_code: KeyCode, timeout_ms: u32) -> Self {
        assert!(codes.len() <= MAX_SEQUENCE_OVERLOAD_MOD);
        let mut arr = [KeyCode::new(0); MAX_SEQUENCE_OVERLOAD_MOD];
        arr[..codes.len()].copy_from_slice(codes);
        Action::OverloadMod {
            codes: arr,
            codes_len: codes.len() as u8,
            tap_code,
            timeout_ms,
        }
    }
}

/// A pair of `(led_code, on_off)` applied on layer activation, reverted
/// on deactivation (spec.md §3).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LedSpec {
    pub led_code: u16,
    pub on: bool,
}

pub const MAX_LEDS: usize = 8;
pub const MAX_MOD_LAYERS: usize = 16;

#[derive(Clone, Debug)]
pub struct Layer {
    pub index: LayerIndex,
    /// `parent.child` for nested layers; never empty.
    pub name: String,
    pub parent_layer: Option<LayerIndex>,
    pub menu_layer: Option<LayerIndex>,
    /// `NO_DEVICE` if this layer is not a device's root layer.
    pub device_index: u8,
    pub is_layout: bool,
    /// Set by `(disable-unset-keys)`: unset slots on a device root layer
    /// finalize to `Disabled` instead of `Key(code)` passthrough.
    pub disable_unset_keys: bool,
    pub keymap: Box<[Action; MAX_KEYMAP]>,
    pub leds: Vec<LedSpec>,
    /// Indexed by `ModMask::index()`; `Some(layer)` means "swap to this
    /// sibling layer while these modifiers are held".
    pub mod_layers: [Option<LayerIndex>; MAX_MOD_LAYERS],
}

impl Layer {
    pub fn new(index: LayerIndex, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            parent_layer: None,
            menu_layer: None,
            device_index: NO_DEVICE,
            is_layout: false,
            disable_unset_keys: false,
            keymap: Box::new(std::array::from_fn(|_| Action::Transparent)),
            leds: Vec::new(),
            mod_layers: [None; MAX_MOD_LAYERS],
        }
    }

    pub fn action_at(&self, code: KeyCode) -> &Action {
        &self.keymap[code.as_usize().min(MAX_KEYMAP - 1)]
    }

    pub fn bind(&mut self, code: KeyCode, action: Action) {
        self.keymap[code.as_usize().min(MAX_KEYMAP - 1)] = action;
    }
}

/// The whole immutable model: every layer, the codepoint-string heap for
/// long `UKeysStr` sequences, and the process-wide Unicode settings that
/// aren't per-device (spec.md §4.5).
pub struct Layers {
    pub layers: Vec<Layer>,
    pub aliases: HashMap<String, LayerIndex>,
    /// Index of the shared empty `transparent_layer`, created lazily by
    /// the loader the first time an overload-mod/latch/lock action
    /// references it (spec.md §4.5).
    pub transparent_layer: Option<LayerIndex>,
    pub codepoint_strings: Vec<u32>,
    pub ukeys_delay_us: u64,
    pub compose_key: KeyCode,
    pub default_input_method: InputMethod,
    pub beep: BeepSettings,
    pub disable_automatic_reload: bool,
}

impl Layers {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            aliases: HashMap::default(),
            transparent_layer: None,
            codepoint_strings: Vec::new(),
            ukeys_delay_us: 0,
            compose_key: KeyCode::new(0),
            default_input_method: InputMethod::None,
            beep: BeepSettings::default(),
            disable_automatic_reload: false,
        }
    }

    /// Lazily creates (or returns) the shared empty layer that
    /// `OverloadMod`/`LatchLayer`/`LockModIf` activate when they have no
    /// layer effects of their own (spec.md §4.5).
    pub fn ensure_transparent_layer(&mut self) -> LayerIndex {
        if let Some(idx) = self.transparent_layer {
            return idx;
        }
        let idx = self.layers.len() as LayerIndex;
        self.layers.push(Layer::new(idx, "*transparent*"));
        self.transparent_layer = Some(idx);
        idx
    }

    pub fn get(&self, index: LayerIndex) -> &Layer {
        &self.layers[index as usize]
    }

    pub fn get_mut(&mut self, index: LayerIndex) -> &mut Layer {
        &mut self.layers[index as usize]
    }

    pub fn resolve_path(&self, path: &str) -> Option<LayerIndex> {
        self.aliases.get(path).copied()
    }

    pub fn codepoints_for(&self, r: CodepointRef) -> &[u32] {
        let start = r.start as usize;
        let end = start + r.len as usize;
        &self.codepoint_strings[start..end]
    }

    /// Finalization pass of spec.md §4.5: rewrite every `Transparent`
    /// binding on a device's root layer into an explicit `Key(code)` so
    /// the root layer is a complete keymap with no fall-through needed.
    pub fn complete_device_root_layers(&mut self) {
        for layer in &mut self.layers {
            if layer.device_index == NO_DEVICE {
                continue;
            }
            for code in 0..MAX_KEYMAP {
                if layer.keymap[code].is_transparent() {
                    layer.keymap[code] = if layer.disable_unset_keys {
                        Action::Disabled
                    } else {
                        Action::Key(KeyCode::new(code as u16))
                    };
                }
            }
        }
    }
}

impl Default for Layers {
    fn default() -> Self {
        Self::new()
    }
}
