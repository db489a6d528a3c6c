//! Configuration loader: the INI-like format of spec.md §6, producing
//! the in-memory `Layers`/`InputDevice` model the engine consumes
//! (spec.md §4.5). Grounded on the teacher's `src/cfg/mod.rs` in shape
//! only (a line-oriented builder accumulating errors rather than
//! failing fast) — the grammar itself is this format's own, not the
//! teacher's s-expression `defsrc`/`deflayer` DSL.

mod action;
mod error;
mod keynames;
mod lexer;

pub use error::{ConfigError, ErrorSink};

use rustc_hash::FxHashMap as HashMap;
use std::path::Path;

use crate::device::InputDevice;
use crate::keys::KeyCode;
use crate::layers::{Action, Layer, LayerIndex, Layers, LedSpec};
use crate::unicode::InputMethod;

pub struct LoadResult {
    pub layers: Layers,
    pub devices: Vec<InputDevice>,
    pub errors: Vec<ConfigError>,
}

/// Finds the configuration file per spec.md §6's discovery order, unless
/// `override_path` is given (the CLI's `--config`).
pub fn discover_path(override_path: Option<&Path>) -> Option<std::path::PathBuf> {
    if let Some(p) = override_path {
        return Some(p.to_path_buf());
    }
    if let Some(home) = dirs::home_dir() {
        let p = home.join(".config/touchcursor/touchcursor.conf");
        if p.exists() {
            return Some(p);
        }
    }
    let fallback = Path::new("/etc/touchcursor/touchcursor.conf");
    if fallback.exists() {
        return Some(fallback.to_path_buf());
    }
    None
}

pub fn load(path: &Path) -> anyhow::Result<LoadResult> {
    let text = std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    Ok(parse(&text))
}

#[derive(Default)]
struct DeviceBuilder {
    name: String,
    disambiguator: Option<u32>,
    root_layer: Option<LayerIndex>,
    inherit_remap: bool,
    local_remap: Vec<(KeyCode, KeyCode)>,
}

use action::RefKind;

struct PendingRef {
    layer: LayerIndex,
    code: KeyCode,
    path: String,
    kind: RefKind,
    line: usize,
}

struct PendingCopy {
    dest_layer: LayerIndex,
    path: String,
    line: usize,
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Section {
    None,
    Device,
    Remap,
    Hyper,
    Bindings,
    Settings,
    Layer,
}

struct LayerFrame {
    indent: usize,
    layer: LayerIndex,
}

/// Tracks which enclosing top-level layer a nested `[Remap]` sub-section
/// belongs to, so its `FROM=TO` lines can be attached to the right
/// device once that layer's `(device ...)` command is seen.
struct Builder {
    layers: Layers,
    devices: Vec<DeviceBuilder>,
    pending_refs: Vec<PendingRef>,
    pending_copies: Vec<PendingCopy>,
    global_remap: Vec<(KeyCode, KeyCode)>,
    hyper_key: Option<KeyCode>,
    hyper_layer: Option<LayerIndex>,
    legacy_bindings: Vec<(KeyCode, Vec<KeyCode>)>,
    legacy_devices: Vec<DeviceBuilder>,
    legacy_root_layer: Option<LayerIndex>,
}

impl Builder {
    fn new() -> Self {
        Self {
            layers: Layers::new(),
            devices: Vec::new(),
            pending_refs: Vec::new(),
            pending_copies: Vec::new(),
            global_remap: Vec::new(),
            hyper_key: None,
            hyper_layer: None,
            legacy_bindings: Vec::new(),
            legacy_devices: Vec::new(),
            legacy_root_layer: None,
        }
    }

    fn new_layer(&mut self, name: String, parent: Option<LayerIndex>) -> LayerIndex {
        let idx = self.layers.layers.len() as LayerIndex;
        let mut layer = Layer::new(idx, name.clone());
        layer.parent_layer = parent;
        self.layers.layers.push(layer);
        self.layers.aliases.insert(name, idx);
        idx
    }

    fn legacy_root(&mut self) -> LayerIndex {
        if let Some(idx) = self.legacy_root_layer {
            return idx;
        }
        let idx = self.new_layer("base".to_string(), None);
        self.legacy_root_layer = Some(idx);
        idx
    }
}

/// Parses a whole configuration file's text into a `Layers` model and
/// the devices it names, accumulating (not failing on) per-line errors.
pub fn parse(text: &str) -> LoadResult {
    let mut errors = ErrorSink::default();
    let mut b = Builder::new();
    let mut section = Section::None;
    let mut layer_stack: Vec<LayerFrame> = Vec::new();
    let mut remap_target_layer: Option<LayerIndex> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let code_part = lexer::strip_comment(raw_line);
        if code_part.trim().is_empty() {
            continue;
        }
        let indent = lexer::leading_indent(raw_line);
        let trimmed = code_part.trim();

        if indent == 0 && trimmed.starts_with('[') && trimmed.ends_with(']') {
            let name = &trimmed[1..trimmed.len() - 1];
            layer_stack.clear();
            remap_target_layer = None;
            match name {
                "Device" => section = Section::Device,
                "Remap" => section = Section::Remap,
                "Hyper" => section = Section::Hyper,
                "Bindings" => section = Section::Bindings,
                "Settings" => section = Section::Settings,
                _ => {
                    let layer_name = name.to_ascii_lowercase();
                    if layer_name.is_empty() {
                        errors.push(line_no, "layer name cannot be empty");
                        section = Section::None;
                        continue;
                    }
                    let idx = b.new_layer(layer_name, None);
                    layer_stack.push(LayerFrame { indent: 0, layer: idx });
                    section = Section::Layer;
                }
            }
            continue;
        }

        match section {
            Section::Device => parse_device_line(&mut b, trimmed, line_no),
            Section::Remap => parse_remap_line(&mut b.global_remap, trimmed, line_no, &mut errors),
            Section::Hyper => parse_hyper_line(&mut b, trimmed, line_no, &mut errors),
            Section::Bindings => parse_bindings_line(&mut b, trimmed, line_no, &mut errors),
            Section::Settings => parse_settings_line(&mut b.layers, trimmed, line_no, &mut errors),
            Section::Layer => parse_layer_line(
                &mut b,
                &mut layer_stack,
                &mut remap_target_layer,
                raw_line,
                trimmed,
                indent,
                line_no,
                &mut errors,
            ),
            Section::None => errors.push(line_no, "binding outside of any section"),
        }
    }

    resolve_pending(&mut b, &mut errors);
    finalize(&mut b, &mut errors);

    LoadResult { layers: b.layers, devices: b.devices.into_iter().chain(b.legacy_devices).map(|d| d.into_device()).collect(), errors: errors.errors }
}

impl DeviceBuilder {
    fn into_device(self) -> InputDevice {
        let root = self.root_layer.unwrap_or(0);
        let mut device = InputDevice::new(self.name, root);
        device.disambiguator = self.disambiguator;
        device.inherit_remap = self.inherit_remap;
        for (from, to) in self.local_remap {
            device.set_remap(from, to);
        }
        device
    }
}

fn parse_device_line(b: &mut Builder, line: &str, line_no: usize) {
    let (name, disambiguator) = match line.split_once(':') {
        Some((n, suffix)) => (n.trim().to_string(), suffix.trim().parse::<u32>().ok()),
        None => (line.trim().to_string(), None),
    };
    if name.is_empty() {
        return;
    }
    let _ = line_no;
    b.legacy_devices.push(DeviceBuilder {
        name,
        disambiguator,
        root_layer: None, // filled in at finalize once the legacy root layer exists
        inherit_remap: false,
        local_remap: Vec::new(),
    });
}

fn parse_remap_line(out: &mut Vec<(KeyCode, KeyCode)>, line: &str, line_no: usize, errors: &mut ErrorSink) {
    let Some((from, to)) = lexer::split_once_top_level(line, '=') else {
        errors.push(line_no, format!("malformed remap entry: {line}"));
        return;
    };
    match (keynames::parse_key(from), keynames::parse_key(to)) {
        (Some(f), Some(t)) => out.push((f, t)),
        _ => errors.push(line_no, format!("unknown key name in remap: {line}")),
    }
}

fn parse_hyper_line(b: &mut Builder, line: &str, line_no: usize, errors: &mut ErrorSink) {
    let Some((key, value)) = lexer::split_once_top_level(line, '=') else {
        errors.push(line_no, format!("malformed [Hyper] entry: {line}"));
        return;
    };
    if key != "key" {
        errors.push(line_no, format!("unknown [Hyper] key: {key}"));
        return;
    }
    match keynames::parse_key(value) {
        Some(code) => b.hyper_key = Some(code),
        None => errors.push(line_no, format!("unknown key name: {value}")),
    }
}

fn parse_bindings_line(b: &mut Builder, line: &str, line_no: usize, errors: &mut ErrorSink) {
    let Some((from, codes)) = lexer::split_once_top_level(line, '=') else {
        errors.push(line_no, format!("malformed [Bindings] entry: {line}"));
        return;
    };
    let Some(from_code) = keynames::parse_key(from) else {
        errors.push(line_no, format!("unknown key name: {from}"));
        return;
    };
    let parts = lexer::split_top_level_list(codes, ',');
    if parts.len() > 4 {
        errors.push(line_no, "[Bindings] entries support at most 4 codes");
        return;
    }
    let mut out = Vec::with_capacity(parts.len());
    for p in &parts {
        match keynames::parse_key(p) {
            Some(c) => out.push(c),
            None => {
                errors.push(line_no, format!("unknown key name: {p}"));
                return;
            }
        }
    }
    b.legacy_bindings.push((from_code, out));
}

fn parse_settings_line(layers: &mut Layers, line: &str, line_no: usize, errors: &mut ErrorSink) {
    if !(line.starts_with('(') && line.ends_with(')')) {
        errors.push(line_no, format!("malformed setting: {line}"));
        return;
    }
    let inner = &line[1..line.len() - 1];
    let mut parts = inner.split_whitespace();
    let Some(directive) = parts.next() else {
        return;
    };
    let rest: Vec<&str> = parts.collect();
    match directive {
        "disable-automatic-reload" => layers.disable_automatic_reload = true,
        "input-method" => match rest.first().map(|s| s.to_ascii_lowercase()) {
            Some(m) if m == "none" => layers.default_input_method = InputMethod::None,
            Some(m) if m == "compose" => layers.default_input_method = InputMethod::Compose,
            Some(m) if m == "iso14755" => layers.default_input_method = InputMethod::Iso14755,
            Some(m) if m == "gtk" => layers.default_input_method = InputMethod::Gtk,
            _ => errors.push(line_no, "unknown input-method"),
        },
        "unicode-compose-key" => match rest.first().and_then(|s| keynames::parse_key(s)) {
            Some(code) => layers.compose_key = code,
            None => errors.push(line_no, "unknown unicode-compose-key key name"),
        },
        "ukeys-delay" => match rest.first().and_then(|s| s.parse::<u64>().ok()) {
            Some(us) => layers.ukeys_delay_us = us,
            None => errors.push(line_no, "ukeys-delay expects a number of microseconds"),
        },
        "beep-on-disabled-press" => match parse_freq_ms(&rest) {
            Some(v) => layers.beep.on_disabled_press = Some(v),
            None => errors.push(line_no, "beep-on-disabled-press expects FREQ MS"),
        },
        "beep-on-invalid-codepoint" => match parse_freq_ms(&rest) {
            Some(v) => layers.beep.on_invalid_codepoint = Some(v),
            None => errors.push(line_no, "beep-on-invalid-codepoint expects FREQ MS"),
        },
        "default-layer-leds" | "modifier-layer-leds" => {
            // Accepted so configs using them still load, but deliberately
            // a no-op: no argument grammar or behavior is defined for
            // these anywhere, and there's no prior implementation to
            // match (see DESIGN.md's Open Question decisions).
        }
        other => errors.push(line_no, format!("unknown setting: {other}")),
    }
}

fn parse_freq_ms(rest: &[&str]) -> Option<(u32, u32)> {
    let freq = rest.first()?.parse::<u32>().ok()?;
    let ms = rest.get(1)?.parse::<u32>().ok()?;
    Some((freq, ms))
}

fn mod_combo_mask(name: &str) -> Option<u8> {
    use crate::keys::ModMask;
    let mut mask = 0u8;
    for part in name.split('+') {
        mask |= match part {
            "SHIFT" => ModMask::SHIFT,
            "CTRL" => ModMask::CTRL,
            "ALT" => ModMask::ALT,
            "META" => ModMask::META,
            _ => return None,
        };
    }
    Some(mask)
}

#[allow(clippy::too_many_arguments)]
fn parse_layer_line(
    b: &mut Builder,
    layer_stack: &mut Vec<LayerFrame>,
    remap_target_layer: &mut Option<LayerIndex>,
    raw_line: &str,
    trimmed: &str,
    indent: usize,
    line_no: usize,
    errors: &mut ErrorSink,
) {
    let _ = raw_line;
    while layer_stack.len() > 1 && layer_stack.last().unwrap().indent >= indent {
        layer_stack.pop();
        if remap_target_layer.is_some() {
            *remap_target_layer = None;
        }
    }
    let current = layer_stack.last().unwrap().layer;

    if let Some(rt) = *remap_target_layer {
        if let Some((from, to)) = lexer::split_once_top_level(trimmed, '=') {
            parse_remap_into_device(b, rt, from, to, line_no, errors);
        } else {
            errors.push(line_no, format!("malformed device-remap entry: {trimmed}"));
        }
        return;
    }

    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        let name = &trimmed[1..trimmed.len() - 1];
        if name == "Remap" {
            *remap_target_layer = Some(current);
            layer_stack.push(LayerFrame { indent, layer: current });
            return;
        }
        if name == "Menu" {
            let child_name = format!("{}.menu", b.layers.get(current).name);
            let child = b.new_layer(child_name, Some(current));
            b.layers.get_mut(current).menu_layer = Some(child);
            layer_stack.push(LayerFrame { indent, layer: child });
            return;
        }
        if let Some(mask) = mod_combo_mask(name) {
            let child_name = format!("{}.[{}]", b.layers.get(current).name, name);
            let child = b.new_layer(child_name, Some(current));
            b.layers.get_mut(current).mod_layers[(mask & 0b1111) as usize] = Some(child);
            layer_stack.push(LayerFrame { indent, layer: child });
            return;
        }
        let child_name = format!("{}.{}", b.layers.get(current).name, name.to_ascii_lowercase());
        let child = b.new_layer(child_name, Some(current));
        layer_stack.push(LayerFrame { indent, layer: child });
        return;
    }

    if trimmed.starts_with('(') && lexer::split_once_top_level(trimmed, '=').is_none() {
        parse_command(b, current, trimmed, line_no, errors);
        return;
    }

    let Some((key, action_text)) = lexer::split_once_top_level(trimmed, '=') else {
        errors.push(line_no, format!("malformed binding: {trimmed}"));
        return;
    };
    let Some(code) = keynames::parse_key(key) else {
        errors.push(line_no, format!("unknown key name: {key}"));
        return;
    };
    match action::parse_action(&mut b.layers, action_text, code) {
        Ok(action::ParsedAction::Resolved(act)) => b.layers.get_mut(current).bind(code, act),
        Ok(action::ParsedAction::NeedsLayer { path, kind }) => {
            b.pending_refs.push(PendingRef { layer: current, code, path: resolve_relative(&b.layers, current, &path), kind, line: line_no });
        }
        Err(msg) => errors.push(line_no, msg),
    }
}

fn resolve_relative(layers: &Layers, current: LayerIndex, path: &str) -> String {
    if let Some(rel) = path.strip_prefix('.') {
        let _ = rel;
        format!("{}{}", layers.get(current).name, path)
    } else {
        path.to_string()
    }
}

fn parse_remap_into_device(b: &mut Builder, owning_layer: LayerIndex, from: &str, to: &str, line_no: usize, errors: &mut ErrorSink) {
    match (keynames::parse_key(from), keynames::parse_key(to)) {
        (Some(f), Some(t)) => {
            if let Some(dev) = b.devices.iter_mut().find(|d| d.root_layer == Some(owning_layer)) {
                dev.local_remap.push((f, t));
            } else {
                errors.push(line_no, "[Remap] sub-section used before (device ...) in this layer");
            }
        }
        _ => errors.push(line_no, format!("unknown key name in remap: {from}={to}")),
    }
}

fn parse_command(b: &mut Builder, layer: LayerIndex, cmd: &str, line_no: usize, errors: &mut ErrorSink) {
    let inner = &cmd[1..cmd.len().saturating_sub(1).max(1)];
    let inner = inner.strip_suffix(')').unwrap_or(inner);
    let mut parts = inner.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or("").trim();
    match name {
        "device" => {
            let spec = lexer::strip_quotes(rest).unwrap_or(rest);
            let (dev_name, disambiguator) = match spec.split_once(':') {
                Some((n, s)) => (n.to_string(), s.parse::<u32>().ok()),
                None => (spec.to_string(), None),
            };
            b.devices.push(DeviceBuilder {
                name: dev_name,
                disambiguator,
                root_layer: Some(layer),
                inherit_remap: false,
                local_remap: Vec::new(),
            });
            b.layers.get_mut(layer).device_index = (b.devices.len() - 1) as u8;
        }
        "inherit-remap" => {
            if let Some(dev) = b.devices.iter_mut().find(|d| d.root_layer == Some(layer)) {
                dev.inherit_remap = true;
            } else {
                errors.push(line_no, "(inherit-remap) used before (device ...) in this layer");
            }
        }
        "is-layout" => b.layers.get_mut(layer).is_layout = true,
        "disable-unset-keys" => b.layers.get_mut(layer).disable_unset_keys = true,
        "leds" => parse_leds(&mut b.layers.get_mut(layer).leds, rest, line_no, errors),
        "copy-from-layer" => b.pending_copies.push(PendingCopy { dest_layer: layer, path: rest.trim_matches(|c| c == '"' || c == '\'').to_string(), line: line_no }),
        other => errors.push(line_no, format!("unknown command: ({other})")),
    }
}

fn parse_leds(out: &mut Vec<LedSpec>, rest: &str, line_no: usize, errors: &mut ErrorSink) {
    for entry in lexer::split_top_level_list(rest, ',') {
        let Some((code_s, state_s)) = entry.split_once('=').or_else(|| entry.split_once(' ')) else {
            errors.push(line_no, format!("malformed led spec: {entry}"));
            continue;
        };
        let Ok(led_code) = code_s.trim().parse::<u16>() else {
            errors.push(line_no, format!("led code must be numeric: {code_s}"));
            continue;
        };
        let on = matches!(state_s.trim(), "on" | "1" | "true");
        out.push(LedSpec { led_code, on });
    }
}

fn resolve_pending(b: &mut Builder, errors: &mut ErrorSink) {
    for r in std::mem::take(&mut b.pending_refs) {
        let Some(target) = b.layers.resolve_path(&r.path) else {
            errors.push(r.line, format!("unresolved layer path: {}", r.path));
            continue;
        };
        let action = match r.kind {
            RefKind::OverloadLayer { tap, timeout_ms } => Action::OverloadLayer { layer: target, tap_code: tap, timeout_ms },
            RefKind::Shift => Action::ShiftLayer(target),
            RefKind::Latch => Action::LatchLayer(target),
            RefKind::Lock { is_overlay } => Action::LockLayer { layer: target, is_overlay },
        };
        b.layers.get_mut(r.layer).bind(r.code, action);
    }
    for c in std::mem::take(&mut b.pending_copies) {
        let Some(src) = b.layers.resolve_path(&c.path) else {
            errors.push(c.line, format!("unresolved copy-from-layer path: {}", c.path));
            continue;
        };
        let src_keymap = b.layers.get(src).keymap.clone();
        let dest = b.layers.get_mut(c.dest_layer);
        for code in 0..crate::keys::MAX_KEYMAP {
            if dest.keymap[code].is_transparent() {
                dest.keymap[code] = src_keymap[code].clone();
            }
        }
    }
}

fn finalize(b: &mut Builder, errors: &mut ErrorSink) {
    // Legacy [Device] entries share one synthesized root layer, wired up
    // through [Hyper] + [Bindings] (spec.md §4.5 & §9, "degenerate
    // encoding of one layer with one overload action").
    if !b.legacy_devices.is_empty() || !b.legacy_bindings.is_empty() {
        let root = b.legacy_root();
        for dev in &mut b.legacy_devices {
            dev.root_layer = Some(root);
        }
        if let (Some(hyper_key), false) = (b.hyper_key, b.legacy_bindings.is_empty()) {
            let hyper_layer_name = format!("{}.hyper", b.layers.get(root).name);
            let hyper_layer = b.new_layer(hyper_layer_name, Some(root));
            for (from, codes) in &b.legacy_bindings {
                b.layers.get_mut(hyper_layer).bind(*from, Action::keys(codes));
            }
            b.layers.get_mut(root).bind(hyper_key, Action::OverloadLayer { layer: hyper_layer, tap_code: hyper_key, timeout_ms: 0 });
            b.hyper_layer = Some(hyper_layer);
        } else if b.hyper_key.is_none() && !b.legacy_bindings.is_empty() {
            errors.push(0, "[Bindings] present without a [Hyper] key");
        }
    }

    b.layers.complete_device_root_layers();

    // remap defaults to identity (InputDevice::new already initializes
    // identity; apply the global table, then `inherit_remap` overlays it
    // onto devices that opted in, then each device's own local remap
    // entries, which take precedence, per spec.md §4.5).
    let global_remap = b.global_remap.clone();
    for dev in b.devices.iter_mut().chain(b.legacy_devices.iter_mut()) {
        if dev.inherit_remap {
            let mut merged = global_remap.clone();
            merged.extend(dev.local_remap.drain(..));
            dev.local_remap = merged;
        }
    }

    // Re-key the legacy [Bindings] layer through the global remap so
    // older configs' bindings still work after a remap (spec.md §4.5).
    if let Some(hyper_layer) = b.hyper_layer {
        if !global_remap.is_empty() {
            let remap_table: HashMap<KeyCode, KeyCode> = global_remap.iter().copied().collect();
            let layer = b.layers.get_mut(hyper_layer);
            let old = layer.keymap.clone();
            for code in 0..crate::keys::MAX_KEYMAP {
                if let Some(&to) = remap_table.get(&KeyCode::new(code as u16)) {
                    layer.keymap[to.as_usize().min(crate::keys::MAX_KEYMAP - 1)] = old[code].clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_layer_and_device() {
        let text = r#"
[touchcursor]
    j=left
    k=down

[base]
    (device "testkbd")
    space=(overload touchcursor tap=space timeout=200)
"#;
        let result = parse(text);
        assert!(result.errors.is_empty(), "unexpected errors: {:?}", result.errors.iter().map(|e| &e.message).collect::<Vec<_>>());
        assert_eq!(result.devices.len(), 1);
        assert_eq!(result.devices[0].name, "testkbd");
        let base = result.layers.resolve_path("base").unwrap();
        let space = keynames::parse_key("space").unwrap();
        match result.layers.get(base).action_at(space) {
            Action::OverloadLayer { .. } => {}
            other => panic!("expected OverloadLayer, got {other:?}"),
        }
    }

    #[test]
    fn unresolvable_layer_path_is_reported_not_fatal() {
        let text = r#"
[base]
    (device "kbd")
    j=(shift nosuchlayer)
"#;
        let result = parse(text);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("unresolved"));
    }

    #[test]
    fn settings_section_applies() {
        let text = "[Settings]\n(input-method gtk)\n(ukeys-delay 500)\n";
        let result = parse(text);
        assert!(result.errors.is_empty());
        assert_eq!(result.layers.default_input_method, InputMethod::Gtk);
        assert_eq!(result.layers.ukeys_delay_us, 500);
    }
}
