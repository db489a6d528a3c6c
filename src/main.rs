//! CLI entry point: argument parsing, logging setup, config discovery,
//! and the single-threaded `poll`-based event loop (spec.md §5, §6).
//! Grounded on the teacher's `src/main.rs` for the overall shape (clap
//! args, `simplelog` init, a `--check`-only early exit) generalized away
//! from its two-thread mpsc pipeline to one cooperative loop, per the
//! single-threaded model spec.md §5 requires.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::Parser;
use simplelog::{format_description, ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

use keyremap_core::beep::Beep;
use keyremap_core::cfg;
use keyremap_core::device::InputDevice;
use keyremap_core::leds::LedSink;
use keyremap_core::oskbd::linux::{device_name, list_keyboard_devices, split_output_and_leds, KbdIn, KbdOut, PcSpeakerBeep};
use keyremap_core::output::KeyOutput;
use keyremap_core::reload::ConfigWatcher;
use keyremap_core::unicode::{NullUnrepresentable, RealSleeper, Sleeper, UnrepresentableCodepointSink};
use keyremap_core::Engine;

#[derive(Parser, Debug)]
#[command(author, version, about = "Layered userspace keyboard remapper")]
struct Args {
    /// Configuration file. Defaults to $HOME/.config/touchcursor/touchcursor.conf,
    /// falling back to /etc/touchcursor/touchcursor.conf.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration file and exit.
    #[arg(long)]
    check: bool,

    /// Disable logging, except for errors.
    #[arg(short, long)]
    quiet: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging; implies --debug.
    #[arg(short, long)]
    trace: bool,

    /// List grabbable keyboard devices and exit.
    #[arg(long)]
    list_devices: bool,
}

fn init_logging(args: &Args) {
    let level = match (args.trace, args.debug, args.quiet) {
        (true, _, _) => LevelFilter::Trace,
        (_, true, _) => LevelFilter::Debug,
        (_, _, true) => LevelFilter::Error,
        _ => LevelFilter::Info,
    };
    let mut log_cfg = ConfigBuilder::new();
    if let Err(e) = log_cfg.set_time_offset_to_local() {
        eprintln!("warning: could not set log timezone to local: {e:?}");
    }
    log_cfg.set_time_format_custom(format_description!(version = 2, "[hour]:[minute]:[second].[subsecond digits:3]"));
    CombinedLogger::init(vec![TermLogger::new(level, log_cfg.build(), TerminalMode::Mixed, ColorChoice::Auto)])
        .expect("logger can init");
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_devices {
        for path in list_keyboard_devices().context("enumerating /dev/input")? {
            println!("{}", path.display());
        }
        return Ok(());
    }

    init_logging(&args);
    log::info!("keyremapd v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = cfg::discover_path(args.config.as_deref())
        .context("no configuration file found (pass --config, or see spec.md §6 for the default search path)")?;
    log::info!("loading configuration from {}", config_path.display());

    let result = cfg::load(&config_path)?;
    if !result.errors.is_empty() {
        for e in &result.errors {
            log::error!("{e}");
        }
        if args.check {
            std::process::exit(1);
        }
        bail!("configuration has {} error(s); aborting", result.errors.len());
    }

    if args.check {
        log::info!("configuration is valid: {} layer(s), {} device(s)", result.layers.layers.len(), result.devices.len());
        return Ok(());
    }

    if result.devices.is_empty() {
        bail!("configuration defines no devices to grab");
    }

    run(config_path, result.layers, result.devices)
}

/// Opens every configured device for grabbing, builds one virtual output
/// device, and runs the cooperative `poll` loop until a device closes or
/// a fatal I/O error occurs (spec.md §5).
fn run(config_path: PathBuf, layers: keyremap_core::layers::Layers, device_cfgs: Vec<InputDevice>) -> Result<()> {
    let mut candidates = list_keyboard_devices().context("enumerating /dev/input to find configured devices")?;

    let mut inputs = Vec::with_capacity(device_cfgs.len());
    for cfg_device in &device_cfgs {
        let pos = candidates
            .iter()
            .position(|p| device_name(p).map(|n| n == cfg_device.name).unwrap_or(false))
            .with_context(|| format!("no input device found matching '{}'", cfg_device.name))?;
        let path = candidates.remove(pos);
        inputs.push(KbdIn::open(&path).with_context(|| format!("opening {}", path.display()))?);
        log::info!("grabbed {} as '{}'", path.display(), cfg_device.name);
    }

    let disable_reload = layers.disable_automatic_reload;
    let output = KbdOut::new().context("creating virtual output device")?;
    let (output, leds): (Box<dyn KeyOutput>, Box<dyn LedSink>) = split_output_and_leds(output);
    let beep: Box<dyn Beep> = Box::new(PcSpeakerBeep::open());
    let sleeper: Box<dyn Sleeper> = Box::new(RealSleeper);
    let unrep: Box<dyn UnrepresentableCodepointSink> = Box::new(NullUnrepresentable);
    let mut engine = Engine::new(layers, device_cfgs, output, leds, beep, sleeper, unrep);

    let watcher = if disable_reload {
        log::info!("automatic config reload disabled via (disable-automatic-reload)");
        None
    } else {
        match ConfigWatcher::new(&config_path) {
            Ok(w) => Some(w),
            Err(e) => {
                log::warn!("could not start config file watcher, automatic reload disabled: {e}");
                None
            }
        }
    };

    event_loop(&mut engine, &mut inputs, &config_path, watcher)
}

fn event_loop(engine: &mut Engine, inputs: &mut [KbdIn], config_path: &std::path::Path, mut watcher: Option<ConfigWatcher>) -> Result<()> {
    use nix::poll::{poll, PollFd, PollFlags};

    loop {
        let mut poll_fds: Vec<PollFd> = inputs.iter().map(|kin| PollFd::new(kin.as_raw_fd(), PollFlags::POLLIN)).collect();
        let watcher_slot = watcher.as_ref().map(|w| {
            poll_fds.push(PollFd::new(w.as_raw_fd(), PollFlags::POLLIN));
            poll_fds.len() - 1
        });
        let n = poll(&mut poll_fds, -1).context("poll on input devices")?;
        if n <= 0 {
            continue;
        }
        for (i, pfd) in poll_fds.iter().enumerate() {
            if Some(i) == watcher_slot {
                continue;
            }
            let Some(revents) = pfd.revents() else { continue };
            if !revents.contains(PollFlags::POLLIN) {
                continue;
            }
            loop {
                match inputs[i].read() {
                    Ok(Some((code, value, ts))) => {
                        let ts = if ts == 0 { now_ms() } else { ts };
                        engine.process_key(i, code, value, ts);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("read error on device {i}: {e}");
                        bail!("device {i} closed unexpectedly");
                    }
                }
            }
        }

        if let Some(slot) = watcher_slot {
            let signaled = poll_fds[slot].revents().map(|r| r.contains(PollFlags::POLLIN)).unwrap_or(false);
            if signaled {
                let changed = watcher.as_mut().expect("watcher present when watcher_slot is Some").poll_changed();
                match changed {
                    Ok(true) => try_reload(engine, config_path),
                    Ok(false) => {}
                    Err(e) => log::warn!("error reading config watcher events: {e}"),
                }
            }
        }
    }
}

/// Reloads the configuration at a quiescent point between dispatched
/// events (spec.md §5). The device count must match the currently
/// grabbed set; a reload that adds or removes devices requires a
/// restart instead, since it would need re-grabbing `/dev/input` nodes.
fn try_reload(engine: &mut Engine, config_path: &std::path::Path) {
    log::info!("config file changed, reloading");
    let result = match cfg::load(config_path) {
        Ok(r) => r,
        Err(e) => {
            log::error!("reload: failed to read {}: {e}", config_path.display());
            return;
        }
    };
    if !result.errors.is_empty() {
        for e in &result.errors {
            log::error!("reload: {e}");
        }
        log::error!("reload aborted: configuration has {} error(s)", result.errors.len());
        return;
    }
    if result.devices.len() != engine.devices.len() {
        log::error!(
            "reload aborted: device count changed ({} -> {}); restart to pick up new devices",
            engine.devices.len(),
            result.devices.len()
        );
        return;
    }
    engine.reload(result.layers, result.devices);
    log::info!("configuration reloaded");
}
