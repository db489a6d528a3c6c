//! Automatic config reload: watches the loaded configuration file via
//! inotify and feeds its fd into the same `nix::poll` loop as the
//! keyboard devices, per spec.md §5's single-threaded model and the
//! `[Settings] (disable-automatic-reload)` directive. Grounded on the
//! teacher's Linux-only `inotify = "0.10.0"` dependency; the
//! trigger-then-reload flow generalizes the teacher's
//! `live_reload_requested` flag (`src/kanata/mod.rs`) to a flag checked
//! at a quiescent moment in this crate's poll loop, rather than from a
//! background debouncer thread.

use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use inotify::{Inotify, WatchMask};

/// Watches the directory containing the configuration file. Editors
/// overwhelmingly save via rename-into-place, which fires on the
/// directory entry rather than `IN_MODIFY` on the original inode, so
/// the directory is what gets watched; events are then filtered down
/// to the one file name we care about.
pub struct ConfigWatcher {
    inotify: Inotify,
    file_name: std::ffi::OsString,
    buffer: [u8; 1024],
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("config path {} has no file name", path.display()))?
            .to_os_string();
        let watch_dir: PathBuf = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut inotify = Inotify::init().map_err(|e| anyhow::anyhow!("inotify init failed: {e}"))?;
        inotify
            .watches()
            .add(&watch_dir, WatchMask::MODIFY | WatchMask::CLOSE_WRITE | WatchMask::MOVED_TO | WatchMask::CREATE)
            .map_err(|e| anyhow::anyhow!("watching {}: {e}", watch_dir.display()))?;
        Ok(Self { inotify, file_name, buffer: [0; 1024] })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.inotify.as_raw_fd()
    }

    /// Drains pending inotify events and reports whether any of them
    /// touched the watched config file.
    pub fn poll_changed(&mut self) -> anyhow::Result<bool> {
        let mut changed = false;
        let events = self.inotify.read_events(&mut self.buffer).map_err(|e| anyhow::anyhow!("reading inotify events: {e}"))?;
        for event in events {
            if event.name.map(|n| n == self.file_name.as_os_str()).unwrap_or(false) {
                changed = true;
            }
        }
        Ok(changed)
    }
}
