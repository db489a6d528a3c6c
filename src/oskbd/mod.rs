//! Device I/O shim: the boundary between the engine core (which only
//! knows `KeyCode`/`KeyValue`) and the real `evdev`/`uinput` devices
//! (spec.md §1, "LED I/O wire formats / specific evdev ioctl sequences"
//! are out of core scope, but the shim itself is ambient plumbing every
//! real build needs).

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "linux")]
pub use linux::{KbdIn, KbdOut};
