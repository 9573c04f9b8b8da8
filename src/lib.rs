//! serialosc-supervisor exposes monome grid/arc hardware over OSC.
//!
//! A small supervisor process owns a detector child (which watches for
//! USB-serial arrivals) and spawns one subprocess per connected device.
//! Clients talk to the supervisor over OSC to list connected devices and
//! subscribe to connect/disconnect notifications; the supervisor never
//! speaks OSC to a device directly — each device's OSC port is learned
//! from its own IPC reports and relayed to clients verbatim.
//!
//! The cross-platform USB-serial enumeration/hotplug layer (`scan`,
//! `watch`) is also a reusable library surface in its own right.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[cfg(windows)]
pub mod guid;

pub mod broker;
pub mod cli;
pub mod codec;
pub mod config;
mod detect;
pub mod detector;
pub mod device;
pub mod device_table;
pub mod error;
pub mod logging;
pub mod osc_server;
#[cfg(unix)]
pub mod signals;
pub mod subprocess;
pub mod supervisor;

#[cfg(windows)]
mod windows;

#[cfg(unix)]
mod posix;

use std::collections::HashMap;

pub use detect::{Detect, DeviceInfo, EventInfo, EventType};

/// Enumerate every USB-serial device currently attached.
pub fn scan() -> std::io::Result<HashMap<String, DeviceInfo>> {
    #[cfg(unix)]
    return posix::scan();
    #[cfg(windows)]
    return windows::scan();
}

/// Begin watching for USB-serial arrivals and departures. The returned
/// [`Detect`] is a `futures::Stream`; call [`Detect::cancel`] to stop it
/// early instead of waiting for the final `None`.
pub fn watch() -> std::io::Result<Detect> {
    Detect::new()
}
