//! The detector child process: invoked as `serialosc -d`, it enumerates
//! already-connected devices, then reports every device arrival to the
//! supervisor over its inherited stdout pipe until that pipe is closed.

use std::io;

use futures::StreamExt;
use tracing::{info, trace, warn};

use crate::codec::IpcMessage;
use crate::detect::{Detect, EventType};

/// Run the detector role. Blocks until the supervisor closes the pipe (or
/// the underlying OS listener fails), reporting devices as they appear.
///
/// Departures are not reported: the supervisor treats a device
/// subprocess's exit as the authoritative disconnection signal, so the
/// detector only needs to announce arrivals.
pub fn run() -> io::Result<()> {
    info!("detector starting");
    let stdout = io::stdout();
    futures::executor::block_on(run_with(stdout.lock()))
}

async fn run_with<W: io::Write>(mut out: W) -> io::Result<()> {
    let mut detect = Detect::new()?;
    while let Some(event) = detect.next().await {
        let event = match event {
            Ok(event) => event,
            Err(error) => {
                warn!(?error, "detector event stream failed");
                return Err(error);
            }
        };
        if !matches!(event.event, EventType::Add) {
            continue;
        }
        trace!(devnode = event.port.as_str(), "reporting device connection");
        let msg = IpcMessage::DeviceConnection { devnode: event.port };
        if let Err(error) = msg.write_to(&mut out) {
            warn!(?error, "failed to write to supervisor pipe, exiting");
            return Err(error);
        }
    }
    info!("detector event stream ended, exiting");
    Ok(())
}
