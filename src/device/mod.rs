//! The device subprocess role: invoked as `serialosc <devnode>`. Owning the
//! actual monome wire protocol is out of scope here; this module implements
//! just the IPC contract the supervisor depends on: announce device
//! identity and OSC port, signal readiness, then stay alive until killed.

use std::io;
use std::net::UdpSocket;

use tracing::info;

use crate::codec::IpcMessage;

/// Run the device role for `devnode`. Binds an ephemeral OSC port, reports
/// it to the supervisor, and blocks forever (the supervisor's exit
/// callback on our process exit is what it uses to learn of disconnection).
pub fn run(devnode: &str) -> io::Result<()> {
    info!(devnode, "device subprocess starting");
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let socket = UdpSocket::bind(("127.0.0.1", 0))?;
    let port = socket.local_addr()?.port();
    let (serial, friendly) = identify(devnode);

    IpcMessage::DeviceInfo {
        serial: serial.clone(),
        friendly: friendly.clone(),
    }
    .write_to(&mut out)?;
    IpcMessage::OscPortChange { port }.write_to(&mut out)?;
    IpcMessage::DeviceReady.write_to(&mut out)?;
    info!(devnode, serial, friendly, port, "device ready");

    // Park this process. Real device I/O (talking the monome wire protocol
    // over `devnode` and relaying it as OSC on `socket`) is handled by a
    // dedicated collaborator process; our contract with the supervisor ends
    // at the readiness handshake above.
    loop {
        std::thread::park();
    }
}

fn identify(devnode: &str) -> (String, String) {
    // Without the actual monome handshake we cannot learn a device's real
    // serial or model name; derive stable placeholders from the devnode so
    // repeated runs against the same port produce the same identity.
    let slug = devnode.rsplit(['/', '\\']).next().unwrap_or(devnode);
    (format!("m{slug}"), format!("monome ({slug})"))
}
