//! The supervisor core: owns the event loop, routes IPC messages from the
//! detector and device children, tracks the device table, and drives the
//! OSC control surface and notification broker.
//!
//! This is the Rust analog of the original single-threaded `libuv` run
//! loop: one `mio::Poll`, one pass per turn over every readable source,
//! followed by a notification drain.

use std::collections::HashMap;
use std::io;

use mio::{Events, Token};
use tracing::{info, trace, warn};

use crate::broker::NotificationBroker;
use crate::codec::IpcMessage;
use crate::device_table::{DeviceRecord, DeviceTable};
use crate::error::{DecodeError, SupervisorError};
use crate::osc_server::OscServer;
use crate::signals::SignalSource;
use crate::subprocess::{ChildRole, ManagedChild};

const TOKEN_OSC: Token = Token(0);
const TOKEN_SIGNAL: Token = Token(1);
const TOKEN_DETECTOR: Token = Token(2);
const FIRST_DEVICE_TOKEN: usize = 3;

pub struct Supervisor {
    poll: mio::Poll,
    osc: OscServer,
    signals: SignalSource,
    detector: Option<ManagedChild>,
    device_children: HashMap<Token, ManagedChild>,
    devices: DeviceTable,
    broker: NotificationBroker,
    next_token: usize,
    self_exe: std::path::PathBuf,
    shutting_down: bool,
}

impl Supervisor {
    pub fn start(osc_port: u16) -> Result<Supervisor, SupervisorError> {
        crate::config::config_dir()?;

        let poll = mio::Poll::new().map_err(SupervisorError::EventLoop)?;
        let mut osc = OscServer::bind(osc_port)?;
        poll.registry()
            .register(osc.socket_mut(), TOKEN_OSC, mio::Interest::READABLE)
            .map_err(SupervisorError::EventLoop)?;

        let signals = SignalSource::install(poll.registry(), TOKEN_SIGNAL).map_err(SupervisorError::EventLoop)?;

        let self_exe = std::env::current_exe().map_err(SupervisorError::DetectorSpawn)?;
        let detector = ManagedChild::spawn(&self_exe, "-d", ChildRole::Detector, TOKEN_DETECTOR, poll.registry())
            .map_err(SupervisorError::DetectorSpawn)?;

        info!(osc_port, "supervisor started");

        Ok(Supervisor {
            poll,
            osc,
            signals,
            detector: Some(detector),
            device_children: HashMap::new(),
            devices: DeviceTable::new(),
            broker: NotificationBroker::new(),
            next_token: FIRST_DEVICE_TOKEN,
            self_exe,
            shutting_down: false,
        })
    }

    /// Run until a shutdown signal arrives and every child pipe has closed,
    /// or the event loop fails.
    ///
    /// On shutdown we don't break out the moment the signal is consumed:
    /// §4.G requires the detector and device pipes to be closed first, with
    /// the loop kept running to drain whatever each child still has pending
    /// before its handle is reaped.
    pub fn run(&mut self) -> io::Result<()> {
        let mut events = Events::with_capacity(128);
        loop {
            self.poll.poll(&mut events, None)?;
            let tokens: Vec<Token> = events.iter().map(|e| e.token()).collect();
            for token in tokens {
                match token {
                    TOKEN_OSC => self.osc.drain(&self.devices, &mut self.broker),
                    TOKEN_SIGNAL => {
                        if self.signals.consume()? {
                            self.begin_shutdown();
                        }
                    }
                    TOKEN_DETECTOR => self.drain_detector(),
                    token => self.drain_device(token),
                }
            }
            self.broker.drain_if_dirty();
            if self.shutting_down && self.detector.is_none() && self.device_children.is_empty() {
                info!("all child pipes closed, exiting");
                return Ok(());
            }
        }
    }

    /// Close the detector's pipe, then every device's, and mark us as
    /// shutting down. The children themselves have no "please exit"
    /// message, so we signal them to terminate and let the run loop drain
    /// their pipes to EOF as they do.
    fn begin_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        info!("shutdown signal received, closing detector and device pipes");
        self.shutting_down = true;

        if let Some(detector) = self.detector.as_mut() {
            if let Err(error) = detector.child.kill() {
                warn!(?error, "failed to signal detector subprocess to exit");
            }
        }
        for (token, child) in self.device_children.iter_mut() {
            if let Err(error) = child.child.kill() {
                warn!(?error, token = token.0, "failed to signal device subprocess to exit");
            }
        }
    }

    fn drain_detector(&mut self) {
        loop {
            let Some(detector) = self.detector.as_mut() else {
                return;
            };
            match detector.read_message() {
                Ok(IpcMessage::DeviceConnection { devnode }) => {
                    if !self.shutting_down {
                        self.spawn_device(devnode);
                    }
                }
                Ok(other) => warn!(?other, "unexpected message on detector pipe, ignoring"),
                Err(DecodeError::WouldBlock) => return,
                Err(DecodeError::Eof) => {
                    warn!("detector pipe closed; no further devices will be reported");
                    self.retire_detector();
                    return;
                }
                Err(error) => {
                    warn!(?error, "malformed detector message");
                    self.retire_detector();
                    return;
                }
            }
        }
    }

    /// The detector's pipe closed. Deregister it and reap the process handle.
    fn retire_detector(&mut self) {
        if let Some(mut detector) = self.detector.take() {
            let _ = detector.deregister(self.poll.registry());
            match detector.child.wait() {
                Ok(status) => trace!(?status, "detector subprocess exited"),
                Err(error) => warn!(?error, "failed to reap detector subprocess"),
            }
        }
    }

    fn spawn_device(&mut self, devnode: String) {
        let token = Token(self.next_token);
        self.next_token += 1;
        match ManagedChild::spawn(&self.self_exe, &devnode, ChildRole::Device, token, self.poll.registry()) {
            Ok(child) => {
                trace!(devnode, token = token.0, "device subprocess spawned");
                self.devices.insert(token, DeviceRecord::new(devnode));
                self.device_children.insert(token, child);
            }
            Err(error) => warn!(?error, devnode, "failed to spawn device subprocess"),
        }
    }

    fn drain_device(&mut self, token: Token) {
        loop {
            let Some(child) = self.device_children.get_mut(&token) else {
                return;
            };
            match child.read_message() {
                Ok(msg) => self.handle_device_msg(token, msg),
                Err(DecodeError::WouldBlock) => return,
                Err(DecodeError::Eof) => {
                    self.retire_device(token);
                    return;
                }
                Err(error) => {
                    warn!(?error, token = token.0, "malformed device message");
                    return;
                }
            }
        }
    }

    fn handle_device_msg(&mut self, token: Token, msg: IpcMessage) {
        let Some(record) = self.devices.get_mut(token) else {
            return;
        };
        match msg {
            IpcMessage::DeviceConnection { .. } => {
                warn!(token = token.0, "device sent a detector-only message, ignoring");
            }
            IpcMessage::OscPortChange { port } => record.port = Some(port),
            IpcMessage::DeviceInfo { serial, friendly } => {
                record.serial = Some(serial);
                record.friendly = Some(friendly);
            }
            IpcMessage::DeviceReady => {
                record.ready = true;
                if record.is_ready() {
                    let (serial, friendly, port) = ready_fields(record);
                    trace!(serial, friendly, port, "device ready");
                    self.broker.notify_add(self.osc.socket(), &serial, &friendly, port);
                }
            }
            // Treated as a no-op: process exit is authoritative for disconnection.
            IpcMessage::DeviceDisconnection => {}
        }
    }

    /// A device child's pipe closed. Notify subscribers if it had reached
    /// `ready`, then reap its table entry and its process handle.
    fn retire_device(&mut self, token: Token) {
        if let Some(record) = self.devices.remove(token) {
            if record.is_ready() {
                let (serial, friendly, port) = ready_fields(&record);
                self.broker.notify_remove(self.osc.socket(), &serial, &friendly, port);
            }
        }
        if let Some(mut child) = self.device_children.remove(&token) {
            let _ = child.deregister(self.poll.registry());
            match child.child.wait() {
                Ok(status) => trace!(token = token.0, ?status, "device subprocess exited"),
                Err(error) => warn!(?error, token = token.0, "failed to reap device subprocess"),
            }
        }
    }
}

fn ready_fields(record: &DeviceRecord) -> (String, String, u16) {
    (
        record.serial.clone().unwrap_or_default(),
        record.friendly.clone().unwrap_or_default(),
        record.port.unwrap_or_default(),
    )
}
