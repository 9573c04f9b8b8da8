//! The supervisor's OSC control surface: a UDP server on a fixed,
//! well-known port exposing `/serialosc/list` and `/serialosc/notify`.

use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};

use mio::net::UdpSocket;
use rosc::{decoder, encoder, OscMessage, OscPacket, OscType};
use tracing::{trace, warn};

use crate::broker::NotificationBroker;
use crate::device_table::DeviceTable;
use crate::error::SupervisorError;

const RECV_BUF_LEN: usize = 1536;

/// Default supervisor OSC port used by the reference deployment.
pub const DEFAULT_OSC_PORT: u16 = 12002;

pub struct OscServer {
    socket: UdpSocket,
    recv_buf: [u8; RECV_BUF_LEN],
}

impl OscServer {
    /// Bind the server's UDP socket. `0.0.0.0` with the supervisor port, so
    /// replies and notifications carry that port as their source.
    pub fn bind(port: u16) -> Result<Self, SupervisorError> {
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let std_socket = StdUdpSocket::bind(addr).map_err(|source| SupervisorError::OscBind { port, source })?;
        std_socket
            .set_nonblocking(true)
            .map_err(|source| SupervisorError::OscBind { port, source })?;
        Ok(OscServer {
            socket: UdpSocket::from_std(std_socket),
            recv_buf: [0u8; RECV_BUF_LEN],
        })
    }

    pub fn socket_mut(&mut self) -> &mut UdpSocket {
        &mut self.socket
    }

    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    /// Drain every datagram currently pending on the socket without
    /// blocking the event loop, dispatching `/serialosc/list` replies and
    /// `/serialosc/notify` subscriptions as they arrive.
    pub fn drain(&mut self, devices: &DeviceTable, broker: &mut NotificationBroker) {
        loop {
            let (len, _src) = match self.socket.recv_from(&mut self.recv_buf) {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(error) => {
                    warn!(?error, "osc recv_from failed");
                    return;
                }
            };
            self.handle_datagram(&self.recv_buf[..len].to_vec(), devices, broker);
        }
    }

    fn handle_datagram(&mut self, buf: &[u8], devices: &DeviceTable, broker: &mut NotificationBroker) {
        let packet = match decoder::decode_udp(buf) {
            Ok((_rest, packet)) => packet,
            Err(error) => {
                trace!(?error, "dropping malformed osc datagram");
                return;
            }
        };
        self.handle_packet(packet, devices, broker);
    }

    fn handle_packet(&mut self, packet: OscPacket, devices: &DeviceTable, broker: &mut NotificationBroker) {
        match packet {
            OscPacket::Message(msg) => self.handle_message(msg, devices, broker),
            OscPacket::Bundle(bundle) => {
                for packet in bundle.content {
                    self.handle_packet(packet, devices, broker);
                }
            }
        }
    }

    fn handle_message(&mut self, msg: OscMessage, devices: &DeviceTable, broker: &mut NotificationBroker) {
        match msg.addr.as_str() {
            "/serialosc/list" => self.handle_list(&msg.args, devices),
            "/serialosc/notify" => Self::handle_notify(&msg.args, broker),
            other => trace!(path = other, "dropping unknown osc path"),
        }
    }

    fn handle_list(&self, args: &[OscType], devices: &DeviceTable) {
        let Some((host, port)) = host_port_args(args) else {
            trace!("malformed /serialosc/list arguments");
            return;
        };
        let dest: SocketAddr = match format!("{host}:{port}").parse() {
            Ok(addr) => addr,
            Err(error) => {
                trace!(?error, host, port, "invalid /serialosc/list reply address");
                return;
            }
        };
        for device in devices.ready() {
            let packet = OscPacket::Message(OscMessage {
                addr: "/serialosc/device".to_string(),
                args: vec![
                    OscType::String(device.serial.clone().unwrap_or_default()),
                    OscType::String(device.friendly.clone().unwrap_or_default()),
                    OscType::Int(device.port.unwrap_or_default() as i32),
                ],
            });
            match encoder::encode(&packet) {
                Ok(bytes) => {
                    if let Err(error) = self.socket.send_to(&bytes, dest) {
                        warn!(?error, %dest, "failed to send /serialosc/device reply");
                    }
                }
                Err(error) => warn!(?error, "failed to encode /serialosc/device reply"),
            }
        }
    }

    fn handle_notify(args: &[OscType], broker: &mut NotificationBroker) {
        let Some((host, port)) = host_port_args(args) else {
            trace!("malformed /serialosc/notify arguments");
            return;
        };
        match format!("{host}:{port}").parse() {
            Ok(addr) => broker.subscribe(addr),
            Err(error) => trace!(?error, host, port, "invalid /serialosc/notify address"),
        }
    }
}

fn host_port_args(args: &[OscType]) -> Option<(&str, i32)> {
    match args {
        [OscType::String(host), OscType::Int(port)] => Some((host.as_str(), *port)),
        _ => None,
    }
}
