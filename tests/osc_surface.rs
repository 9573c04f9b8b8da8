//! End-to-end tests against the OSC control surface: a real `OscServer`
//! bound to an ephemeral loopback port, driven the way `Supervisor` drives
//! it (populate the device table, notify the broker) and observed the way
//! a real client would, over loopback UDP sockets.

use std::net::UdpSocket;
use std::time::Duration;

use rosc::{OscPacket, OscType};
use serialosc_supervisor::broker::NotificationBroker;
use serialosc_supervisor::device_table::{DeviceRecord, DeviceTable};
use serialosc_supervisor::osc_server::OscServer;

fn client() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_read_timeout(Some(Duration::from_millis(150))).unwrap();
    socket
}

fn send(client: &UdpSocket, server_port: u16, addr: &str, args: Vec<OscType>) {
    let packet = OscPacket::Message(rosc::OscMessage { addr: addr.to_string(), args });
    let bytes = rosc::encoder::encode(&packet).unwrap();
    client.send_to(&bytes, ("127.0.0.1", server_port)).unwrap();
}

fn recv_message(client: &UdpSocket) -> Option<rosc::OscMessage> {
    let mut buf = [0u8; 1536];
    let (len, _src) = client.recv_from(&mut buf).ok()?;
    match rosc::decoder::decode_udp(&buf[..len]).ok()?.1 {
        OscPacket::Message(msg) => Some(msg),
        OscPacket::Bundle(_) => None,
    }
}

fn ready_record(serial: &str, friendly: &str, port: u16) -> DeviceRecord {
    DeviceRecord {
        devnode: "/dev/ttyUSB0".into(),
        serial: Some(serial.into()),
        friendly: Some(friendly.into()),
        port: Some(port),
        ready: true,
    }
}

#[test]
fn empty_list_produces_no_replies() {
    let server = OscServer::bind(0).unwrap();
    let server_port = server.socket().local_addr().unwrap().port();
    let devices = DeviceTable::new();
    let mut broker = NotificationBroker::new();

    let client = client();
    let client_port = client.local_addr().unwrap().port();
    send(&client, server_port, "/serialosc/list", vec![OscType::String("127.0.0.1".into()), OscType::Int(client_port as i32)]);

    std::thread::sleep(Duration::from_millis(50));
    let mut server = server;
    server.drain(&devices, &mut broker);

    assert!(recv_message(&client).is_none(), "empty device table must yield zero /serialosc/device replies");
}

#[test]
fn list_reflects_only_ready_devices() {
    let mut server = OscServer::bind(0).unwrap();
    let server_port = server.socket().local_addr().unwrap().port();
    let mut devices = DeviceTable::new();
    let mut broker = NotificationBroker::new();

    devices.insert(mio::Token(3), DeviceRecord::new("/dev/ttyUSB1".into()));
    devices.insert(mio::Token(4), ready_record("m1000001", "monome 64", 14000));

    let client = client();
    let client_port = client.local_addr().unwrap().port();
    send(&client, server_port, "/serialosc/list", vec![OscType::String("127.0.0.1".into()), OscType::Int(client_port as i32)]);
    std::thread::sleep(Duration::from_millis(50));
    server.drain(&devices, &mut broker);

    let msg = recv_message(&client).expect("one reply for the ready device");
    assert_eq!(msg.addr, "/serialosc/device");
    assert_eq!(msg.args, vec![OscType::String("m1000001".into()), OscType::String("monome 64".into()), OscType::Int(14000)]);
    assert!(recv_message(&client).is_none(), "unready device must not produce a second reply");
}

#[test]
fn subscriber_receives_exactly_one_add_then_is_cleared() {
    let server = OscServer::bind(0).unwrap();
    let server_port = server.socket().local_addr().unwrap().port();
    let mut devices = DeviceTable::new();
    let mut broker = NotificationBroker::new();

    let subscriber = client();
    let sub_port = subscriber.local_addr().unwrap().port();
    let mut server = server;
    send(&subscriber, server_port, "/serialosc/notify", vec![OscType::String("127.0.0.1".into()), OscType::Int(sub_port as i32)]);
    std::thread::sleep(Duration::from_millis(50));
    server.drain(&devices, &mut broker);

    let record = ready_record("m1000001", "monome 64", 14000);
    broker.notify_add(server.socket(), record.serial.as_deref().unwrap(), record.friendly.as_deref().unwrap(), record.port.unwrap());
    devices.insert(mio::Token(3), record);
    broker.drain_if_dirty();

    let msg = recv_message(&subscriber).expect("subscriber should receive the add burst");
    assert_eq!(msg.addr, "/serialosc/add");
    assert_eq!(msg.args, vec![OscType::String("m1000001".into()), OscType::String("monome 64".into()), OscType::Int(14000)]);
    assert!(recv_message(&subscriber).is_none(), "no second /serialosc/add for the same event");

    // Subscriber list was cleared after the burst; a later notify_add must
    // not reach the now-unregistered subscriber.
    broker.notify_add(server.socket(), "m1000002", "monome 128", 14001);
    broker.drain_if_dirty();
    assert!(recv_message(&subscriber).is_none(), "subscriber must not be re-notified after being cleared");
}

#[test]
fn port_update_is_reflected_in_list() {
    let mut server = OscServer::bind(0).unwrap();
    let server_port = server.socket().local_addr().unwrap().port();
    let mut devices = DeviceTable::new();
    let mut broker = NotificationBroker::new();

    devices.insert(mio::Token(3), ready_record("m1000001", "monome 64", 14000));
    if let Some(record) = devices.get_mut(mio::Token(3)) {
        record.port = Some(14777);
    }

    let client = client();
    let client_port = client.local_addr().unwrap().port();
    send(&client, server_port, "/serialosc/list", vec![OscType::String("127.0.0.1".into()), OscType::Int(client_port as i32)]);
    std::thread::sleep(Duration::from_millis(50));
    server.drain(&devices, &mut broker);

    let msg = recv_message(&client).expect("reply with updated port");
    assert_eq!(msg.args[2], OscType::Int(14777));
}

#[test]
fn remove_burst_matches_prior_add() {
    let server = OscServer::bind(0).unwrap();
    let mut broker = NotificationBroker::new();

    let subscriber = client();
    broker.subscribe(format!("127.0.0.1:{}", subscriber.local_addr().unwrap().port()).parse().unwrap());
    broker.notify_remove(server.socket(), "m1000001", "monome 64", 14000);
    broker.drain_if_dirty();

    let msg = recv_message(&subscriber).expect("remove burst delivered");
    assert_eq!(msg.addr, "/serialosc/remove");
    assert_eq!(msg.args, vec![OscType::String("m1000001".into()), OscType::String("monome 64".into()), OscType::Int(14000)]);
}
