// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end device scenarios, exercised both through the direct
//! command entry point and over a real TCP session.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use drv_semivibe_server::{Device, DeviceConfig};

fn device() -> Device {
    Device::new(DeviceConfig {
        port: 0,
        seed: Some(1),
    })
}

fn exchange(stream: &mut TcpStream, request: &str) -> String {
    stream.write_all(request.as_bytes()).unwrap();
    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).unwrap();
    String::from_utf8(buf[..n].to_vec()).unwrap()
}

#[test]
fn handshake_then_id_read_then_exit() {
    let device = Arc::new(device());
    let addr = device.start().unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
    // The greeting is exactly three raw bytes, not a padded frame.
    let mut ack = [0u8; 3];
    stream.read_exact(&mut ack).unwrap();
    assert_eq!(&ack, b"ACK");

    assert_eq!(exchange(&mut stream, "210000"), "2100A1");

    stream.write_all(b"exit").unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(stream.read(&mut buf).unwrap(), 0);

    device.stop();
}

#[test]
fn write_then_read_led() {
    let d = device();
    assert_eq!(d.process_command("310180"), "310180");
    assert_eq!(d.process_command("310000"), "310080");
}

#[test]
fn heater_write_echoes_but_stores_masked() {
    let d = device();
    assert_eq!(d.process_command("3301FF"), "3301FF");
    assert_eq!(d.process_command("330000"), "33000F");
}

#[test]
fn doors_read_modify_write_sequence() {
    let d = device();
    assert_eq!(d.process_command("340000"), "340000");
    assert_eq!(d.process_command("340104"), "340104");
    assert_eq!(d.process_command("340000"), "340004");
}

#[test]
fn reset_zeroes_led_and_self_clears() {
    let d = device();
    assert_eq!(d.process_command("310180"), "310180");
    assert_eq!(d.process_command("4FE101"), "4FE101");
    assert_eq!(d.process_command("310000"), "310000");
    assert_eq!(d.process_command("4FE000"), "4FE000");
}

#[test]
fn forbidden_and_invalid_responses() {
    let d = device();
    // Reserved base.
    assert_eq!(d.process_command("000000"), "1FFFFF");
    // Unknown offset in a read-only base.
    assert_eq!(d.process_command("110000"), "2FFFFF");
    // Writing a read-only base is forbidden before the offset is even
    // considered.
    assert_eq!(d.process_command("110100"), "1FFFFF");
}

#[test]
fn power_coupling_visible_through_frames() {
    let d = device();
    assert_eq!(d.process_command("4FB100"), "4FB100");
    // Sensor bits dropped from both status bitmaps.
    let power = u8::from_str_radix(&d.process_command("102000")[4..], 16).unwrap();
    assert_eq!(power & 0x11, 0x00);
    assert_eq!(d.process_command("4FB111"), "4FB111");
    let power = u8::from_str_radix(&d.process_command("102000")[4..], 16).unwrap();
    assert_eq!(power & 0x11, 0x11);
}

#[test]
fn register_file_persists_across_sessions() {
    let device = Arc::new(device());
    let addr = device.start().unwrap();

    let mut first = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
    let mut ack = [0u8; 3];
    first.read_exact(&mut ack).unwrap();
    assert_eq!(exchange(&mut first, "310180"), "310180");
    first.write_all(b"exit").unwrap();
    let mut buf = [0u8; 8];
    let _ = first.read(&mut buf);

    // A fresh session sees the same register file.
    let mut second = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
    second.read_exact(&mut ack).unwrap();
    assert_eq!(&ack, b"ACK");
    assert_eq!(exchange(&mut second, "310000"), "310080");

    device.stop();
}

#[test]
fn state_survives_stop_and_restart() {
    let device = Arc::new(device());
    assert_eq!(device.process_command("320140"), "320140");

    let addr = device.start().unwrap();
    device.stop();
    assert!(!device.is_running());

    // Restart serves the same state on a fresh socket.
    let addr2 = device.start().unwrap();
    // The first ephemeral port is gone; we only care that binding again
    // worked.
    let _ = addr;
    let mut stream = TcpStream::connect(("127.0.0.1", addr2.port())).unwrap();
    let mut ack = [0u8; 3];
    stream.read_exact(&mut ack).unwrap();
    assert_eq!(exchange(&mut stream, "320000"), "320040");
    device.stop();
}

#[test]
fn malformed_tcp_input_gets_error_frame() {
    let device = Arc::new(device());
    let addr = device.start().unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", addr.port())).unwrap();
    let mut ack = [0u8; 3];
    stream.read_exact(&mut ack).unwrap();

    assert_eq!(exchange(&mut stream, "hello!"), "1FFFFF");
    // The sentinel is case-sensitive; this is just a malformed frame.
    assert_eq!(exchange(&mut stream, "EXIT"), "1FFFFF");
    // The session is still alive afterwards.
    assert_eq!(exchange(&mut stream, "210000"), "2100A1");

    device.stop();
}
