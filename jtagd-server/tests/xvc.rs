//! Tests for the Xilinx Virtual Cable compatibility surface.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;

use jtagd_adapter::loopback::LoopbackAdapter;
use jtagd_server::{Config, Server};

fn start_xvc_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(LoopbackAdapter::new(), Config::default());
    thread::spawn(move || {
        let _ = server.serve_xvc(listener);
    });
    addr
}

fn read_until_eof(tcp: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = tcp.read_to_end(&mut buf);
    buf
}

#[test]
fn getinfo_reports_the_server_banner() {
    let mut tcp = TcpStream::connect(start_xvc_server()).unwrap();
    tcp.write_all(b"getinfo:").unwrap();

    let mut reply = [0u8; 20];
    tcp.read_exact(&mut reply).unwrap();
    assert_eq!(&reply, b"xvcServer_v1.0:2048\n");
}

#[test]
fn getinfo_can_be_repeated_on_one_connection() {
    let mut tcp = TcpStream::connect(start_xvc_server()).unwrap();
    for _ in 0..3 {
        tcp.write_all(b"getinfo:").unwrap();
        let mut reply = [0u8; 20];
        tcp.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"xvcServer_v1.0:2048\n");
    }
}

#[test]
fn settck_is_echoed_and_ignored() {
    let mut tcp = TcpStream::connect(start_xvc_server()).unwrap();

    let period_ns = 40u32;
    tcp.write_all(b"settck:").unwrap();
    tcp.write_all(&period_ns.to_le_bytes()).unwrap();

    let mut reply = [0u8; 4];
    tcp.read_exact(&mut reply).unwrap();
    assert_eq!(u32::from_le_bytes(reply), period_ns);
}

#[test]
fn shift_is_not_implemented_and_closes_the_connection() {
    let mut tcp = TcpStream::connect(start_xvc_server()).unwrap();

    tcp.write_all(b"shift:").unwrap();
    tcp.write_all(&8u32.to_le_bytes()).unwrap();
    tcp.write_all(&[0x00, 0xFF]).unwrap(); // tms, tdi

    assert!(read_until_eof(&mut tcp).is_empty());
}

#[test]
fn garbage_command_closes_the_connection() {
    let mut tcp = TcpStream::connect(start_xvc_server()).unwrap();
    tcp.write_all(b"gobbledygook").unwrap();
    assert!(read_until_eof(&mut tcp).is_empty());
}
