//! End-to-end session tests: a real server thread, a raw protocol client
//! and the loopback backend.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;

use jtagd_adapter::loopback::LoopbackAdapter;
use jtagd_protocol::{
    codec, error::WireError, InfoKind, InfoValue, Message, MessageTag, PerfCounter, PinState,
    TapTransition, Transport, MAX_FRAME_LEN,
};
use jtagd_server::{Config, Server};

fn start_server(adapter: LoopbackAdapter) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(adapter, Config::default());
    thread::spawn(move || {
        let _ = server.serve(listener);
    });
    addr
}

/// Connects and runs the hello exchange, returning the ready stream and the
/// transport the server advertised.
fn handshake(addr: SocketAddr, transport: Transport) -> (TcpStream, Transport) {
    let mut tcp = TcpStream::connect(addr).unwrap();
    let hello = codec::recv_expected(&mut tcp, MessageTag::Hello, MAX_FRAME_LEN).unwrap();
    let advertised = match hello {
        Message::Hello {
            magic,
            version,
            transport,
        } => {
            assert_eq!(magic, "JTAGHAL");
            assert_eq!(version, 1);
            transport
        }
        other => panic!("expected server hello, got {:?}", other),
    };
    codec::send(&mut tcp, &Message::hello(transport)).unwrap();
    (tcp, advertised)
}

fn jtag_session(addr: SocketAddr) -> TcpStream {
    handshake(addr, Transport::Jtag).0
}

fn send(tcp: &mut TcpStream, message: &Message) {
    codec::send(tcp, message).unwrap();
}

fn recv(tcp: &mut TcpStream) -> Message {
    codec::recv(tcp, MAX_FRAME_LEN).unwrap()
}

fn query_num(tcp: &mut TcpStream, request: Message) -> u64 {
    send(tcp, &request);
    match recv(tcp) {
        Message::InfoReply(InfoValue::Num(n)) => n,
        other => panic!("expected numeric InfoReply, got {:?}", other),
    }
}

fn query_str(tcp: &mut TcpStream, kind: InfoKind) -> String {
    send(tcp, &Message::InfoRequest(kind));
    match recv(tcp) {
        Message::InfoReply(InfoValue::Str(s)) => s,
        other => panic!("expected string InfoReply, got {:?}", other),
    }
}

/// Walks the TAP into Shift-DR so scans are legal.
fn enter_shift_dr(tcp: &mut TcpStream) {
    for transition in [TapTransition::ResetToIdle, TapTransition::EnterShiftDr] {
        send(
            tcp,
            &Message::StateRequest {
                state: transition as u8,
            },
        );
    }
}

fn expect_closed(tcp: &mut TcpStream) {
    match codec::recv(tcp, MAX_FRAME_LEN) {
        Err(WireError::Eof) | Err(WireError::IoError(_)) => {}
        other => panic!("expected a closed connection, got {:?}", other),
    }
}

#[test]
fn hello_round_trip_reaches_ready() {
    let addr = start_server(LoopbackAdapter::new());
    let (mut tcp, advertised) = handshake(addr, Transport::Jtag);
    assert_eq!(advertised, Transport::Jtag);

    // a request being answered proves the session reached Ready
    assert_eq!(query_str(&mut tcp, InfoKind::HwName), "JTAG loopback simulator");
}

#[test]
fn server_hello_advertises_swd_without_jtag() {
    let addr = start_server(LoopbackAdapter::new().without_jtag().with_swd());
    let (_tcp, advertised) = handshake(addr, Transport::Swd);
    assert_eq!(advertised, Transport::Swd);
}

#[test]
fn bad_magic_closes_the_session() {
    let addr = start_server(LoopbackAdapter::new());
    let mut tcp = TcpStream::connect(addr).unwrap();
    let _ = codec::recv_expected(&mut tcp, MessageTag::Hello, MAX_FRAME_LEN).unwrap();
    send(
        &mut tcp,
        &Message::Hello {
            magic: "NOTJTAG".to_string(),
            version: 1,
            transport: Transport::Jtag,
        },
    );
    expect_closed(&mut tcp);
}

#[test]
fn unsupported_transport_closes_the_session() {
    // JTAG-only adapter, client insists on SWD
    let addr = start_server(LoopbackAdapter::new());
    let mut tcp = TcpStream::connect(addr).unwrap();
    let _ = codec::recv_expected(&mut tcp, MessageTag::Hello, MAX_FRAME_LEN).unwrap();
    send(&mut tcp, &Message::hello(Transport::Swd));
    expect_closed(&mut tcp);
}

#[test]
fn info_queries_report_adapter_metadata() {
    let adapter = LoopbackAdapter::new()
        .with_serial("SIM1234")
        .with_user_id("bench-3")
        .with_frequency(10_000_000);
    let addr = start_server(adapter);
    let mut tcp = jtag_session(addr);

    assert_eq!(query_str(&mut tcp, InfoKind::HwSerial), "SIM1234");
    assert_eq!(query_str(&mut tcp, InfoKind::UserId), "bench-3");
    assert_eq!(
        query_num(&mut tcp, Message::InfoRequest(InfoKind::Freq)),
        10_000_000
    );
    assert_eq!(
        query_num(&mut tcp, Message::InfoRequest(InfoKind::GpioCount)),
        0
    );
}

#[test]
fn zero_length_scan_degenerates_to_dummy_clocks() {
    let addr = start_server(LoopbackAdapter::new());
    let mut tcp = jtag_session(addr);

    for total_len in [0u32, 64] {
        send(
            &mut tcp,
            &Message::ScanRequest {
                total_len,
                read_requested: false,
                split: false,
                set_tms_at_end: false,
                write_data: Box::default(),
            },
        );
    }
    // no replies were sent; the counter query stays in sync and proves the
    // clocks reached the adapter
    assert_eq!(
        query_num(&mut tcp, Message::PerfRequest(PerfCounter::DummyClocks)),
        64
    );
}

#[test]
fn write_read_scan_echoes_the_vector() {
    let addr = start_server(LoopbackAdapter::new());
    let mut tcp = jtag_session(addr);
    enter_shift_dr(&mut tcp);

    send(
        &mut tcp,
        &Message::ScanRequest {
            total_len: 16,
            read_requested: true,
            split: false,
            set_tms_at_end: true,
            write_data: vec![0xAA, 0x55].into_boxed_slice(),
        },
    );
    match recv(&mut tcp) {
        Message::ScanReply { read_data } => assert_eq!(&read_data[..], &[0xAA, 0x55]),
        other => panic!("expected ScanReply, got {:?}", other),
    }
}

#[test]
fn zero_length_read_gets_an_empty_reply() {
    let addr = start_server(LoopbackAdapter::new());
    let mut tcp = jtag_session(addr);

    send(
        &mut tcp,
        &Message::ScanRequest {
            total_len: 0,
            read_requested: true,
            split: false,
            set_tms_at_end: false,
            write_data: Box::default(),
        },
    );
    match recv(&mut tcp) {
        Message::ScanReply { read_data } => assert!(read_data.is_empty()),
        other => panic!("expected empty ScanReply, got {:?}", other),
    }
}

#[test]
fn undersized_write_data_terminates_the_session() {
    let addr = start_server(LoopbackAdapter::new());
    let mut tcp = jtag_session(addr);
    enter_shift_dr(&mut tcp);

    send(
        &mut tcp,
        &Message::ScanRequest {
            total_len: 16,
            read_requested: false,
            split: false,
            set_tms_at_end: false,
            write_data: vec![0xAA].into_boxed_slice(),
        },
    );
    expect_closed(&mut tcp);
}

#[test]
fn split_scan_over_the_wire() {
    let addr = start_server(LoopbackAdapter::new());
    let mut tcp = jtag_session(addr);

    assert_eq!(query_num(&mut tcp, Message::SplitQuery), 1);
    enter_shift_dr(&mut tcp);

    // write half: the immediate reply carries placeholder data
    send(
        &mut tcp,
        &Message::ScanRequest {
            total_len: 8,
            read_requested: true,
            split: true,
            set_tms_at_end: false,
            write_data: vec![0x5A].into_boxed_slice(),
        },
    );
    match recv(&mut tcp) {
        Message::ScanReply { read_data } => assert_eq!(read_data.len(), 1),
        other => panic!("expected ScanReply, got {:?}", other),
    }

    send(&mut tcp, &Message::Flush);

    // read half: now the deferred data comes back
    send(
        &mut tcp,
        &Message::ScanRequest {
            total_len: 8,
            read_requested: true,
            split: true,
            set_tms_at_end: false,
            write_data: Box::default(),
        },
    );
    match recv(&mut tcp) {
        Message::ScanReply { read_data } => assert_eq!(&read_data[..], &[0x5A]),
        other => panic!("expected ScanReply, got {:?}", other),
    }
}

#[test]
fn split_scan_on_non_split_backend_is_a_protocol_error() {
    let addr = start_server(LoopbackAdapter::new().without_split());
    let mut tcp = jtag_session(addr);

    assert_eq!(query_num(&mut tcp, Message::SplitQuery), 0);
    enter_shift_dr(&mut tcp);

    send(
        &mut tcp,
        &Message::ScanRequest {
            total_len: 8,
            read_requested: true,
            split: true,
            set_tms_at_end: false,
            write_data: vec![0x5A].into_boxed_slice(),
        },
    );
    // the backend did not defer, which breaks the split contract
    expect_closed(&mut tcp);
}

#[test]
fn perf_counters_advance_monotonically() {
    let addr = start_server(LoopbackAdapter::new());
    let mut tcp = jtag_session(addr);
    enter_shift_dr(&mut tcp);

    let scan = Message::ScanRequest {
        total_len: 8,
        read_requested: false,
        split: false,
        set_tms_at_end: false,
        write_data: vec![0xFF].into_boxed_slice(),
    };

    send(&mut tcp, &scan);
    let first = query_num(&mut tcp, Message::PerfRequest(PerfCounter::DataBits));
    send(&mut tcp, &scan);
    let second = query_num(&mut tcp, Message::PerfRequest(PerfCounter::DataBits));

    assert_eq!(first, 8);
    assert!(second >= first);
    assert_eq!(second, 16);
}

#[test]
fn gpio_read_on_gpio_less_adapter_yields_empty_bank() {
    let addr = start_server(LoopbackAdapter::new());
    let mut tcp = jtag_session(addr);

    send(&mut tcp, &Message::GpioReadRequest);
    match recv(&mut tcp) {
        Message::BankState { states } => assert!(states.is_empty()),
        other => panic!("expected BankState, got {:?}", other),
    }

    // the session survived the capability miss
    assert_eq!(query_str(&mut tcp, InfoKind::HwName), "JTAG loopback simulator");
}

#[test]
fn gpio_write_then_read_back() {
    let addr = start_server(LoopbackAdapter::new().with_gpio_pins(3));
    let mut tcp = jtag_session(addr);

    assert_eq!(
        query_num(&mut tcp, Message::InfoRequest(InfoKind::GpioCount)),
        3
    );

    let written = vec![
        PinState {
            value: true,
            is_output: true,
        },
        PinState {
            value: false,
            is_output: false,
        },
        PinState {
            value: true,
            is_output: false,
        },
    ];
    send(
        &mut tcp,
        &Message::GpioWriteRequest {
            states: written.clone(),
        },
    );

    send(&mut tcp, &Message::GpioReadRequest);
    match recv(&mut tcp) {
        Message::BankState { states } => assert_eq!(states, written),
        other => panic!("expected BankState, got {:?}", other),
    }
}

#[test]
fn gpio_write_without_gpio_is_ignored() {
    let addr = start_server(LoopbackAdapter::new());
    let mut tcp = jtag_session(addr);

    send(
        &mut tcp,
        &Message::GpioWriteRequest {
            states: vec![PinState {
                value: true,
                is_output: true,
            }],
        },
    );
    // no reply is defined; the session keeps answering
    assert_eq!(
        query_num(&mut tcp, Message::InfoRequest(InfoKind::Freq)),
        10_000_000
    );
}

#[test]
fn unknown_tap_transition_code_is_ignored() {
    let addr = start_server(LoopbackAdapter::new());
    let mut tcp = jtag_session(addr);

    send(&mut tcp, &Message::StateRequest { state: 0xEE });
    assert_eq!(
        query_num(&mut tcp, Message::InfoRequest(InfoKind::Freq)),
        10_000_000
    );
}

#[test]
fn mid_session_hello_is_only_a_warning() {
    let addr = start_server(LoopbackAdapter::new());
    let mut tcp = jtag_session(addr);

    send(&mut tcp, &Message::hello(Transport::Jtag));
    assert_eq!(
        query_num(&mut tcp, Message::InfoRequest(InfoKind::Freq)),
        10_000_000
    );
}

#[test]
fn jtag_requests_on_swd_session_send_no_reply() {
    // adapter carries both transports; the client negotiates SWD
    let addr = start_server(LoopbackAdapter::new().with_swd());
    let (mut tcp, _) = handshake(addr, Transport::Swd);

    // answered with a warning and silence...
    send(&mut tcp, &Message::PerfRequest(PerfCounter::ShiftOps));
    send(&mut tcp, &Message::SplitQuery);
    // ...so the next reply on the stream belongs to the info request
    assert_eq!(query_str(&mut tcp, InfoKind::HwName), "JTAG loopback simulator");
}

#[test]
fn disconnect_closes_cleanly() {
    let addr = start_server(LoopbackAdapter::new());
    let mut tcp = jtag_session(addr);

    send(&mut tcp, &Message::Disconnect);
    expect_closed(&mut tcp);
}

#[test]
fn flush_is_ordered_before_the_next_reply() {
    let addr = start_server(LoopbackAdapter::new());
    let mut tcp = jtag_session(addr);
    enter_shift_dr(&mut tcp);

    // queue a deferred write, then flush, then demand the read: the data
    // must already be committed when the read is dispatched
    send(
        &mut tcp,
        &Message::ScanRequest {
            total_len: 8,
            read_requested: true,
            split: true,
            set_tms_at_end: false,
            write_data: vec![0xC3].into_boxed_slice(),
        },
    );
    let _ = recv(&mut tcp); // placeholder reply for the write half
    send(&mut tcp, &Message::Flush);
    send(
        &mut tcp,
        &Message::ScanRequest {
            total_len: 8,
            read_requested: true,
            split: true,
            set_tms_at_end: false,
            write_data: Box::default(),
        },
    );
    match recv(&mut tcp) {
        Message::ScanReply { read_data } => assert_eq!(&read_data[..], &[0xC3]),
        other => panic!("expected ScanReply, got {:?}", other),
    }
}
