//! End-to-end tests for the remote adapter proxy: a live daemon thread on
//! one side, the contract-level API on the other.

use std::net::{SocketAddr, TcpListener};
use std::thread;

use jtagd_adapter::{loopback::LoopbackAdapter, Adapter, AdapterError, GpioInterface, JtagInterface};
use jtagd_client::RemoteAdapter;
use jtagd_protocol::Transport;
use jtagd_server::{Config, Server};

fn serve(adapter: LoopbackAdapter) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(adapter, Config::default());
    thread::spawn(move || {
        let _ = server.serve(listener);
    });
    addr
}

#[test]
fn metadata_is_cached_at_connect() {
    let addr = serve(
        LoopbackAdapter::new()
            .with_serial("SIM4242")
            .with_user_id("rack-7")
            .with_frequency(25_000_000),
    );
    let adapter = RemoteAdapter::connect(addr).unwrap();

    assert_eq!(adapter.name(), "JTAG loopback simulator");
    assert_eq!(adapter.serial(), "SIM4242");
    assert_eq!(adapter.user_id(), "rack-7");
    assert_eq!(adapter.frequency(), 25_000_000);
    assert_eq!(adapter.transport(), Transport::Jtag);
}

#[test]
fn capabilities_mirror_the_remote_adapter() {
    let addr = serve(LoopbackAdapter::new().with_gpio_pins(4));
    let mut adapter = RemoteAdapter::connect(addr).unwrap();

    assert!(adapter.jtag().is_some());
    assert!(!adapter.supports_swd());
    assert_eq!(adapter.gpio().map(|g| g.gpio_count()), Some(4));
}

#[test]
fn gpio_less_remote_has_no_gpio_capability() {
    let addr = serve(LoopbackAdapter::new());
    let mut adapter = RemoteAdapter::connect(addr).unwrap();
    assert!(adapter.gpio().is_none());
}

#[test]
fn swd_session_has_no_jtag_capability() {
    let addr = serve(LoopbackAdapter::new().without_jtag().with_swd());
    let mut adapter = RemoteAdapter::connect(addr).unwrap();

    assert_eq!(adapter.transport(), Transport::Swd);
    assert!(adapter.jtag().is_none());
    assert!(adapter.supports_swd());
}

#[test]
fn full_duplex_shift_through_the_proxy() {
    let addr = serve(LoopbackAdapter::new());
    let mut adapter = RemoteAdapter::connect(addr).unwrap();
    let jtag = adapter.jtag().unwrap();

    jtag.reset_to_idle().unwrap();
    jtag.enter_shift_dr().unwrap();

    let mut rx = [0u8; 2];
    jtag.shift_data(true, &[0xAA, 0x55], Some(&mut rx), 16).unwrap();
    assert_eq!(rx, [0xAA, 0x55]);

    jtag.leave_exit1_dr().unwrap();
}

#[test]
fn tail_bits_come_back_zeroed() {
    let addr = serve(LoopbackAdapter::new());
    let mut adapter = RemoteAdapter::connect(addr).unwrap();
    let jtag = adapter.jtag().unwrap();

    jtag.reset_to_idle().unwrap();
    jtag.enter_shift_dr().unwrap();

    let mut rx = [0u8; 2];
    jtag.shift_data(false, &[0xFF, 0xFF], Some(&mut rx), 13).unwrap();
    assert_eq!(rx, [0xFF, 0x1F]);
}

#[test]
fn split_scan_through_the_proxy() {
    let addr = serve(LoopbackAdapter::new());
    let mut adapter = RemoteAdapter::connect(addr).unwrap();

    assert!(adapter.jtag().unwrap().is_split_scan_supported());

    {
        let jtag = adapter.jtag().unwrap();
        jtag.reset_to_idle().unwrap();
        jtag.enter_shift_dr().unwrap();

        let mut sink = [0u8; 1];
        let deferred = jtag
            .shift_data_write_only(false, &[0x9D], Some(&mut sink), 8)
            .unwrap();
        assert!(deferred);
    }

    adapter.commit().unwrap();

    let jtag = adapter.jtag().unwrap();
    let mut rx = [0u8; 1];
    assert!(jtag.shift_data_read_only(&mut rx, 8).unwrap());
    assert_eq!(rx, [0x9D]);
}

#[test]
fn counters_advance_across_scans() {
    let addr = serve(LoopbackAdapter::new());
    let mut adapter = RemoteAdapter::connect(addr).unwrap();
    let jtag = adapter.jtag().unwrap();

    jtag.reset_to_idle().unwrap();
    jtag.enter_shift_dr().unwrap();

    let before = jtag.data_bit_count().unwrap();
    jtag.shift_data(false, &[0xFF, 0xFF, 0xFF], None, 24).unwrap();
    let after = jtag.data_bit_count().unwrap();

    assert_eq!(before, 0);
    assert_eq!(after, 24);
    assert_eq!(jtag.shift_op_count().unwrap(), 1);
}

#[test]
fn dummy_clocks_reach_the_remote_counter() {
    let addr = serve(LoopbackAdapter::new());
    let mut adapter = RemoteAdapter::connect(addr).unwrap();
    let jtag = adapter.jtag().unwrap();

    jtag.send_dummy_clocks(128).unwrap();
    jtag.send_dummy_clocks_deferred(72).unwrap();
    assert_eq!(jtag.dummy_clock_count().unwrap(), 200);
}

#[test]
fn recoverable_error_counter_is_not_remotable() {
    let addr = serve(LoopbackAdapter::new());
    let mut adapter = RemoteAdapter::connect(addr).unwrap();
    let jtag = adapter.jtag().unwrap();
    assert!(matches!(
        jtag.recoverable_error_count(),
        Err(AdapterError::Unsupported(_))
    ));
}

#[test]
fn gpio_round_trip_through_the_proxy() {
    let addr = serve(LoopbackAdapter::new().with_gpio_pins(3));
    let mut adapter = RemoteAdapter::connect(addr).unwrap();
    let gpio = adapter.gpio().unwrap();

    gpio.set_value_deferred(0, true);
    gpio.set_direction_deferred(0, true);
    gpio.set_value_deferred(2, true);
    gpio.write_gpio_state().unwrap();

    // clobber the local cache, then fetch the bank back from the daemon
    gpio.set_value_deferred(0, false);
    gpio.set_value_deferred(2, false);
    gpio.read_gpio_state().unwrap();

    assert!(gpio.value_cached(0));
    assert!(gpio.direction(0));
    assert!(!gpio.value_cached(1));
    assert!(gpio.value_cached(2));
    assert!(!gpio.direction(2));
}
