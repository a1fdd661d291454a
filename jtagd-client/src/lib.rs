//! # jtagd Client
//!
//! A client library for driving a debug adapter served by a remote `jtagd`
//! daemon. [`RemoteAdapter`] implements the same
//! [`Adapter`](jtagd_adapter::Adapter) contract a local backend does, so
//! code built against the contract cannot tell whether the cable is on the
//! bench or across the network.
//!
//! ## Connecting
//!
//! ```ignore
//! use jtagd_client::RemoteAdapter;
//! use jtagd_adapter::Adapter;
//!
//! let mut adapter = RemoteAdapter::connect("bench-host:50123")?;
//! println!("remote adapter: {} ({})", adapter.name(), adapter.serial());
//!
//! if let Some(jtag) = adapter.jtag() {
//!     jtag.reset_to_idle()?;
//! }
//! ```
//!
//! ## Marshaling model
//!
//! Every contract call becomes one request frame plus, where the protocol
//! defines one, one reply frame. Constant metadata (name, serial, user id,
//! frequency, GPIO pin count, split support) is fetched once during
//! [`RemoteAdapter::connect`] and served from the proxy afterwards;
//! performance counters are never cached and always round-trip to the
//! daemon. Deferred operations lean on the daemon's own queue: the proxy
//! forwards split writes and deferred dummy clocks as they are and lets the
//! server-side adapter batch them until a `Flush`.
//!
//! Transport failures surface as
//! [`AdapterError`](jtagd_adapter::AdapterError): socket errors as `Io`,
//! protocol mismatches as `Protocol`.

use std::net::{TcpStream, ToSocketAddrs};

use jtagd_adapter::{Adapter, AdapterError, GpioInterface, JtagInterface};
use jtagd_protocol::{
    codec,
    error::WireError,
    InfoKind, InfoValue, Message, MessageTag, PerfCounter, PinState, TapTransition, Transport,
    MAGIC, MAX_FRAME_LEN, PROTOCOL_VERSION,
};

fn wire_err(e: WireError) -> AdapterError {
    match e {
        WireError::IoError(io) => AdapterError::Io(io),
        other => AdapterError::Protocol(other.to_string()),
    }
}

fn info_str(tcp: &mut TcpStream, kind: InfoKind) -> Result<String, AdapterError> {
    codec::send(tcp, &Message::InfoRequest(kind))?;
    match codec::recv_expected(tcp, MessageTag::InfoReply, MAX_FRAME_LEN).map_err(wire_err)? {
        Message::InfoReply(InfoValue::Str(s)) => Ok(s),
        other => Err(AdapterError::Protocol(format!(
            "expected a string info reply, got {}",
            other.tag()
        ))),
    }
}

fn info_num(tcp: &mut TcpStream, request: &Message) -> Result<u64, AdapterError> {
    codec::send(tcp, request)?;
    match codec::recv_expected(tcp, MessageTag::InfoReply, MAX_FRAME_LEN).map_err(wire_err)? {
        Message::InfoReply(InfoValue::Num(n)) => Ok(n),
        other => Err(AdapterError::Protocol(format!(
            "expected a numeric info reply, got {}",
            other.tag()
        ))),
    }
}

/// A debug adapter living behind a remote `jtagd` daemon.
///
/// Satisfies the full adapter contract; the capability set mirrors what the
/// daemon negotiated and reported at connect time.
pub struct RemoteAdapter {
    tcp: TcpStream,
    transport: Transport,
    name: String,
    serial: String,
    user_id: String,
    frequency: u32,
    split_supported: bool,
    /// Cached bank view, (value, is_output) per pin. Deferred setters edit
    /// this; `write_gpio_state` ships it.
    gpio_cache: Vec<(bool, bool)>,
}

impl RemoteAdapter {
    /// Connects, runs the hello exchange and caches the adapter metadata.
    ///
    /// The proxy adopts the transport the server advertises (JTAG when the
    /// remote adapter has it, SWD otherwise).
    pub fn connect(addr: impl ToSocketAddrs) -> Result<RemoteAdapter, AdapterError> {
        let mut tcp = TcpStream::connect(addr)?;
        tcp.set_nodelay(true)?;

        let hello =
            codec::recv_expected(&mut tcp, MessageTag::Hello, MAX_FRAME_LEN).map_err(wire_err)?;
        let transport = match hello {
            Message::Hello {
                magic,
                version,
                transport,
            } => {
                if magic != MAGIC || version != PROTOCOL_VERSION {
                    return Err(AdapterError::Protocol(format!(
                        "bad server hello: magic {:?}, version {}",
                        magic, version
                    )));
                }
                transport
            }
            other => {
                return Err(AdapterError::Protocol(format!(
                    "expected server hello, got {}",
                    other.tag()
                )));
            }
        };
        codec::send(&mut tcp, &Message::hello(transport))?;
        log::debug!("session ready, transport {}", transport);

        let name = info_str(&mut tcp, InfoKind::HwName)?;
        let serial = info_str(&mut tcp, InfoKind::HwSerial)?;
        let user_id = info_str(&mut tcp, InfoKind::UserId)?;
        let frequency = info_num(&mut tcp, &Message::InfoRequest(InfoKind::Freq))? as u32;
        let gpio_count = info_num(&mut tcp, &Message::InfoRequest(InfoKind::GpioCount))? as usize;
        let split_supported = match transport {
            Transport::Jtag => info_num(&mut tcp, &Message::SplitQuery)? != 0,
            Transport::Swd => false,
        };

        log::info!(
            "connected to remote adapter {} (serial {}, {} Hz)",
            name,
            serial,
            frequency
        );
        Ok(RemoteAdapter {
            tcp,
            transport,
            name,
            serial,
            user_id,
            frequency,
            split_supported,
            gpio_cache: vec![(false, false); gpio_count],
        })
    }

    /// The transport negotiated with the daemon.
    pub fn transport(&self) -> Transport {
        self.transport
    }

    fn request(&mut self, message: &Message) -> Result<(), AdapterError> {
        codec::send(&mut self.tcp, message)?;
        Ok(())
    }

    fn transition(&mut self, transition: TapTransition) -> Result<(), AdapterError> {
        self.request(&Message::StateRequest {
            state: transition as u8,
        })
    }

    fn recv_scan_reply(&mut self, rx: &mut [u8], nbytes: usize) -> Result<(), AdapterError> {
        let reply = codec::recv_expected(&mut self.tcp, MessageTag::ScanReply, MAX_FRAME_LEN)
            .map_err(wire_err)?;
        match reply {
            Message::ScanReply { read_data } => {
                if read_data.len() != nbytes || rx.len() < nbytes {
                    return Err(AdapterError::Protocol(format!(
                        "scan reply carries {} bytes, expected {}",
                        read_data.len(),
                        nbytes
                    )));
                }
                rx[..nbytes].copy_from_slice(&read_data);
                Ok(())
            }
            other => Err(AdapterError::Protocol(format!(
                "expected a scan reply, got {}",
                other.tag()
            ))),
        }
    }

    /// Sends one scan request, receiving the reply into `rx` when one is
    /// due.
    fn scan(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        nbits: u32,
        split: bool,
    ) -> Result<(), AdapterError> {
        let nbytes = nbits.div_ceil(8) as usize;
        if tx.len() < nbytes {
            return Err(AdapterError::Hardware(format!(
                "TDI buffer holds {} bytes, {} bits need {}",
                tx.len(),
                nbits,
                nbytes
            )));
        }
        let read_requested = rx.is_some();
        self.request(&Message::ScanRequest {
            total_len: nbits,
            read_requested,
            split,
            set_tms_at_end: last_tms,
            write_data: tx[..nbytes].into(),
        })?;
        if let Some(rx) = rx {
            self.recv_scan_reply(rx, nbytes)?;
        }
        Ok(())
    }
}

impl Drop for RemoteAdapter {
    fn drop(&mut self) {
        // best effort: tell the daemon this was a clean goodbye
        let _ = codec::send(&mut self.tcp, &Message::Disconnect);
    }
}

impl Adapter for RemoteAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn frequency(&self) -> u32 {
        self.frequency
    }

    fn commit(&mut self) -> Result<(), AdapterError> {
        // the flush is ordered before any later request by the strict
        // request loop on the server side
        self.request(&Message::Flush)
    }

    fn jtag(&mut self) -> Option<&mut dyn JtagInterface> {
        if self.transport == Transport::Jtag {
            Some(self)
        } else {
            None
        }
    }

    fn supports_swd(&self) -> bool {
        self.transport == Transport::Swd
    }

    fn gpio(&mut self) -> Option<&mut dyn GpioInterface> {
        if self.gpio_cache.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl JtagInterface for RemoteAdapter {
    fn test_logic_reset(&mut self) -> Result<(), AdapterError> {
        self.transition(TapTransition::TestLogicReset)
    }

    fn enter_shift_ir(&mut self) -> Result<(), AdapterError> {
        self.transition(TapTransition::EnterShiftIr)
    }

    fn leave_exit1_ir(&mut self) -> Result<(), AdapterError> {
        self.transition(TapTransition::LeaveExit1Ir)
    }

    fn enter_shift_dr(&mut self) -> Result<(), AdapterError> {
        self.transition(TapTransition::EnterShiftDr)
    }

    fn leave_exit1_dr(&mut self) -> Result<(), AdapterError> {
        self.transition(TapTransition::LeaveExit1Dr)
    }

    fn reset_to_idle(&mut self) -> Result<(), AdapterError> {
        self.transition(TapTransition::ResetToIdle)
    }

    fn shift_data(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        nbits: u32,
    ) -> Result<(), AdapterError> {
        self.scan(last_tms, tx, rx, nbits, false)
    }

    fn shift_data_write_only(
        &mut self,
        last_tms: bool,
        tx: &[u8],
        rx: Option<&mut [u8]>,
        nbits: u32,
    ) -> Result<bool, AdapterError> {
        if !self.split_supported {
            // remote backend cannot defer; run the scan synchronously
            self.scan(last_tms, tx, rx, nbits, false)?;
            return Ok(false);
        }

        // The daemon answers a split write immediately with placeholder
        // data; the real capture comes back on the read half, so the
        // caller's rx stays untouched here.
        let nbytes = nbits.div_ceil(8) as usize;
        if tx.len() < nbytes {
            return Err(AdapterError::Hardware(format!(
                "TDI buffer holds {} bytes, {} bits need {}",
                tx.len(),
                nbits,
                nbytes
            )));
        }
        let read_requested = rx.is_some();
        self.request(&Message::ScanRequest {
            total_len: nbits,
            read_requested,
            split: true,
            set_tms_at_end: last_tms,
            write_data: tx[..nbytes].into(),
        })?;
        if read_requested {
            let mut placeholder = vec![0u8; nbytes];
            self.recv_scan_reply(&mut placeholder, nbytes)?;
        }
        Ok(true)
    }

    fn shift_data_read_only(&mut self, rx: &mut [u8], nbits: u32) -> Result<bool, AdapterError> {
        let nbytes = nbits.div_ceil(8) as usize;
        self.request(&Message::ScanRequest {
            total_len: nbits,
            read_requested: true,
            split: true,
            set_tms_at_end: false,
            write_data: Box::default(),
        })?;
        self.recv_scan_reply(rx, nbytes)?;
        Ok(true)
    }

    fn send_dummy_clocks(&mut self, nbits: u32) -> Result<(), AdapterError> {
        self.request(&Message::ScanRequest {
            total_len: nbits,
            read_requested: false,
            split: false,
            set_tms_at_end: false,
            write_data: Box::default(),
        })
    }

    fn send_dummy_clocks_deferred(&mut self, nbits: u32) -> Result<(), AdapterError> {
        // same wire form; batching is the server-side adapter's business
        self.send_dummy_clocks(nbits)
    }

    fn is_split_scan_supported(&self) -> bool {
        self.split_supported
    }

    fn shift_op_count(&mut self) -> Result<u64, AdapterError> {
        let request = Message::PerfRequest(PerfCounter::ShiftOps);
        info_num(&mut self.tcp, &request)
    }

    fn data_bit_count(&mut self) -> Result<u64, AdapterError> {
        let request = Message::PerfRequest(PerfCounter::DataBits);
        info_num(&mut self.tcp, &request)
    }

    fn mode_bit_count(&mut self) -> Result<u64, AdapterError> {
        let request = Message::PerfRequest(PerfCounter::ModeBits);
        info_num(&mut self.tcp, &request)
    }

    fn dummy_clock_count(&mut self) -> Result<u64, AdapterError> {
        let request = Message::PerfRequest(PerfCounter::DummyClocks);
        info_num(&mut self.tcp, &request)
    }

    fn recoverable_error_count(&mut self) -> Result<u64, AdapterError> {
        // not part of the wire vocabulary
        Err(AdapterError::Unsupported("recoverable error counter"))
    }
}

impl GpioInterface for RemoteAdapter {
    fn gpio_count(&self) -> usize {
        self.gpio_cache.len()
    }

    fn read_gpio_state(&mut self) -> Result<(), AdapterError> {
        codec::send(&mut self.tcp, &Message::GpioReadRequest)?;
        let reply = codec::recv_expected(&mut self.tcp, MessageTag::BankState, MAX_FRAME_LEN)
            .map_err(wire_err)?;
        match reply {
            Message::BankState { states } => {
                if states.len() != self.gpio_cache.len() {
                    return Err(AdapterError::Protocol(format!(
                        "bank state carries {} pins, adapter reported {}",
                        states.len(),
                        self.gpio_cache.len()
                    )));
                }
                for (cached, pin) in self.gpio_cache.iter_mut().zip(states) {
                    *cached = (pin.value, pin.is_output);
                }
                Ok(())
            }
            other => Err(AdapterError::Protocol(format!(
                "expected a bank state, got {}",
                other.tag()
            ))),
        }
    }

    fn write_gpio_state(&mut self) -> Result<(), AdapterError> {
        let states = self
            .gpio_cache
            .iter()
            .map(|(value, is_output)| PinState {
                value: *value,
                is_output: *is_output,
            })
            .collect();
        codec::send(&mut self.tcp, &Message::GpioWriteRequest { states })?;
        Ok(())
    }

    fn value_cached(&self, index: usize) -> bool {
        self.gpio_cache.get(index).map(|p| p.0).unwrap_or(false)
    }

    fn direction(&self, index: usize) -> bool {
        self.gpio_cache.get(index).map(|p| p.1).unwrap_or(false)
    }

    fn set_value_deferred(&mut self, index: usize, value: bool) {
        if let Some(pin) = self.gpio_cache.get_mut(index) {
            pin.0 = value;
        }
    }

    fn set_direction_deferred(&mut self, index: usize, is_output: bool) {
        if let Some(pin) = self.gpio_cache.get_mut(index) {
            pin.1 = is_output;
        }
    }
}
