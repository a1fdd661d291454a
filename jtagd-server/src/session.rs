//! Per-connection session: hello handshake, request loop and dispatch.
//!
//! A session owns its adapter for its whole lifetime and processes requests
//! strictly in receive order; where a request defines a reply, the reply is
//! fully written before the next request is read.

use std::net::TcpStream;

use jtagd_adapter::{Adapter, AdapterError, GpioInterface, JtagInterface};
use jtagd_protocol::{
    codec,
    error::WireError,
    InfoKind, InfoValue, Message, MessageTag, PerfCounter, PinState, TapTransition, Transport,
    MAGIC, PROTOCOL_VERSION,
};
use thiserror::Error;

/// Why a session ended, when it did not end cleanly.
///
/// `Io`, `Wire` and `Protocol` poison the stream; `Adapter` means the
/// backend failed an operation mid-request. Capability misses are not
/// errors: they are logged and the session keeps running.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire: {0}")]
    Wire(WireError),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("adapter fault: {0}")]
    Adapter(#[from] AdapterError),
}

impl From<WireError> for SessionError {
    fn from(value: WireError) -> Self {
        match value {
            WireError::IoError(e) => SessionError::Io(e),
            other => SessionError::Wire(other),
        }
    }
}

/// Lifecycle of a session: hello exchange first, then the request loop,
/// then closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitingServerHello,
    AwaitingClientHello,
    Ready,
    Closed,
}

/// Whether the request loop keeps running after a dispatched message.
enum Flow {
    Continue,
    Quit,
}

/// One client connection bound to one adapter.
pub struct Session<'a> {
    adapter: &'a mut dyn Adapter,
    stream: TcpStream,
    state: SessionState,
    /// Negotiated on the client hello; `None` until the session is ready.
    transport: Option<Transport>,
    max_frame_len: usize,
}

impl<'a> Session<'a> {
    pub fn new(adapter: &'a mut dyn Adapter, stream: TcpStream, max_frame_len: usize) -> Session<'a> {
        Session {
            adapter,
            stream,
            state: SessionState::AwaitingServerHello,
            transport: None,
            max_frame_len,
        }
    }

    /// Runs the session to completion: handshake, request loop, close.
    ///
    /// Returns `Ok` on a clean `Disconnect` or on EOF at a frame boundary;
    /// any [`SessionError`] means the connection was torn down mid-protocol.
    pub fn run(&mut self) -> Result<(), SessionError> {
        self.stream.set_nodelay(true)?;
        let result = match self.handshake() {
            Ok(()) => self.request_loop(),
            Err(e) => Err(e),
        };
        self.state = SessionState::Closed;
        result
    }

    fn handshake(&mut self) -> Result<(), SessionError> {
        debug_assert_eq!(self.state, SessionState::AwaitingServerHello);

        // Advertise the transport the adapter prefers: JTAG when present,
        // SWD otherwise.
        let preferred = if self.adapter.jtag().is_some() {
            Transport::Jtag
        } else {
            Transport::Swd
        };
        codec::send(&mut self.stream, &Message::hello(preferred))?;
        self.state = SessionState::AwaitingClientHello;

        let message = codec::recv_expected(&mut self.stream, MessageTag::Hello, self.max_frame_len)?;
        let (magic, version, transport) = match message {
            Message::Hello {
                magic,
                version,
                transport,
            } => (magic, version, transport),
            _ => return Err(SessionError::Protocol("hello expected".to_string())),
        };

        if magic != MAGIC || version != PROTOCOL_VERSION {
            return Err(SessionError::Protocol(format!(
                "bad client hello: magic {:?}, version {}",
                magic, version
            )));
        }
        let acceptable = match transport {
            Transport::Jtag => self.adapter.jtag().is_some(),
            Transport::Swd => self.adapter.supports_swd(),
        };
        if !acceptable {
            return Err(SessionError::Protocol(format!(
                "client requested {} but the adapter cannot drive it",
                transport
            )));
        }

        self.transport = Some(transport);
        self.state = SessionState::Ready;
        log::info!("session ready, transport {}", transport);
        Ok(())
    }

    fn request_loop(&mut self) -> Result<(), SessionError> {
        loop {
            let message = match codec::recv(&mut self.stream, self.max_frame_len) {
                Ok(message) => message,
                Err(WireError::Eof) => {
                    log::debug!("client closed the connection");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            log::trace!("request: {}", message.tag());

            match self.dispatch(message)? {
                Flow::Continue => {}
                Flow::Quit => {
                    log::info!("clean disconnect requested");
                    return Ok(());
                }
            }
        }
    }

    fn dispatch(&mut self, message: Message) -> Result<Flow, SessionError> {
        match message {
            Message::Hello { .. } => {
                log::warn!("mid-session hello ignored");
            }

            Message::Disconnect => return Ok(Flow::Quit),

            Message::Flush => self.adapter.commit()?,

            Message::InfoRequest(kind) => {
                let value = match kind {
                    InfoKind::HwName => InfoValue::Str(self.adapter.name().to_string()),
                    InfoKind::HwSerial => InfoValue::Str(self.adapter.serial().to_string()),
                    InfoKind::UserId => InfoValue::Str(self.adapter.user_id().to_string()),
                    InfoKind::Freq => InfoValue::Num(self.adapter.frequency() as u64),
                    InfoKind::GpioCount => {
                        let count = self.adapter.gpio().map(|g| g.gpio_count()).unwrap_or(0);
                        InfoValue::Num(count as u64)
                    }
                };
                self.reply(&Message::InfoReply(value))?;
            }

            Message::PerfRequest(counter) => {
                let Some(jtag) = self.jtag_capability("performance counter query") else {
                    return Ok(Flow::Continue);
                };
                let value = match counter {
                    PerfCounter::ShiftOps => jtag.shift_op_count()?,
                    PerfCounter::DataBits => jtag.data_bit_count()?,
                    PerfCounter::ModeBits => jtag.mode_bit_count()?,
                    PerfCounter::DummyClocks => jtag.dummy_clock_count()?,
                };
                self.reply(&Message::InfoReply(InfoValue::Num(value)))?;
            }

            Message::SplitQuery => {
                let Some(jtag) = self.jtag_capability("split scan query") else {
                    return Ok(Flow::Continue);
                };
                let supported = jtag.is_split_scan_supported() as u64;
                self.reply(&Message::InfoReply(InfoValue::Num(supported)))?;
            }

            Message::StateRequest { state } => {
                let Some(jtag) = self.jtag_capability("TAP state transition") else {
                    return Ok(Flow::Continue);
                };
                match TapTransition::try_from(state) {
                    Ok(TapTransition::TestLogicReset) => jtag.test_logic_reset()?,
                    Ok(TapTransition::EnterShiftIr) => jtag.enter_shift_ir()?,
                    Ok(TapTransition::LeaveExit1Ir) => jtag.leave_exit1_ir()?,
                    Ok(TapTransition::EnterShiftDr) => jtag.enter_shift_dr()?,
                    Ok(TapTransition::LeaveExit1Dr) => jtag.leave_exit1_dr()?,
                    Ok(TapTransition::ResetToIdle) => jtag.reset_to_idle()?,
                    Err(_) => log::warn!("unknown TAP transition code 0x{:02x} ignored", state),
                }
            }

            Message::ScanRequest {
                total_len,
                read_requested,
                split,
                set_tms_at_end,
                write_data,
            } => {
                return self.dispatch_scan(total_len, read_requested, split, set_tms_at_end, &write_data);
            }

            Message::GpioReadRequest => {
                let states = match self.adapter.gpio() {
                    Some(gpio) => {
                        gpio.read_gpio_state()?;
                        (0..gpio.gpio_count())
                            .map(|i| PinState {
                                value: gpio.value_cached(i),
                                is_output: gpio.direction(i),
                            })
                            .collect()
                    }
                    None => {
                        log::warn!("GPIO bank read on an adapter without GPIO");
                        Vec::new()
                    }
                };
                // the client is always waiting on this one, even when the
                // bank is empty
                self.reply(&Message::BankState { states })?;
            }

            Message::GpioWriteRequest { states } => match self.adapter.gpio() {
                Some(gpio) => {
                    if states.len() != gpio.gpio_count() {
                        log::warn!(
                            "GPIO write carries {} pins, bank has {}",
                            states.len(),
                            gpio.gpio_count()
                        );
                    }
                    for (index, pin) in states.iter().enumerate().take(gpio.gpio_count()) {
                        gpio.set_value_deferred(index, pin.value);
                        gpio.set_direction_deferred(index, pin.is_output);
                    }
                    gpio.write_gpio_state()?;
                }
                None => log::warn!("GPIO bank write on an adapter without GPIO"),
            },

            // Replies never arrive as requests on a healthy stream.
            Message::InfoReply(_) | Message::ScanReply { .. } | Message::BankState { .. } => {
                return Err(SessionError::Protocol(format!(
                    "received reply variant {} as a request",
                    message.tag()
                )));
            }
        }
        Ok(Flow::Continue)
    }

    /// The scan path. `total_len` is the bit count; a read buffer of
    /// ⌈total_len/8⌉ bytes is allocated iff the client asked to read.
    fn dispatch_scan(
        &mut self,
        total_len: u32,
        read_requested: bool,
        split: bool,
        set_tms_at_end: bool,
        write_data: &[u8],
    ) -> Result<Flow, SessionError> {
        let nbytes = total_len.div_ceil(8) as usize;
        let mut rx = if read_requested {
            Some(vec![0u8; nbytes])
        } else {
            None
        };

        {
            let Some(jtag) = self.jtag_capability("scan") else {
                // keep the stream in sync: answer iff the client is waiting
                if rx.is_some() {
                    self.reply(&Message::ScanReply {
                        read_data: Box::default(),
                    })?;
                }
                return Ok(Flow::Continue);
            };

            if write_data.is_empty() && !read_requested {
                // nothing to write, nothing to read: plain dummy clocks
                jtag.send_dummy_clocks(total_len)?;
                return Ok(Flow::Continue);
            }

            if split && write_data.is_empty() {
                // read half of an earlier deferred write
                if let Some(rx) = rx.as_deref_mut() {
                    jtag.shift_data_read_only(rx, total_len)?;
                }
            } else {
                if write_data.len() < nbytes {
                    return Err(SessionError::Protocol(format!(
                        "scan of {} bits needs {} bytes of write data, got {}",
                        total_len,
                        nbytes,
                        write_data.len()
                    )));
                }
                if split {
                    let deferred = jtag.shift_data_write_only(
                        set_tms_at_end,
                        write_data,
                        rx.as_deref_mut(),
                        total_len,
                    )?;
                    if !deferred {
                        return Err(SessionError::Protocol(
                            "backend executed a split scan synchronously".to_string(),
                        ));
                    }
                } else {
                    jtag.shift_data(set_tms_at_end, write_data, rx.as_deref_mut(), total_len)?;
                }
            }
        }

        if let Some(rx) = rx {
            self.reply(&Message::ScanReply {
                read_data: rx.into_boxed_slice(),
            })?;
        }
        Ok(Flow::Continue)
    }

    /// The adapter's JTAG capability, gated on the negotiated transport.
    /// Logs the capability warning and returns `None` when this session may
    /// not drive JTAG.
    fn jtag_capability(&mut self, what: &str) -> Option<&mut dyn JtagInterface> {
        if self.transport != Some(Transport::Jtag) {
            log::warn!("{} requested on a non-JTAG session", what);
            return None;
        }
        let jtag = self.adapter.jtag();
        if jtag.is_none() {
            log::warn!("{} requested but the adapter has no JTAG capability", what);
        }
        jtag
    }

    fn reply(&mut self, message: &Message) -> Result<(), SessionError> {
        log::trace!("reply: {}", message.tag());
        codec::send(&mut self.stream, message)?;
        Ok(())
    }
}
