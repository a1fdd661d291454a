use std::fmt::Display;

/// Magic string exchanged in both hello messages.
pub const MAGIC: &str = "JTAGHAL";

/// Current protocol version. Peers with a different version are rejected.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default port the daemon listens on.
pub const DEFAULT_PORT: u16 = 50123;

/// Largest frame either side will accept.
///
/// Covers the biggest scan a client can reasonably issue; a length prefix
/// above this is treated as a corrupted stream rather than a real request.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// The debug transport a session drives.
///
/// The server advertises the bound adapter's preferred transport in its
/// hello; the client answers with the transport it intends to use. A client
/// asking for a transport the adapter does not expose is rejected during the
/// handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Transport {
    Jtag = 1,
    Swd = 2,
}

impl TryFrom<u8> for Transport {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            1 => Ok(Transport::Jtag),
            2 => Ok(Transport::Swd),
            _ => Err(()),
        }
    }
}

impl Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transport::Jtag => write!(f, "JTAG"),
            Transport::Swd => write!(f, "SWD"),
        }
    }
}

/// Adapter metadata queried with [`Message::InfoRequest`].
///
/// `HwName`, `HwSerial` and `UserId` are answered with a string reply;
/// `Freq` (Hz) and `GpioCount` with a numeric one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InfoKind {
    HwName = 1,
    HwSerial = 2,
    UserId = 3,
    Freq = 4,
    GpioCount = 5,
}

impl TryFrom<u8> for InfoKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            1 => Ok(InfoKind::HwName),
            2 => Ok(InfoKind::HwSerial),
            3 => Ok(InfoKind::UserId),
            4 => Ok(InfoKind::Freq),
            5 => Ok(InfoKind::GpioCount),
            _ => Err(()),
        }
    }
}

/// Cumulative adapter performance counters queried with
/// [`Message::PerfRequest`]. All are monotonically non-decreasing within a
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PerfCounter {
    ShiftOps = 1,
    DataBits = 2,
    ModeBits = 3,
    DummyClocks = 4,
}

impl TryFrom<u8> for PerfCounter {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            1 => Ok(PerfCounter::ShiftOps),
            2 => Ok(PerfCounter::DataBits),
            3 => Ok(PerfCounter::ModeBits),
            4 => Ok(PerfCounter::DummyClocks),
            _ => Err(()),
        }
    }
}

/// TAP state-machine transitions requestable with [`Message::StateRequest`].
///
/// The message itself carries the raw code so that a server can log and
/// ignore codes it does not recognize instead of tearing the session down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TapTransition {
    TestLogicReset = 1,
    EnterShiftIr = 2,
    LeaveExit1Ir = 3,
    EnterShiftDr = 4,
    LeaveExit1Dr = 5,
    ResetToIdle = 6,
}

impl TryFrom<u8> for TapTransition {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            1 => Ok(TapTransition::TestLogicReset),
            2 => Ok(TapTransition::EnterShiftIr),
            3 => Ok(TapTransition::LeaveExit1Ir),
            4 => Ok(TapTransition::EnterShiftDr),
            5 => Ok(TapTransition::LeaveExit1Dr),
            6 => Ok(TapTransition::ResetToIdle),
            _ => Err(()),
        }
    }
}

/// State of a single GPIO pin as carried by [`Message::BankState`] and
/// [`Message::GpioWriteRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PinState {
    /// Logic level of the pin (for inputs: last sampled level).
    pub value: bool,
    /// True when the pin is driven by the adapter, false for high-Z input.
    pub is_output: bool,
}

impl PinState {
    /// Packs the pin into the single-byte wire form (bit 0 value, bit 1
    /// direction).
    pub fn pack(&self) -> u8 {
        (self.value as u8) | ((self.is_output as u8) << 1)
    }

    /// Unpacks the single-byte wire form. Bits above bit 1 are ignored.
    pub fn unpack(raw: u8) -> PinState {
        PinState {
            value: raw & 0x01 != 0,
            is_output: raw & 0x02 != 0,
        }
    }
}

/// Reply payload of [`Message::InfoReply`]: either a textual or a numeric
/// answer, depending on the [`InfoKind`] queried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoValue {
    Str(String),
    Num(u64),
}

/// One message on the framed binary wire.
///
/// Every frame is a 4-byte little-endian payload length followed by the
/// payload; the first payload byte identifies the variant. A session is a
/// hello exchange followed by a strict request/reply loop: the server sends
/// a reply (where one is defined) before reading the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Handshake, sent by both sides. The server's hello advertises the
    /// adapter's preferred transport; the client's hello selects one.
    Hello {
        magic: String,
        version: u8,
        transport: Transport,
    },
    /// Clean session termination. No reply.
    Disconnect,
    /// Drain the adapter's deferred operation queue. No reply; ordering is
    /// guaranteed by the strict request loop.
    Flush,
    /// Query a piece of adapter metadata. Reply: [`Message::InfoReply`].
    InfoRequest(InfoKind),
    /// Answer to [`Message::InfoRequest`], [`Message::PerfRequest`] and
    /// [`Message::SplitQuery`].
    InfoReply(InfoValue),
    /// Query a performance counter. Reply: numeric [`Message::InfoReply`].
    PerfRequest(PerfCounter),
    /// Ask whether the adapter supports split (deferred-read) scans.
    /// Reply: numeric [`Message::InfoReply`] carrying 0 or 1.
    SplitQuery,
    /// Request a TAP state transition. No reply. Carries the raw code so
    /// unknown transitions degrade to a warning instead of a decode error.
    StateRequest { state: u8 },
    /// Shift a bit vector through the scan chain.
    ///
    /// `write_data` may be empty together with `read_requested = false`, in
    /// which case the request degenerates to `total_len` dummy clocks.
    /// Reply: [`Message::ScanReply`] iff `read_requested`.
    ScanRequest {
        total_len: u32,
        read_requested: bool,
        split: bool,
        set_tms_at_end: bool,
        write_data: Box<[u8]>,
    },
    /// Data clocked out of the chain; exactly ⌈total_len/8⌉ bytes.
    ScanReply { read_data: Box<[u8]> },
    /// Fetch the whole GPIO bank. Always answered with
    /// [`Message::BankState`], empty when the adapter has no GPIO.
    GpioReadRequest,
    /// Rewrite the whole GPIO bank (values and directions). No reply.
    GpioWriteRequest { states: Vec<PinState> },
    /// Snapshot of the GPIO bank, one record per pin.
    BankState { states: Vec<PinState> },
}

impl Message {
    /// Builds the hello this end should send for `transport`.
    pub fn hello(transport: Transport) -> Message {
        Message::Hello {
            magic: MAGIC.to_string(),
            version: PROTOCOL_VERSION,
            transport,
        }
    }

    /// Wire tag identifying the variant.
    pub fn tag(&self) -> MessageTag {
        match self {
            Message::Hello { .. } => MessageTag::Hello,
            Message::Disconnect => MessageTag::Disconnect,
            Message::Flush => MessageTag::Flush,
            Message::InfoRequest(_) => MessageTag::InfoRequest,
            Message::InfoReply(_) => MessageTag::InfoReply,
            Message::PerfRequest(_) => MessageTag::PerfRequest,
            Message::SplitQuery => MessageTag::SplitQuery,
            Message::StateRequest { .. } => MessageTag::StateRequest,
            Message::ScanRequest { .. } => MessageTag::ScanRequest,
            Message::ScanReply { .. } => MessageTag::ScanReply,
            Message::GpioReadRequest => MessageTag::GpioReadRequest,
            Message::GpioWriteRequest { .. } => MessageTag::GpioWriteRequest,
            Message::BankState { .. } => MessageTag::BankState,
        }
    }
}

/// Discriminant byte of each [`Message`] variant on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
    Hello = 0x01,
    Disconnect = 0x02,
    Flush = 0x03,
    InfoRequest = 0x04,
    InfoReply = 0x05,
    PerfRequest = 0x06,
    SplitQuery = 0x07,
    StateRequest = 0x08,
    ScanRequest = 0x09,
    ScanReply = 0x0A,
    GpioReadRequest = 0x0B,
    GpioWriteRequest = 0x0C,
    BankState = 0x0D,
}

impl TryFrom<u8> for MessageTag {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageTag::Hello),
            0x02 => Ok(MessageTag::Disconnect),
            0x03 => Ok(MessageTag::Flush),
            0x04 => Ok(MessageTag::InfoRequest),
            0x05 => Ok(MessageTag::InfoReply),
            0x06 => Ok(MessageTag::PerfRequest),
            0x07 => Ok(MessageTag::SplitQuery),
            0x08 => Ok(MessageTag::StateRequest),
            0x09 => Ok(MessageTag::ScanRequest),
            0x0A => Ok(MessageTag::ScanReply),
            0x0B => Ok(MessageTag::GpioReadRequest),
            0x0C => Ok(MessageTag::GpioWriteRequest),
            0x0D => Ok(MessageTag::BankState),
            _ => Err(()),
        }
    }
}

impl Display for MessageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageTag::Hello => "Hello",
            MessageTag::Disconnect => "Disconnect",
            MessageTag::Flush => "Flush",
            MessageTag::InfoRequest => "InfoRequest",
            MessageTag::InfoReply => "InfoReply",
            MessageTag::PerfRequest => "PerfRequest",
            MessageTag::SplitQuery => "SplitQuery",
            MessageTag::StateRequest => "StateRequest",
            MessageTag::ScanRequest => "ScanRequest",
            MessageTag::ScanReply => "ScanReply",
            MessageTag::GpioReadRequest => "GpioReadRequest",
            MessageTag::GpioWriteRequest => "GpioWriteRequest",
            MessageTag::BankState => "BankState",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pin_state_packing() {
        let pin = PinState {
            value: true,
            is_output: false,
        };
        assert_eq!(pin.pack(), 0x01);
        assert_eq!(PinState::unpack(0x01), pin);

        let pin = PinState {
            value: false,
            is_output: true,
        };
        assert_eq!(pin.pack(), 0x02);
        assert_eq!(PinState::unpack(0x02), pin);

        // high bits are ignored on unpack
        assert_eq!(
            PinState::unpack(0xFF),
            PinState {
                value: true,
                is_output: true
            }
        );
    }

    #[test]
    fn hello_uses_protocol_constants() {
        match Message::hello(Transport::Jtag) {
            Message::Hello {
                magic,
                version,
                transport,
            } => {
                assert_eq!(magic, MAGIC);
                assert_eq!(version, PROTOCOL_VERSION);
                assert_eq!(transport, Transport::Jtag);
            }
            _ => panic!("expected Hello"),
        }
    }

    #[test]
    fn transport_round_trip() {
        for t in [Transport::Jtag, Transport::Swd] {
            assert_eq!(Transport::try_from(t as u8), Ok(t));
        }
        assert!(Transport::try_from(0).is_err());
        assert!(Transport::try_from(3).is_err());
    }

    #[test]
    fn tap_transition_codes() {
        for t in [
            TapTransition::TestLogicReset,
            TapTransition::EnterShiftIr,
            TapTransition::LeaveExit1Ir,
            TapTransition::EnterShiftDr,
            TapTransition::LeaveExit1Dr,
            TapTransition::ResetToIdle,
        ] {
            assert_eq!(TapTransition::try_from(t as u8), Ok(t));
        }
        assert!(TapTransition::try_from(0).is_err());
        assert!(TapTransition::try_from(7).is_err());
    }
}
