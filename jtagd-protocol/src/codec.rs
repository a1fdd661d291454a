/// Length-framed read and write implementations for the protocol messages.
///
/// Every frame on the wire is a 4-byte little-endian payload length followed
/// by exactly that many payload bytes. Strings are a 2-byte length plus
/// UTF-8; scan data blobs are a 4-byte length plus raw bytes.
use std::io::{self, ErrorKind, Read, Write};

use crate::{
    error::WireError,
    protocol::{InfoKind, InfoValue, Message, MessageTag, PerfCounter, PinState, Transport},
};

/// Serializes `message` and writes it as a single length-prefixed frame.
///
/// The write is complete when this returns: short writes are retried by
/// `write_all` until the whole frame is on the stream.
pub fn send(writer: &mut impl Write, message: &Message) -> io::Result<()> {
    let payload = encode_payload(message);
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)
}

/// Reads one frame from `reader` and decodes it.
///
/// Short reads are looped until the frame is complete. A connection closed
/// cleanly between frames yields [`WireError::Eof`]; closed mid-frame it is
/// an I/O error. `max_frame_len` caps the length prefix; anything larger is
/// [`WireError::FrameTooLarge`] and the stream must be abandoned.
pub fn recv(reader: &mut impl Read, max_frame_len: usize) -> Result<Message, WireError> {
    let mut len_buf = [0u8; 4];
    read_exact_or_eof(reader, &mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max_frame_len {
        return Err(WireError::FrameTooLarge {
            max: max_frame_len,
            got: len,
        });
    }
    if len == 0 {
        return Err(WireError::Malformed("empty frame".to_string()));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    decode_payload(&payload)
}

/// Like [`recv`], but fails with [`WireError::UnexpectedMessage`] when the
/// decoded message is not of the awaited type.
pub fn recv_expected(
    reader: &mut impl Read,
    expected: MessageTag,
    max_frame_len: usize,
) -> Result<Message, WireError> {
    let message = recv(reader, max_frame_len)?;
    if message.tag() != expected {
        return Err(WireError::UnexpectedMessage {
            expected,
            got: message.tag(),
        });
    }
    Ok(message)
}

/// Fills `buf` completely, mapping zero bytes at the very start to
/// [`WireError::Eof`]. Zero bytes after a partial fill is a broken frame.
fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), WireError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Err(WireError::Eof),
            Ok(0) => {
                return Err(WireError::IoError(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "stream ended inside a frame",
                )));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------- encoding

fn encode_payload(message: &Message) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.push(message.tag() as u8);
    match message {
        Message::Hello {
            magic,
            version,
            transport,
        } => {
            put_str(&mut buf, magic);
            buf.push(*version);
            buf.push(*transport as u8);
        }
        Message::Disconnect | Message::Flush | Message::SplitQuery | Message::GpioReadRequest => {}
        Message::InfoRequest(kind) => buf.push(*kind as u8),
        Message::InfoReply(value) => match value {
            InfoValue::Str(s) => {
                buf.push(0);
                put_str(&mut buf, s);
            }
            InfoValue::Num(n) => {
                buf.push(1);
                buf.extend_from_slice(&n.to_le_bytes());
            }
        },
        Message::PerfRequest(counter) => buf.push(*counter as u8),
        Message::StateRequest { state } => buf.push(*state),
        Message::ScanRequest {
            total_len,
            read_requested,
            split,
            set_tms_at_end,
            write_data,
        } => {
            buf.extend_from_slice(&total_len.to_le_bytes());
            buf.push(*read_requested as u8);
            buf.push(*split as u8);
            buf.push(*set_tms_at_end as u8);
            put_blob(&mut buf, write_data);
        }
        Message::ScanReply { read_data } => put_blob(&mut buf, read_data),
        Message::GpioWriteRequest { states } | Message::BankState { states } => {
            buf.extend_from_slice(&(states.len() as u16).to_le_bytes());
            for pin in states {
                buf.push(pin.pack());
            }
        }
    }
    buf
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    buf.extend_from_slice(&(len as u16).to_le_bytes());
    buf.extend_from_slice(&bytes[..len]);
}

fn put_blob(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
}

// ---------------------------------------------------------------- decoding

fn decode_payload(payload: &[u8]) -> Result<Message, WireError> {
    let mut d = Decoder::new(payload);
    let raw_tag = d.u8()?;
    let tag = MessageTag::try_from(raw_tag).map_err(|_| WireError::UnknownMessageType(raw_tag))?;

    match tag {
        MessageTag::Hello => {
            let magic = d.str()?;
            let version = d.u8()?;
            let raw = d.u8()?;
            let transport = Transport::try_from(raw)
                .map_err(|_| WireError::Malformed(format!("unknown transport {}", raw)))?;
            Ok(Message::Hello {
                magic,
                version,
                transport,
            })
        }
        MessageTag::Disconnect => Ok(Message::Disconnect),
        MessageTag::Flush => Ok(Message::Flush),
        MessageTag::InfoRequest => {
            let raw = d.u8()?;
            let kind = InfoKind::try_from(raw)
                .map_err(|_| WireError::Malformed(format!("unknown info kind {}", raw)))?;
            Ok(Message::InfoRequest(kind))
        }
        MessageTag::InfoReply => match d.u8()? {
            0 => Ok(Message::InfoReply(InfoValue::Str(d.str()?))),
            1 => Ok(Message::InfoReply(InfoValue::Num(d.u64()?))),
            other => Err(WireError::Malformed(format!(
                "unknown info value tag {}",
                other
            ))),
        },
        MessageTag::PerfRequest => {
            let raw = d.u8()?;
            let counter = PerfCounter::try_from(raw)
                .map_err(|_| WireError::Malformed(format!("unknown perf counter {}", raw)))?;
            Ok(Message::PerfRequest(counter))
        }
        MessageTag::SplitQuery => Ok(Message::SplitQuery),
        MessageTag::StateRequest => Ok(Message::StateRequest { state: d.u8()? }),
        MessageTag::ScanRequest => {
            let total_len = d.u32()?;
            let read_requested = d.u8()? != 0;
            let split = d.u8()? != 0;
            let set_tms_at_end = d.u8()? != 0;
            let write_data = d.blob()?;
            Ok(Message::ScanRequest {
                total_len,
                read_requested,
                split,
                set_tms_at_end,
                write_data,
            })
        }
        MessageTag::ScanReply => Ok(Message::ScanReply {
            read_data: d.blob()?,
        }),
        MessageTag::GpioReadRequest => Ok(Message::GpioReadRequest),
        MessageTag::GpioWriteRequest => Ok(Message::GpioWriteRequest { states: d.pins()? }),
        MessageTag::BankState => Ok(Message::BankState { states: d.pins()? }),
    }
}

/// Cursor over a decoded payload. All reads are bounds-checked; running off
/// the end is a malformed frame, never a panic.
struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(buf: &'a [u8]) -> Decoder<'a> {
        Decoder { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() - self.pos < n {
            return Err(WireError::Malformed(format!(
                "payload truncated: wanted {} more bytes, had {}",
                n,
                self.buf.len() - self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn str(&mut self) -> Result<String, WireError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        Ok(std::str::from_utf8(bytes)?.to_string())
    }

    fn blob(&mut self) -> Result<Box<[u8]>, WireError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.into())
    }

    fn pins(&mut self) -> Result<Vec<PinState>, WireError> {
        let count = self.u16()? as usize;
        let raw = self.take(count)?;
        Ok(raw.iter().map(|b| PinState::unpack(*b)).collect())
    }
}
