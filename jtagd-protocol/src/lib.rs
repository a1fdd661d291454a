//! # jtagd Wire Protocol
//!
//! This crate implements the framed binary protocol spoken between the
//! `jtagd` daemon and its remote clients. The daemon multiplexes a single
//! physical debug adapter (JTAG and/or SWD, optionally with GPIO) over TCP;
//! this crate defines what the two ends put on the socket.
//!
//! ## Wire format
//!
//! Every message is one frame: a 4-byte **little-endian** payload length
//! followed by the payload. The first payload byte is a type tag selecting
//! the [`Message`] variant; the remaining bytes are that variant's fields.
//! Strings are a 2-byte length plus UTF-8, scan data blobs a 4-byte length
//! plus raw bytes.
//!
//! ## Session shape
//!
//! A connection starts with a hello exchange: the server sends
//! `Hello{magic="JTAGHAL", version=1, transport}` advertising the adapter's
//! preferred transport, and the client answers with the same message
//! carrying the transport it wants to drive. After that the client issues
//! requests and the server answers each one (where a reply is defined)
//! before reading the next, so the stream never carries more than one
//! outstanding exchange.
//!
//! ## Reading messages
//!
//! ```
//! use jtagd_protocol::{codec, Message, Transport, MAX_FRAME_LEN};
//! use std::io::Cursor;
//!
//! let mut wire = Vec::new();
//! codec::send(&mut wire, &Message::hello(Transport::Jtag)).expect("vector writes cannot fail");
//!
//! let mut reader = Cursor::new(wire);
//! let hello = codec::recv(&mut reader, MAX_FRAME_LEN).expect("hello should decode");
//! assert_eq!(hello, Message::hello(Transport::Jtag));
//! ```
//!
//! ## Error handling
//!
//! [`codec::recv`] distinguishes a connection closed cleanly between frames
//! ([`error::WireError::Eof`]) from every real failure mode, so callers can
//! drop a finished session without logging noise. A length prefix above
//! [`MAX_FRAME_LEN`] poisons the stream and the session must be abandoned.

pub mod codec;
pub mod error;
pub mod protocol;
pub use protocol::*;
