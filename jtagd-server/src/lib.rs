//! # jtagd Server Library
//!
//! The session engine of the `jtagd` daemon: it takes an adapter backend
//! (anything implementing [`jtagd_adapter::Adapter`]) and serves it to
//! remote clients over TCP.
//!
//! ## Architecture
//!
//! - **[`server::Server`]** runs the accept loops for the two listening
//!   surfaces. Every accepted connection gets its own OS thread; the
//!   adapter sits behind a mutex so exactly one session owns it at a time.
//! - **[`session::Session`]** handles one framed-protocol connection:
//!   server hello, client hello validation (magic, version, transport
//!   against the adapter's capabilities), then a strict read-dispatch-reply
//!   loop until `Disconnect`, EOF or an error.
//! - **[`xvc`]** speaks the Xilinx Virtual Cable text dialect on a second
//!   port, for vendor tools.
//!
//! ## How a request is handled
//!
//! 1. The codec reads one length-prefixed frame and decodes it
//! 2. The session gates it by state and by the negotiated transport
//! 3. The dispatcher translates it into adapter-contract calls: scans,
//!    TAP transitions, counter reads, GPIO bank moves
//! 4. Where the request defines a reply, it is fully written before the
//!    next request is read
//!
//! Requests that target a capability the adapter lacks never kill the
//! session: they are logged, and answered with an empty-but-valid reply
//! exactly when the client is waiting for one (e.g. an empty `BankState`
//! for a GPIO read on a GPIO-less adapter). I/O, protocol and adapter
//! faults do end the session; see [`session::SessionError`].
//!
//! ## Basic Usage
//!
//! ```ignore
//! use jtagd_adapter::loopback::LoopbackAdapter;
//! use jtagd_server::server::{Config, Server};
//!
//! let server = Server::new(LoopbackAdapter::new(), Config::default());
//! server.listen("127.0.0.1:50123")?;
//! ```
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics: connection lifecycle at
//! `info`, capability warnings at `warn`, per-message traces at `trace`.
//! Install an implementation such as `env_logger` in the binary.

pub mod server;
pub mod session;
pub mod xvc;

pub use server::{Builder, Config, Server};
pub use session::{Session, SessionError};
